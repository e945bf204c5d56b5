use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod backup;
mod classify;
mod cli;
mod config;
mod driver;
mod pipeline;
mod process;
mod report;
mod util;

use cli::{Command, RootArgs};
use config::BuildConfig;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = RootArgs::parse();
    init_tracing(args.command.common().verbose);

    let config = match &args.command {
        Command::Build(build) => BuildConfig::for_build(build)?,
        Command::Convert(convert) => BuildConfig::for_convert(&convert.common)?,
    };
    let report = driver::run_build(&config).await?;
    report::print_report(&report, config.json, &config.project_dir)?;

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "kbd_build=debug"
    } else {
        "kbd_build=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
