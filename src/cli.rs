//! CLI argument parsing for the case build.
//!
//! Arguments are only parsed here; defaults that depend on other values
//! (output directory, tool lookup) are resolved once in `config`.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Generator command used when neither `--generator` nor the env var is set.
pub const DEFAULT_GENERATOR: &str = "ergogen";

/// Converter command used when neither `--converter` nor the env var is set.
pub const DEFAULT_CONVERTER: &str = "openjscad";

#[derive(Parser, Debug)]
#[command(
    name = "kbd-build",
    version,
    about = "Generate a keyboard layout and convert its case files to meshes",
    after_help = "Examples:\n  kbd-build build ./my-board\n  kbd-build build ./my-board --clean --backup\n  kbd-build build . --generator 'node ../ergogen/src/cli.js'\n  kbd-build convert ./my-board --json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the generator, then convert every generated case file
    Build(BuildArgs),
    /// Convert case files already present in the output directory
    Convert(ConvertArgs),
}

impl Command {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Command::Build(args) => &args.common,
            Command::Convert(args) => &args.common,
        }
    }
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Project directory containing the layout config
    #[arg(value_name = "PROJECT_DIR", default_value = ".")]
    pub project_dir: PathBuf,

    /// Output directory (defaults to <PROJECT_DIR>/output)
    #[arg(long, short = 'o', value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Mesh converter command, split shell-style
    #[arg(long, value_name = "CMD", env = "KBD_BUILD_CONVERTER", default_value = DEFAULT_CONVERTER)]
    pub converter: String,

    /// Kill a conversion that runs longer than this many seconds
    #[arg(long, value_name = "SECS", env = "KBD_BUILD_JOB_TIMEOUT")]
    pub job_timeout: Option<u64>,

    /// Emit a machine-readable JSON report on stdout
    #[arg(long)]
    pub json: bool,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Layout generator command, split shell-style
    #[arg(long, value_name = "CMD", env = "KBD_BUILD_GENERATOR", default_value = DEFAULT_GENERATOR)]
    pub generator: String,

    /// Ask the generator for debug output
    #[arg(long)]
    pub debug: bool,

    /// Ask the generator to clean the output directory first
    #[arg(long)]
    pub clean: bool,

    /// Move an existing output directory aside before generating
    #[arg(long)]
    pub backup: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}
