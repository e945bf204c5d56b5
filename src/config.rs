//! Immutable build configuration.
//!
//! Everything the driver and pipeline need is resolved here exactly once:
//! paths are made absolute, tool commands are split and looked up on PATH.
//! Downstream code never consults the environment or the CLI again.
use crate::cli::{BuildArgs, CommonArgs};
use crate::pipeline::ArtifactLayout;
use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default name of the output directory inside the project.
pub const DEFAULT_OUT_DIR_NAME: &str = "output";

/// An external program plus the leading arguments that always precede the
/// per-invocation ones (e.g. `node path/to/cli.js`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split `command` shell-style and resolve its program on PATH.
    pub fn resolve(role: &str, command: &str) -> Result<Self> {
        let mut words = shell_words::split(command)
            .with_context(|| format!("parse {role} command: {command}"))?;
        if words.is_empty() {
            bail!("{role} command is empty");
        }
        let program = words.remove(0);
        let resolved = which::which(&program)
            .map_err(|err| anyhow!("required {role} tool not found: {program} ({err})"))?;
        Ok(Self::new(resolved, words))
    }

    /// Leading arguments followed by `extra`.
    pub fn argv<I, S>(&self, extra: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = self.args.clone();
        argv.extend(extra.into_iter().map(Into::into));
        argv
    }
}

/// Settings that only exist for the generation step.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub generator: ToolCommand,
    pub debug: bool,
    pub clean: bool,
    pub backup: bool,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub project_dir: PathBuf,
    pub out_dir: PathBuf,
    pub converter: ToolCommand,
    pub layout: ArtifactLayout,
    pub job_timeout: Option<Duration>,
    pub json: bool,
    /// `None` for convert-only runs.
    pub generation: Option<GenerationConfig>,
}

impl BuildConfig {
    pub fn for_build(args: &BuildArgs) -> Result<Self> {
        let mut config = Self::from_common(&args.common)?;
        config.generation = Some(GenerationConfig {
            generator: ToolCommand::resolve("generator", &args.generator)?,
            debug: args.debug,
            clean: args.clean,
            backup: args.backup,
        });
        Ok(config)
    }

    pub fn for_convert(args: &CommonArgs) -> Result<Self> {
        Self::from_common(args)
    }

    fn from_common(args: &CommonArgs) -> Result<Self> {
        let project_dir = resolve_project_dir(&args.project_dir)?;
        let out_dir = match &args.out_dir {
            Some(dir) => absolutize(dir)?,
            None => project_dir.join(DEFAULT_OUT_DIR_NAME),
        };
        if args.job_timeout == Some(0) {
            bail!("--job-timeout must be greater than 0");
        }
        let converter = ToolCommand::resolve("converter", &args.converter)?;
        Ok(Self {
            layout: ArtifactLayout::for_out_dir(&out_dir),
            project_dir,
            out_dir,
            converter,
            job_timeout: args.job_timeout.map(Duration::from_secs),
            json: args.json,
            generation: None,
        })
    }

    /// Arguments passed to the generator after its own leading arguments.
    pub fn generator_argv(&self, generation: &GenerationConfig) -> Vec<String> {
        let mut extra = vec!["-o".to_string(), self.out_dir.display().to_string()];
        if generation.debug {
            extra.push("--debug".to_string());
        }
        if generation.clean {
            extra.push("--clean".to_string());
        }
        extra.push(self.project_dir.display().to_string());
        generation.generator.argv(extra)
    }
}

fn resolve_project_dir(path: &Path) -> Result<PathBuf> {
    let resolved = path
        .canonicalize()
        .with_context(|| format!("resolve project directory {}", path.display()))?;
    if !resolved.is_dir() {
        bail!("project path is not a directory: {}", resolved.display());
    }
    Ok(resolved)
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("read current directory")?;
    Ok(cwd.join(path))
}
