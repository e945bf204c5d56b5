//! Parallel conversion of generated case files.
//!
//! Every discovered artifact becomes one job, and every job is one child
//! process in its own tokio task. The coordinator spawns them all, then
//! joins them all; nothing waits per job. Output paths are unique per
//! artifact, so jobs share no mutable state beyond the filesystem.
use crate::classify::OutputClassifier;
use crate::config::ToolCommand;
use crate::process::{CapturedOutput, ProcessError, ProcessRunner};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Subdirectory of the output directory that holds generated case files.
pub const CASES_DIR_NAME: &str = "cases";
pub const DEFAULT_ARTIFACT_EXT: &str = "jscad";
pub const DEFAULT_TARGET_SUBDIR: &str = "stl";
pub const DEFAULT_TARGET_EXT: &str = "stl";
/// Output format tag understood by the converter (ASCII STL).
pub const DEFAULT_FORMAT_TAG: &str = "stla";

/// Where artifacts are found and where their conversions go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub artifact_ext: String,
    pub target_ext: String,
    pub format_tag: String,
}

impl ArtifactLayout {
    pub fn for_out_dir(out_dir: &Path) -> Self {
        let input_dir = out_dir.join(CASES_DIR_NAME);
        Self {
            output_dir: input_dir.join(DEFAULT_TARGET_SUBDIR),
            input_dir,
            artifact_ext: DEFAULT_ARTIFACT_EXT.to_string(),
            target_ext: DEFAULT_TARGET_EXT.to_string(),
            format_tag: DEFAULT_FORMAT_TAG.to_string(),
        }
    }

    /// Artifact files directly inside `input_dir`, sorted by path.
    ///
    /// A missing input directory yields no artifacts.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        if !self.input_dir.exists() {
            tracing::debug!(dir = %self.input_dir.display(), "no artifact directory");
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.input_dir)
            .with_context(|| format!("list artifacts in {}", self.input_dir.display()))?;
        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("read entry in {}", self.input_dir.display()))?;
            let path = entry.path();
            let matches_ext = path
                .extension()
                .is_some_and(|ext| ext == self.artifact_ext.as_str());
            if matches_ext && path.is_file() {
                artifacts.push(path);
            }
        }
        artifacts.sort();
        Ok(artifacts)
    }

    pub fn job_for(&self, artifact: &Path) -> Job {
        let display_name = artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| artifact.display().to_string());
        let stem = artifact
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| display_name.clone());
        Job {
            input_path: artifact.to_path_buf(),
            output_path: self.output_dir.join(format!("{stem}.{}", self.target_ext)),
            display_name,
        }
    }
}

/// One conversion: a single artifact into a single output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub display_name: String,
}

impl Job {
    fn converter_argv(&self, converter: &ToolCommand, format_tag: &str) -> Vec<String> {
        converter.argv([
            self.input_path.display().to_string(),
            "-o".to_string(),
            self.output_path.display().to_string(),
            "-of".to_string(),
            format_tag.to_string(),
        ])
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub display_name: String,
    pub output_path: PathBuf,
    pub raw_output: Vec<String>,
    pub exit_code: Option<i32>,
    pub failed: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineOutcome {
    pub total: usize,
    /// Failed jobs in the order their results were collected.
    pub failed_names: Vec<String>,
    pub results: Vec<JobResult>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.failed_names.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|result| result.failed)
    }

    fn push(&mut self, result: JobResult) {
        if result.failed {
            self.failed_names.push(result.display_name.clone());
        }
        self.results.push(result);
    }
}

/// What a job's task hands back to the coordinator before classification.
enum JobRun {
    Finished(CapturedOutput),
    /// The runner gave up before producing output: launch, pipe or wait error.
    CouldNotRun(ProcessError),
}

pub struct ConversionPipeline {
    converter: Arc<ToolCommand>,
    layout: ArtifactLayout,
    classifier: Arc<dyn OutputClassifier>,
    runner: ProcessRunner,
}

impl ConversionPipeline {
    pub fn new(
        converter: ToolCommand,
        layout: ArtifactLayout,
        classifier: Arc<dyn OutputClassifier>,
        runner: ProcessRunner,
    ) -> Self {
        Self {
            converter: Arc::new(converter),
            layout,
            classifier,
            runner,
        }
    }

    pub async fn run(&self) -> Result<PipelineOutcome> {
        let artifacts = self.layout.discover()?;
        if artifacts.is_empty() {
            tracing::info!(dir = %self.layout.input_dir.display(), "no artifacts to convert");
            return Ok(PipelineOutcome::default());
        }

        // Created once up front so no job races another on mkdir.
        fs::create_dir_all(&self.layout.output_dir).with_context(|| {
            format!("create output directory {}", self.layout.output_dir.display())
        })?;

        let jobs: Vec<Job> = artifacts
            .iter()
            .map(|artifact| self.layout.job_for(artifact))
            .collect();
        tracing::info!(
            jobs = jobs.len(),
            converter = %self.converter.program.display(),
            "dispatching conversions"
        );

        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let handle = spawn_job(
                    self.runner,
                    Arc::clone(&self.converter),
                    &self.layout.format_tag,
                    &job,
                );
                (job, handle)
            })
            .collect();

        Ok(gather(handles, self.classifier.as_ref()).await)
    }
}

fn spawn_job(
    runner: ProcessRunner,
    converter: Arc<ToolCommand>,
    format_tag: &str,
    job: &Job,
) -> JoinHandle<JobRun> {
    let argv = job.converter_argv(&converter, format_tag);
    let name = job.display_name.clone();
    tokio::spawn(async move {
        match runner.run(&converter.program, &argv).await {
            Ok(output) => JobRun::Finished(output),
            Err(err) => {
                tracing::warn!(job = %name, error = %err, "conversion could not run");
                JobRun::CouldNotRun(err)
            }
        }
    })
}

/// Join every job and fold the results into one outcome.
async fn gather(
    handles: Vec<(Job, JoinHandle<JobRun>)>,
    classifier: &dyn OutputClassifier,
) -> PipelineOutcome {
    let mut outcome = PipelineOutcome {
        total: handles.len(),
        ..PipelineOutcome::default()
    };
    for (job, handle) in handles {
        let (raw_output, exit_code, failed) = match handle.await {
            Ok(JobRun::Finished(output)) => {
                let mut failed = classifier.is_failure(&output.lines);
                let mut raw_output = output.lines;
                if output.timed_out {
                    raw_output.push("conversion timed out and was killed".to_string());
                    failed = true;
                }
                (raw_output, output.exit_code, failed)
            }
            Ok(JobRun::CouldNotRun(err)) => (vec![err.to_string()], None, true),
            Err(err) => (vec![format!("conversion task aborted: {err}")], None, true),
        };
        tracing::debug!(job = %job.display_name, failed, exit_code, "conversion finished");
        outcome.push(JobResult {
            display_name: job.display_name,
            output_path: job.output_path,
            raw_output,
            exit_code,
            failed,
        });
    }
    outcome
}
