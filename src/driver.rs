//! Generate-then-convert build flow.
//!
//! Generation is a single blocking run whose output streams straight
//! through. Conversion only starts once the generator's last line says it
//! finished cleanly.
use crate::backup::backup_output_dir;
use crate::classify::{FailureIndicators, LastLinePrefix, OutputClassifier};
use crate::config::{BuildConfig, GenerationConfig};
use crate::pipeline::{ConversionPipeline, PipelineOutcome};
use crate::process::{Echo, ProcessRunner};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationReport {
    Skipped,
    Succeeded {
        #[serde(skip_serializing_if = "Option::is_none")]
        backup: Option<PathBuf>,
    },
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        backup: Option<PathBuf>,
        last_line: Option<String>,
        exit_code: Option<i32>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub generation: GenerationReport,
    /// Absent when generation failed and conversion never ran.
    pub conversion: Option<PipelineOutcome>,
}

impl BuildReport {
    pub fn succeeded(&self) -> bool {
        !matches!(self.generation, GenerationReport::Failed { .. })
            && self
                .conversion
                .as_ref()
                .is_some_and(PipelineOutcome::succeeded)
    }
}

pub async fn run_build(config: &BuildConfig) -> Result<BuildReport> {
    let generation = match &config.generation {
        Some(generation) => run_generation(config, generation).await?,
        None => GenerationReport::Skipped,
    };
    if matches!(generation, GenerationReport::Failed { .. }) {
        tracing::error!("generation failed, skipping conversion");
        return Ok(BuildReport {
            generation,
            conversion: None,
        });
    }

    let pipeline = ConversionPipeline::new(
        config.converter.clone(),
        config.layout.clone(),
        Arc::new(FailureIndicators::default()),
        ProcessRunner::new().with_timeout(config.job_timeout),
    );
    let outcome = pipeline.run().await?;
    tracing::info!(
        total = outcome.total,
        failed = outcome.failed_names.len(),
        "conversion finished"
    );
    Ok(BuildReport {
        generation,
        conversion: Some(outcome),
    })
}

async fn run_generation(
    config: &BuildConfig,
    generation: &GenerationConfig,
) -> Result<GenerationReport> {
    let backup = if generation.backup {
        backup_output_dir(&config.out_dir)?
    } else {
        None
    };

    // Keep stdout clean for the JSON report.
    let echo = if config.json { Echo::Stderr } else { Echo::Stdout };
    let argv = config.generator_argv(generation);
    tracing::info!(
        project = %config.project_dir.display(),
        out_dir = %config.out_dir.display(),
        "running generator"
    );
    let output = ProcessRunner::new()
        .with_echo(echo)
        .run(&generation.generator.program, &argv)
        .await
        .context("run layout generator")?;

    let gate = LastLinePrefix::generation_done();
    if gate.is_failure(&output.lines) {
        let last_line = LastLinePrefix::last_non_blank(&output.lines).map(str::to_string);
        tracing::error!(
            last_line = last_line.as_deref().unwrap_or("<no output>"),
            exit_code = output.exit_code,
            "generator did not report completion"
        );
        return Ok(GenerationReport::Failed {
            backup,
            last_line,
            exit_code: output.exit_code,
        });
    }
    Ok(GenerationReport::Succeeded { backup })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolCommand;
    use crate::pipeline::ArtifactLayout;
    use std::fs;
    use std::path::Path;

    const FAKE_CONVERTER: &str = r#"
touch "$(dirname "$0")/converter-ran"
echo "solid" > "$3"
"#;

    fn generator_script(last_line: &str) -> String {
        format!(
            r#"
out="$2"
mkdir -p "$out/cases"
echo "cube()" > "$out/cases/left.jscad"
echo "cube()" > "$out/cases/right.jscad"
echo "Writing cases..."
echo "{last_line}"
"#
        )
    }

    fn config(root: &Path, last_line: &str, backup: bool) -> BuildConfig {
        let project_dir = root.join("board");
        fs::create_dir_all(&project_dir).expect("project dir");
        let generator = root.join("generate.sh");
        fs::write(&generator, generator_script(last_line)).expect("write generator");
        let converter = root.join("convert.sh");
        fs::write(&converter, FAKE_CONVERTER).expect("write converter");
        let out_dir = project_dir.join("output");
        BuildConfig {
            layout: ArtifactLayout::for_out_dir(&out_dir),
            project_dir,
            out_dir,
            converter: ToolCommand::new("/bin/sh", vec![converter.display().to_string()]),
            job_timeout: None,
            json: true,
            generation: Some(GenerationConfig {
                generator: ToolCommand::new("/bin/sh", vec![generator.display().to_string()]),
                debug: false,
                clean: false,
                backup,
            }),
        }
    }

    #[tokio::test]
    async fn successful_generation_runs_conversion() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config(temp.path(), "Done.", false);
        let report = run_build(&config).await.expect("build");

        assert!(report.succeeded());
        let outcome = report.conversion.expect("conversion ran");
        assert_eq!(outcome.total, 2);
        assert!(config.layout.output_dir.join("left.stl").is_file());
        assert!(config.layout.output_dir.join("right.stl").is_file());
    }

    #[tokio::test]
    async fn unexpected_last_line_blocks_conversion() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config(temp.path(), "Done with 2 warnings", false);
        let report = run_build(&config).await.expect("build");

        assert!(!report.succeeded());
        assert!(report.conversion.is_none());
        match report.generation {
            GenerationReport::Failed { last_line, .. } => {
                assert_eq!(last_line.as_deref(), Some("Done with 2 warnings"));
            }
            other => panic!("expected failed generation, got {other:?}"),
        }
        assert!(!temp.path().join("converter-ran").exists());
    }

    #[tokio::test]
    async fn last_line_decides_even_with_nonzero_exit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config(temp.path(), "Done.", false);
        let generator = temp.path().join("generate.sh");
        let mut body = fs::read_to_string(&generator).expect("read generator");
        body.push_str("exit 2\n");
        fs::write(&generator, body).expect("rewrite generator");

        let report = run_build(&config).await.expect("build");
        assert!(matches!(report.generation, GenerationReport::Succeeded { .. }));
        assert!(report.succeeded());
        assert_eq!(report.conversion.map(|outcome| outcome.total), Some(2));
    }

    #[tokio::test]
    async fn generator_launch_failure_is_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = config(temp.path(), "Done.", false);
        if let Some(generation) = config.generation.as_mut() {
            generation.generator = ToolCommand::new("/nonexistent/generator", vec![]);
        }
        let err = run_build(&config).await.expect_err("launch must fail");
        assert!(format!("{err:#}").contains("failed to launch"));
        assert!(!temp.path().join("converter-ran").exists());
    }

    #[tokio::test]
    async fn backup_moves_previous_output_before_generating() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = config(temp.path(), "Done.", true);
        fs::create_dir_all(&config.out_dir).expect("old output");
        fs::write(config.out_dir.join("stale.txt"), "old").expect("write stale");

        let report = run_build(&config).await.expect("build");
        let GenerationReport::Succeeded { backup: Some(backup) } = &report.generation else {
            panic!("expected a backup path, got {:?}", report.generation);
        };
        assert!(backup.join("stale.txt").is_file());
        assert!(!config.out_dir.join("stale.txt").exists());
        assert!(report.succeeded());
    }

    #[tokio::test]
    async fn convert_only_skips_generation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = config(temp.path(), "never printed", false);
        config.generation = None;
        fs::create_dir_all(&config.layout.input_dir).expect("cases dir");
        fs::write(config.layout.input_dir.join("plate.jscad"), "cube()").expect("write");

        let report = run_build(&config).await.expect("build");
        assert!(matches!(report.generation, GenerationReport::Skipped));
        assert!(report.succeeded());
        assert_eq!(report.conversion.map(|outcome| outcome.total), Some(1));
    }
}
