//! Human and JSON rendering of a finished build.
use crate::driver::{BuildReport, GenerationReport};
use crate::pipeline::PipelineOutcome;
use crate::util::display_path;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;

pub fn print_report(report: &BuildReport, json: bool, base: &Path) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    let written = if json {
        writeln!(stdout, "{}", serde_json::to_string_pretty(report)?)
    } else {
        write!(stdout, "{}", render_text(report, base))
    };
    written.context("write report")
}

pub fn render_text(report: &BuildReport, base: &Path) -> String {
    let mut out = String::new();
    match &report.generation {
        GenerationReport::Skipped => {}
        GenerationReport::Succeeded { backup } => {
            if let Some(backup) = backup {
                out.push_str(&format!("backup: {}\n", display_path(backup, Some(base))));
            }
        }
        GenerationReport::Failed {
            backup,
            last_line,
            exit_code,
        } => {
            if let Some(backup) = backup {
                out.push_str(&format!("backup: {}\n", display_path(backup, Some(base))));
            }
            let last_line = last_line.as_deref().unwrap_or("<no output>");
            out.push_str(&format!(
                "generation failed: expected a final \"Done.\" line, got: {last_line}\n"
            ));
            if let Some(code) = exit_code {
                out.push_str(&format!("generator exit status: {code}\n"));
            }
            out.push_str("conversion skipped\n");
        }
    }
    if let Some(outcome) = &report.conversion {
        render_outcome(&mut out, outcome, base);
    }
    out
}

fn render_outcome(out: &mut String, outcome: &PipelineOutcome, base: &Path) {
    if outcome.total == 0 {
        out.push_str("no case files to convert\n");
        return;
    }
    for failure in outcome.failures() {
        out.push_str(&format!("=== {} failed ===\n", failure.display_name));
        for line in &failure.raw_output {
            out.push_str(&format!("{line}\n"));
        }
    }
    let converted = outcome.total - outcome.failed_names.len();
    out.push_str(&format!("converted {converted}/{}\n", outcome.total));
    if outcome.succeeded() {
        let mesh_dir = outcome
            .results
            .first()
            .and_then(|first| first.output_path.parent());
        if let Some(dir) = mesh_dir {
            out.push_str(&format!("meshes in {}\n", display_path(dir, Some(base))));
        }
    } else {
        out.push_str(&format!("failed: {}\n", outcome.failed_names.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::JobResult;
    use std::path::PathBuf;

    fn result(name: &str, failed: bool, output: &[&str]) -> JobResult {
        JobResult {
            display_name: name.to_string(),
            output_path: PathBuf::from("/board/output/cases/stl")
                .join(name.replace(".jscad", ".stl")),
            raw_output: output.iter().map(|line| line.to_string()).collect(),
            exit_code: Some(0),
            failed,
        }
    }

    #[test]
    fn failed_conversions_list_name_and_output() {
        let report = BuildReport {
            generation: GenerationReport::Succeeded { backup: None },
            conversion: Some(PipelineOutcome {
                total: 2,
                failed_names: vec!["b.jscad".to_string()],
                results: vec![
                    result("a.jscad", false, &["wrote a.stl"]),
                    result("b.jscad", true, &["Error: self intersecting geometry"]),
                ],
            }),
        };
        let text = render_text(&report, Path::new("/board"));
        assert!(text.contains("=== b.jscad failed ===\nError: self intersecting geometry\n"));
        assert!(!text.contains("a.jscad failed"));
        assert!(text.contains("converted 1/2"));
        assert!(text.ends_with("failed: b.jscad\n"));
    }

    #[test]
    fn clean_run_names_mesh_directory() {
        let report = BuildReport {
            generation: GenerationReport::Skipped,
            conversion: Some(PipelineOutcome {
                total: 1,
                failed_names: Vec::new(),
                results: vec![result("a.jscad", false, &[])],
            }),
        };
        let text = render_text(&report, Path::new("/board"));
        assert_eq!(text, "converted 1/1\nmeshes in output/cases/stl\n");
    }

    #[test]
    fn generation_failure_names_the_last_line() {
        let report = BuildReport {
            generation: GenerationReport::Failed {
                backup: None,
                last_line: Some("Done with 2 warnings".to_string()),
                exit_code: Some(0),
            },
            conversion: None,
        };
        let text = render_text(&report, Path::new("/board"));
        assert!(text.contains("got: Done with 2 warnings"));
        assert!(text.ends_with("conversion skipped\n"));
    }

    #[test]
    fn json_report_tags_generation_status() {
        let report = BuildReport {
            generation: GenerationReport::Failed {
                backup: None,
                last_line: None,
                exit_code: None,
            },
            conversion: None,
        };
        let value = serde_json::to_value(&report).expect("serialize");
        assert_eq!(value["generation"]["status"], "failed");
        assert!(value["conversion"].is_null());
    }
}
