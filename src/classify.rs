//! Success/failure classification of captured subprocess output.
//!
//! Neither wrapped tool has an exit-code contract worth trusting: the mesh
//! converter has been seen exiting 0 right after printing an error. The
//! verdict is therefore read from the text itself, behind a small trait so a
//! stricter check can replace the heuristic without touching the pipeline.

/// Substrings that mark a conversion as failed when they appear anywhere.
pub const DEFAULT_FAILURE_INDICATORS: [&str; 4] =
    ["Error", "Exception", "Failed", "self intersecting"];

/// Prefix the generator prints on its last line after a clean run.
pub const GENERATION_DONE_PREFIX: &str = "Done.";

/// Maps the captured lines of one process run to a failure verdict.
pub trait OutputClassifier: Send + Sync {
    fn is_failure(&self, lines: &[String]) -> bool;
}

impl<F> OutputClassifier for F
where
    F: Fn(&[String]) -> bool + Send + Sync,
{
    fn is_failure(&self, lines: &[String]) -> bool {
        self(lines)
    }
}

/// Flags failure when any line contains one of the indicator substrings.
///
/// Matching is case-sensitive, so `error:` in lower case passes.
#[derive(Debug, Clone)]
pub struct FailureIndicators {
    indicators: Vec<String>,
}

impl FailureIndicators {
    pub fn new<I, S>(indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indicators: indicators.into_iter().map(Into::into).collect(),
        }
    }

    /// First indicator found in `lines`, if any.
    pub fn first_match<'a>(&'a self, lines: &[String]) -> Option<&'a str> {
        lines.iter().find_map(|line| {
            self.indicators
                .iter()
                .find(|indicator| line.contains(indicator.as_str()))
                .map(String::as_str)
        })
    }
}

impl Default for FailureIndicators {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_INDICATORS)
    }
}

impl OutputClassifier for FailureIndicators {
    fn is_failure(&self, lines: &[String]) -> bool {
        self.first_match(lines).is_some()
    }
}

/// Accepts output only when its last non-blank line starts with a prefix.
///
/// Unlike [`FailureIndicators`] nothing before the last line matters, and
/// empty output is a failure.
#[derive(Debug, Clone)]
pub struct LastLinePrefix {
    prefix: String,
}

impl LastLinePrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn generation_done() -> Self {
        Self::new(GENERATION_DONE_PREFIX)
    }

    pub fn last_non_blank(lines: &[String]) -> Option<&str> {
        lines
            .iter()
            .rev()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
    }
}

impl OutputClassifier for LastLinePrefix {
    fn is_failure(&self, lines: &[String]) -> bool {
        !Self::last_non_blank(lines).is_some_and(|line| line.starts_with(&self.prefix))
    }
}
