//! Moves a previous output directory out of the generator's way.
use crate::util::now_epoch_ms;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Rename `out_dir` to a timestamped sibling and return the new path.
///
/// Returns `None` when there is nothing to back up.
pub fn backup_output_dir(out_dir: &Path) -> Result<Option<PathBuf>> {
    if !out_dir.exists() {
        return Ok(None);
    }
    let target = backup_path(out_dir, now_epoch_ms()?);
    fs::rename(out_dir, &target)
        .with_context(|| format!("move {} to {}", out_dir.display(), target.display()))?;
    tracing::info!(from = %out_dir.display(), to = %target.display(), "backed up output directory");
    Ok(Some(target))
}

fn backup_path(out_dir: &Path, epoch_ms: u128) -> PathBuf {
    let name = out_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    out_dir.with_file_name(format!("{name}.bak-{epoch_ms}"))
}
