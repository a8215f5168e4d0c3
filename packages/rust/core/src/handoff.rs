//! Moving finished outputs forward.
//!
//! Handoff copies each normal output into the next stage's input area and
//! only then moves the original into the done area. A run killed between the
//! two steps leaves a valid copy downstream and the source still in place.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, instrument, warn};

use wordflow_shared::{Result, RunId, WordflowError, is_error_artifact_name};

/// What a handoff moved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandoffReport {
    /// File names copied into the next input area.
    pub copied: Vec<String>,
    /// Final locations of the archived sources.
    pub archived: Vec<PathBuf>,
    /// Error artifacts left in place.
    pub skipped_artifacts: Vec<String>,
}

/// Hand every normal output in `from` to `to`, archiving sources into `done`.
#[instrument(skip_all, fields(from = %from.display(), to = %to.display()))]
pub fn handoff(from: &Path, to: &Path, done: &Path, run_id: &RunId) -> Result<HandoffReport> {
    let mut report = HandoffReport::default();
    std::fs::create_dir_all(to).map_err(|e| WordflowError::io(to, e))?;
    if !from.is_dir() {
        warn!("output area missing, nothing to hand off");
        return Ok(report);
    }

    for path in list_files(from)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if is_error_artifact_name(&name) {
            report.skipped_artifacts.push(name);
            continue;
        }

        let target = to.join(&name);
        std::fs::copy(&path, &target).map_err(|e| WordflowError::io(&target, e))?;
        let archived = archive_into(&path, done, run_id)?;
        report.copied.push(name);
        report.archived.push(archived);
    }

    info!(
        copied = report.copied.len(),
        artifacts = report.skipped_artifacts.len(),
        "handoff complete"
    );
    Ok(report)
}

/// Regular files directly inside `dir`, sorted by name.
pub(crate) fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| WordflowError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| WordflowError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Move `path` into `done`, never replacing an archived file.
///
/// A name already present in `done` is archived as `<stem>_<run_id>.<ext>`.
pub(crate) fn archive_into(path: &Path, done: &Path, run_id: &RunId) -> Result<PathBuf> {
    std::fs::create_dir_all(done).map_err(|e| WordflowError::io(done, e))?;
    let name = path
        .file_name()
        .ok_or_else(|| WordflowError::validation(format!("cannot archive {}", path.display())))?;

    let mut target = done.join(name);
    if target.exists() {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let renamed = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}_{run_id}.{ext}"),
            None => format!("{stem}_{run_id}"),
        };
        target = done.join(renamed);
    }
    std::fs::rename(path, &target).map_err(|e| WordflowError::io(&target, e))?;
    Ok(target)
}
