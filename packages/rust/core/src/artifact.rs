//! Error artifact writer.
//!
//! An artifact sits beside the normal output it replaces or complements and
//! is named `<output stem>_ERROR.txt`. Its content is an [`ErrorRecord`] as
//! pretty JSON.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use wordflow_shared::{ERROR_SUFFIX, ErrorRecord, Result, WordflowError};

/// Path of the artifact paired with output stem `stem` in `area`.
pub fn artifact_path(area: &Path, stem: &str) -> PathBuf {
    area.join(format!("{stem}{ERROR_SUFFIX}.txt"))
}

/// Write (or extend) the error artifact for `stem` in `area`.
///
/// A second write for the same unit or partition within one run appends the
/// new causes and context to the existing record; a record left by an earlier
/// run is replaced. A file at the artifact path that is not an error record is
/// left untouched and reported as a validation error.
#[instrument(skip_all, fields(area = %area.display(), stem = %stem))]
pub fn write_error(area: &Path, stem: &str, record: ErrorRecord) -> Result<PathBuf> {
    std::fs::create_dir_all(area).map_err(|e| WordflowError::io(area, e))?;
    let target = artifact_path(area, stem);

    let record = match std::fs::read_to_string(&target) {
        Ok(existing) => {
            let mut merged: ErrorRecord = serde_json::from_str(&existing).map_err(|e| {
                WordflowError::validation(format!(
                    "refusing to overwrite {}: not an error record ({e})",
                    target.display()
                ))
            })?;
            if merged.run_id != record.run_id {
                debug!(previous = %merged.run_id, "replacing error record of an earlier run");
                record
            } else {
                merged.causes.extend(record.causes);
                merged.context.extend(record.context);
                if merged.source_sha256.is_none() {
                    merged.source_sha256 = record.source_sha256;
                }
                merged
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => record,
        Err(e) => return Err(WordflowError::io(&target, e)),
    };

    let json = serde_json::to_string_pretty(&record)
        .map_err(|e| WordflowError::parse(format!("failed to serialize error record: {e}")))?;
    write_atomic(&target, &format!("{json}\n"))?;

    debug!(path = %target.display(), causes = record.causes.len(), "wrote error artifact");
    Ok(target)
}

/// Remove the error artifact for `stem` once the unit has produced its normal
/// output. Returns the removed path; a file that is not an error record stays.
pub fn clear_error(area: &Path, stem: &str) -> Result<Option<PathBuf>> {
    let target = artifact_path(area, stem);
    if !target.is_file() {
        return Ok(None);
    }
    if let Err(e) = read_error(&target) {
        warn!(path = %target.display(), error = %e, "not an error record, left in place");
        return Ok(None);
    }
    std::fs::remove_file(&target).map_err(|e| WordflowError::io(&target, e))?;
    debug!(path = %target.display(), "cleared stale error artifact");
    Ok(Some(target))
}

/// Read an artifact back.
pub fn read_error(path: &Path) -> Result<ErrorRecord> {
    let content = std::fs::read_to_string(path).map_err(|e| WordflowError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| WordflowError::parse(format!("invalid error record {}: {e}", path.display())))
}

/// Write to a hidden temp file beside `target`, then rename over it.
pub(crate) fn write_atomic(target: &Path, content: &str) -> Result<()> {
    let file_name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| WordflowError::validation(format!("invalid output path {}", target.display())))?;
    let temp = target.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&temp, content).map_err(|e| WordflowError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| WordflowError::io(target, e))
}
