//! Artifact-presence check over every output area.
//!
//! Output completeness is judged by the presence of error artifacts, not by
//! exit codes: a run can finish with exit 0 and still leave units or
//! partitions behind as `*_ERROR.txt`.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, instrument};

use wordflow_shared::{ErrorRecord, Result, RunId, StageName, WordflowError, is_error_artifact_name};

use crate::artifact::read_error;
use crate::handoff::list_files;
use crate::run::RunContext;

/// One error artifact found on disk.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactEntry {
    pub stage: StageName,
    pub path: PathBuf,
    /// Parsed content; `None` when the file is not a readable record.
    pub record: Option<ErrorRecord>,
}

/// Find error artifacts in every stage's output area.
///
/// With `run_id`, the final stage is limited to that run's folder and earlier
/// stages to records written by that run; otherwise everything is reported.
/// A file that is not a readable record is always reported.
#[instrument(skip_all, fields(run_id = run_id.map(RunId::as_str)))]
pub fn scan_artifacts(ctx: &RunContext, run_id: Option<&RunId>) -> Result<Vec<ArtifactEntry>> {
    let mut found = Vec::new();
    for def in ctx.stages() {
        let areas = if def.name().is_final() {
            match run_id {
                Some(id) => vec![def.run_output_area(id)],
                None => run_folders(&def.output_area)?,
            }
        } else {
            vec![def.output_area.clone()]
        };

        for area in areas.iter().filter(|a| a.is_dir()) {
            for path in list_files(area)? {
                let is_artifact = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(is_error_artifact_name);
                if !is_artifact {
                    continue;
                }
                let record = read_error(&path)
                    .inspect_err(|e| debug!(path = %path.display(), error = %e, "unreadable artifact"))
                    .ok();
                let other_run = match (run_id, &record) {
                    (Some(id), Some(rec)) => &rec.run_id != id,
                    _ => false,
                };
                if other_run {
                    continue;
                }
                found.push(ArtifactEntry {
                    stage: def.name(),
                    path,
                    record,
                });
            }
        }
    }
    Ok(found)
}

fn run_folders(output_area: &Path) -> Result<Vec<PathBuf>> {
    if !output_area.is_dir() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(output_area).map_err(|e| WordflowError::io(output_area, e))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| WordflowError::io(output_area, e))?.path();
        let is_run = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.parse::<RunId>().is_ok());
        if path.is_dir() && is_run {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wordflow_shared::AppConfig;

    use crate::artifact::write_error;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wordflow-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn finds_artifacts_per_stage_and_run() {
        let tmp = temp_dir();
        let run_a: RunId = "20240105093000".parse().unwrap();
        let run_b: RunId = "20240106093000".parse().unwrap();
        let ctx = RunContext::new(run_a.clone(), &tmp, AppConfig::default(), None);

        let structure = ctx.stage(StageName::Structure);
        let split = ctx.stage(StageName::Split);
        let rec = |stage, run: &RunId| ErrorRecord::new("B.txt", None, stage, run.clone(), "boom");
        write_error(&structure.output_area, "B", rec(StageName::Structure, &run_a)).unwrap();
        write_error(&split.run_output_area(&run_a), "HR", rec(StageName::Split, &run_a)).unwrap();
        write_error(&split.run_output_area(&run_b), "HR", rec(StageName::Split, &run_b)).unwrap();
        std::fs::write(split.run_output_area(&run_a).join("Sales.txt"), "ok\n").unwrap();

        let all = scan_artifacts(&ctx, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].stage, StageName::Structure);
        assert!(all.iter().all(|a| a.record.is_some()));

        let only_a = scan_artifacts(&ctx, Some(&run_a)).unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a[1].path.ends_with("20240105093000/HR_ERROR.txt"));

        let only_b = scan_artifacts(&ctx, Some(&run_b)).unwrap();
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].stage, StageName::Split);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn empty_project_has_no_artifacts() {
        let tmp = temp_dir();
        let ctx = RunContext::new("20240105093000".parse().unwrap(), &tmp, AppConfig::default(), None);
        assert!(scan_artifacts(&ctx, None).unwrap().is_empty());
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
