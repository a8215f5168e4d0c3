//! Run-scoped log files.
//!
//! Every run owns one aggregate log (`run_<RunId>.log`) and one log per stage
//! (`<stage>_<RunId>.log`). Each entry is a single `[YYYY-MM-DD HH:MM:SS] message`
//! line flushed as soon as it is written, so a killed run still leaves a
//! complete record up to the moment it died.

use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::debug;

use wordflow_shared::{Result, RunId, StageName, WordflowError};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// An append-only log file.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: File,
}

impl LogFile {
    /// Open `path` for appending, creating it (and its parent) if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WordflowError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| WordflowError::io(&path, e))?;
        Ok(Self { path, file })
    }

    /// Append one timestamped line and flush it.
    pub fn line(&mut self, message: impl Display) -> Result<()> {
        let stamp = Local::now().format(TIMESTAMP_FORMAT);
        writeln!(self.file, "[{stamp}] {message}")
            .and_then(|()| self.file.flush())
            .map_err(|e| WordflowError::io(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Allocates the run id and owns the aggregate log.
#[derive(Debug)]
pub struct RunLogger {
    log_dir: PathBuf,
    run_id: RunId,
    aggregate: LogFile,
}

impl RunLogger {
    /// Claim a run id and create its aggregate log.
    ///
    /// When an aggregate log for `requested` already exists (two runs started
    /// within the same second) the id moves forward one second at a time until
    /// a free one is found, so no log is ever shared between runs.
    pub fn begin_run(log_dir: &Path, requested: RunId) -> Result<Self> {
        std::fs::create_dir_all(log_dir).map_err(|e| WordflowError::io(log_dir, e))?;

        let mut run_id = requested;
        loop {
            let path = aggregate_path(log_dir, &run_id);
            match OpenOptions::new().create_new(true).append(true).open(&path) {
                Ok(file) => {
                    debug!(%run_id, path = %path.display(), "aggregate log created");
                    return Ok(Self {
                        log_dir: log_dir.to_path_buf(),
                        run_id,
                        aggregate: LogFile { path, file },
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => run_id = run_id.next(),
                Err(e) => return Err(WordflowError::io(&path, e)),
            }
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn aggregate_log(&mut self) -> &mut LogFile {
        &mut self.aggregate
    }

    pub fn stage_log_path(&self, stage: StageName) -> PathBuf {
        self.log_dir.join(format!("{stage}_{}.log", self.run_id))
    }

    /// Open the log of `stage` for this run.
    pub fn stage_log(&self, stage: StageName) -> Result<LogFile> {
        LogFile::open(self.stage_log_path(stage))
    }
}

fn aggregate_path(log_dir: &Path, run_id: &RunId) -> PathBuf {
    log_dir.join(format!("run_{run_id}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wordflow-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn run_id(s: &str) -> RunId {
        s.parse().unwrap()
    }

    #[test]
    fn lines_are_timestamped() {
        let tmp = temp_dir();
        let mut log = LogFile::open(tmp.join("nested").join("a.log")).unwrap();
        log.line("first").unwrap();
        log.line(format_args!("code {}", 2)).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('[') && lines[0].ends_with("] first"));
        assert_eq!(lines[1].len(), "[2024-01-05 09:30:00] code 2".len());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn begin_run_creates_aggregate_log() {
        let tmp = temp_dir();
        let mut logger = RunLogger::begin_run(&tmp, run_id("20240105093000")).unwrap();
        logger.aggregate_log().line("start").unwrap();

        assert!(tmp.join("run_20240105093000.log").is_file());
        assert_eq!(
            logger.stage_log_path(StageName::Structure),
            tmp.join("structure_20240105093000.log")
        );

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn colliding_run_id_moves_forward() {
        let tmp = temp_dir();
        let first = RunLogger::begin_run(&tmp, run_id("20240105093059")).unwrap();
        let second = RunLogger::begin_run(&tmp, run_id("20240105093059")).unwrap();

        assert_eq!(first.run_id().as_str(), "20240105093059");
        assert_eq!(second.run_id().as_str(), "20240105093100");

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn stage_log_appends() {
        let tmp = temp_dir();
        let logger = RunLogger::begin_run(&tmp, run_id("20240105093000")).unwrap();
        logger.stage_log(StageName::Extract).unwrap().line("one").unwrap();
        logger.stage_log(StageName::Extract).unwrap().line("two").unwrap();

        let content = std::fs::read_to_string(tmp.join("extract_20240105093000.log")).unwrap();
        assert_eq!(content.lines().count(), 2);

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
