//! Launching external steps and capturing their output.
//!
//! A step's stdout and stderr are drained concurrently and written to the
//! step's log line by line in arrival order, so the log reads chronologically
//! even when the tool interleaves the two streams.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use wordflow_shared::{EXIT_FATAL, Result, WordflowError};

use crate::logger::LogFile;

/// A fully-resolved command line ready to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Label used in logs (`extract`, `bootstrap`, ...).
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Version reported by the tool, if it answered the probe.
    pub version: Option<String>,
}

impl Step {
    /// Render as a shell-like string for log lines.
    pub fn display_command(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Values substituted into configured command arguments.
#[derive(Debug, Clone)]
pub struct Placeholders<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    pub run_id: &'a str,
    pub project_root: &'a Path,
}

/// Replace `{input}`, `{output}`, `{run_id}` and `{project_root}` in `args`.
pub fn expand_placeholders(args: &[String], values: &Placeholders<'_>) -> Vec<String> {
    args.iter()
        .map(|arg| {
            arg.replace("{input}", &values.input.display().to_string())
                .replace("{output}", &values.output.display().to_string())
                .replace("{run_id}", values.run_id)
                .replace("{project_root}", &values.project_root.display().to_string())
        })
        .collect()
}

/// Locate `program` the way a shell would.
///
/// A name containing a path separator is taken relative to `cwd`; a bare name
/// is searched on `PATH`.
pub fn resolve_tool(program: &str, cwd: &Path) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let path = cwd.join(candidate);
        return is_executable(&path).then_some(path);
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .flat_map(|dir| executable_names(program).map(move |name| dir.join(name)))
        .find(|path| is_executable(path))
}

#[cfg(windows)]
fn executable_names(program: &str) -> impl Iterator<Item = String> + '_ {
    ["", ".exe", ".cmd", ".bat"]
        .into_iter()
        .map(move |ext| format!("{program}{ext}"))
}

#[cfg(not(windows))]
fn executable_names(program: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(program.to_string())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// How long a tool may take to answer the version probe.
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ask a tool for its version; the first non-blank output line wins.
pub async fn probe_version(program: &Path, args: &[String], cwd: &Path) -> Option<String> {
    probe_version_within(program, args, cwd, VERSION_PROBE_TIMEOUT).await
}

async fn probe_version_within(program: &Path, args: &[String], cwd: &Path, limit: Duration) -> Option<String> {
    let probe = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = match tokio::time::timeout(limit, probe).await {
        Ok(output) => output
            .inspect_err(|e| debug!(program = %program.display(), error = %e, "version probe failed"))
            .ok()?,
        Err(_) => {
            warn!(program = %program.display(), timeout = ?limit, "version probe timed out");
            return None;
        }
    };

    [&output.stdout, &output.stderr]
        .into_iter()
        .flat_map(|bytes| String::from_utf8_lossy(bytes).lines().map(str::to_string).collect::<Vec<_>>())
        .map(|line| line.trim().to_string())
        .find(|line| !line.is_empty())
}

enum Captured {
    Line(String),
    Failed(std::io::Error),
}

async fn drain<R: AsyncRead + Unpin>(reader: R, tx: mpsc::UnboundedSender<Captured>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if tx.send(Captured::Line(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Captured::Failed(e));
                break;
            }
        }
    }
}

/// Run `step` to completion, capturing all of its output into `log`.
///
/// Returns the process exit code. A process ended by a signal reports
/// [`EXIT_FATAL`].
#[instrument(skip_all, fields(step = %step.label))]
pub async fn run_captured(step: &Step, log: &mut LogFile) -> Result<i32> {
    debug!(command = %step.display_command(), cwd = %step.cwd.display(), "launching");

    let mut child = Command::new(&step.program)
        .args(&step.args)
        .current_dir(&step.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => WordflowError::ToolNotFound {
                program: step.program.display().to_string(),
            },
            _ => WordflowError::stage(&step.label, format!("failed to launch: {e}")),
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| WordflowError::stage(&step.label, "failed to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| WordflowError::stage(&step.label, "failed to capture stderr"))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let out_task = tokio::spawn(drain(stdout, tx.clone()));
    let err_task = tokio::spawn(drain(stderr, tx));

    // The channel closes once both streams reach end of file.
    while let Some(captured) = rx.recv().await {
        match captured {
            Captured::Line(line) => log.line(line)?,
            Captured::Failed(e) => {
                warn!(error = %e, "output capture interrupted");
                log.line(format_args!("output capture interrupted: {e}"))?;
            }
        }
    }
    let _ = tokio::join!(out_task, err_task);

    let status = child
        .wait()
        .await
        .map_err(|e| WordflowError::stage(&step.label, format!("failed to wait for process: {e}")))?;
    let code = status.code().unwrap_or(i32::from(EXIT_FATAL));
    debug!(code, "step finished");
    Ok(code)
}
