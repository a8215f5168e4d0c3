//! Pipeline orchestrator: runs extract → structure → split, one stage at a time.
//!
//! Every stage goes through a [`StageLauncher`], the single "launch a step,
//! capture its combined output, return its status" capability. The default
//! [`ProcessLauncher`] runs built-in stages by re-invoking the current
//! executable and configured external tools from `PATH`.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use wordflow_shared::{AppConfig, EXIT_FATAL, EXIT_OK, Result, RunId, StageName, WordflowError};

use crate::handoff::{HandoffReport, handoff};
use crate::logger::{LogFile, RunLogger};
use crate::process::{Placeholders, Step, expand_placeholders, probe_version, resolve_tool, run_captured};
use crate::run::{RunContext, StageDef};
use crate::runner::enumerate_units;

/// Label of the optional pre-stage step.
pub const BOOTSTRAP_LABEL: &str = "bootstrap";

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Resolves and launches stage steps.
#[allow(async_fn_in_trait)]
pub trait StageLauncher {
    /// Locate the tool of `stage`; [`WordflowError::ToolNotFound`] when it is missing.
    async fn resolve(&self, ctx: &RunContext, stage: &StageDef) -> Result<Step>;

    /// Run `step` to completion with all of its output captured into `log`.
    async fn launch(&self, ctx: &RunContext, step: &Step, log: &mut LogFile) -> Result<i32>;
}

/// Launches steps as child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    executable: PathBuf,
}

impl ProcessLauncher {
    /// Built-in stages run through the currently running executable.
    pub fn current() -> Result<Self> {
        let executable = std::env::current_exe()
            .map_err(|e| WordflowError::config(format!("cannot locate current executable: {e}")))?;
        Ok(Self::with_executable(executable))
    }

    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    fn builtin_args(ctx: &RunContext, stage: StageName) -> Vec<String> {
        let mut args = vec![
            "stage".to_string(),
            stage.to_string(),
            "--run-id".to_string(),
            ctx.run_id.to_string(),
            "--project-root".to_string(),
            ctx.project_root.display().to_string(),
        ];
        if let Some(config) = &ctx.config_path {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        args
    }
}

impl StageLauncher for ProcessLauncher {
    async fn resolve(&self, ctx: &RunContext, stage: &StageDef) -> Result<Step> {
        let Some(argv) = &stage.settings.command else {
            if !self.executable.is_file() {
                return Err(WordflowError::ToolNotFound {
                    program: self.executable.display().to_string(),
                });
            }
            return Ok(Step {
                label: stage.name().to_string(),
                program: self.executable.clone(),
                args: Self::builtin_args(ctx, stage.name()),
                cwd: ctx.project_root.clone(),
                version: Some(format!("wordflow {}", env!("CARGO_PKG_VERSION"))),
            });
        };

        let (program, args) = argv
            .split_first()
            .ok_or_else(|| WordflowError::config(format!("stages.{}.command is empty", stage.name())))?;
        let path = resolve_tool(program, &ctx.project_root).ok_or_else(|| WordflowError::ToolNotFound {
            program: program.clone(),
        })?;
        let version = probe_version(&path, &stage.settings.version_args, &ctx.project_root).await;
        let output = stage.run_output_area(&ctx.run_id);
        let values = Placeholders {
            input: &stage.input_area,
            output: &output,
            run_id: ctx.run_id.as_str(),
            project_root: &ctx.project_root,
        };
        Ok(Step {
            label: stage.name().to_string(),
            program: path,
            args: expand_placeholders(args, &values),
            cwd: ctx.project_root.clone(),
            version,
        })
    }

    async fn launch(&self, _ctx: &RunContext, step: &Step, log: &mut LogFile) -> Result<i32> {
        run_captured(step, log).await
    }
}

/// Resolve the configured bootstrap command, if any.
pub async fn resolve_bootstrap(ctx: &RunContext) -> Result<Option<Step>> {
    let Some(bootstrap) = &ctx.config.bootstrap else {
        return Ok(None);
    };
    let (program, args) = bootstrap
        .command
        .split_first()
        .ok_or_else(|| WordflowError::config("bootstrap.command is empty"))?;
    let path = resolve_tool(program, &ctx.project_root).ok_or_else(|| WordflowError::ToolNotFound {
        program: program.clone(),
    })?;
    let version = probe_version(&path, &bootstrap.version_args, &ctx.project_root).await;
    Ok(Some(Step {
        label: BOOTSTRAP_LABEL.to_string(),
        program: path,
        args: args.to_vec(),
        cwd: ctx.project_root.clone(),
        version,
    }))
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called for steps outside the stage sequence (bootstrap, handoff).
    fn phase(&self, name: &str);
    fn stage_started(&self, stage: StageName, index: usize, total: usize);
    fn stage_finished(&self, stage: StageName, code: i32);
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn stage_started(&self, _stage: StageName, _index: usize, _total: usize) {}
    fn stage_finished(&self, _stage: StageName, _code: i32) {}
    fn done(&self, _report: &RunReport) {}
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    /// Non-zero code listed in the stage's `continue_codes`.
    CompletedWithWarnings,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: StageName,
    pub tool: PathBuf,
    pub version: Option<String>,
    pub exit_code: i32,
    pub status: StageStatus,
    pub log_path: PathBuf,
    pub handoff: Option<HandoffReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub aggregate_log: PathBuf,
    pub stages: Vec<StageResult>,
    /// Step that stopped the run (`bootstrap` or a stage name).
    pub aborted_at: Option<String>,
    pub exit_code: u8,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.exit_code == EXIT_OK
    }
}

/// Map a step's return code onto a process exit code.
///
/// Codes outside `1..=255` (negative, or beyond what a process can report)
/// become [`EXIT_FATAL`].
pub fn exit_code_of(code: i32) -> u8 {
    match u8::try_from(code) {
        Ok(0) => EXIT_OK,
        Ok(c) => c,
        Err(_) => EXIT_FATAL,
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A configured pipeline over one project root.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub project_root: PathBuf,
    pub config: AppConfig,
    pub config_path: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(project_root: impl Into<PathBuf>, config: AppConfig, config_path: Option<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            config,
            config_path,
        }
    }

    /// Run every stage in order.
    ///
    /// Precondition failures come back as errors ([`WordflowError::InputMissing`],
    /// [`WordflowError::ToolNotFound`]); a stage that exits non-zero ends the run
    /// with a report whose `exit_code` is that stage's code.
    #[instrument(skip_all, fields(project_root = %self.project_root.display()))]
    pub async fn run<L: StageLauncher>(&self, launcher: &L, progress: &dyn ProgressReporter) -> Result<RunReport> {
        let start = Instant::now();
        let log_dir = self.project_root.join(&self.config.paths.log_dir);
        let mut logger = RunLogger::begin_run(&log_dir, RunId::now())?;
        let ctx = RunContext::new(
            logger.run_id().clone(),
            &self.project_root,
            self.config.clone(),
            self.config_path.clone(),
        );
        info!(run_id = %ctx.run_id, "run started");

        let agg = logger.aggregate_log();
        agg.line(format_args!("run {} started", ctx.run_id))?;
        agg.line(format_args!("project root: {}", ctx.project_root.display()))?;
        match &ctx.config_path {
            Some(path) => agg.line(format_args!("config: {}", path.display()))?,
            None => agg.line("config: built-in defaults")?,
        }

        let stages = ctx.stages();
        let steps = match preflight(&ctx, &stages, launcher, agg).await {
            Ok(steps) => steps,
            Err(e) => {
                error!(error = %e, "preflight failed");
                agg.line(format_args!("FATAL: {e}"))?;
                agg.line(format_args!("run finished with exit code {}", e.exit_code()))?;
                return Err(e);
            }
        };

        let mut report = RunReport {
            run_id: ctx.run_id.clone(),
            aggregate_log: agg.path().to_path_buf(),
            stages: Vec::with_capacity(stages.len()),
            aborted_at: None,
            exit_code: EXIT_OK,
            elapsed: Duration::ZERO,
        };

        if let Some(step) = &steps.bootstrap {
            progress.phase(BOOTSTRAP_LABEL);
            let agg = logger.aggregate_log();
            agg.line(format_args!("=== {BOOTSTRAP_LABEL} start ==="))?;
            agg.line(format_args!("tool: {}", step.program.display()))?;
            agg.line(format_args!("version: {}", step.version.as_deref().unwrap_or("unknown")))?;
            let code = launch_or_code(&ctx, launcher, step, agg).await;
            agg.line(format_args!("=== {BOOTSTRAP_LABEL} finished: return code {code} ==="))?;
            if code != 0 {
                error!(code, "bootstrap failed, run aborted");
                report.aborted_at = Some(BOOTSTRAP_LABEL.to_string());
                report.exit_code = exit_code_of(code);
                return finish(report, logger.aggregate_log(), start, progress);
            }
        }

        let total = stages.len();
        for (idx, (def, step)) in stages.iter().zip(&steps.stages).enumerate() {
            let stage = def.name();
            progress.stage_started(stage, idx + 1, total);
            info!(%stage, tool = %step.program.display(), "stage started");

            let mut stage_log = logger.stage_log(stage)?;
            stage_log.line(format_args!("command: {}", step.display_command()))?;

            let agg = logger.aggregate_log();
            agg.line(format_args!("=== {stage} start ==="))?;
            agg.line(format_args!("tool: {}", step.program.display()))?;
            agg.line(format_args!("version: {}", step.version.as_deref().unwrap_or("unknown")))?;
            agg.line(format_args!("log: {}", stage_log.path().display()))?;

            let code = launch_or_code(&ctx, launcher, step, &mut stage_log).await;
            stage_log.line(format_args!("return code: {code}"))?;
            agg.line(format_args!("=== {stage} finished: return code {code} ==="))?;
            progress.stage_finished(stage, code);

            let status = if code == 0 {
                StageStatus::Completed
            } else if def.settings.continue_codes.contains(&code) {
                StageStatus::CompletedWithWarnings
            } else {
                StageStatus::Aborted
            };

            let mut result = StageResult {
                stage,
                tool: step.program.clone(),
                version: step.version.clone(),
                exit_code: code,
                status,
                log_path: stage_log.path().to_path_buf(),
                handoff: None,
            };

            match status {
                StageStatus::Aborted => {
                    error!(%stage, code, "stage failed, run aborted");
                    agg.line(format_args!("run aborted at stage {stage}"))?;
                    report.aborted_at = Some(stage.to_string());
                    report.exit_code = exit_code_of(code);
                    report.stages.push(result);
                    break;
                }
                StageStatus::CompletedWithWarnings => {
                    warn!(%stage, code, "stage completed with warnings");
                    agg.line(format_args!("{stage} completed with warnings (code {code})"))?;
                    if report.exit_code == EXIT_OK {
                        report.exit_code = exit_code_of(code);
                    }
                }
                StageStatus::Completed => {}
            }

            if let Some(next) = stages.get(idx + 1) {
                progress.phase("handoff");
                let moved = handoff(&def.output_area, &next.input_area, &def.output_done_area(), &ctx.run_id)
                    .inspect_err(|e| error!(error = %e, "handoff failed"));
                let moved = match moved {
                    Ok(moved) => moved,
                    Err(e) => {
                        agg.line(format_args!("FATAL: handoff {stage} -> {} failed: {e}", next.name()))?;
                        return Err(e);
                    }
                };
                agg.line(format_args!(
                    "handoff {stage} -> {}: {} file(s) moved, {} error artifact(s) left in place",
                    next.name(),
                    moved.copied.len(),
                    moved.skipped_artifacts.len()
                ))?;
                result.handoff = Some(moved);
            }
            report.stages.push(result);
        }

        finish(report, logger.aggregate_log(), start, progress)
    }
}

struct Preflight {
    bootstrap: Option<Step>,
    stages: Vec<Step>,
}

/// Check the input area and resolve every tool before anything runs.
async fn preflight<L: StageLauncher>(
    ctx: &RunContext,
    stages: &[StageDef],
    launcher: &L,
    agg: &mut LogFile,
) -> Result<Preflight> {
    let first = stages
        .first()
        .ok_or_else(|| WordflowError::config("no stages configured"))?;
    if !first.input_area.is_dir() {
        return Err(WordflowError::InputMissing {
            path: first.input_area.clone(),
        });
    }
    let units = enumerate_units(first, &ctx.config.input.temp_prefix)?;
    if units.is_empty() {
        warn!(area = %first.input_area.display(), "input area holds no units");
        agg.line(format_args!("WARNING: no input units in {}", first.input_area.display()))?;
    } else {
        agg.line(format_args!("input units: {}", units.len()))?;
    }

    let bootstrap = resolve_bootstrap(ctx).await?;
    let mut steps = Vec::with_capacity(stages.len());
    for def in stages {
        steps.push(launcher.resolve(ctx, def).await?);
    }
    Ok(Preflight {
        bootstrap,
        stages: steps,
    })
}

/// Launch a step; a launch failure counts as that step's non-zero return code.
async fn launch_or_code<L: StageLauncher>(ctx: &RunContext, launcher: &L, step: &Step, log: &mut LogFile) -> i32 {
    match launcher.launch(ctx, step, log).await {
        Ok(code) => code,
        Err(e) => {
            error!(step = %step.label, error = %e, "launch failed");
            if let Err(write_err) = log.line(format_args!("FATAL: {e}")) {
                warn!(step = %step.label, path = %log.path().display(), error = %write_err, "cannot write to step log");
            }
            i32::from(e.exit_code())
        }
    }
}

fn finish(
    mut report: RunReport,
    agg: &mut LogFile,
    start: Instant,
    progress: &dyn ProgressReporter,
) -> Result<RunReport> {
    report.elapsed = start.elapsed();
    agg.line(format_args!("run finished with exit code {}", report.exit_code))?;
    info!(run_id = %report.run_id, exit_code = report.exit_code, "run finished");
    progress.done(&report);
    Ok(report)
}
