//! Pipeline orchestration for wordflow.
//!
//! This crate sequences the extract, structure, and split stages: it owns the
//! run context and run logs, launches each stage as a captured step, runs the
//! per-unit stage runner for built-in stages, and moves outputs forward.

pub mod artifact;
pub mod check;
pub mod handoff;
pub mod logger;
pub mod orchestrator;
pub mod process;
pub mod run;
pub mod runner;
pub mod transforms;

pub use artifact::{artifact_path, clear_error, read_error, write_error};
pub use check::{ArtifactEntry, scan_artifacts};
pub use handoff::{HandoffReport, handoff};
pub use logger::{LogFile, RunLogger};
pub use orchestrator::{
    Pipeline, ProcessLauncher, ProgressReporter, RunReport, SilentProgress, StageLauncher,
    StageResult, StageStatus, exit_code_of,
};
pub use process::Step;
pub use run::{RunContext, StageDef};
pub use runner::{StageReport, UnitOutcome, UnitResult, UnitTransform, run_stage};
pub use transforms::run_builtin_stage;
