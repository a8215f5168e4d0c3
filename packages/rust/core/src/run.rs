//! Run-scoped context: the run id, resolved areas, and stage definitions.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use wordflow_shared::{AppConfig, RunId, StageName, StageSettings};

/// Everything a run (or a single stage invocation) needs to know.
///
/// Created once, then passed by reference.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub started_at: DateTime<Local>,
    pub project_root: PathBuf,
    pub config: AppConfig,
    /// Config file the run was loaded from, forwarded to built-in stage processes.
    pub config_path: Option<PathBuf>,
}

impl RunContext {
    pub fn new(
        run_id: RunId,
        project_root: impl Into<PathBuf>,
        config: AppConfig,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            run_id,
            started_at: Local::now(),
            project_root: project_root.into(),
            config,
            config_path,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.project_root.join(&self.config.paths.data_dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.project_root.join(&self.config.paths.log_dir)
    }

    /// Resolve the areas and log path of `stage`.
    pub fn stage(&self, stage: StageName) -> StageDef {
        let settings = self.config.stage(stage);
        let data = self.data_dir();
        let input_area = data.join(&settings.input_dir);
        let output_area = data.join(&settings.output_dir);
        StageDef {
            done_area: input_area.join(DONE_DIR),
            log_path: self.log_dir().join(format!("{stage}_{}.log", self.run_id)),
            input_area,
            output_area,
            settings,
        }
    }

    /// All stages in execution order.
    pub fn stages(&self) -> Vec<StageDef> {
        StageName::ALL.into_iter().map(|s| self.stage(s)).collect()
    }
}

/// Name of the archive sub-area inside an input or output area.
pub const DONE_DIR: &str = "done";

/// A stage resolved against the data root.
#[derive(Debug, Clone)]
pub struct StageDef {
    pub settings: StageSettings,
    pub input_area: PathBuf,
    pub output_area: PathBuf,
    /// Archive for consumed inputs.
    pub done_area: PathBuf,
    pub log_path: PathBuf,
}

impl StageDef {
    pub fn name(&self) -> StageName {
        self.settings.stage
    }

    /// Directory the stage writes into for `run_id`.
    ///
    /// The final stage writes into a run-named folder so runs never mix.
    pub fn run_output_area(&self, run_id: &RunId) -> PathBuf {
        if self.name().is_final() {
            self.output_area.join(run_id.as_str())
        } else {
            self.output_area.clone()
        }
    }

    /// Archive for outputs that were handed to the next stage.
    pub fn output_done_area(&self) -> PathBuf {
        self.output_area.join(DONE_DIR)
    }

    pub fn accepts(&self, path: &Path, temp_prefix: &str) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        !name.starts_with(temp_prefix)
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(&self.settings.extension))
    }
}
