//! Application configuration for wordflow.
//!
//! The project config lives at `<project_root>/wordflow.toml`; a user-wide
//! fallback may live at `~/.wordflow/wordflow.toml`. An explicit `--config`
//! path overrides both, and built-in defaults fill every missing value.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WordflowError};
use crate::types::StageName;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "wordflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".wordflow";

// ---------------------------------------------------------------------------
// Config structs (matching wordflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Data and log directories.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Input filtering.
    #[serde(default)]
    pub input: InputConfig,

    /// Optional environment sync step run before the first stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapConfig>,

    /// Per-stage overrides.
    #[serde(default)]
    pub stages: StagesConfig,
}

/// `[paths]` section. Relative paths resolve against the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "data".into()
}
fn default_log_dir() -> String {
    "logs".into()
}

/// `[input]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// File-name prefix of editor lock files that are never work units.
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            temp_prefix: default_temp_prefix(),
        }
    }
}

fn default_temp_prefix() -> String {
    "~$".into()
}

/// `[bootstrap]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Program and arguments, e.g. `["uv", "sync"]`.
    pub command: Vec<String>,

    /// Arguments that make the program print its version.
    #[serde(default = "default_version_args")]
    pub version_args: Vec<String>,
}

fn default_version_args() -> Vec<String> {
    vec!["--version".into()]
}

/// `[stages]` section: one optional table per stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagesConfig {
    #[serde(default)]
    pub extract: StageConfig,
    #[serde(default)]
    pub structure: StageConfig,
    #[serde(default)]
    pub split: StageConfig,
}

/// `[stages.<name>]` table. Unset fields take the stage's built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageConfig {
    /// Input area, relative to the data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_dir: Option<String>,

    /// Output area, relative to the data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,

    /// Extension (without dot) of files that are work units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,

    /// Move consumed inputs into `<input_dir>/done`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_inputs: Option<bool>,

    /// External tool argv. Unset means the built-in implementation.
    ///
    /// Placeholders: `{input}`, `{output}`, `{run_id}`, `{project_root}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Arguments that make the tool print its version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_args: Option<Vec<String>>,

    /// Non-zero exit codes that mean "completed with warnings".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_codes: Option<Vec<i32>>,
}

// ---------------------------------------------------------------------------
// Resolved stage settings (config + defaults)
// ---------------------------------------------------------------------------

/// Fully-resolved settings for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSettings {
    pub stage: StageName,
    pub input_dir: String,
    pub output_dir: String,
    pub extension: String,
    pub archive_inputs: bool,
    pub command: Option<Vec<String>>,
    pub version_args: Vec<String>,
    pub continue_codes: Vec<i32>,
}

impl StageSettings {
    /// Built-in defaults, mirroring the numbered data-area layout.
    pub fn defaults(stage: StageName) -> Self {
        let (input_dir, output_dir, archive_inputs) = match stage {
            StageName::Extract => ("01_input", "02_output", false),
            StageName::Structure => ("03_before_structured", "04_after_structured", true),
            StageName::Split => ("05_before_department", "06_after_department", true),
        };
        Self {
            stage,
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            extension: "txt".into(),
            archive_inputs,
            command: None,
            version_args: default_version_args(),
            continue_codes: Vec::new(),
        }
    }

    fn merged(stage: StageName, overrides: &StageConfig) -> Self {
        let base = Self::defaults(stage);
        Self {
            stage,
            input_dir: overrides.input_dir.clone().unwrap_or(base.input_dir),
            output_dir: overrides.output_dir.clone().unwrap_or(base.output_dir),
            extension: overrides
                .extension
                .as_deref()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .unwrap_or(base.extension),
            archive_inputs: overrides.archive_inputs.unwrap_or(base.archive_inputs),
            command: overrides.command.clone(),
            version_args: overrides.version_args.clone().unwrap_or(base.version_args),
            continue_codes: overrides.continue_codes.clone().unwrap_or(base.continue_codes),
        }
    }

    /// Whether the stage runs in-process rather than through an external tool.
    pub fn is_builtin(&self) -> bool {
        self.command.is_none()
    }
}

impl AppConfig {
    /// Resolved settings for `stage`.
    pub fn stage(&self, stage: StageName) -> StageSettings {
        let overrides = match stage {
            StageName::Extract => &self.stages.extract,
            StageName::Structure => &self.stages.structure,
            StageName::Split => &self.stages.split,
        };
        StageSettings::merged(stage, overrides)
    }

    /// A config with every stage field spelled out, for `config init`.
    pub fn with_explicit_defaults() -> Self {
        fn explicit(stage: StageName) -> StageConfig {
            let d = StageSettings::defaults(stage);
            StageConfig {
                input_dir: Some(d.input_dir),
                output_dir: Some(d.output_dir),
                extension: Some(d.extension),
                archive_inputs: Some(d.archive_inputs),
                command: None,
                version_args: Some(d.version_args),
                continue_codes: None,
            }
        }
        Self {
            stages: StagesConfig {
                extract: explicit(StageName::Extract),
                structure: explicit(StageName::Structure),
                split: explicit(StageName::Split),
            },
            ..Self::default()
        }
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.input.temp_prefix.is_empty() {
            return Err(WordflowError::config("input.temp_prefix must not be empty"));
        }
        if let Some(bootstrap) = &self.bootstrap {
            if bootstrap.command.is_empty() {
                return Err(WordflowError::config("bootstrap.command must not be empty"));
            }
        }

        let mut areas: Vec<(String, StageName)> = Vec::new();
        for stage in StageName::ALL {
            let s = self.stage(stage);
            if s.extension.is_empty() {
                return Err(WordflowError::config(format!(
                    "stages.{stage}.extension must not be empty"
                )));
            }
            if s.command.as_ref().is_some_and(|c| c.is_empty()) {
                return Err(WordflowError::config(format!(
                    "stages.{stage}.command must not be empty"
                )));
            }
            for dir in [&s.input_dir, &s.output_dir] {
                if let Some((_, owner)) = areas.iter().find(|(d, _)| d == dir) {
                    return Err(WordflowError::config(format!(
                        "area `{dir}` is used by both `{owner}` and `{stage}`"
                    )));
                }
                areas.push((dir.clone(), stage));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the user config directory (`~/.wordflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| WordflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Locate the config file to use, if any.
///
/// Order: explicit path, `<project_root>/wordflow.toml`, `~/.wordflow/wordflow.toml`.
pub fn find_config(explicit: Option<&Path>, project_root: &Path) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(WordflowError::config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path.to_path_buf()));
    }

    let local = project_root.join(CONFIG_FILE_NAME);
    if local.exists() {
        return Ok(Some(local));
    }

    match config_dir() {
        Ok(dir) => {
            let user = dir.join(CONFIG_FILE_NAME);
            Ok(user.exists().then_some(user))
        }
        Err(_) => Ok(None),
    }
}

/// Load and validate the config. Returns defaults if no file is found.
pub fn load_config(explicit: Option<&Path>, project_root: &Path) -> Result<AppConfig> {
    let config = match find_config(explicit, project_root)? {
        Some(path) => load_config_from(&path)?,
        None => {
            tracing::debug!(root = %project_root.display(), "config file not found, using defaults");
            AppConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| WordflowError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        WordflowError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Write a default `wordflow.toml` into `project_root`.
/// Returns the path to the created file.
pub fn init_config(project_root: &Path) -> Result<PathBuf> {
    let path = project_root.join(CONFIG_FILE_NAME);
    if path.exists() {
        return Err(WordflowError::config(format!(
            "{} already exists",
            path.display()
        )));
    }

    let content = toml::to_string_pretty(&AppConfig::with_explicit_defaults())
        .map_err(|e| WordflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| WordflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wf-config-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::with_explicit_defaults();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("05_before_department"));
    }

    #[test]
    fn stage_defaults_follow_area_layout() {
        let config = AppConfig::default();
        let extract = config.stage(StageName::Extract);
        assert_eq!(extract.input_dir, "01_input");
        assert!(!extract.archive_inputs);
        assert!(extract.is_builtin());

        let split = config.stage(StageName::Split);
        assert_eq!(split.output_dir, "06_after_department");
        assert!(split.archive_inputs);
    }

    #[test]
    fn partial_stage_table_keeps_other_defaults() {
        let toml_str = r#"
[stages.extract]
extension = ".docx"
command = ["word_to_text", "--input", "{input}", "--output", "{output}"]
continue_codes = [2]
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let extract = config.stage(StageName::Extract);
        assert_eq!(extract.extension, "docx");
        assert_eq!(extract.input_dir, "01_input");
        assert_eq!(extract.continue_codes, vec![2]);
        assert!(!extract.is_builtin());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn shared_area_is_rejected() {
        let toml_str = r#"
[stages.structure]
output_dir = "02_output"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("02_output"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let config: AppConfig = toml::from_str("[stages.split]\ncommand = []\n").expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn init_then_load_roundtrip() {
        let root = temp_dir();
        let path = init_config(&root).expect("init");
        assert!(init_config(&root).is_err(), "second init must not overwrite");

        let loaded = load_config(None, &root).expect("load");
        assert_eq!(loaded.paths.log_dir, "logs");
        assert_eq!(loaded.stage(StageName::Structure), StageSettings::defaults(StageName::Structure));
        assert_eq!(find_config(None, &root).unwrap(), Some(path));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let root = temp_dir();
        let result = load_config(Some(&root.join("nope.toml")), &root);
        assert!(result.unwrap_err().to_string().contains("not found"));
        let _ = std::fs::remove_dir_all(&root);
    }
}
