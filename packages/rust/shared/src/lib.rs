//! Shared types, error model, and configuration for wordflow.
//!
//! This crate is the foundation depended on by all other wordflow crates.
//! It provides:
//! - [`WordflowError`], the unified error type
//! - Domain types ([`RunId`], [`StageName`], [`ErrorRecord`])
//! - Configuration ([`AppConfig`], [`StageSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BootstrapConfig, CONFIG_FILE_NAME, InputConfig, PathsConfig, StageConfig,
    StageSettings, StagesConfig, config_dir, find_config, init_config, load_config,
    load_config_from,
};
pub use error::{Result, WordflowError};
pub use types::{
    ERROR_RECORD_SCHEMA_VERSION, ERROR_SUFFIX, EXIT_FATAL, EXIT_INPUT_MISSING, EXIT_OK,
    EXIT_TOOL_NOT_FOUND, EXIT_WARNING, ErrorRecord, RunId, StageName, is_error_artifact_name,
    sha256_hex,
};
