//! Core domain types shared by every wordflow crate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, WordflowError};

/// Current schema version for the error artifact format.
pub const ERROR_RECORD_SCHEMA_VERSION: u32 = 1;

/// File-stem suffix that marks an error artifact (`B_ERROR.txt`).
pub const ERROR_SUFFIX: &str = "_ERROR";

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

/// Every stage completed with process-level success.
pub const EXIT_OK: u8 = 0;
/// Orchestrator-internal failure (config, log creation).
pub const EXIT_FATAL: u8 = 1;
/// `check` found error artifacts.
pub const EXIT_WARNING: u8 = 2;
/// The pipeline input area does not exist.
pub const EXIT_INPUT_MISSING: u8 = 3;
/// A stage or bootstrap tool could not be resolved.
pub const EXIT_TOOL_NOT_FOUND: u8 = 127;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// Run timestamp in `yyyymmddhhmmss` form.
///
/// Names the aggregate log, every stage log, and the final output folder of
/// one run, so all three correlate by exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    /// `strftime` format of a run id.
    pub const FORMAT: &'static str = "%Y%m%d%H%M%S";

    /// Run id for the current local time.
    pub fn now() -> Self {
        Self::from_datetime(&Local::now().naive_local())
    }

    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        Self(dt.format(Self::FORMAT).to_string())
    }

    /// The run id one second later.
    pub fn next(&self) -> Self {
        let dt = self.to_datetime() + TimeDelta::seconds(1);
        Self::from_datetime(&dt)
    }

    pub fn to_datetime(&self) -> NaiveDateTime {
        // Validated on construction.
        NaiveDateTime::parse_from_str(&self.0, Self::FORMAT).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RunId {
    type Err = WordflowError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 14 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(WordflowError::parse(format!(
                "run id must be 14 digits (yyyymmddhhmmss), got `{s}`"
            )));
        }
        NaiveDateTime::parse_from_str(s, Self::FORMAT)
            .map_err(|e| WordflowError::parse(format!("invalid run id `{s}`: {e}")))?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for RunId {
    type Error = WordflowError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// StageName
// ---------------------------------------------------------------------------

/// The three pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Word document → marker-filtered text.
    Extract,
    /// Marker text → structured Q&A text.
    Structure,
    /// Structured text → one file per department.
    Split,
}

impl StageName {
    /// All stages in pipeline order.
    pub const ALL: [StageName; 3] = [Self::Extract, Self::Structure, Self::Split];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Structure => "structure",
            Self::Split => "split",
        }
    }

    /// The final stage writes per-partition outputs into a run folder.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Split)
    }

    /// The stage that consumes this stage's outputs.
    pub fn next(&self) -> Option<StageName> {
        match self {
            Self::Extract => Some(Self::Structure),
            Self::Structure => Some(Self::Split),
            Self::Split => None,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = WordflowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| {
                WordflowError::config(format!(
                    "unknown stage `{s}`: expected extract, structure, or split"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// ErrorRecord
// ---------------------------------------------------------------------------

/// Content of an error artifact (`*_ERROR.txt`).
///
/// The artifact's presence is the failure signal; the record only has to be
/// detailed enough to find the matching lines in the stage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    /// Source file name of the work unit.
    pub unit_id: String,
    /// Destination partition (final stage only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
    /// Stage that produced the record.
    pub source_stage: StageName,
    /// Run that produced the record.
    pub run_id: RunId,
    /// When the record was first written.
    pub recorded_at: DateTime<Local>,
    /// Failure causes, oldest first. Never empty.
    pub causes: Vec<String>,
    /// Offending input lines, when the failure can be located.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
    /// SHA-256 of the unit's input bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_sha256: Option<String>,
}

impl ErrorRecord {
    pub fn new(
        unit_id: impl Into<String>,
        partition_key: Option<String>,
        source_stage: StageName,
        run_id: RunId,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: ERROR_RECORD_SCHEMA_VERSION,
            unit_id: unit_id.into(),
            partition_key,
            source_stage,
            run_id,
            recorded_at: Local::now(),
            causes: vec![cause.into()],
            context: Vec::new(),
            source_sha256: None,
        }
    }

    /// The first recorded cause.
    pub fn cause(&self) -> &str {
        self.causes.first().map(String::as_str).unwrap_or_default()
    }
}

/// Whether a file name denotes an error artifact.
pub fn is_error_artifact_name(file_name: &str) -> bool {
    std::path::Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| stem.ends_with(ERROR_SUFFIX))
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::now();
        let parsed: RunId = id.to_string().parse().expect("parse RunId");
        assert_eq!(id, parsed);
        assert_eq!(parsed.as_str().len(), 14);
    }

    #[test]
    fn run_id_rejects_garbage() {
        assert!("2025-01-01".parse::<RunId>().is_err());
        assert!("20251340000000".parse::<RunId>().is_err());
        assert!("2025010112000".parse::<RunId>().is_err());
    }

    #[test]
    fn run_id_next_rolls_over() {
        let id: RunId = "20241231235959".parse().unwrap();
        assert_eq!(id.next().as_str(), "20250101000000");
    }

    #[test]
    fn stage_order_and_names() {
        assert_eq!(StageName::Extract.next(), Some(StageName::Structure));
        assert_eq!(StageName::Split.next(), None);
        assert!(StageName::Split.is_final());
        assert_eq!("structure".parse::<StageName>().unwrap(), StageName::Structure);
        assert!("merge".parse::<StageName>().is_err());
    }

    #[test]
    fn error_artifact_names() {
        assert!(is_error_artifact_name("B_ERROR.txt"));
        assert!(is_error_artifact_name("20250110_HR_ERROR.txt"));
        assert!(!is_error_artifact_name("B.txt"));
        assert!(!is_error_artifact_name("ERRORS.txt"));
    }

    #[test]
    fn error_record_serialization() {
        let mut record = ErrorRecord::new(
            "B.txt",
            None,
            StageName::Structure,
            "20250110093000".parse().unwrap(),
            "no [PARENT] marker",
        );
        record.source_sha256 = Some(sha256_hex(b"body"));

        let json = serde_json::to_string_pretty(&record).expect("serialize");
        assert!(json.contains("\"source_stage\": \"structure\""));
        assert!(!json.contains("partition_key"));

        let parsed: ErrorRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.cause(), "no [PARENT] marker");
        assert_eq!(parsed.run_id.as_str(), "20250110093000");
        assert_eq!(parsed.source_sha256.as_deref().map(str::len), Some(64));
    }
}
