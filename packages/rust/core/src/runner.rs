//! Stage runner: one stage over every unit of its input area.
//!
//! Units are processed one at a time in sorted-name order. Failures are
//! contained at the smallest level that can absorb them:
//! - a sub-element error is logged and skipped,
//! - a unit-fatal error produces an error artifact and the stage moves on,
//! - only an unusable area or an unwritable output fails the stage itself.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use wordflow_shared::{
    ERROR_SUFFIX, ErrorRecord, Result, StageName, WordflowError, is_error_artifact_name, sha256_hex,
};

use crate::artifact::{clear_error, write_atomic, write_error};
use crate::handoff::{archive_into, list_files};
use crate::run::{RunContext, StageDef};

/// Extension of every normal output and error artifact.
pub const OUTPUT_EXTENSION: &str = "txt";

// ---------------------------------------------------------------------------
// Transform seam
// ---------------------------------------------------------------------------

/// One input file consumed by a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub path: PathBuf,
    /// File name, the unit's identity.
    pub name: String,
    pub stem: String,
}

impl WorkUnit {
    fn from_path(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        let stem = path.file_stem()?.to_str()?.to_string();
        Some(Self { path, name, stem })
    }
}

/// A skipped paragraph, line, block or section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementFailure {
    pub location: String,
    pub cause: String,
}

/// A condition that prevents any normal output for the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub cause: String,
    pub context: Vec<String>,
}

impl UnitFailure {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            context: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOutput {
    pub key: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFailure {
    pub key: String,
    pub cause: String,
    pub context: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transformed {
    /// One output named after the unit.
    Document(String),
    /// Outputs named after partitions, with per-partition failures.
    Partitioned {
        partitions: Vec<PartitionOutput>,
        failures: Vec<PartitionFailure>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub body: Transformed,
    pub element_errors: Vec<ElementFailure>,
}

/// The per-unit work of a stage.
pub trait UnitTransform: Send + Sync {
    fn stage(&self) -> StageName;

    fn transform(&self, unit: &WorkUnit, input: &[u8]) -> std::result::Result<TransformOutput, UnitFailure>;
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcome {
    /// Complete normal output.
    Succeeded,
    /// Normal output with skipped elements or failed partitions.
    Partial,
    /// No normal output; only error artifacts.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitResult {
    pub unit: String,
    pub outcome: UnitOutcome,
    pub outputs: Vec<PathBuf>,
    pub error_artifacts: Vec<PathBuf>,
    pub element_errors: Vec<ElementFailure>,
    /// Where the input went after processing, when inputs are archived.
    pub archived: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: StageName,
    pub output_area: PathBuf,
    pub units: Vec<UnitResult>,
}

impl StageReport {
    pub fn count(&self, outcome: UnitOutcome) -> usize {
        self.units.iter().filter(|u| u.outcome == outcome).count()
    }

    pub fn element_error_count(&self) -> usize {
        self.units.iter().map(|u| u.element_errors.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Run `transform` over every unit in the input area of `def`.
#[instrument(skip_all, fields(stage = %def.name(), run_id = %ctx.run_id))]
pub fn run_stage(ctx: &RunContext, def: &StageDef, transform: &dyn UnitTransform) -> Result<StageReport> {
    if transform.stage() != def.name() {
        return Err(WordflowError::stage(
            def.name().as_str(),
            format!("transform for `{}` cannot run this stage", transform.stage()),
        ));
    }
    if !def.input_area.is_dir() {
        return Err(WordflowError::InputMissing {
            path: def.input_area.clone(),
        });
    }

    let output_area = def.run_output_area(&ctx.run_id);
    std::fs::create_dir_all(&output_area).map_err(|e| WordflowError::io(&output_area, e))?;

    let units = enumerate_units(def, &ctx.config.input.temp_prefix)?;
    info!(
        units = units.len(),
        input = %def.input_area.display(),
        output = %output_area.display(),
        "stage started"
    );
    if units.is_empty() {
        warn!("no input units found");
    }

    let mut report = StageReport {
        stage: def.name(),
        output_area: output_area.clone(),
        units: Vec::with_capacity(units.len()),
    };

    for unit in &units {
        let mut result = process_unit(ctx, def, &output_area, transform, unit)?;
        if def.settings.archive_inputs && result.outcome != UnitOutcome::Failed {
            result.archived = Some(archive_into(&unit.path, &def.done_area, &ctx.run_id)?);
        }
        info!(unit = %unit.name, outcome = ?result.outcome, outputs = result.outputs.len(), "unit finished");
        report.units.push(result);
    }

    info!(
        succeeded = report.count(UnitOutcome::Succeeded),
        partial = report.count(UnitOutcome::Partial),
        failed = report.count(UnitOutcome::Failed),
        element_errors = report.element_error_count(),
        "stage finished"
    );
    Ok(report)
}

/// Candidate units of `def`, sorted by file name.
pub fn enumerate_units(def: &StageDef, temp_prefix: &str) -> Result<Vec<WorkUnit>> {
    let mut units = Vec::new();
    for path in list_files(&def.input_area)? {
        if !def.accepts(&path, temp_prefix) {
            debug!(path = %path.display(), "not a unit, ignored");
            continue;
        }
        let Some(unit) = WorkUnit::from_path(path) else {
            continue;
        };
        units.push(unit);
    }
    Ok(units)
}

fn process_unit(
    ctx: &RunContext,
    def: &StageDef,
    output_area: &Path,
    transform: &dyn UnitTransform,
    unit: &WorkUnit,
) -> Result<UnitResult> {
    let mut result = UnitResult {
        unit: unit.name.clone(),
        outcome: UnitOutcome::Succeeded,
        outputs: Vec::new(),
        error_artifacts: Vec::new(),
        element_errors: Vec::new(),
        archived: None,
    };

    let record = |partition: Option<&str>, cause: &str, context: Vec<String>, sha: Option<String>| {
        let mut record = ErrorRecord::new(
            unit.name.as_str(),
            partition.map(str::to_string),
            def.name(),
            ctx.run_id.clone(),
            cause,
        );
        record.context = context;
        record.source_sha256 = sha;
        record
    };

    if is_error_artifact_name(&unit.name) {
        let cause = format!("input name ends with `{ERROR_SUFFIX}`, which is reserved for error artifacts");
        error!(unit = %unit.name, %cause, "unit failed");
        let rec = record(None, &cause, Vec::new(), None);
        result.error_artifacts.push(write_error(output_area, &unit.stem, rec)?);
        result.outcome = UnitOutcome::Failed;
        return Ok(result);
    }

    let input = match std::fs::read(&unit.path) {
        Ok(bytes) => bytes,
        Err(e) => {
            let cause = format!("cannot read input: {e}");
            error!(unit = %unit.name, %cause, "unit failed");
            let rec = record(None, &cause, Vec::new(), None);
            result.error_artifacts.push(write_error(output_area, &unit.stem, rec)?);
            result.outcome = UnitOutcome::Failed;
            return Ok(result);
        }
    };
    let sha = sha256_hex(&input);

    let output = match transform.transform(unit, &input) {
        Ok(output) => output,
        Err(failure) => {
            error!(unit = %unit.name, cause = %failure.cause, "unit failed");
            let rec = record(None, &failure.cause, failure.context, Some(sha));
            result.error_artifacts.push(write_error(output_area, &unit.stem, rec)?);
            result.outcome = UnitOutcome::Failed;
            return Ok(result);
        }
    };

    for failure in &output.element_errors {
        warn!(unit = %unit.name, location = %failure.location, cause = %failure.cause, "sub-element skipped");
    }
    result.element_errors = output.element_errors;

    match output.body {
        Transformed::Document(text) => {
            let path = output_area.join(format!("{}.{OUTPUT_EXTENSION}", unit.stem));
            write_atomic(&path, &text)?;
            result.outputs.push(path);
            if let Some(stale) = clear_error(output_area, &unit.stem)? {
                info!(unit = %unit.name, path = %stale.display(), "removed error artifact of an earlier run");
            }
        }
        Transformed::Partitioned { partitions, failures } => {
            for partition in partitions {
                let path = output_area.join(format!("{}.{OUTPUT_EXTENSION}", partition.key));
                append_partition(&path, &partition.text)?;
                debug!(unit = %unit.name, partition = %partition.key, "partition written");
                result.outputs.push(path);
            }
            for failure in failures {
                error!(unit = %unit.name, partition = %failure.key, cause = %failure.cause, "partition failed");
                let rec = record(Some(failure.key.as_str()), &failure.cause, failure.context, Some(sha.clone()));
                result.error_artifacts.push(write_error(output_area, &failure.key, rec)?);
            }
        }
    }

    result.outcome = if result.outputs.is_empty() {
        UnitOutcome::Failed
    } else if result.error_artifacts.is_empty() && result.element_errors.is_empty() {
        UnitOutcome::Succeeded
    } else {
        UnitOutcome::Partial
    };
    Ok(result)
}

/// Write a partition, extending it when another unit of the run already did.
fn append_partition(path: &Path, text: &str) -> Result<()> {
    let content = match std::fs::read_to_string(path) {
        Ok(existing) => format!(
            "{}\n\n{}",
            existing.trim_end_matches('\n'),
            text.trim_start_matches('\n')
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => text.to_string(),
        Err(e) => return Err(WordflowError::io(path, e)),
    };
    write_atomic(path, &content)
}
