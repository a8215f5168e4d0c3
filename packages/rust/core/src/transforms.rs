//! Built-in stage transforms backed by `wordflow-text`.

use tracing::{debug, info};

use wordflow_shared::StageName;

use crate::run::RunContext;
use crate::runner::{
    ElementFailure, PartitionFailure, PartitionOutput, StageReport, TransformOutput, Transformed,
    UnitFailure, UnitTransform, WorkUnit, run_stage,
};

/// The in-process transform for `stage`.
pub fn builtin(stage: StageName) -> Box<dyn UnitTransform> {
    match stage {
        StageName::Extract => Box::new(ExtractTransform),
        StageName::Structure => Box::new(StructureTransform),
        StageName::Split => Box::new(SplitTransform),
    }
}

/// Run the built-in transform of `stage` in this process.
pub fn run_builtin_stage(ctx: &RunContext, stage: StageName) -> wordflow_shared::Result<StageReport> {
    let def = ctx.stage(stage);
    run_stage(ctx, &def, builtin(stage).as_ref())
}

/// Strict UTF-8 decoding for stages whose whole input must be readable.
fn decode(input: &[u8]) -> Result<&str, UnitFailure> {
    let text = std::str::from_utf8(input)
        .map_err(|e| UnitFailure::new(format!("input is not valid UTF-8: {e}")))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

/// Marker extraction from a text export.
pub struct ExtractTransform;

impl UnitTransform for ExtractTransform {
    fn stage(&self) -> StageName {
        StageName::Extract
    }

    fn transform(&self, unit: &WorkUnit, input: &[u8]) -> Result<TransformOutput, UnitFailure> {
        let input = input.strip_prefix("\u{feff}".as_bytes()).unwrap_or(input);
        let extraction = wordflow_text::extract(input);
        if extraction.parent_count == 0 {
            info!(unit = %unit.name, "no [PARENT] marker, output is empty");
        }
        let element_errors = extraction
            .element_errors
            .into_iter()
            .map(|e| ElementFailure {
                location: format!("line {}", e.line),
                cause: format!("{}: {:?}", e.cause, e.content),
            })
            .collect();
        Ok(TransformOutput {
            body: Transformed::Document(extraction.text),
            element_errors,
        })
    }
}

/// Marker text into structured Q&A blocks.
pub struct StructureTransform;

impl UnitTransform for StructureTransform {
    fn stage(&self) -> StageName {
        StageName::Structure
    }

    fn transform(&self, unit: &WorkUnit, input: &[u8]) -> Result<TransformOutput, UnitFailure> {
        let text = decode(input)?;
        let structured = wordflow_text::structure(&unit.name, text).map_err(|e| UnitFailure {
            cause: e.to_string(),
            context: e.context(),
        })?;
        debug!(
            unit = %unit.name,
            parents = structured.parent_count,
            followups = structured.followup_count,
            "structured"
        );
        Ok(TransformOutput {
            body: Transformed::Document(structured.text),
            element_errors: Vec::new(),
        })
    }
}

/// Structured text into department partitions.
pub struct SplitTransform;

impl UnitTransform for SplitTransform {
    fn stage(&self) -> StageName {
        StageName::Split
    }

    fn transform(&self, unit: &WorkUnit, input: &[u8]) -> Result<TransformOutput, UnitFailure> {
        let text = decode(input)?;
        let result = wordflow_text::split(text).map_err(|e| UnitFailure::new(e.to_string()))?;
        debug!(
            unit = %unit.name,
            sections = result.section_count,
            partitions = result.partitions.len(),
            "split"
        );

        let partitions = result
            .partitions
            .into_iter()
            .map(|p| PartitionOutput { key: p.key, text: p.text })
            .collect();
        let failures = result
            .failures
            .into_iter()
            .map(|f| PartitionFailure {
                key: f.key,
                cause: format!("section {}: {}", f.section, f.cause),
                context: f.lines,
            })
            .collect();
        Ok(TransformOutput {
            body: Transformed::Partitioned { partitions, failures },
            element_errors: Vec::new(),
        })
    }
}
