//! Text transformations behind the built-in pipeline stages.
//!
//! Each stage is a pure function over one work unit's content:
//! - [`extract`]: marker filtering of a plain-text document export
//! - [`structure`]: marker text into structured Q&A blocks
//! - [`department`]: structured text into one partition per department
//!
//! Nothing here touches the filesystem; the stage runner in `wordflow-core`
//! owns reading inputs and writing outputs or error artifacts.

pub mod department;
pub mod extract;
pub mod structure;

mod lines;

pub use department::{NO_DEPARTMENT, Partition, SectionFailure, SplitError, SplitResult, split};
pub use extract::{ElementError, Extraction, extract};
pub use structure::{StructureError, Structured, structure};

/// Opens a question block.
pub const MARKER_PARENT: &str = "[PARENT]";
/// Opens a child Q&A block (and ends a skip).
pub const MARKER_CHILD: &str = "[CHILD]";
/// Suppresses output until the next marker.
pub const MARKER_SKIP: &str = "[SKIP]";
/// Boundary between question and answer inside a child block.
pub const MARKER_QA_SPLIT: &str = "[QA_SPLIT]";
