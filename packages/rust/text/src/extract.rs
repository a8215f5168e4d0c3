//! Marker extraction over a plain-text document export.
//!
//! Each input line is one sub-element (a paragraph, or a table row whose cells
//! are separated by ` | `). Output is the content between `[PARENT]` markers
//! with `[SKIP]` ranges removed; a `[CHILD]` marker ends a skip.

use crate::lines::finish;
use crate::{MARKER_CHILD, MARKER_PARENT, MARKER_SKIP};

/// Cell separator of a table row in the text export.
const TABLE_CELL_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Parent,
    Child,
    Skip,
}

impl Marker {
    /// Paragraph detection: first match in PARENT, CHILD, SKIP order.
    fn in_paragraph(text: &str) -> Option<Self> {
        if text.contains(MARKER_PARENT) {
            Some(Self::Parent)
        } else if text.contains(MARKER_CHILD) {
            Some(Self::Child)
        } else if text.contains(MARKER_SKIP) {
            Some(Self::Skip)
        } else {
            None
        }
    }

    /// A table row has no reading direction, so one marker wins by priority
    /// PARENT > SKIP > CHILD.
    fn in_table_row(text: &str) -> Option<Self> {
        let found: Vec<Self> = text
            .split(TABLE_CELL_SEPARATOR)
            .filter_map(Self::in_paragraph)
            .collect();
        [Self::Parent, Self::Skip, Self::Child]
            .into_iter()
            .find(|m| found.contains(m))
    }

    fn opens_block(self) -> bool {
        matches!(self, Self::Parent | Self::Child)
    }
}

#[derive(Debug, Default)]
struct ExtractionState {
    in_parent: bool,
    in_skip: bool,
    parent_count: usize,
}

impl ExtractionState {
    fn apply(&mut self, marker: Marker) {
        match marker {
            Marker::Parent => {
                self.in_parent = true;
                self.in_skip = false;
                self.parent_count += 1;
            }
            Marker::Child => self.in_skip = false,
            Marker::Skip => self.in_skip = true,
        }
    }

    fn emitting(&self) -> bool {
        self.in_parent && !self.in_skip
    }
}

/// A sub-element that could not be processed and was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementError {
    /// 1-based line number in the input.
    pub line: usize,
    pub cause: String,
    /// Lossy rendering of the offending content.
    pub content: String,
}

/// Result of extracting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    /// Number of `[PARENT]` markers seen.
    pub parent_count: usize,
    pub element_errors: Vec<ElementError>,
}

/// Extract the marked sections of a document export.
///
/// Never fails as a whole: undecodable lines are reported in
/// [`Extraction::element_errors`] and skipped.
pub fn extract(input: &[u8]) -> Extraction {
    let mut state = ExtractionState::default();
    let mut out: Vec<String> = Vec::new();
    let mut element_errors = Vec::new();

    let mut last_was_empty = false;
    let mut is_first_output = true;
    let mut marker_just_output = false;

    for (idx, raw) in input.split(|&b| b == b'\n').enumerate() {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(e) => {
                element_errors.push(ElementError {
                    line: idx + 1,
                    cause: format!("invalid UTF-8: {e}"),
                    content: String::from_utf8_lossy(raw).into_owned(),
                });
                continue;
            }
        };

        let is_table_row = text.contains(TABLE_CELL_SEPARATOR);
        let marker = if is_table_row {
            Marker::in_table_row(text)
        } else {
            Marker::in_paragraph(text)
        };
        if let Some(m) = marker {
            state.apply(m);
        }
        if !state.emitting() {
            continue;
        }

        let opens_block = marker.is_some_and(Marker::opens_block);
        if opens_block && !is_first_output && !last_was_empty {
            out.push(String::new());
            last_was_empty = true;
        }

        let is_empty = text.trim().is_empty();
        if !is_table_row && is_empty && (last_was_empty || marker_just_output) {
            continue;
        }

        out.push(text.to_string());
        is_first_output = false;
        if opens_block {
            marker_just_output = true;
            last_was_empty = false;
        } else {
            marker_just_output = false;
            last_was_empty = is_empty;
        }
    }

    Extraction {
        text: finish(&out),
        parent_count: state.parent_count,
        element_errors,
    }
}
