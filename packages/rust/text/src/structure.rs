//! Conversion of marker text into structured Q&A blocks.
//!
//! The input is the extract stage output after manual `[QA_SPLIT]` placement.
//! Every `[PARENT]` block becomes one Q&A record with an id, a date taken from
//! the file name and the department named in the major question.

use std::ops::Range;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::lines::{collapse_blank_runs, finish, next_non_blank, split_lines, trim_leading_blank, trim_trailing_blank};
use crate::{MARKER_CHILD, MARKER_PARENT, MARKER_QA_SPLIT};

const TAG_Q: &str = "[Q] ";
const TAG_A: &str = "[A] ";
const TITLE_MAJOR: &str = "## 主要問答";

static FILE_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2})(\d{2})(\d{2})_").expect("valid regex"));

static DEPARTMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"【([^】]*)】").expect("valid regex"));

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Structured output of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structured {
    pub text: String,
    pub parent_count: usize,
    pub followup_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    #[error("file name must start with yymmdd_: {0}")]
    FileName(String),

    #[error("file name {file_name} carries an invalid date: {digits}")]
    Date { file_name: String, digits: String },

    #[error("invalid document structure: {}", problems.join(" / "))]
    Invalid { problems: Vec<String> },

    #[error("parent block {parent}, child block {child}: {message}")]
    Block {
        parent: usize,
        child: usize,
        message: String,
        lines: Vec<String>,
    },
}

impl StructureError {
    /// Supporting detail for an error record.
    pub fn context(&self) -> Vec<String> {
        match self {
            Self::Invalid { problems } => problems.clone(),
            Self::Block { lines, .. } => lines.clone(),
            Self::FileName(_) | Self::Date { .. } => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Convert one document. `file_name` supplies the `yymmdd_` date prefix.
pub fn structure(file_name: &str, text: &str) -> Result<Structured, StructureError> {
    let mut lines = split_lines(text);
    if text.ends_with('\n') {
        lines.pop();
    }

    let problems = validate(&lines);
    if !problems.is_empty() {
        return Err(StructureError::Invalid { problems });
    }

    let date = date_from_file_name(file_name)?;
    let id_date = date.format("%Y%m%d").to_string();
    let out_date = date.format("%Y-%m-%d").to_string();

    let mut out = vec![String::new(), String::new()];
    let mut followup_count = 0;
    let parents = blocks_at(&lines, 0..lines.len(), MARKER_PARENT);

    for (p, parent) in parents.iter().enumerate() {
        if p > 0 {
            out.push(String::new());
        }
        let children = blocks_at(&lines, parent.clone(), MARKER_CHILD);
        let block_error = |child: usize, message: &str, range: &Range<usize>| StructureError::Block {
            parent: p + 1,
            child,
            message: message.to_string(),
            lines: lines[range.clone()].to_vec(),
        };

        let Some(major) = children.first() else {
            return Err(block_error(0, "no [CHILD] marker", parent));
        };
        let major_content = &lines[major.start + 1..major.end];
        let Some(qa) = qa_split_index(major_content) else {
            return Err(block_error(1, "no [QA_SPLIT] marker", major));
        };
        let major_question = &major_content[..qa];
        let department = department_of(major_question).unwrap_or_default();

        out.push(MARKER_PARENT.to_string());
        out.push(format!("# 問答ID: {id_date}-{:03}", p + 1));
        out.push(format!("- 日付: {out_date}"));
        out.push(format!("- 部署: {department}"));

        let mut question = major_question.to_vec();
        trim_trailing_blank(&mut question);
        tag_first_line(&mut question, TAG_Q).map_err(|m| block_error(1, m, major))?;
        out.extend(question);
        out.push(String::new());

        for (c, child) in children.iter().enumerate() {
            let title = if c == 0 {
                TITLE_MAJOR.to_string()
            } else {
                format!("## 更問{c}")
            };
            let child_out = build_child(&lines[child.start + 1..child.end], title)
                .map_err(|m| block_error(c + 1, &m, child))?;
            out.extend(child_out);
            if c + 1 < children.len() {
                out.push(String::new());
            }
        }
        followup_count += children.len() - 1;
    }

    let out = collapse_blank_runs(out, 2);
    Ok(Structured {
        text: finish(&out),
        parent_count: parents.len(),
        followup_count,
    })
}

/// Read `yymmdd_` from the start of a file name. The year is 2000 + yy.
fn date_from_file_name(file_name: &str) -> Result<NaiveDate, StructureError> {
    let caps = FILE_DATE_RE
        .captures(file_name)
        .ok_or_else(|| StructureError::FileName(file_name.to_string()))?;
    let field = |i: usize| caps[i].parse::<u32>().unwrap_or_default();
    let year = 2000 + field(1) as i32;
    NaiveDate::from_ymd_opt(year, field(2), field(3)).ok_or_else(|| StructureError::Date {
        file_name: file_name.to_string(),
        digits: format!("{}{}{}", &caps[1], &caps[2], &caps[3]),
    })
}

fn department_of(question: &[String]) -> Option<String> {
    question
        .iter()
        .find_map(|line| DEPARTMENT_RE.captures(line).map(|c| c[1].to_string()))
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

fn is_marker_line(line: &str, marker: &str) -> bool {
    line.trim() == marker
}

/// Ranges inside `within` that start at a `marker` line and run to the next one.
fn blocks_at(lines: &[String], within: Range<usize>, marker: &str) -> Vec<Range<usize>> {
    let end = within.end;
    let starts: Vec<usize> = within.filter(|&i| is_marker_line(&lines[i], marker)).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| start..starts.get(i + 1).copied().unwrap_or(end))
        .collect()
}

fn qa_split_index(lines: &[String]) -> Option<usize> {
    lines.iter().position(|l| is_marker_line(l, MARKER_QA_SPLIT))
}

/// Prefix the first non-blank line with `tag` unless it already carries it.
fn tag_first_line(lines: &mut [String], tag: &str) -> Result<(), &'static str> {
    let idx = next_non_blank(lines, 0).ok_or("no non-blank line to tag")?;
    if !lines[idx].starts_with(tag) {
        lines[idx] = format!("{tag}{}", lines[idx]);
    }
    Ok(())
}

fn build_child(content: &[String], title: String) -> Result<Vec<String>, String> {
    let qa = qa_split_index(content).ok_or("no [QA_SPLIT] marker")?;

    let mut question = content[..qa].to_vec();
    trim_trailing_blank(&mut question);
    tag_first_line(&mut question, TAG_Q).map_err(|m| format!("question: {m}"))?;

    let mut answer = content[qa + 1..].to_vec();
    trim_leading_blank(&mut answer);
    tag_first_line(&mut answer, TAG_A).map_err(|m| format!("answer: {m}"))?;

    let mut out = Vec::with_capacity(question.len() + answer.len() + 2);
    out.push(MARKER_CHILD.to_string());
    out.push(title);
    out.extend(question);
    out.extend(answer);

    let q_count = out.iter().filter(|l| l.starts_with(TAG_Q)).count();
    let a_count = out.iter().filter(|l| l.starts_with(TAG_A)).count();
    if q_count != 1 || a_count != 1 {
        return Err(format!("expected one [Q] and one [A], found [Q]={q_count} [A]={a_count}"));
    }
    let q_pos = out.iter().position(|l| l.starts_with(TAG_Q));
    let a_pos = out.iter().position(|l| l.starts_with(TAG_A));
    if q_pos >= a_pos {
        return Err("[Q] appears after [A]".to_string());
    }

    trim_trailing_blank(&mut out);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Collect every structural problem; an empty list means the document is usable.
fn validate(lines: &[String]) -> Vec<String> {
    let mut problems = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        for marker in [MARKER_PARENT, MARKER_CHILD, MARKER_QA_SPLIT] {
            if line.contains(marker) && !is_marker_line(line, marker) {
                problems.push(format!("line {}: {marker} is not alone on its line: {line:?}", idx + 1));
            }
        }
    }

    let parents = blocks_at(lines, 0..lines.len(), MARKER_PARENT);
    if parents.is_empty() {
        problems.push(format!("no {MARKER_PARENT} marker found"));
        return problems;
    }

    for (p, parent) in parents.iter().enumerate() {
        let children = blocks_at(lines, parent.clone(), MARKER_CHILD);
        if children.is_empty() {
            problems.push(format!("parent block {}: no {MARKER_CHILD} marker", p + 1));
            continue;
        }
        for (c, child) in children.iter().enumerate() {
            let at = format!("parent block {} / child block {}", p + 1, c + 1);
            let splits: Vec<usize> = child
                .clone()
                .filter(|&i| is_marker_line(&lines[i], MARKER_QA_SPLIT))
                .collect();
            let qa = match splits.as_slice() {
                [qa] => *qa,
                [] => {
                    problems.push(format!("{at}: no {MARKER_QA_SPLIT} marker"));
                    continue;
                }
                _ => {
                    problems.push(format!("{at}: more than one {MARKER_QA_SPLIT} marker"));
                    continue;
                }
            };
            if next_non_blank(lines, child.start + 1).is_none_or(|q| q >= qa) {
                problems.push(format!("{at}: no question line before {MARKER_QA_SPLIT}"));
                continue;
            }
            if next_non_blank(lines, qa + 1).is_none_or(|a| a >= child.end) {
                problems.push(format!("{at}: no answer line after {MARKER_QA_SPLIT}"));
            }
        }
    }

    problems
}
