//! Partitioning of structured text by department.
//!
//! A document is cut into sections at `[PARENT]` lines. Each section lands in
//! the partition named after its `- 部署:` line, prefixed with the document
//! date when one is present. A section that cannot be assigned fails alone;
//! the rest of the document is still partitioned.

use std::sync::LazyLock;

use regex::Regex;

use wordflow_shared::ERROR_SUFFIX;

use crate::MARKER_PARENT;
use crate::lines::{finish, is_blank, split_lines, trim_leading_blank, trim_trailing_blank};

/// Partition name for sections without a usable department.
pub const NO_DEPARTMENT: &str = "部署名なし";

/// Characters that cannot appear in a partition file name.
const ILLEGAL_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

static DEPARTMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- 部署\s*[:：](.*)$").expect("valid regex"));

static DATE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- 日付\s*[:：]\s*(.+)$").expect("valid regex"));

static KANJI_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})年(\d{1,2})月(\d{1,2})日").expect("valid regex"));

/// Sections that share one department.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub key: String,
    pub text: String,
    pub section_count: usize,
}

/// A section that could not be assigned to a department.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionFailure {
    /// Partition whose error artifact records this failure.
    pub key: String,
    /// 1-based position of the section in the document.
    pub section: usize,
    pub cause: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitResult {
    /// Partitions in order of first appearance.
    pub partitions: Vec<Partition>,
    pub failures: Vec<SectionFailure>,
    pub section_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("document contains no non-blank section")]
    Empty,
}

/// Split a structured document into department partitions.
pub fn split(text: &str) -> Result<SplitResult, SplitError> {
    let lines = split_lines(text);
    let sections = split_sections(&lines);
    if sections.is_empty() {
        return Err(SplitError::Empty);
    }

    let date_prefix = document_date(&lines);
    let key_for = |dept: &str| match &date_prefix {
        Some(date) => format!("{date}_{dept}"),
        None => dept.to_string(),
    };

    let mut grouped: Vec<(String, Vec<Vec<String>>)> = Vec::new();
    let mut failures = Vec::new();

    for (idx, section) in sections.iter().enumerate() {
        match department_of(section) {
            Ok(dept) => {
                let key = key_for(&dept);
                if key.ends_with(ERROR_SUFFIX) {
                    failures.push(SectionFailure {
                        cause: format!("department name {dept:?} ends with the reserved suffix `{ERROR_SUFFIX}`"),
                        key,
                        section: idx + 1,
                        lines: section.clone(),
                    });
                    continue;
                }
                match grouped.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, members)) => members.push(section.clone()),
                    None => grouped.push((key, vec![section.clone()])),
                }
            }
            Err(failure) => failures.push(SectionFailure {
                key: key_for(&failure.department),
                section: idx + 1,
                cause: failure.cause,
                lines: section.clone(),
            }),
        }
    }

    let partitions = grouped
        .into_iter()
        .map(|(key, members)| Partition {
            key,
            section_count: members.len(),
            text: render_partition(&members),
        })
        .collect();

    Ok(SplitResult {
        partitions,
        failures,
        section_count: sections.len(),
    })
}

/// Cut at `[PARENT]` lines, dropping all-blank sections and trimming the rest.
fn split_sections(lines: &[String]) -> Vec<Vec<String>> {
    let mut sections = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in lines {
        if line.trim() == MARKER_PARENT && !current.is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push(line.clone());
    }
    sections.push(current);

    sections
        .into_iter()
        .filter(|s| s.iter().any(|l| !is_blank(l)))
        .map(|mut s| {
            trim_leading_blank(&mut s);
            trim_trailing_blank(&mut s);
            s
        })
        .collect()
}

/// `YYYY年M月D日` becomes `YYYYMMDD`; any other value keeps only its digits.
fn document_date(lines: &[String]) -> Option<String> {
    let value = lines
        .iter()
        .find_map(|l| DATE_LINE_RE.captures(l).map(|c| c[1].trim().to_string()))?;

    if let Some(c) = KANJI_DATE_RE.captures(&value) {
        let pad = |s: &str| format!("{:0>2}", s);
        return Some(format!("{}{}{}", &c[1], pad(&c[2]), pad(&c[3])));
    }
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

struct DepartmentFailure {
    department: String,
    cause: String,
}

fn department_of(section: &[String]) -> Result<String, DepartmentFailure> {
    let mut names: Vec<&str> = Vec::new();
    for line in section {
        if let Some(c) = DEPARTMENT_RE.captures(line) {
            let name = c.get(1).map_or("", |m| m.as_str().trim());
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        } else if line.starts_with("- 部署") {
            return Err(DepartmentFailure {
                department: NO_DEPARTMENT.to_string(),
                cause: format!("malformed department line: {line:?}"),
            });
        }
    }

    match names.as_slice() {
        [] => Ok(NO_DEPARTMENT.to_string()),
        [name] => {
            let clean = sanitize(name);
            if clean == *name {
                Ok(clean)
            } else {
                Err(DepartmentFailure {
                    department: clean,
                    cause: format!("department name contains characters not allowed in file names: {name:?}"),
                })
            }
        }
        [first, ..] => Err(DepartmentFailure {
            department: sanitize(first),
            cause: format!("conflicting department lines: {}", names.join(", ")),
        }),
    }
}

/// Strip file-name-illegal and control characters.
fn sanitize(name: &str) -> String {
    let clean: String = name
        .chars()
        .filter(|c| !ILLEGAL_NAME_CHARS.contains(c) && !c.is_control())
        .collect();
    let clean = clean.trim();
    if clean.is_empty() {
        NO_DEPARTMENT.to_string()
    } else {
        clean.to_string()
    }
}

fn render_partition(sections: &[Vec<String>]) -> String {
    let mut out = vec![String::new(), String::new()];
    for (idx, section) in sections.iter().enumerate() {
        if idx > 0 {
            out.push(String::new());
        }
        out.extend(section.iter().cloned());
    }
    finish(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(id: usize, dept: &str) -> String {
        format!("[PARENT]\n# 問答ID: 20240105-{id:03}\n- 日付: 2024-01-05\n- 部署: {dept}\n[Q] q{id}\n")
    }

    #[test]
    fn groups_sections_by_department() {
        let doc = format!("\n\n{}\n{}\n{}", section(1, "総務課"), section(2, "広報課"), section(3, "総務課"));
        let result = split(&doc).unwrap();

        assert_eq!(result.section_count, 3);
        assert!(result.failures.is_empty());
        let keys: Vec<&str> = result.partitions.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["20240105_総務課", "20240105_広報課"]);

        let first = &result.partitions[0];
        assert_eq!(first.section_count, 2);
        assert!(first.text.starts_with("\n\n[PARENT]\n# 問答ID: 20240105-001\n"));
        assert!(first.text.contains("[Q] q1\n\n[PARENT]\n# 問答ID: 20240105-003\n"));
        assert!(first.text.ends_with("[Q] q3\n"));
    }

    #[test]
    fn missing_department_goes_to_default_partition() {
        let doc = "[PARENT]\n- 部署: \n[Q] a\n[PARENT]\n[Q] b\n";
        let result = split(doc).unwrap();
        assert_eq!(result.partitions.len(), 1);
        assert_eq!(result.partitions[0].key, NO_DEPARTMENT);
        assert_eq!(result.partitions[0].section_count, 2);
    }

    #[test]
    fn kanji_date_is_normalized() {
        let doc = "[PARENT]\n- 日付: 2024年1月5日\n- 部署: 総務課\n";
        let result = split(doc).unwrap();
        assert_eq!(result.partitions[0].key, "20240105_総務課");
    }

    #[test]
    fn conflicting_departments_fail_the_section_only() {
        let doc = format!("{}[PARENT]\n- 部署: 総務課\n- 部署: 広報課\n", section(1, "総務課"));
        let result = split(&doc).unwrap();

        assert_eq!(result.partitions.len(), 1);
        assert_eq!(result.failures.len(), 1);
        let failure = &result.failures[0];
        assert_eq!(failure.key, "20240105_総務課");
        assert_eq!(failure.section, 2);
        assert!(failure.cause.contains("conflicting"));
        assert_eq!(failure.lines[0], "[PARENT]");
    }

    #[test]
    fn illegal_characters_fail_the_section() {
        let result = split("[PARENT]\n- 部署: HR?\n").unwrap();
        assert!(result.partitions.is_empty());
        assert_eq!(result.failures[0].key, "HR");
    }

    #[test]
    fn reserved_suffix_fails_the_section() {
        let doc = format!("{}{}", section(1, "Sales_ERROR"), section(2, "総務課"));
        let result = split(&doc).unwrap();

        let keys: Vec<&str> = result.partitions.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["20240105_総務課"]);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].key, "20240105_Sales_ERROR");
        assert_eq!(result.failures[0].section, 1);
        assert!(result.failures[0].cause.contains("reserved"));
    }

    #[test]
    fn malformed_department_line_fails_the_section() {
        let result = split("[PARENT]\n- 部署 総務課\n").unwrap();
        assert_eq!(result.failures[0].key, NO_DEPARTMENT);
    }

    #[test]
    fn blank_document_is_an_error() {
        assert!(matches!(split("\n\n  \n"), Err(SplitError::Empty)));
        assert!(matches!(split("[PARENT]\n\n[PARENT]\n"), Ok(ref r) if r.section_count == 2));
    }

    #[test]
    fn sanitize_falls_back_to_default() {
        assert_eq!(sanitize("a/b"), "ab");
        assert_eq!(sanitize("??"), NO_DEPARTMENT);
    }
}
