//! Blank-line helpers shared by the stage transformations.

pub(crate) fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Index of the first non-blank line at or after `start`.
pub(crate) fn next_non_blank<S: AsRef<str>>(lines: &[S], start: usize) -> Option<usize> {
    (start..lines.len()).find(|&i| !is_blank(lines[i].as_ref()))
}

pub(crate) fn trim_trailing_blank(lines: &mut Vec<String>) {
    while lines.last().is_some_and(|l| is_blank(l)) {
        lines.pop();
    }
}

pub(crate) fn trim_leading_blank(lines: &mut Vec<String>) {
    let keep_from = lines.iter().position(|l| !is_blank(l)).unwrap_or(lines.len());
    lines.drain(..keep_from);
}

/// Collapse runs of blank lines into one, leaving the first `keep_head` lines untouched.
pub(crate) fn collapse_blank_runs(lines: Vec<String>, keep_head: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut prev_blank = false;
    for (i, line) in lines.into_iter().enumerate() {
        if i < keep_head {
            out.push(line);
            continue;
        }
        let blank = is_blank(&line);
        if blank && prev_blank {
            continue;
        }
        prev_blank = blank;
        out.push(line);
    }
    out
}

/// Join lines and end the text with exactly one newline (empty stays empty).
pub(crate) fn finish(lines: &[String]) -> String {
    let joined = lines.join("\n");
    let body = joined.trim_end_matches('\n');
    if body.is_empty() {
        return String::new();
    }
    format!("{body}\n")
}

/// Split text into lines, dropping a trailing `\r` from each.
pub(crate) fn split_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect()
}
