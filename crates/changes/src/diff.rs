//! Human-readable rendering of a change summary for build logs.

use serde_json::Value as Json;

use crate::error::Result;
use crate::summary::{parse_changes, ChangeRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLine<'a> {
    Same(&'a str),
    Removed(&'a str),
    Added(&'a str),
}

impl DiffLine<'_> {
    fn prefix(&self) -> &'static str {
        match self {
            DiffLine::Same(_) => "\t  ",
            DiffLine::Removed(_) => "\t- ",
            DiffLine::Added(_) => "\t+ ",
        }
    }

    fn text(&self) -> &str {
        match self {
            DiffLine::Same(s) | DiffLine::Removed(s) | DiffLine::Added(s) => s,
        }
    }
}

/// Counts of added and removed lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub adds: usize,
    pub removes: usize,
}

/// Longest-common-subsequence line diff. Removals are emitted before
/// additions at each divergence.
pub fn line_diff<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<DiffLine<'a>> {
    let (n, m) = (old.len(), new.len());
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] { lcs[i + 1][j + 1] + 1 } else { lcs[i + 1][j].max(lcs[i][j + 1]) };
        }
    }
    let mut out = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            out.push(DiffLine::Same(old[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(DiffLine::Removed(old[i]));
            i += 1;
        } else {
            out.push(DiffLine::Added(new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|s| DiffLine::Removed(*s)));
    out.extend(new[j..].iter().map(|s| DiffLine::Added(*s)));
    out
}

pub fn diff_summary(lines: &[DiffLine<'_>]) -> DiffSummary {
    lines.iter().fold(DiffSummary::default(), |mut s, l| {
        match l {
            DiffLine::Added(_) => s.adds += 1,
            DiffLine::Removed(_) => s.removes += 1,
            DiffLine::Same(_) => {}
        }
        s
    })
}

/// Strings are shown raw; everything else as YAML.
fn render_value(v: &Json) -> Result<String> {
    match v {
        Json::Null => Ok(String::new()),
        Json::String(s) => Ok(s.clone()),
        other => Ok(serde_yaml::to_string(other)?),
    }
}

pub fn render_record(record: &ChangeRecord) -> Result<String> {
    let (old, new) = (render_value(&record.old)?, render_value(&record.new)?);
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let mut out = format!("{}:\n", record.reason);
    for line in line_diff(&old_lines, &new_lines) {
        out.push_str(line.prefix());
        out.push_str(line.text());
        out.push('\n');
    }
    Ok(out)
}

/// Render the `Build reason(s)` header followed by one block per change.
pub fn render_changes(reasons: &str, changes: &str) -> Result<String> {
    let mut out = format!("Build reason(s): {}\n", reasons);
    for record in parse_changes(changes)? {
        out.push('\n');
        out.push_str(&render_record(&record)?);
    }
    Ok(out)
}
