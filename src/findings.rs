//! Structured findings embedded in the final report.
//!
//! The depth-comparison prompt asks the model to end with a fenced
//! ```` ```json ```` block. Models do not always comply, so extraction is
//! best-effort: absence and malformed JSON are reported, never fatal.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)[ \t]*\r?\n(.*?)```").expect("Invalid fenced json regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Findings {
    #[serde(default)]
    pub key_findings: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FindingsError {
    #[error("no fenced json block in report")]
    NoBlock,
    #[error("fenced json block is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Pull the last fenced json block out of `report` and parse it.
pub fn extract_findings(report: &str) -> Result<Findings, FindingsError> {
    let block = FENCED_JSON
        .captures_iter(report)
        .filter_map(|c| c.get(1))
        .last()
        .ok_or(FindingsError::NoBlock)?;
    let findings: Findings = serde_json::from_str(extract_json(block.as_str()))?;
    Ok(Findings {
        key_findings: findings
            .key_findings
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect(),
    })
}

/// Extract a JSON object from potentially noisy LLM output.
///
/// Handles pure JSON and JSON embedded in prose.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find('{') {
        let remainder = &trimmed[start..];
        if let Some(end) = find_matching_brace(remainder) {
            return &remainder[..end];
        }
    }
    trimmed
}

/// Byte offset just past the brace closing the first `{`, ignoring braces inside strings.
fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
