//! JSON-repair helpers shared by the decomposer and reasoning engine: both
//! prompt an LLM for a JSON object and must tolerate markdown fences and
//! truncated output rather than failing the whole step.

use serde_json::Value;

/// Strip a leading ` ```json` / ` ``` ` fence and a trailing ` ``` ` fence,
/// then trim whitespace.
pub fn strip_code_fence(content: &str) -> String {
    let mut content = content.trim();
    if let Some(rest) = content.strip_prefix("```json") {
        content = rest;
    } else if let Some(rest) = content.strip_prefix("```") {
        content = rest;
    }
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }
    content.trim().to_string()
}

/// Attempt to repair a truncated JSON object: walk the content line by line,
/// tracking brace depth and whether we're inside a string, drop the trailing
/// partial line if it was cut off mid-string, and close any still-open braces.
/// Returns `None` if the content was already unparseable in a way this
/// cannot fix (empty input).
pub fn repair_truncated_json(content: &str) -> Option<String> {
    let cleaned = strip_code_fence(content);
    if cleaned.trim().ends_with('}') {
        return Some(cleaned);
    }
    if cleaned.trim().is_empty() {
        return None;
    }

    let mut valid_lines: Vec<String> = Vec::new();
    let mut open_braces: i64 = 0;
    let mut open_quotes = false;

    for line in cleaned.split('\n') {
        let mut escaped = false;
        for ch in line.chars() {
            if ch == '"' && !escaped {
                open_quotes = !open_quotes;
            } else if !open_quotes {
                match ch {
                    '{' => open_braces += 1,
                    '}' => open_braces -= 1,
                    _ => {}
                }
            }
            escaped = ch == '\\' && !escaped;
        }

        let trimmed = line.trim_end();
        if !open_quotes && (trimmed.ends_with(',') || trimmed.ends_with('}') || trimmed.ends_with('{')) {
            valid_lines.push(line.to_string());
        } else if !open_quotes && trimmed.trim().is_empty() {
            valid_lines.push(line.to_string());
        } else if open_quotes {
            if trimmed.ends_with("\",") {
                valid_lines.push(line.to_string());
            } else {
                let mut fixed = trimmed.trim().to_string();
                if !fixed.ends_with('"') {
                    fixed.push('"');
                }
                if !fixed.ends_with(',') {
                    fixed.push(',');
                }
                valid_lines.push(format!("  {fixed}"));
                open_quotes = false;
                break;
            }
        } else {
            valid_lines.push(line.to_string());
        }
    }

    let mut reconstructed = valid_lines.join("\n");
    while open_braces > 0 {
        reconstructed.push_str("\n}");
        open_braces -= 1;
    }
    Some(reconstructed)
}

/// Parse `content` as one JSON object, tolerating a markdown fence and a
/// truncated tail: try a direct parse of the fence-stripped text, then a
/// brace-balance repair, returning `None` if both fail.
pub fn parse_lenient(content: &str) -> Option<Value> {
    let cleaned = strip_code_fence(content);
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Some(value);
    }
    let repaired = repair_truncated_json(content)?;
    serde_json::from_str(&repaired).ok()
}
