//! Argument sanitation, JSON-Schema validation, and the ReAct/Harmony
//! free-form-text tool-call parsers shared by the strategies in this module.

use once_cell_like::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::tools::ToolCall;

/// Drop `null` values and coerce numeric-looking strings to numbers, mirroring
/// how lenient model output ("42" instead of `42`) is normalized before
/// JSON-Schema validation.
pub fn sanitize_arguments(arguments: &Value) -> Value {
    let Value::Object(map) = arguments else { return arguments.clone() };
    let mut cleaned = Map::new();
    for (key, value) in map {
        if value.is_null() {
            continue;
        }
        cleaned.insert(key.clone(), coerce_numeric_string(value));
    }
    Value::Object(cleaned)
}

fn coerce_numeric_string(value: &Value) -> Value {
    let Value::String(text) = value else { return value.clone() };
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(parsed) = text.parse::<i64>() {
            return Value::Number(parsed.into());
        }
    }
    if text.contains('.') {
        if let Ok(parsed) = text.parse::<f64>() {
            if let Some(number) = serde_json::Number::from_f64(parsed) {
                return Value::Number(number);
            }
        }
    }
    value.clone()
}

/// A minimal JSON-Schema check: required-field presence and a top-level
/// `type` match per declared property. Not a full schema validator — this
/// mirrors the lenient checks a tool-calling model's output needs, not a
/// general-purpose one.
pub fn validate_json_schema(arguments: &Value, schema: &Value) -> Result<(), String> {
    let properties = schema.get("properties").and_then(Value::as_object);
    let required = schema.get("required").and_then(Value::as_array);

    if let Some(required) = required {
        for field in required {
            let Some(field) = field.as_str() else { continue };
            if arguments.get(field).is_none() {
                return Err(format!("missing required field: {field}"));
            }
        }
    }

    let Some(properties) = properties else { return Ok(()) };
    let Value::Object(arguments) = arguments else { return Ok(()) };

    for (field, value) in arguments {
        let Some(expected_type) = properties.get(field).and_then(|p| p.get("type")).and_then(Value::as_str) else {
            continue;
        };
        let matches = match expected_type {
            "string" => value.is_string(),
            "number" | "integer" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !matches {
            return Err(format!("field {field} should be of type {expected_type}"));
        }
    }

    Ok(())
}

/// ReAct-format extraction: `Thought:` / `Action:` / `Action Input:` /
/// `Observation:` / `Final Answer:` lines.
pub struct ReActParser;

impl ReActParser {
    fn patterns() -> &'static ReActPatterns {
        static PATTERNS: Lazy<ReActPatterns> = Lazy::new(|| ReActPatterns {
            thought: Regex::new(r"(?ms)^Thought:\s*(.+?)(?=\n(?:Action|Final Answer)|\z)").unwrap(),
            action: Regex::new(r"(?m)^Action:\s*(.+?)(?=\n)").unwrap(),
            action_input: Regex::new(
                r"(?ms)^Action Input:\s*(.+?)(?=\n(?:Observation|Thought|Action|Final Answer)|\z)",
            )
            .unwrap(),
            final_answer: Regex::new(r"(?ms)^Final Answer:\s*(.+)").unwrap(),
        });
        &PATTERNS
    }

    pub fn extract_thought(text: &str) -> Option<String> {
        Self::patterns().thought.captures(text).map(|c| c[1].trim().to_string())
    }

    pub fn extract_action(text: &str) -> Option<String> {
        Self::patterns().action.captures(text).map(|c| c[1].trim().to_string())
    }

    pub fn extract_action_input(text: &str) -> Option<Value> {
        let raw = Self::patterns().action_input.captures(text)?[1].trim().to_string();
        if let Ok(parsed) = serde_json::from_str::<Value>(&raw) {
            return Some(parsed);
        }
        if raw.contains('=') && !raw.contains('{') {
            let mut map = Map::new();
            for part in raw.split(',') {
                if let Some((key, value)) = part.split_once('=') {
                    map.insert(key.trim().to_string(), Value::String(value.trim().trim_matches(['"', '\'']).to_string()));
                }
            }
            return Some(Value::Object(map));
        }
        Some(serde_json::json!({ "input": raw }))
    }

    pub fn extract_final_answer(text: &str) -> Option<String> {
        Self::patterns().final_answer.captures(text).map(|c| c[1].trim().to_string())
    }

    pub fn is_final_answer(text: &str) -> bool {
        Self::patterns().final_answer.is_match(text)
    }

    pub fn parse_tool_call(text: &str) -> Option<ToolCall> {
        let name = Self::extract_action(text)?;
        let arguments = Self::extract_action_input(text).unwrap_or_else(|| Value::Object(Map::new()));
        Some(ToolCall { name, arguments, call_id: None })
    }
}

struct ReActPatterns {
    thought: Regex,
    action: Regex,
    action_input: Regex,
    final_answer: Regex,
}

/// Harmony-DSL extraction: `<tool name="...">{json}</tool>` tags, with a
/// regex fallback for malformed XML, plus the GPT-OSS channel-commentary
/// form (`<|channel|>commentary to=... json<|message|>{...}`).
pub struct HarmonyParser;

impl HarmonyParser {
    fn tool_tag() -> &'static Regex {
        static PATTERN: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r#"(?is)<tool\s+name\s*=\s*["']([^"']+)["']\s*>(.*?)</tool>"#).unwrap()
        });
        &PATTERN
    }

    fn channel_commentary() -> &'static Regex {
        static PATTERN: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r#"(?is)<\|channel\|>commentary\s+to\s*=\s*(\w+)\s*<\|constrain\|>json<\|message\|>(\{.*?\})"#)
                .unwrap()
        });
        &PATTERN
    }

    pub fn has_tool_calls(text: &str) -> bool {
        Self::tool_tag().is_match(text) || Self::channel_commentary().is_match(text)
    }

    pub fn parse_regex_tools(text: &str) -> Vec<ToolCall> {
        Self::tool_tag()
            .captures_iter(text)
            .map(|captures| {
                let name = captures[1].to_string();
                let content = captures[2].trim();
                let arguments = if content.is_empty() {
                    Value::Object(Map::new())
                } else {
                    serde_json::from_str(content).unwrap_or_else(|_| serde_json::json!({ "input": content }))
                };
                ToolCall { name, arguments, call_id: None }
            })
            .collect()
    }

    /// GPT-OSS channel-commentary calls. Migrates the legacy `web_search`
    /// argument names `topn` (dropped; no replacement) and `source`
    /// (renamed to `categories`).
    pub fn parse_channel_commentary(text: &str) -> Vec<ToolCall> {
        Self::channel_commentary()
            .captures_iter(text)
            .filter_map(|captures| {
                let name = captures[1].to_string();
                let mut arguments: Value = serde_json::from_str(&captures[2]).ok()?;
                if name == "web_search" {
                    if let Value::Object(map) = &mut arguments {
                        if let Some(dropped) = map.remove("topn") {
                            tracing::debug!(?dropped, "dropping unsupported legacy web_search argument `topn`");
                        }
                        if let Some(source) = map.remove("source") {
                            map.insert("categories".to_string(), source);
                        }
                    }
                }
                Some(ToolCall { name, arguments, call_id: None })
            })
            .collect()
    }

    /// Channel-commentary first (GPT-OSS specific), then tag-regex fallback.
    pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
        let calls = Self::parse_channel_commentary(text);
        if !calls.is_empty() {
            return calls;
        }
        Self::parse_regex_tools(text)
    }
}

/// Minimal `Lazy` so this module doesn't need to pull in `once_cell` just
/// for a handful of compiled regexes; `std::sync::OnceLock` underneath.
mod once_cell_like {
    use std::sync::OnceLock;

    pub struct Lazy<T> {
        cell: OnceLock<T>,
        init: fn() -> T,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Self { cell: OnceLock::new(), init }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}
