//! Harmony-DSL strategy: `<tool name="...">{json}</tool>` tags, with the
//! GPT-OSS channel-commentary form as an equally valid reply. Repeated
//! `web_search` calls for the same normalized query are deduplicated across
//! steps within one run — a chatty model retrying a fruitless search still
//! only pays for it once.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::llm::{ChatMessage, LlmClient};
use crate::tools::{Step, StepType, ToolCall, ToolExecutionContext, ToolRegistry, ToolResult};

use super::parsers::HarmonyParser;
use super::{Strategy, allowed_tool_names, base_system_prompt, error_step, execute_tool_with_validation, user_content};

/// Drives one Harmony-DSL step against an LLM, deduplicating repeated
/// `web_search` calls within the run.
pub struct HarmonyStrategy {
    llm: LlmClient,
    seen_web_searches: Mutex<HashSet<String>>,
}

impl HarmonyStrategy {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm, seen_web_searches: Mutex::new(HashSet::new()) }
    }

    async fn system_prompt(&self, context: &ToolExecutionContext, registry: &ToolRegistry) -> String {
        let allowed = allowed_tool_names(context, registry).await;
        format!(
            "{base}Available tools: {tools}. To call one, reply with exactly one tag: \
             <tool name=\"tool_name\">{{\"arg\": \"value\"}}</tool>. Once no more tools are \
             needed, reply with your answer as plain text (no tags).",
            base = base_system_prompt(),
            tools = if allowed.is_empty() { "(none)".to_string() } else { allowed.join(", ") },
        )
    }

    /// `(normalized_query, sorted filter_list, model)` — a repeated
    /// `web_search` call with the same fingerprint within this run is
    /// skipped rather than re-executed.
    fn web_search_fingerprint(arguments: &Value, model: &str) -> Option<String> {
        let query = arguments.get("query")?.as_str()?.trim().to_lowercase();
        let mut filters: Vec<String> = arguments
            .get("filter_list")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str()).map(str::to_lowercase).collect())
            .unwrap_or_default();
        filters.sort();
        Some(format!("{query}\u{0}{}\u{0}{model}", filters.join(",")))
    }

    async fn is_duplicate_web_search(&self, call: &ToolCall, model: &str) -> bool {
        if call.name != "web_search" {
            return false;
        }
        let Some(fingerprint) = Self::web_search_fingerprint(&call.arguments, model) else { return false };
        let mut seen = self.seen_web_searches.lock().await;
        !seen.insert(fingerprint)
    }
}

#[async_trait]
impl Strategy for HarmonyStrategy {
    fn build_messages(&self, context: &ToolExecutionContext) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::user(user_content(context))];
        for step in &context.steps {
            match step.step_type {
                StepType::Reasoning | StepType::Action => messages.push(ChatMessage::assistant(step.content.clone())),
                StepType::Observation => messages.push(ChatMessage::user(step.content.clone())),
                StepType::FinalAnswer => {}
            }
        }
        messages
    }

    async fn execute_step(&self, context: &ToolExecutionContext, registry: &ToolRegistry) -> Step {
        let system = self.system_prompt(context, registry).await;
        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(self.build_messages(context));

        let reply = match self.llm.generate_answer(&context.run_config.model, &messages).await {
            Ok(reply) => reply,
            Err(error) => return error_step(error.to_string()),
        };

        if !HarmonyParser::has_tool_calls(&reply) {
            return Step::final_answer(reply);
        }

        let calls = HarmonyParser::parse_tool_calls(&reply);
        let Some(call) = calls.into_iter().next() else {
            return Step::final_answer(reply);
        };

        if self.is_duplicate_web_search(&call, &context.run_config.model).await {
            return Step::observation(
                "Observation: this search was already performed earlier in this run; reusing prior results.".to_string(),
                ToolResult {
                    name: call.name,
                    result: Value::String("duplicate search skipped".to_string()),
                    success: true,
                    error: None,
                    call_id: None,
                    latency_ms: 0.0,
                    retries: 0,
                },
            );
        }

        execute_tool_with_validation(call, context, registry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_ignores_filter_list_order() {
        let a = json!({"query": "Rust Async", "filter_list": ["b.com", "a.com"]});
        let b = json!({"query": "rust async", "filter_list": ["a.com", "b.com"]});
        assert_eq!(
            HarmonyStrategy::web_search_fingerprint(&a, "model"),
            HarmonyStrategy::web_search_fingerprint(&b, "model"),
        );
    }

    #[test]
    fn fingerprint_differs_across_models() {
        let args = json!({"query": "rust"});
        assert_ne!(
            HarmonyStrategy::web_search_fingerprint(&args, "model-a"),
            HarmonyStrategy::web_search_fingerprint(&args, "model-b"),
        );
    }

    #[tokio::test]
    async fn second_identical_web_search_is_detected_as_duplicate() {
        let llm = LlmClient::new(reqwest::Client::new(), "http://localhost".to_string());
        let strategy = HarmonyStrategy::new(llm);
        let call = ToolCall { name: "web_search".to_string(), arguments: json!({"query": "rust"}), call_id: None };

        assert!(!strategy.is_duplicate_web_search(&call, "model").await);
        assert!(strategy.is_duplicate_web_search(&call, "model").await);
    }
}
