//! JSON function-calling strategy: the system prompt describes every
//! allowed tool's JSON-Schema and asks the model to reply with either
//! `{"tool_call": {"name": ..., "arguments": {...}}}` or
//! `{"final_answer": "..."}`.

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{ChatMessage, LlmClient};
use crate::tools::{Step, ToolCall, ToolExecutionContext, ToolRegistry};

use super::{Strategy, allowed_tool_names, base_system_prompt, error_step, execute_tool_with_validation, user_content};

/// Drives one JSON-function-calling step against an LLM.
pub struct JsonFcStrategy {
    llm: LlmClient,
}

impl JsonFcStrategy {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    async fn system_prompt(&self, context: &ToolExecutionContext, registry: &ToolRegistry) -> String {
        let allowed = allowed_tool_names(context, registry).await;
        let schemas = registry.schemas().await;
        let descriptions: Vec<String> = schemas
            .into_iter()
            .filter(|schema| allowed.contains(&schema.name))
            .map(|schema| format!("- {}: {} (parameters: {})", schema.name, schema.description, schema.parameters))
            .collect();

        format!(
            "{base}You may call one of the following tools if the reference material is \
             insufficient to answer:\n{tools}\n\nRespond with exactly one JSON object on a \
             single line: either {{\"tool_call\": {{\"name\": \"...\", \"arguments\": {{...}}}}}} \
             to call a tool, or {{\"final_answer\": \"...\"}} once you can answer directly. \
             Never reply with anything else.",
            base = base_system_prompt(),
            tools = if descriptions.is_empty() { "(no tools available)".to_string() } else { descriptions.join("\n") },
        )
    }
}

#[async_trait]
impl Strategy for JsonFcStrategy {
    fn build_messages(&self, context: &ToolExecutionContext) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::user(user_content(context))];
        for step in &context.steps {
            match step.step_type {
                crate::tools::StepType::Reasoning | crate::tools::StepType::Action => {
                    messages.push(ChatMessage::assistant(step.content.clone()));
                }
                crate::tools::StepType::Observation => messages.push(ChatMessage::user(step.content.clone())),
                crate::tools::StepType::FinalAnswer => {}
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

        let Some(parsed) = extract_json_object(&reply) else {
            return Step::final_answer(reply);
        };

        if let Some(answer) = parsed.get("final_answer").and_then(Value::as_str) {
            return Step::final_answer(answer.to_string());
        }

        let Some(tool_call) = parsed.get("tool_call") else {
            return Step::final_answer(reply);
        };
        let Some(name) = tool_call.get("name").and_then(Value::as_str) else {
            return error_step("model emitted a tool_call with no name");
        };
        let arguments = tool_call.get("arguments").cloned().unwrap_or_else(|| Value::Object(Default::default()));

        execute_tool_with_validation(ToolCall { name: name.to_string(), arguments, call_id: None }, context, registry)
            .await
    }
}

/// Find the first balanced `{...}` object in `text`, tolerating surrounding
/// prose or code fences a model might add despite instructions.
fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return serde_json::from_str(&text[start..end]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_object_tolerates_surrounding_prose() {
        let text = "Sure, here's my decision:\n{\"final_answer\": \"42\"}\nHope that helps.";
        let parsed = extract_json_object(text).expect("object");
        assert_eq!(parsed["final_answer"], "42");
    }

    #[test]
    fn extract_json_object_returns_none_without_braces() {
        assert!(extract_json_object("no json here").is_none());
    }
}
