//! ReAct strategy: `Thought:` / `Action:` / `Action Input:` /
//! `Observation:` / `Final Answer:` line-anchored prompting.

use async_trait::async_trait;

use crate::llm::{ChatMessage, LlmClient};
use crate::tools::{Step, StepType, ToolCall, ToolExecutionContext, ToolRegistry};

use super::parsers::ReActParser;
use super::{Strategy, allowed_tool_names, base_system_prompt, error_step, execute_tool_with_validation, user_content};

/// Drives one ReAct step against an LLM.
pub struct ReActStrategy {
    llm: LlmClient,
}

impl ReActStrategy {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    async fn system_prompt(&self, context: &ToolExecutionContext, registry: &ToolRegistry) -> String {
        let allowed = allowed_tool_names(context, registry).await;
        format!(
            "{base}Available tools: {tools}. Follow this exact format, one section per line:\n\
             Thought: <your reasoning>\n\
             Action: <tool name>\n\
             Action Input: <JSON arguments>\n\
             (you will then be given an Observation; continue reasoning)\n\
             Final Answer: <your answer, once no more tools are needed>",
            base = base_system_prompt(),
            tools = if allowed.is_empty() { "(none)".to_string() } else { allowed.join(", ") },
        )
    }
}

#[async_trait]
impl Strategy for ReActStrategy {
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

        if ReActParser::is_final_answer(&reply) {
            let answer = ReActParser::extract_final_answer(&reply).unwrap_or(reply);
            return Step::final_answer(answer);
        }

        let Some(call) = ReActParser::parse_tool_call(&reply) else {
            // No recognizable Action and no Final Answer: treat the whole
            // reply as reasoning so the run can continue rather than stall.
            return Step::reasoning(reply);
        };

        execute_tool_with_validation(
            ToolCall { name: call.name, arguments: call.arguments, call_id: None },
            context,
            registry,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_messages_renders_observation_as_user_turn() {
        let llm = LlmClient::new(reqwest::Client::new(), "http://localhost".to_string());
        let strategy = ReActStrategy::new(llm);
        let mut context = ToolExecutionContext::new(
            "what is rust?",
            vec!["doc 1".to_string()],
            crate::tools::RunConfig::new("model"),
        );
        context.add_step(Step::observation("Observation: result", crate::tools::ToolResult {
            name: "web_search".to_string(),
            result: serde_json::Value::String("result".to_string()),
            success: true,
            error: None,
            call_id: None,
            latency_ms: 0.0,
            retries: 0,
        }));

        let messages = strategy.build_messages(&context);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, "user");
    }
}
