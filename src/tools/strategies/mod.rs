//! Pluggable tool-calling strategies (C10/C11): turn a question plus
//! retrieved context into LLM messages, and turn the model's free-form
//! reply back into a [`Step`] — either another [`ToolCall`] or a final
//! answer. Three prompting styles are implemented: JSON function calling,
//! ReAct, and the Harmony tag DSL.

pub mod harmony;
pub mod json_fc;
pub mod parsers;
pub mod react;

use async_trait::async_trait;

use crate::llm::ChatMessage;
use crate::tools::{Step, ToolExecutionContext, ToolRegistry, ToolResult};

pub use harmony::HarmonyStrategy;
pub use json_fc::JsonFcStrategy;
pub use react::ReActStrategy;

/// The fixed portion of every strategy's system prompt: read the context
/// carefully, reason from multiple angles, and answer directly rather than
/// hedging or citing "the provided material".
pub fn base_system_prompt() -> &'static str {
    "你是一位严谨的助手，请阅读提供的参考资料，提取有效信息、排除数据杂音，\
     根据问题进行多角度推理，最终结合你自己的知识提供直击题干的回答和分析；\
     你拿到的参考资料是经过排序的数组，数组中排序在前的资料与问题更相关；\
     回答中不要带有可能、大概、也许这些不确定的词，不要带有根据参考资料、\
     根据获得文本、根据获得信息等字眼，你的回答不应该是照本宣科。\
     必须使用中文进行回答。\n\n"
}

/// `"参考资料：\n{contexts joined by newline}\n\n用户问题：{question}"`.
pub fn user_content(context: &ToolExecutionContext) -> String {
    format!("参考资料：\n{}\n\n用户问题：{}", context.contexts.join("\n"), context.question)
}

/// The tool names this run may call: every registered schema, intersected
/// with the run's allow-list if one was set.
pub async fn allowed_tool_names(context: &ToolExecutionContext, registry: &ToolRegistry) -> Vec<String> {
    registry
        .schemas()
        .await
        .into_iter()
        .map(|schema| schema.name)
        .filter(|name| context.run_config.allows(name))
        .collect()
}

/// `Step::Observation` wrapping a tool's result, formatted the way every
/// strategy's transcript renders a tool outcome back to the model.
pub fn observation_step(call: crate::tools::ToolCall, result: ToolResult) -> Step {
    let content = format!("Observation: {}", render_result(&result.result));
    Step::observation(content, result).with_call(call)
}

/// `Step::Observation` used when a step could not even reach tool
/// execution (parse failure, disallowed tool, ...).
pub fn error_step(message: impl Into<String>) -> Step {
    Step::observation(format!("执行出错: {}", message.into()), ToolResult {
        name: String::new(),
        result: serde_json::Value::Null,
        success: false,
        error: None,
        call_id: None,
        latency_ms: 0.0,
        retries: 0,
    })
}

fn render_result(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Validate a parsed tool call against the run's allow-list and the
/// registry, then execute it — the "double insurance" check the registry
/// itself repeats, so a strategy bug in allow-list filtering still can't
/// reach a disallowed handler.
pub async fn execute_tool_with_validation(
    call: crate::tools::ToolCall,
    context: &ToolExecutionContext,
    registry: &ToolRegistry,
) -> Step {
    if !context.run_config.allows(&call.name) {
        return observation_step(
            call.clone(),
            ToolResult {
                name: call.name,
                result: serde_json::Value::String("tool is not permitted by this run's configuration".to_string()),
                success: false,
                error: Some("not_permitted".to_string()),
                call_id: None,
                latency_ms: 0.0,
                retries: 0,
            },
        );
    }
    if !registry.is_registered(&call.name).await {
        return observation_step(
            call.clone(),
            ToolResult {
                name: call.name,
                result: serde_json::Value::String("tool is not registered".to_string()),
                success: false,
                error: Some("not_registered".to_string()),
                call_id: None,
                latency_ms: 0.0,
                retries: 0,
            },
        );
    }

    let result = registry.execute(&call, &context.run_config).await;
    observation_step(call, result)
}

/// One step of an orchestration run under a given prompting strategy.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Build the message list for the next LLM call, given the run's
    /// accumulated steps.
    fn build_messages(&self, context: &ToolExecutionContext) -> Vec<ChatMessage>;

    /// Run one step: call the LLM, parse its reply, execute a tool call if
    /// one was found (validating it against `registry` first), and return
    /// the resulting [`Step`]. Returns `None` only when the LLM call itself
    /// fails after the caller's own retry policy — in that case the caller
    /// should fall back to a tools-off answer.
    async fn execute_step(&self, context: &ToolExecutionContext, registry: &ToolRegistry) -> Step;
}

impl Step {
    /// Attach the originating [`crate::tools::ToolCall`] to an observation
    /// step built before the call was known (used by [`observation_step`]).
    fn with_call(mut self, call: crate::tools::ToolCall) -> Self {
        self.tool_call = Some(call);
        self
    }
}
