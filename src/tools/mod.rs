//! Tool system (C10): schema/call/result types, a registry that adds
//! caching, a circuit breaker, retry-with-backoff and per-tool concurrency
//! limiting around arbitrary handlers, and the `web_search` tool itself.
//!
//! Pluggable tool-calling strategies (how a model's free-form output is
//! turned into a [`ToolCall`]) live in [`strategies`].

pub mod cache;
pub mod strategies;
pub mod web_search;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};

use cache::ToolCache;

/// How the orchestrator should turn model output into tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolMode {
    /// No tool calling at all; answer from retrieved context only.
    Off,
    /// Pick a strategy automatically (currently: JSON function calling).
    Auto,
    /// OpenAI-style JSON function calling.
    Json,
    /// ReAct (`Thought`/`Action`/`Action Input`/`Observation`) prompting.
    React,
    /// Harmony DSL (`<tool name="...">{...}</tool>`) prompting.
    Harmony,
}

/// A tool definition: name, description, and JSON-Schema parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One tool invocation requested by a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    #[serde(default)]
    pub call_id: Option<String>,
}

/// The outcome of executing a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub result: Value,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub retries: u32,
}

impl ToolResult {
    fn rejected(call: &ToolCall, result: impl Into<String>, error: &'static str) -> Self {
        Self {
            name: call.name.clone(),
            result: Value::String(result.into()),
            success: false,
            error: Some(error.to_string()),
            call_id: call.call_id.clone(),
            latency_ms: 0.0,
            retries: 0,
        }
    }
}

/// Per-tool operational knobs.
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub timeout_s: f64,
    pub max_retries: u32,
    pub max_concurrency: usize,
    pub cache_enabled: bool,
    pub cache_ttl_seconds: f64,
    pub cache_max_size: usize,
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self {
            timeout_s: 30.0,
            max_retries: 2,
            max_concurrency: 4,
            cache_enabled: false,
            cache_ttl_seconds: 3600.0,
            cache_max_size: 1000,
        }
    }
}

/// A step in an orchestration run: reasoning, a tool call, its observation,
/// or the final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Reasoning,
    Action,
    Observation,
    FinalAnswer,
}

/// One recorded step of an orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_type: StepType,
    pub content: String,
    #[serde(default)]
    pub tool_call: Option<ToolCall>,
    #[serde(default)]
    pub tool_result: Option<ToolResult>,
}

impl Step {
    pub fn reasoning(content: impl Into<String>) -> Self {
        Self { step_type: StepType::Reasoning, content: content.into(), tool_call: None, tool_result: None }
    }

    pub fn action(content: impl Into<String>, call: ToolCall) -> Self {
        Self { step_type: StepType::Action, content: content.into(), tool_call: Some(call), tool_result: None }
    }

    pub fn observation(content: impl Into<String>, result: ToolResult) -> Self {
        Self {
            step_type: StepType::Observation,
            content: content.into(),
            tool_call: None,
            tool_result: Some(result),
        }
    }

    pub fn final_answer(content: impl Into<String>) -> Self {
        Self { step_type: StepType::FinalAnswer, content: content.into(), tool_call: None, tool_result: None }
    }
}

/// Run-scoped tool configuration: which mode, which tools are allowed, the
/// step budget, and which model to use.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub tool_mode: ToolMode,
    pub tools: Option<Vec<String>>,
    pub max_steps: u32,
    pub model: String,
}

impl RunConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self { tool_mode: ToolMode::Auto, tools: None, max_steps: 6, model: model.into() }
    }

    /// Whether `name` may be called under this run's allow-list. `None`
    /// means every registered tool is allowed.
    pub fn allows(&self, name: &str) -> bool {
        match &self.tools {
            Some(allowed) => allowed.iter().any(|t| t == name),
            None => true,
        }
    }
}

/// The question, retrieved context, run configuration, and step history for
/// one orchestration run.
#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    pub question: String,
    pub contexts: Vec<String>,
    pub run_config: RunConfig,
    pub steps: Vec<Step>,
}

impl ToolExecutionContext {
    pub fn new(question: impl Into<String>, contexts: Vec<String>, run_config: RunConfig) -> Self {
        Self { question: question.into(), contexts, run_config, steps: Vec::new() }
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
    }
}

/// A registered tool's executable body.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<Value, String>;
}

struct Registration {
    schema: ToolSchema,
    handler: Arc<dyn ToolHandler>,
    metadata: ToolMetadata,
    semaphore: Arc<Semaphore>,
}

struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    open_until_millis: AtomicU64,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self { consecutive_failures: AtomicU32::new(0), open_until_millis: AtomicU64::new(0) }
    }

    fn is_open(&self, now: &Instant, epoch: &Instant) -> bool {
        let until = self.open_until_millis.load(Ordering::Relaxed);
        until > now.duration_since(*epoch).as_millis() as u64
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a failure; opens the breaker once 3 consecutive failures have
    /// accumulated, for `min(30 * failures, 300)` seconds.
    fn record_failure(&self, now: &Instant, epoch: &Instant) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= 3 {
            let open_seconds = (30.0 * failures as f64).min(300.0);
            let open_until = now.duration_since(*epoch).as_millis() as u64 + (open_seconds * 1000.0) as u64;
            self.open_until_millis.store(open_until, Ordering::Relaxed);
        }
    }
}

/// Registers tools, validates and caches their calls, and executes them
/// behind a circuit breaker, a concurrency semaphore, and retry-with-backoff.
pub struct ToolRegistry {
    registrations: RwLock<HashMap<String, Registration>>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    cache: ToolCache,
    epoch: Instant,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
            cache: ToolCache::new(),
            epoch: Instant::now(),
        }
    }

    /// Register a tool, replacing any prior registration of the same name.
    pub async fn register(&self, schema: ToolSchema, handler: Arc<dyn ToolHandler>, metadata: ToolMetadata) {
        let semaphore = Arc::new(Semaphore::new(metadata.max_concurrency.max(1)));
        let name = schema.name.clone();
        if metadata.cache_enabled {
            self.cache.configure(&name, metadata.cache_ttl_seconds, metadata.cache_max_size).await;
        }
        self.registrations
            .write()
            .await
            .insert(name.clone(), Registration { schema, handler, metadata, semaphore });
        self.breakers.write().await.entry(name).or_insert_with(|| Arc::new(CircuitBreaker::new()));
    }

    pub async fn is_registered(&self, name: &str) -> bool {
        self.registrations.read().await.contains_key(name)
    }

    pub async fn schemas(&self) -> Vec<ToolSchema> {
        self.registrations.read().await.values().map(|r| r.schema.clone()).collect()
    }

    /// Step (a)-(h) of the tool-execution contract: allow-list and
    /// registration check, argument sanitation/validation, cache lookup,
    /// circuit-breaker check, semaphore-bounded retry loop with exponential
    /// backoff, and cache write / breaker update on the outcome.
    pub async fn execute(&self, call: &ToolCall, run_config: &RunConfig) -> ToolResult {
        if !run_config.allows(&call.name) {
            return ToolResult::rejected(call, format!("tool '{}' is not allowed", call.name), "not_allowed");
        }

        let registration = {
            let registrations = self.registrations.read().await;
            match registrations.get(&call.name) {
                Some(r) => (r.schema.clone(), Arc::clone(&r.handler), r.metadata.clone(), Arc::clone(&r.semaphore)),
                None => return ToolResult::rejected(call, format!("tool '{}' is not registered", call.name), "not_registered"),
            }
        };
        let (schema, handler, metadata, semaphore) = registration;

        let sanitized = strategies::parsers::sanitize_arguments(&call.arguments);
        if let Err(message) = strategies::parsers::validate_json_schema(&sanitized, &schema.parameters) {
            return ToolResult::rejected(call, format!("argument validation failed: {message}"), "validation_failed");
        }

        if metadata.cache_enabled {
            if let Some(mut cached) = self.cache.get(&call.name, &sanitized).await {
                cached.call_id = call.call_id.clone();
                cached.latency_ms = 0.0;
                cached.retries = 0;
                return cached;
            }
        }

        let breaker = {
            let breakers = self.breakers.read().await;
            breakers.get(&call.name).map(Arc::clone)
        }
        .unwrap_or_else(|| Arc::new(CircuitBreaker::new()));

        let _permit = semaphore.acquire().await.expect("tool semaphore never closed");

        let now = Instant::now();
        if breaker.is_open(&now, &self.epoch) {
            return ToolResult {
                name: call.name.clone(),
                result: Value::String("tool temporarily unavailable (circuit open)".to_string()),
                success: false,
                error: Some("circuit_open".to_string()),
                call_id: call.call_id.clone(),
                latency_ms: 0.0,
                retries: 0,
            };
        }

        let start = Instant::now();
        let mut attempt = 0;
        let mut last_error = String::new();

        loop {
            let attempt_result = tokio::time::timeout(
                Duration::from_secs_f64(metadata.timeout_s.max(0.001)),
                handler.call(sanitized.clone()),
            )
            .await;

            match attempt_result {
                Ok(Ok(value)) => {
                    breaker.record_success();
                    let result = ToolResult {
                        name: call.name.clone(),
                        result: value,
                        success: true,
                        error: None,
                        call_id: call.call_id.clone(),
                        latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                        retries: attempt,
                    };
                    if metadata.cache_enabled {
                        self.cache.put(&call.name, &sanitized, result.clone()).await;
                    }
                    return result;
                }
                Ok(Err(error)) => last_error = error,
                Err(_) => last_error = format!("timed out after {}s", metadata.timeout_s),
            }

            if attempt >= metadata.max_retries {
                break;
            }
            attempt += 1;
            let backoff = (1.5f64.powi(attempt as i32)).min(10.0) * (0.5 + rand::thread_rng().gen::<f64>());
            tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
        }

        breaker.record_failure(&Instant::now(), &self.epoch);

        ToolResult {
            name: call.name.clone(),
            result: Value::String(format!("tool execution failed: {last_error}")),
            success: false,
            error: Some(last_error),
            call_id: call.call_id.clone(),
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            retries: metadata.max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandler {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl ToolHandler for CountingHandler {
        async fn call(&self, _arguments: Value) -> Result<Value, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err("transient failure".to_string())
            } else {
                Ok(Value::String("ok".to_string()))
            }
        }
    }

    fn schema() -> ToolSchema {
        ToolSchema {
            name: "echo".to_string(),
            description: "echoes".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"]
            }),
        }
    }

    #[tokio::test]
    async fn not_allowed_tool_is_rejected_before_handler_runs() {
        let registry = ToolRegistry::new();
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_first_n: 0 });
        registry.register(schema(), handler, ToolMetadata::default()).await;

        let mut run_config = RunConfig::new("model");
        run_config.tools = Some(vec!["other_tool".to_string()]);
        let call = ToolCall { name: "echo".to_string(), arguments: serde_json::json!({"message": "hi"}), call_id: None };

        let result = registry.execute(&call, &run_config).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("not_allowed"));
    }

    #[tokio::test]
    async fn missing_required_argument_is_rejected() {
        let registry = ToolRegistry::new();
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_first_n: 0 });
        registry.register(schema(), handler, ToolMetadata::default()).await;

        let run_config = RunConfig::new("model");
        let call = ToolCall { name: "echo".to_string(), arguments: serde_json::json!({}), call_id: None };

        let result = registry.execute(&call, &run_config).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("validation_failed"));
    }

    #[tokio::test]
    async fn transient_failure_recovers_within_retry_budget() {
        let registry = ToolRegistry::new();
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_first_n: 1 });
        let mut metadata = ToolMetadata::default();
        metadata.max_retries = 2;
        registry.register(schema(), handler, metadata).await;

        let run_config = RunConfig::new("model");
        let call = ToolCall { name: "echo".to_string(), arguments: serde_json::json!({"message": "hi"}), call_id: None };

        let result = registry.execute(&call, &run_config).await;
        assert!(result.success);
        assert_eq!(result.retries, 1);
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_three_consecutive_failures() {
        let registry = ToolRegistry::new();
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_first_n: usize::MAX });
        let mut metadata = ToolMetadata::default();
        metadata.max_retries = 0;
        registry.register(schema(), handler, metadata).await;

        let run_config = RunConfig::new("model");
        let call = ToolCall { name: "echo".to_string(), arguments: serde_json::json!({"message": "hi"}), call_id: None };

        for _ in 0..3 {
            let result = registry.execute(&call, &run_config).await;
            assert!(!result.success);
        }

        let result = registry.execute(&call, &run_config).await;
        assert_eq!(result.error.as_deref(), Some("circuit_open"));
    }

    #[tokio::test]
    async fn cache_hit_has_zero_latency_and_zero_retries() {
        let registry = ToolRegistry::new();
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_first_n: 0 });
        let mut metadata = ToolMetadata::default();
        metadata.cache_enabled = true;
        registry.register(schema(), handler, metadata).await;

        let run_config = RunConfig::new("model");
        let call = ToolCall { name: "echo".to_string(), arguments: serde_json::json!({"message": "hi"}), call_id: None };

        let first = registry.execute(&call, &run_config).await;
        assert!(first.success);

        let second = registry.execute(&call, &run_config).await;
        assert!(second.success);
        assert_eq!(second.latency_ms, 0.0);
        assert_eq!(second.retries, 0);
    }
}
