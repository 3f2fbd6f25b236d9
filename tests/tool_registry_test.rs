//! Tool cache and circuit-breaker behavior, exercised directly against
//! `ToolRegistry` rather than through the router — both contracts live
//! entirely inside that type.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use agenttic_rag::tools::{RunConfig, ToolCall, ToolHandler, ToolMetadata, ToolRegistry, ToolSchema};
use async_trait::async_trait;
use serde_json::json;

struct CountingHandler {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl ToolHandler for CountingHandler {
    async fn call(&self, arguments: serde_json::Value) -> Result<serde_json::Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err("handler failure".to_string())
        } else {
            Ok(json!({ "echo": arguments }))
        }
    }
}

fn schema(name: &str) -> ToolSchema {
    ToolSchema {
        name: name.to_string(),
        description: "test tool".to_string(),
        parameters: json!({ "type": "object", "properties": {}, "required": [] }),
    }
}

/// Two sequential executions with equal arguments hit the cache on the
/// second call: identical result, `latency_ms == 0.0`, `retries == 0`, and
/// the handler itself is invoked only once.
#[tokio::test]
async fn repeated_call_hits_cache_on_second_invocation() {
    let registry = ToolRegistry::new();
    let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail: false });
    registry
        .register(
            schema("lookup"),
            Arc::clone(&handler) as Arc<dyn ToolHandler>,
            ToolMetadata { cache_enabled: true, ..Default::default() },
        )
        .await;

    let run_config = RunConfig::new("test-model");
    let call = ToolCall { name: "lookup".to_string(), arguments: json!({ "query": "widgets" }), call_id: None };

    let first = registry.execute(&call, &run_config).await;
    assert!(first.success);

    let second = registry.execute(&call, &run_config).await;
    assert!(second.success);
    assert_eq!(second.result, first.result);
    assert_eq!(second.latency_ms, 0.0);
    assert_eq!(second.retries, 0);

    assert_eq!(handler.calls.load(Ordering::SeqCst), 1, "cached hit must not re-invoke the handler");
}

/// After three consecutive failures, the breaker opens: the next call
/// within the window returns `error: "circuit_open"` without invoking the
/// handler at all.
#[tokio::test]
async fn breaker_opens_after_three_consecutive_failures() {
    let registry = ToolRegistry::new();
    let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail: true });
    registry
        .register(
            schema("flaky"),
            Arc::clone(&handler) as Arc<dyn ToolHandler>,
            ToolMetadata { max_retries: 0, ..Default::default() },
        )
        .await;

    let run_config = RunConfig::new("test-model");
    let call = ToolCall { name: "flaky".to_string(), arguments: json!({}), call_id: None };

    for _ in 0..3 {
        let result = registry.execute(&call, &run_config).await;
        assert!(!result.success);
        assert_ne!(result.error.as_deref(), Some("circuit_open"));
    }
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

    let fourth = registry.execute(&call, &run_config).await;
    assert!(!fourth.success);
    assert_eq!(fourth.error.as_deref(), Some("circuit_open"));
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3, "an open breaker must not invoke the handler");
}
