//! Per-tool TTL+LRU result cache.
//!
//! Keyed by a SHA-256 hash of `(tool_name, normalized arguments)` so that
//! argument order and incidental formatting never cause a spurious miss.
//! Each tool gets its own namespace with its own TTL and size bound,
//! configured once at registration time.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::ToolResult;

#[derive(Clone, Copy)]
struct CacheConfig {
    ttl: Duration,
    max_size: usize,
}

struct Entry {
    value: ToolResult,
    inserted_at: Instant,
    last_used: Instant,
}

struct Namespace {
    config: CacheConfig,
    entries: HashMap<String, Entry>,
}

/// A per-tool TTL+LRU cache of [`ToolResult`]s.
pub struct ToolCache {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl Default for ToolCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCache {
    pub fn new() -> Self {
        Self { namespaces: RwLock::new(HashMap::new()) }
    }

    /// Set or replace the TTL/size bound for `tool_name`'s namespace.
    pub async fn configure(&self, tool_name: &str, ttl_seconds: f64, max_size: usize) {
        let config = CacheConfig { ttl: Duration::from_secs_f64(ttl_seconds.max(0.0)), max_size: max_size.max(1) };
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(tool_name.to_string())
            .and_modify(|ns| ns.config = config)
            .or_insert_with(|| Namespace { config, entries: HashMap::new() });
    }

    pub async fn get(&self, tool_name: &str, arguments: &Value) -> Option<ToolResult> {
        let key = cache_key(tool_name, arguments);
        let mut namespaces = self.namespaces.write().await;
        let namespace = namespaces.get_mut(tool_name)?;
        let entry = namespace.entries.get_mut(&key)?;
        if entry.inserted_at.elapsed() > namespace.config.ttl {
            namespace.entries.remove(&key);
            return None;
        }
        entry.last_used = Instant::now();
        Some(entry.value.clone())
    }

    pub async fn put(&self, tool_name: &str, arguments: &Value, result: ToolResult) {
        let key = cache_key(tool_name, arguments);
        let mut namespaces = self.namespaces.write().await;
        let namespace = namespaces
            .entry(tool_name.to_string())
            .or_insert_with(|| Namespace { config: CacheConfig { ttl: Duration::from_secs(3600), max_size: 1000 }, entries: HashMap::new() });

        if namespace.entries.len() >= namespace.config.max_size && !namespace.entries.contains_key(&key) {
            if let Some(lru_key) = namespace
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone())
            {
                namespace.entries.remove(&lru_key);
            }
        }

        let now = Instant::now();
        namespace.entries.insert(key, Entry { value: result, inserted_at: now, last_used: now });
    }
}

/// Normalize `arguments` (stable key ordering via `serde_json`'s
/// `preserve_order`-free `Value` comparison through `to_string` on a
/// re-sorted map) and hash alongside `tool_name`.
fn cache_key(tool_name: &str, arguments: &Value) -> String {
    let normalized = normalize(arguments);
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recursively sort object keys so semantically identical argument sets
/// serialize identically regardless of insertion order.
fn normalize(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serde_json::Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), sorted(v));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}
