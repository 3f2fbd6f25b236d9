//! Sub-document discoverer (C7): webhook-driven recursive link discovery.
//!
//! Ingestion POSTs the document's raw-HTML chunks to an external webhook and
//! returns immediately; the webhook classifies child links out-of-band and
//! replies later — possibly via a separate inbound request — with a set of
//! discovered sub-document URLs. This module owns the outbound POST and the
//! inbound callback parsing; recursion (deciding which URLs to re-ingest, and
//! under which `Source`) is orchestrated by `ingest::mod`.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// The only `task_name` this service accepts on a discovery callback.
pub const DISCOVERY_TASK_NAME: &str = "agenttic_ingest";

/// Errors raised while posting the outbound discovery request.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("no discovery webhook is configured")]
    NotConfigured,
}

/// One raw-HTML chunk submitted to the discovery webhook.
#[derive(Debug, Clone, Serialize)]
pub struct DataListItem {
    pub chunk_id: String,
    pub content: String,
    pub index: usize,
}

/// Outbound discovery request body.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryRequest {
    pub document_name: String,
    pub collection_name: String,
    pub url: String,
    pub total_chunks: usize,
    pub task_name: &'static str,
    pub prompt: String,
    pub data_list: Vec<DataListItem>,
    pub request_id: String,
    pub recursive_depth: u32,
}

impl DiscoveryRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_name: String,
        collection_name: String,
        url: String,
        total_chunks: usize,
        prompt: String,
        data_list: Vec<DataListItem>,
        request_id: String,
        recursive_depth: u32,
    ) -> Self {
        Self {
            document_name,
            collection_name,
            url,
            total_chunks,
            task_name: DISCOVERY_TASK_NAME,
            prompt,
            data_list,
            request_id,
            recursive_depth,
        }
    }
}

/// Build the sub-document-identification prompt sent alongside a page's
/// raw-HTML chunks.
pub fn discovery_prompt(url: &str) -> String {
    format!(
        "You are reading part of the raw HTML of a web page at {url}, which is documentation \
         for some open-source framework. Identify the sub-documents beneath this page: for \
         example, https://lmstudio.ai/docs/python/getting-started/project-setup is a \
         sub-document of https://lmstudio.ai/docs/python. Sub-document URLs may appear in the \
         HTML as anchor hrefs, button navigation targets, or similar; resolve relative links \
         against {url}. Return the identified sub-document URLs as an array in a `sub_docs` \
         field alongside the originating chunk_id and index. If no sub-documents are found, \
         return an empty array."
    )
}

/// Thin transport for the outbound discovery POST.
#[derive(Clone)]
pub struct DiscoveryClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl DiscoveryClient {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// POST `request` to `webhook_url`, erroring on transport failure or a
    /// non-2xx response. The caller decides what to do on failure (mark the
    /// workflow-execution row `error`, still return a local success).
    pub async fn post(
        &self,
        webhook_url: &str,
        request: &DiscoveryRequest,
    ) -> Result<(), DiscoveryError> {
        self.client
            .post(webhook_url)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// A parsed, accepted discovery callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCallback {
    pub request_id: String,
    pub recursive_depth: u32,
    pub sub_docs: Vec<String>,
}

/// A callback that named a `task_name` but not the one this service handles.
/// Distinct from [`DiscoveryError`]: this is an expected, structured
/// rejection, not a transport failure, and the caller must not recurse or
/// touch any workflow-execution record when it occurs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRejected {
    pub task_name: String,
}

/// Unwrap a nested `{"body": {...}}` envelope, if the callback arrived
/// wrapped that way.
fn unwrap_body_envelope(value: &Value) -> &Value {
    match value.get("body") {
        Some(body) if body.is_object() => body,
        _ => value,
    }
}

/// Parse an inbound request body as a discovery callback. Returns `Ok(None)`
/// if the body carries no `task_name` at all (i.e. is not a callback).
/// Returns `Err` if it names a `task_name` other than
/// [`DISCOVERY_TASK_NAME`] — that case must not recurse and must not touch
/// any workflow-execution record.
pub fn parse_callback(raw: &Value) -> Result<Option<ParsedCallback>, CallbackRejected> {
    let payload = unwrap_body_envelope(raw);
    let Some(task_name) = payload.get("task_name").and_then(Value::as_str) else {
        return Ok(None);
    };
    if task_name != DISCOVERY_TASK_NAME {
        return Err(CallbackRejected { task_name: task_name.to_string() });
    }

    let request_id = payload.get("request_id").and_then(Value::as_str).unwrap_or_default();
    let recursive_depth =
        payload.get("recursive_depth").and_then(Value::as_u64).unwrap_or(1) as u32;

    Ok(Some(ParsedCallback {
        request_id: request_id.to_string(),
        recursive_depth,
        sub_docs: union_sub_docs(payload),
    }))
}

/// Union and deduplicate `sub_docs` across every `output` item's
/// `response.sub_docs` array, preserving first-seen order.
fn union_sub_docs(payload: &Value) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut sub_docs = Vec::new();

    let Some(outputs) = payload.get("output").and_then(Value::as_array) else {
        return sub_docs;
    };
    for item in outputs {
        let Some(urls) = item.pointer("/response/sub_docs").and_then(Value::as_array) else {
            continue;
        };
        for url in urls {
            let Some(url) = url.as_str() else { continue };
            if seen.insert(url.to_string()) {
                sub_docs.push(url.to_string());
            }
        }
    }
    sub_docs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_callback_body_is_not_a_callback() {
        let body = json!({ "url": "https://example.com" });
        assert_eq!(parse_callback(&body), Ok(None));
    }

    #[test]
    fn rejects_mismatched_task_name_without_parsing_further() {
        let body = json!({ "task_name": "other_task", "request_id": "r1" });
        let err = parse_callback(&body).unwrap_err();
        assert_eq!(err.task_name, "other_task");
    }

    #[test]
    fn unwraps_nested_body_envelope() {
        let body = json!({
            "body": {
                "task_name": "agenttic_ingest",
                "request_id": "r1",
                "recursive_depth": 1,
                "output": [],
            }
        });
        let parsed = parse_callback(&body).unwrap().unwrap();
        assert_eq!(parsed.request_id, "r1");
    }

    #[test]
    fn unions_and_dedupes_sub_docs_across_output_items() {
        let body = json!({
            "task_name": "agenttic_ingest",
            "request_id": "r1",
            "recursive_depth": 2,
            "output": [
                { "response": { "sub_docs": ["https://a.com/1", "https://a.com/2"] } },
                { "response": { "sub_docs": ["https://a.com/2", "https://a.com/3"] } },
            ],
        });
        let parsed = parse_callback(&body).unwrap().unwrap();
        assert_eq!(
            parsed.sub_docs,
            vec!["https://a.com/1", "https://a.com/2", "https://a.com/3"]
        );
    }
}
