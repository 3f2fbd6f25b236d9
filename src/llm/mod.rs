//! LLM client: OpenAI-compatible chat-completions, non-streaming and
//! streaming, used by the retrieval pipeline (C9) and the intelligent
//! orchestrator (C11).

use async_stream::stream;
use futures_core::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by the LLM client.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("LLM response had no choices")]
    EmptyResponse,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// One streamed delta from the chat-completions endpoint.
#[derive(Debug, Clone)]
pub enum ChatDelta {
    Reasoning(String),
    Content(String),
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize, Default)]
struct ChatResponseMessage {
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
}

impl LlmClient {
    /// Build a client against `base_url` (e.g. `http://localhost:1234/v1`).
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// Non-streaming chat completion. Prefers `reasoning_content` over
    /// `content` when both are present, matching the underlying service's
    /// convention for "thinking" models.
    pub async fn generate_answer(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&ChatRequest { model, messages, stream: false })
            .timeout(std::time::Duration::from_secs(300))
            .send()
            .await?
            .error_for_status()?;

        let body: ChatResponse = response.json().await?;
        let message = body.choices.into_iter().next().ok_or(LlmError::EmptyResponse)?.message;
        Ok(message.reasoning_content.or(message.content).unwrap_or_default())
    }

    /// Streaming chat completion: yields `ChatDelta` items parsed from an
    /// OpenAI-style SSE body (`data: {...}` lines terminated by `data: [DONE]`).
    pub fn stream_answer(
        &self,
        model: String,
        messages: Vec<ChatMessage>,
    ) -> impl Stream<Item = Result<ChatDelta, LlmError>> + Send + 'static {
        let client = self.client.clone();
        let base_url = self.base_url.clone();

        stream! {
            let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
            let response = match client
                .post(&url)
                .json(&ChatRequest { model: &model, messages: &messages, stream: true })
                .send()
                .await
                .and_then(|r| r.error_for_status())
            {
                Ok(response) => response,
                Err(error) => {
                    yield Err(LlmError::Request(error));
                    return;
                }
            };

            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            use futures_util::StreamExt;
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(error) => {
                        yield Err(LlmError::Request(error));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer.drain(..=newline_pos);

                    if line.is_empty() || !line.starts_with("data:") {
                        continue;
                    }
                    let data = line[5..].trim();
                    if data == "[DONE]" {
                        return;
                    }

                    let Ok(parsed) = serde_json::from_str::<Value>(data) else { continue };
                    let Some(delta) = parsed["choices"][0]["delta"].as_object() else { continue };

                    if let Some(reasoning) = delta.get("reasoning_content").and_then(Value::as_str) {
                        if !reasoning.is_empty() {
                            yield Ok(ChatDelta::Reasoning(reasoning.to_string()));
                        }
                    }
                    if let Some(content) = delta.get("content").and_then(Value::as_str) {
                        if !content.is_empty() {
                            yield Ok(ChatDelta::Content(content.to_string()));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    #[tokio::test]
    async fn generate_answer_prefers_reasoning_content_over_content() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "reasoning_content": "thinking...", "content": "answer" } }]
                }));
            })
            .await;

        let client = LlmClient::new(reqwest::Client::new(), server.base_url());
        let answer = client
            .generate_answer("model", &[ChatMessage::user("hi")])
            .await
            .expect("answer");
        assert_eq!(answer, "thinking...");
    }

    #[tokio::test]
    async fn generate_answer_errors_on_empty_choices() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let client = LlmClient::new(reqwest::Client::new(), server.base_url());
        let err = client
            .generate_answer("model", &[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }

    #[tokio::test]
    async fn stream_answer_parses_sse_deltas_and_stops_at_done() {
        let server = MockServer::start_async().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\
                     data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\
                     data: [DONE]\n";
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).body(body);
            })
            .await;

        let client = LlmClient::new(reqwest::Client::new(), server.base_url());
        let deltas: Vec<_> = client
            .stream_answer("model".into(), vec![ChatMessage::user("hi")])
            .collect()
            .await;

        let contents: Vec<String> = deltas
            .into_iter()
            .filter_map(|d| match d.ok()? {
                ChatDelta::Content(c) => Some(c),
                ChatDelta::Reasoning(_) => None,
            })
            .collect();
        assert_eq!(contents, vec!["Hel", "lo"]);
    }
}
