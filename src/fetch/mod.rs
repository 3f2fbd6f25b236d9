//! Fetcher/extractor (C1): retrieves raw HTML and render-extracted plain
//! text for a URL, behind a normalized-URL content cache.
//!
//! Two engines are selectable by configuration: a lightweight HTTP client
//! plus HTML parser (no JS), and a headless-browser variant. No
//! headless-capable crate is in the dependency stack, so that variant is a
//! documented stub returning a configuration error rather than silently
//! falling back.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

/// Errors raised while fetching or extracting a page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The requested engine is not available in this build.
    #[error("fetch engine not configured: {0}")]
    EngineUnavailable(String),
    /// The transport-level request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// The two fetch engines a caller may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Plain HTTP GET plus HTML parsing. No JavaScript execution.
    Lightweight,
    /// Headless-browser rendering. Not implemented in this build.
    Headless,
}

/// Fetches raw HTML and extracted plain text for a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve the raw HTML body for `url`.
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError>;

    /// Retrieve the page, extracting the main-content plain text under
    /// `selector` (e.g. `"body"`, `"article"`).
    async fn fetch_then_extract(&self, url: &str, selector: &str) -> Result<String, FetchError>;
}

struct CacheEntry {
    html: String,
    created_at: Instant,
    size: usize,
}

/// HTTP-backed fetcher with an in-memory, normalized-URL-keyed content cache.
pub struct HttpFetcher {
    client: reqwest::Client,
    engine: Engine,
    cache: Mutex<HashMap<String, CacheEntry>>,
    max_size: usize,
    max_content_size: usize,
    ttl: Duration,
}

impl HttpFetcher {
    /// Build a fetcher. `engine` selects the retrieval strategy;
    /// `Engine::Headless` requests always fail with `EngineUnavailable`.
    pub fn new(client: reqwest::Client, engine: Engine) -> Self {
        Self {
            client,
            engine,
            cache: Mutex::new(HashMap::new()),
            max_size: 256,
            max_content_size: 10 * 1024 * 1024,
            ttl: Duration::from_secs(3600),
        }
    }

    /// Normalize a URL for cache-key purposes: lowercase scheme+host, strip
    /// the default port for the scheme, drop the fragment.
    fn normalize_key(url: &str) -> String {
        let Ok(mut parsed) = Url::parse(url) else {
            return url.to_lowercase();
        };
        parsed.set_fragment(None);
        let default_port = match parsed.scheme() {
            "http" => Some(80),
            "https" => Some(443),
            _ => None,
        };
        if parsed.port() == default_port {
            let _ = parsed.set_port(None);
        }
        let scheme = parsed.scheme().to_lowercase();
        let host = parsed.host_str().unwrap_or_default().to_lowercase();
        format!(
            "{scheme}://{host}{port}{path}{query}",
            port = parsed
                .port()
                .map(|p| format!(":{p}"))
                .unwrap_or_default(),
            path = parsed.path(),
            query = parsed.query().map(|q| format!("?{q}")).unwrap_or_default(),
        )
    }

    fn cache_get(&self, key: &str) -> Option<String> {
        let mut cache = self.cache.lock().expect("fetch cache poisoned");
        if let Some(entry) = cache.get(key) {
            if entry.created_at.elapsed() < self.ttl {
                return Some(entry.html.clone());
            }
            cache.remove(key);
        }
        None
    }

    fn cache_put(&self, key: String, html: String) {
        if html.len() > self.max_content_size {
            return;
        }
        let mut cache = self.cache.lock().expect("fetch cache poisoned");
        if cache.len() >= self.max_size && !cache.contains_key(&key) {
            if let Some(oldest_key) = cache
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest_key);
            }
        }
        let size = html.len();
        cache.insert(
            key,
            CacheEntry {
                html,
                created_at: Instant::now(),
                size,
            },
        );
    }

    async fn fetch_raw(&self, url: &str) -> Result<String, FetchError> {
        if self.engine == Engine::Headless {
            return Err(FetchError::EngineUnavailable(
                "headless rendering requires a browser-automation crate not present in this build"
                    .to_string(),
            ));
        }

        let key = Self::normalize_key(url);
        if let Some(html) = self.cache_get(&key) {
            return Ok(html);
        }

        let html = self.client.get(url).send().await?.text().await?;
        self.cache_put(key, html.clone());
        Ok(html)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        match self.fetch_raw(url).await {
            Ok(html) => Ok(html),
            Err(FetchError::EngineUnavailable(msg)) => Err(FetchError::EngineUnavailable(msg)),
            Err(_) => Ok(String::new()),
        }
    }

    async fn fetch_then_extract(&self, url: &str, selector: &str) -> Result<String, FetchError> {
        let html = match self.fetch_raw(url).await {
            Ok(html) => html,
            Err(FetchError::EngineUnavailable(msg)) => return Err(FetchError::EngineUnavailable(msg)),
            Err(_) => return Ok(String::new()),
        };

        let document = Html::parse_document(&html);
        let Ok(sel) = Selector::parse(selector) else {
            return Ok(String::new());
        };

        let text = document
            .select(&sel)
            .flat_map(|el| el.text())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(text.split_whitespace().collect::<Vec<_>>().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key_strips_default_port_and_fragment() {
        let a = HttpFetcher::normalize_key("https://Example.com:443/docs#section");
        let b = HttpFetcher::normalize_key("https://example.com/docs");
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_key_keeps_nondefault_port() {
        let key = HttpFetcher::normalize_key("http://example.com:8080/a");
        assert_eq!(key, "http://example.com:8080/a");
    }

    #[tokio::test]
    async fn headless_engine_returns_configuration_error() {
        let fetcher = HttpFetcher::new(reqwest::Client::new(), Engine::Headless);
        let err = fetcher.fetch_html("https://example.com").await.unwrap_err();
        assert!(matches!(err, FetchError::EngineUnavailable(_)));
    }

    #[test]
    fn cache_evicts_oversized_entries() {
        let fetcher = HttpFetcher::new(reqwest::Client::new(), Engine::Lightweight);
        let huge = "x".repeat(fetcher.max_content_size + 1);
        fetcher.cache_put("k".to_string(), huge);
        assert!(fetcher.cache_get("k").is_none());
    }
}
