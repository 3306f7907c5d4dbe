// src/fetch.rs
//! HTTP retrieval of source documents. Knows nothing about content and never
//! touches a cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_TYPE, USER_AGENT,
};

use crate::config::PipelineConfig;
use crate::error::FetchError;

/// Raw response. Non-2xx responses are still documents: the body may parse.
#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Document, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    user_agents: Vec<String>,
    accept_language: String,
    attempts: u32,
    retry_delay: Duration,
    next_agent: AtomicUsize,
}

impl HttpFetcher {
    pub fn new(cfg: &PipelineConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(cfg.request_timeout().min(Duration::from_secs(5)))
            .timeout(cfg.request_timeout())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            user_agents: cfg.user_agents.clone(),
            accept_language: cfg.accept_language.clone(),
            attempts: cfg.retry_attempts.max(1),
            retry_delay: cfg.retry_delay(),
            next_agent: AtomicUsize::new(0),
        })
    }

    /// Browser-like header set; user agents rotate per request.
    fn headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        if !self.user_agents.is_empty() {
            let i = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
            if let Ok(v) = HeaderValue::from_str(&self.user_agents[i]) {
                h.insert(USER_AGENT, v);
            }
        }
        if let Ok(v) = HeaderValue::from_str(&self.accept_language) {
            h.insert(ACCEPT_LANGUAGE, v);
        }
        h.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        h.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        h
    }

    async fn attempt(&self, url: &str) -> Result<Document, reqwest::Error> {
        let resp = self.client.get(url).headers(self.headers()).send().await?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await?;
        let body = decode_body(&bytes, content_type.as_deref());
        Ok(Document {
            url: final_url,
            status,
            body,
            fetched_at: Utc::now(),
        })
    }
}

static RE_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)charset\s*=\s*["']?\s*([A-Za-z0-9_.:-]+)"#).expect("charset regex")
});
static RE_META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta\b[^>]*?charset\s*=\s*["']?\s*([A-Za-z0-9_.:-]+)"#)
        .expect("meta charset regex")
});

/// Bytes of the document head searched for a `<meta>` charset declaration.
const META_SNIFF_BYTES: usize = 2048;

fn encoding_for(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Decode a response body. A BOM wins, then the `Content-Type` charset, then
/// a `<meta charset>` / `http-equiv` declaration, then UTF-8. Invalid
/// sequences become U+FFFD instead of failing the fetch.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let from_header = content_type
        .and_then(|ct| RE_CHARSET.captures(ct))
        .and_then(|c| encoding_for(&c[1]));
    let encoding = from_header
        .or_else(|| {
            let head = String::from_utf8_lossy(&bytes[..bytes.len().min(META_SNIFF_BYTES)]);
            RE_META_CHARSET
                .captures(&head)
                .and_then(|c| encoding_for(&c[1]))
        })
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(target: "fetch", encoding = used.name(), "body had undecodable bytes");
    }
    text.into_owned()
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Document, FetchError> {
        let mut last_err = String::new();
        for attempt in 1..=self.attempts {
            counter!("status_fetch_attempts_total").increment(1);
            match self.attempt(url).await {
                Ok(doc) => {
                    if !(200..300).contains(&doc.status) {
                        tracing::warn!(target: "fetch", url, status = doc.status, "non-2xx response, keeping body");
                    }
                    tracing::debug!(target: "fetch", url, attempt, bytes = doc.body.len(), "fetched");
                    return Ok(doc);
                }
                Err(e) => {
                    tracing::warn!(target: "fetch", url, attempt, error = ?e, "fetch attempt failed");
                    last_err = e.to_string();
                    if attempt < self.attempts {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }
        counter!("status_fetch_errors_total").increment(1);
        Err(FetchError::new(url, self.attempts, last_err))
    }
}

/// In-memory fetcher for tests and offline runs. Responses can be swapped
/// between calls; unknown URLs fail like a dead host.
#[derive(Clone, Default)]
pub struct FixtureFetcher {
    responses: Arc<Mutex<HashMap<String, Result<String, String>>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl FixtureFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps this long first (to widen race windows in tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_body(&self, url: &str, body: impl Into<String>) {
        self.lock().insert(url.to_string(), Ok(body.into()));
    }

    pub fn set_error(&self, url: &str, cause: impl Into<String>) {
        self.lock().insert(url.to_string(), Err(cause.into()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Result<String, String>>> {
        self.responses.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl Fetcher for FixtureFetcher {
    async fn fetch(&self, url: &str) -> Result<Document, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let entry = self.lock().get(url).cloned();
        match entry {
            Some(Ok(body)) => Ok(Document {
                url: url.to_string(),
                status: 200,
                body,
                fetched_at: Utc::now(),
            }),
            Some(Err(cause)) => Err(FetchError::new(url, 1, cause)),
            None => Err(FetchError::new(url, 1, "no fixture for url")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_fetcher_counts_and_swaps() {
        let f = FixtureFetcher::new();
        f.set_body("http://s/", "<p>ok</p>");
        let before = Utc::now();
        let doc = f.fetch("http://s/").await.unwrap();
        assert_eq!(doc.body, "<p>ok</p>");
        assert!(doc.fetched_at >= before);
        f.set_error("http://s/", "connection reset");
        let err = f.fetch("http://s/").await.unwrap_err();
        assert_eq!(err.cause, "connection reset");
        assert!(f.fetch("http://other/").await.is_err());
        assert_eq!(f.calls(), 3);
    }

    #[test]
    fn charset_comes_from_header_then_meta_then_utf8() {
        let latin1 = b"<meta charset=\"iso-8859-1\"><p>Situa\xe7\xe3o: Indispon\xedvel</p>";
        assert!(decode_body(latin1, Some("text/html")).contains("Situação: Indisponível"));

        let http_equiv = b"<meta http-equiv=\"Content-Type\" content=\"text/html; charset=windows-1252\">Opera\xe7\xe3o";
        assert!(decode_body(http_equiv, None).ends_with("Operação"));

        // header beats a stale meta tag
        let utf8 = "<meta charset=\"iso-8859-1\"><p>Operação Normal</p>";
        assert!(decode_body(utf8.as_bytes(), Some("text/html; charset=UTF-8")).contains("Operação Normal"));

        assert_eq!(decode_body("Linha 5 - Lilás".as_bytes(), None), "Linha 5 - Lilás");
        assert_eq!(decode_body(b"ok", Some("text/html; charset=bogus")), "ok");
    }

    #[test]
    fn user_agents_rotate() {
        let cfg = PipelineConfig::default();
        let f = HttpFetcher::new(&cfg).unwrap();
        let a = f.headers().get(USER_AGENT).cloned();
        let b = f.headers().get(USER_AGENT).cloned();
        assert_ne!(a, b);
        assert_eq!(
            f.headers().get(ACCEPT_LANGUAGE).and_then(|v| v.to_str().ok()),
            Some("pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7")
        );
    }
}
