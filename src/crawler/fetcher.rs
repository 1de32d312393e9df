//! Fetching and response classification
//!
//! This module handles:
//! - The `Fetcher` seam between the scheduler and network I/O
//! - A reqwest-backed fetcher with one client per egress resource
//! - Classification of responses into content, retryable failures,
//!   block signals and fatal failures

use crate::dedup::normalize_content;
use crate::pool::{ResourceKind, DIRECT_EGRESS};
use async_trait::async_trait;
use dashmap::DashMap;
use encoding_rs::{Encoding, UTF_8};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Proxy};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Transport-level failure of a single fetch
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection error: {0}")]
    Connection(String),

    /// The body is not valid in its declared (or default UTF-8) charset
    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// What the scheduler asks a fetcher to do
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub url: &'a Url,

    /// Egress resource id: a proxy URL or "direct"
    pub proxy: &'a str,

    /// Identity resource id, sent as the user agent
    pub identity: &'a str,
}

/// Raw response handed back by a fetcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status_code: u16,
    pub content: String,
    pub duration: Duration,
}

/// Network I/O capability used by the scheduler
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchResponse, FetchError>;
}

/// Builds an HTTP client routed through an egress resource
///
/// # Arguments
///
/// * `egress` - Proxy URL, or "direct" for no proxy
/// * `timeout` - Whole-request timeout
pub fn build_http_client(egress: &str, timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true);

    if egress != DIRECT_EGRESS {
        builder = builder.proxy(Proxy::all(egress)?);
    }

    builder.build()
}

/// Fetcher backed by reqwest
///
/// Clients are built lazily, one per egress resource, and reused.
pub struct HttpFetcher {
    clients: DashMap<String, Client>,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            timeout,
        }
    }

    fn client_for(&self, egress: &str) -> Result<Client, FetchError> {
        if let Some(client) = self.clients.get(egress) {
            return Ok(client.clone());
        }

        let client = build_http_client(egress, self.timeout)
            .map_err(|e| FetchError::Connection(format!("client for {}: {}", egress, e)))?;
        self.clients.insert(egress.to_string(), client.clone());
        Ok(client)
    }
}

/// Extracts the `charset` parameter of a Content-Type value
fn charset_label(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

/// Decodes a body, honoring a byte order mark over the declared encoding
fn decode_body(bytes: &[u8], encoding: &'static Encoding) -> Result<String, FetchError> {
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(FetchError::Malformed(format!(
            "body is not valid {}",
            used.name()
        )));
    }
    Ok(text.into_owned())
}

fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Connection(e.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchResponse, FetchError> {
        let client = self.client_for(request.proxy)?;
        let started = Instant::now();

        let response = client
            .get(request.url.as_str())
            .header(USER_AGENT, request.identity)
            .send()
            .await
            .map_err(transport_error)?;

        let status_code = response.status().as_u16();
        let encoding = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(charset_label)
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(UTF_8);
        let bytes = response.bytes().await.map_err(transport_error)?;
        let content = decode_body(&bytes, encoding)?;

        Ok(FetchResponse {
            status_code,
            content,
            duration: started.elapsed(),
        })
    }
}

/// Kind of anti-abuse response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// 429: the egress address is throttled
    RateLimit,

    /// 403 without a challenge: both the address and the identity are burned
    Ban,

    /// Interstitial challenge page: the identity is flagged
    Challenge,
}

impl BlockKind {
    pub fn excludes_egress(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Ban)
    }

    pub fn excludes_identity(&self) -> bool {
        matches!(self, Self::Ban | Self::Challenge)
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limited",
            Self::Ban => "banned",
            Self::Challenge => "challenge",
        }
    }
}

/// Per-task failure taxonomy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("{0}")]
    RetryableFetch(FetchError),

    #[error("Retryable HTTP status {0}")]
    RetryableStatus(u16),

    #[error("Block signal: {}", .0.reason_code())]
    BlockSignal(BlockKind),

    #[error("Unusable content: {0}")]
    FatalParse(String),

    #[error("HTTP status {0}")]
    FatalStatus(u16),

    #[error("No {0} resource available")]
    PoolExhausted(ResourceKind),
}

impl TaskError {
    /// Whether the failed attempt counts against `max_retries`
    pub fn consumes_attempt(&self) -> bool {
        !matches!(self, Self::PoolExhausted(_))
    }

    /// Whether the task ends here without another attempt
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalParse(_) | Self::FatalStatus(_))
    }

    /// Short code used in run reports
    pub fn reason_code(&self) -> String {
        match self {
            Self::RetryableFetch(FetchError::Timeout) => "timeout".to_string(),
            Self::RetryableFetch(FetchError::Connection(_)) => "connection_error".to_string(),
            Self::RetryableFetch(FetchError::Malformed(_)) | Self::FatalParse(_) => {
                "parse_error".to_string()
            }
            Self::RetryableStatus(code) | Self::FatalStatus(code) => format!("http_{}", code),
            Self::BlockSignal(kind) => kind.reason_code().to_string(),
            Self::PoolExhausted(kind) => format!("{}_pool_exhausted", kind),
        }
    }
}

impl From<FetchError> for TaskError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Malformed(msg) => Self::FatalParse(msg),
            other => Self::RetryableFetch(other),
        }
    }
}

const CHALLENGE_MARKERS: [&str; 6] = [
    "cf-chl",
    "challenge-platform",
    "g-recaptcha",
    "h-captcha",
    "verify you are human",
    "checking your browser",
];

fn has_challenge_marker(content: &str) -> bool {
    let lowered = content.to_lowercase();
    CHALLENGE_MARKERS.iter().any(|m| lowered.contains(m))
}

const RETRYABLE_STATUSES: [u16; 5] = [408, 500, 502, 503, 504];

/// Classifies a response
///
/// Returns the normalized content for usable responses, or the error the
/// scheduler should act on.
///
/// | Response | Result |
/// |----------|--------|
/// | 2xx/403/503 with challenge markers | `BlockSignal(Challenge)` |
/// | 429 | `BlockSignal(RateLimit)` |
/// | 403 | `BlockSignal(Ban)` |
/// | 408, 500, 502, 503, 504 | `RetryableStatus` |
/// | other non-2xx | `FatalStatus` |
/// | 2xx with no text | `FatalParse` |
pub fn classify_response(response: &FetchResponse) -> Result<String, TaskError> {
    let status = response.status_code;
    let success = (200..300).contains(&status);

    if (success || status == 403 || status == 503) && has_challenge_marker(&response.content) {
        return Err(TaskError::BlockSignal(BlockKind::Challenge));
    }

    match status {
        429 => return Err(TaskError::BlockSignal(BlockKind::RateLimit)),
        403 => return Err(TaskError::BlockSignal(BlockKind::Ban)),
        s if RETRYABLE_STATUSES.contains(&s) => return Err(TaskError::RetryableStatus(s)),
        s if !success => return Err(TaskError::FatalStatus(s)),
        _ => {}
    }

    let normalized = normalize_content(&response.content);
    if normalized.is_empty() {
        return Err(TaskError::FatalParse("response has no text content".to_string()));
    }

    Ok(normalized)
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason_code())
    }
}
