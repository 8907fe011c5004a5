//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building one HTTP client with the configured user agent and redirect limit
//! - GET requests with a per-request timeout
//! - Enforcing the maximum body size while reading
//! - Classifying every outcome as success, transient or permanent failure
//!
//! Fetchers never retry on their own; retries are scheduled by the dispatcher.

use crate::config::Config;
use crate::crawler::retry::FailureKind;
use crate::state::UrlTask;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Outcome class of a single fetch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Success,
    TransientFailure,
    PermanentFailure,
}

/// Body and metadata of a successful response
#[derive(Debug, Clone)]
pub struct Payload {
    /// Raw response body
    pub body: Vec<u8>,
    /// Content-Type header value
    pub content_type: Option<String>,
    /// Final URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status_code: u16,
}

impl Payload {
    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Whether the Content-Type declares an HTML document
    ///
    /// A missing Content-Type is treated as HTML.
    pub fn is_html(&self) -> bool {
        match &self.content_type {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("text/html") || ct.contains("application/xhtml+xml")
            }
            None => true,
        }
    }
}

/// Result of one fetch attempt
///
/// The task is handed back so the caller can complete, retry or fail it.
#[derive(Debug)]
pub struct FetchResult {
    pub task: UrlTask,
    pub status: FetchStatus,
    pub payload: Option<Payload>,
    pub error: Option<String>,
    /// Server hint from a `Retry-After` header
    pub retry_after: Option<Duration>,
    /// HTTP status code, when a response was received
    pub status_code: Option<u16>,
}

impl FetchResult {
    pub fn success(task: UrlTask, payload: Payload) -> Self {
        let status_code = Some(payload.status_code);
        Self {
            task,
            status: FetchStatus::Success,
            payload: Some(payload),
            error: None,
            retry_after: None,
            status_code,
        }
    }

    pub fn transient(task: UrlTask, error: impl Into<String>) -> Self {
        Self::failure(task, FetchStatus::TransientFailure, error.into())
    }

    pub fn permanent(task: UrlTask, error: impl Into<String>) -> Self {
        Self::failure(task, FetchStatus::PermanentFailure, error.into())
    }

    fn failure(task: UrlTask, status: FetchStatus, error: String) -> Self {
        Self {
            task,
            status,
            payload: None,
            error: Some(error),
            retry_after: None,
            status_code: None,
        }
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Failure class for the retry policy; None on success
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.status {
            FetchStatus::Success => None,
            FetchStatus::TransientFailure => Some(FailureKind::Transient),
            FetchStatus::PermanentFailure => Some(FailureKind::Permanent),
        }
    }

    /// Whether the server asked us to slow down
    pub fn is_rate_limited(&self) -> bool {
        self.status_code == Some(StatusCode::TOO_MANY_REQUESTS.as_u16())
    }

    /// Error text, or a generic description when none was recorded
    pub fn reason(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| format!("{:?}", self.status))
    }
}

/// Fetches one URL; implementations must be shareable between workers
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs exactly one attempt for `task`, bounded by `timeout`
    async fn fetch(&self, task: UrlTask, timeout: Duration) -> FetchResult;
}

/// Immutable settings for [`ReqwestFetcher`]
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub redirect_limit: usize,
    pub max_body_bytes: u64,
}

impl FetchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            user_agent: config.user_agent.header_value(),
            connect_timeout: Duration::from_secs(10).min(config.crawler.request_timeout()),
            redirect_limit: config.crawler.redirect_limit as usize,
            max_body_bytes: config.crawler.max_body_bytes,
        }
    }
}

/// Default fetcher backed by a single reqwest client
pub struct ReqwestFetcher {
    client: Client,
    settings: FetchSettings,
}

impl ReqwestFetcher {
    /// Builds the HTTP client
    ///
    /// # Arguments
    ///
    /// * `settings` - User agent, connect timeout, redirect limit and body cap
    ///
    /// # Returns
    ///
    /// * `Ok(ReqwestFetcher)` - Client built successfully
    /// * `Err(reqwest::Error)` - The TLS backend or client could not be initialized
    pub fn new(settings: FetchSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.connect_timeout)
            .redirect(Policy::limited(settings.redirect_limit))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client, settings })
    }

    fn too_large(&self, size: u64) -> String {
        format!(
            "Body too large: {} bytes exceeds limit of {} bytes",
            size, self.settings.max_body_bytes
        )
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, task: UrlTask, timeout: Duration) -> FetchResult {
        if !matches!(task.url.scheme(), "http" | "https") {
            let reason = format!("Unsupported scheme: {}", task.url.scheme());
            return FetchResult::permanent(task, reason);
        }

        tracing::debug!("GET {} (attempt {})", task.url, task.attempt + 1);

        let response = match self
            .client
            .get(task.url.clone())
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_error(task, &e),
        };

        let status = response.status();
        let code = status.as_u16();
        match classify_status(status) {
            FetchStatus::Success => {}
            FetchStatus::TransientFailure => {
                let retry_after = parse_retry_after(response.headers());
                return FetchResult::transient(task, format!("HTTP {}", code))
                    .with_status_code(code)
                    .with_retry_after(retry_after);
            }
            FetchStatus::PermanentFailure => {
                return FetchResult::permanent(task, format!("HTTP {}", code))
                    .with_status_code(code);
            }
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if let Some(length) = declared_length(response.headers()) {
            if length > self.settings.max_body_bytes {
                let reason = self.too_large(length);
                return FetchResult::permanent(task, reason).with_status_code(code);
            }
        }

        let mut response = response;
        let mut body = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    body.extend_from_slice(&chunk);
                    if body.len() as u64 > self.settings.max_body_bytes {
                        let reason = self.too_large(body.len() as u64);
                        return FetchResult::permanent(task, reason).with_status_code(code);
                    }
                }
                Ok(None) => break,
                Err(e) => return classify_error(task, &e).with_status_code(code),
            }
        }

        FetchResult::success(
            task,
            Payload {
                body,
                content_type,
                final_url,
                status_code: code,
            },
        )
    }
}

/// Maps an HTTP status to a fetch outcome
///
/// | Status | Outcome |
/// |--------|---------|
/// | 2xx | Success |
/// | 408, 429, 5xx | Transient |
/// | anything else | Permanent |
pub fn classify_status(status: StatusCode) -> FetchStatus {
    if status.is_success() {
        FetchStatus::Success
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        FetchStatus::TransientFailure
    } else {
        FetchStatus::PermanentFailure
    }
}

/// Classifies a transport-level reqwest error
fn classify_error(task: UrlTask, error: &reqwest::Error) -> FetchResult {
    if error.is_timeout() {
        FetchResult::transient(task, "Request timeout")
    } else if error.is_connect() {
        FetchResult::transient(task, format!("Connection failed: {}", error))
    } else if error.is_redirect() {
        FetchResult::permanent(task, format!("Redirect error: {}", error))
    } else if error.is_builder() {
        FetchResult::permanent(task, format!("Invalid request: {}", error))
    } else {
        FetchResult::transient(task, format!("Network error: {}", error))
    }
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Parses a `Retry-After` header (delay-seconds or HTTP-date)
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let wait = date.with_timezone(&Utc) - Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
