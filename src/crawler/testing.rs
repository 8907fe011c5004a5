//! In-memory fetcher used by the crawler's unit tests

use crate::crawler::fetcher::{classify_status, FetchResult, FetchStatus, Fetcher, Payload};
use crate::state::UrlTask;
use crate::url::normalize_url;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Html(String),
    Status(u16),
    /// 429 carrying a `Retry-After` hint
    RateLimited(Duration),
    /// Redirected to another URL, which served this HTML
    Redirected(String, String),
}

/// Serves scripted responses per URL; unknown URLs answer 404
///
/// Each URL has a script of responses; the last one repeats forever.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, Instant)>>,
    delay: Duration,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every fetch takes `delay` before answering
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn page(self, url: &str, html: &str) -> Self {
        self.script(url, vec![Scripted::Html(html.to_string())])
    }

    pub(crate) fn script(self, url: &str, responses: Vec<Scripted>) -> Self {
        let key = normalize_url(url).unwrap().to_string();
        self.scripts
            .lock()
            .unwrap()
            .insert(key, responses.into_iter().collect());
        self
    }

    /// URLs fetched so far, in call order
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Instants at which `url` was fetched
    pub(crate) fn call_times(&self, url: &str) -> Vec<Instant> {
        let key = normalize_url(url).unwrap().to_string();
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| *u == key)
            .map(|(_, at)| *at)
            .collect()
    }

    pub(crate) fn call_count(&self, url: &str) -> usize {
        self.call_times(url).len()
    }

    fn next_response(&self, key: &str) -> Option<Scripted> {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.get_mut(key)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, task: UrlTask, _timeout: Duration) -> FetchResult {
        let key = task.key().to_string();
        self.calls.lock().unwrap().push((key.clone(), Instant::now()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_response(&key).unwrap_or(Scripted::Status(404)) {
            Scripted::Html(html) => {
                let payload = Payload {
                    body: html.into_bytes(),
                    content_type: Some("text/html".to_string()),
                    final_url: task.url.clone(),
                    status_code: 200,
                };
                FetchResult::success(task, payload)
            }
            Scripted::Redirected(target, html) => {
                let payload = Payload {
                    body: html.into_bytes(),
                    content_type: Some("text/html".to_string()),
                    final_url: url::Url::parse(&target).unwrap(),
                    status_code: 200,
                };
                FetchResult::success(task, payload)
            }
            Scripted::RateLimited(retry_after) => FetchResult::transient(task, "HTTP 429")
                .with_status_code(429)
                .with_retry_after(Some(retry_after)),
            Scripted::Status(code) => {
                let status = StatusCode::from_u16(code).unwrap();
                let reason = format!("HTTP {}", code);
                match classify_status(status) {
                    FetchStatus::TransientFailure => {
                        FetchResult::transient(task, reason).with_status_code(code)
                    }
                    _ => FetchResult::permanent(task, reason).with_status_code(code),
                }
            }
        }
    }
}
