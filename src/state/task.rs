use crate::url::{host_key, normalize_url};
use crate::UrlResult;
use serde::{Deserialize, Serialize};
use url::Url;

/// A unit of crawl work: one normalized URL and how it was reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlTask {
    /// Absolute, normalized URL
    pub url: Url,

    /// Link hops from a seed URL
    pub depth: u32,

    /// Page this URL was extracted from (None for seeds)
    #[serde(default)]
    pub discovered_from: Option<String>,

    /// Number of failed attempts so far
    #[serde(default)]
    pub attempt: u32,
}

impl UrlTask {
    /// Creates a depth-0 task from a seed URL
    pub fn seed(url: &str) -> UrlResult<Self> {
        Ok(Self {
            url: normalize_url(url)?,
            depth: 0,
            discovered_from: None,
            attempt: 0,
        })
    }

    /// Creates a task for a link found on `parent`, one level deeper
    pub fn discovered(link: &str, parent: &UrlTask) -> UrlResult<Self> {
        Ok(Self {
            url: normalize_url(link)?,
            depth: parent.depth + 1,
            discovered_from: Some(parent.url.to_string()),
            attempt: 0,
        })
    }

    /// Returns the same task with its attempt counter advanced
    pub fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }

    /// The normalized URL used as the de-duplication key
    pub fn key(&self) -> &str {
        self.url.as_str()
    }

    /// The politeness key of this task's host
    pub fn host(&self) -> Option<String> {
        host_key(&self.url)
    }
}
