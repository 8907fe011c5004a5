use crate::state::UrlTask;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A URL that will never be fetched again, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub url: String,
    pub reason: String,
}

/// Durable snapshot of crawl progress
///
/// `visited` and `permanent_failures` keep the order in which URLs reached
/// their terminal state; `pending` keeps crawl order (depth, then discovery).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlState {
    pub visited: Vec<String>,
    pub pending: Vec<UrlTask>,
    pub permanent_failures: Vec<FailureEntry>,
}

impl CrawlState {
    /// Creates an empty state for a fresh crawl
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing has been crawled or queued yet
    pub fn is_empty(&self) -> bool {
        self.visited.is_empty() && self.pending.is_empty() && self.permanent_failures.is_empty()
    }

    /// Compares two states ignoring the order of their entries
    pub fn is_equivalent_to(&self, other: &CrawlState) -> bool {
        let visited = |s: &CrawlState| s.visited.iter().cloned().collect::<BTreeSet<_>>();
        let pending = |s: &CrawlState| {
            s.pending
                .iter()
                .map(|t| {
                    (
                        t.url.to_string(),
                        t.depth,
                        t.attempt,
                        t.discovered_from.clone(),
                    )
                })
                .collect::<BTreeSet<_>>()
        };
        let failures = |s: &CrawlState| {
            s.permanent_failures
                .iter()
                .map(|f| (f.url.clone(), f.reason.clone()))
                .collect::<BTreeMap<_, _>>()
        };

        visited(self) == visited(other)
            && pending(self) == pending(other)
            && failures(self) == failures(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(url: &str, depth: u32) -> UrlTask {
        let mut task = UrlTask::seed(url).unwrap();
        task.depth = depth;
        task
    }

    #[test]
    fn test_new_state_is_empty() {
        assert!(CrawlState::new().is_empty());
    }

    #[test]
    fn test_equivalence_ignores_order() {
        let a = CrawlState {
            visited: vec!["http://a.test/".into(), "http://b.test/".into()],
            pending: vec![task("http://c.test/", 1), task("http://d.test/", 1)],
            permanent_failures: vec![],
        };
        let b = CrawlState {
            visited: vec!["http://b.test/".into(), "http://a.test/".into()],
            pending: vec![task("http://d.test/", 1), task("http://c.test/", 1)],
            permanent_failures: vec![],
        };
        assert!(a.is_equivalent_to(&b));
    }

    #[test]
    fn test_equivalence_sees_attempts() {
        let a = CrawlState {
            pending: vec![task("http://c.test/", 1)],
            ..CrawlState::default()
        };
        let b = CrawlState {
            pending: vec![task("http://c.test/", 1).next_attempt()],
            ..CrawlState::default()
        };
        assert!(!a.is_equivalent_to(&b));
    }
}
