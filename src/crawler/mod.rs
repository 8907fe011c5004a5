//! Crawler module for fetching and processing pages
//!
//! This module contains the core crawling logic, including:
//! - The de-duplicating, breadth-first fetch queue
//! - Per-host rate limiting and retry/backoff decisions
//! - HTTP fetching and HTML extraction behind pluggable traits
//! - The worker pool and overall crawl coordination

mod coordinator;
mod dispatcher;
mod extractor;
mod fetcher;
mod queue;
mod rate_limiter;
mod retry;

#[cfg(test)]
mod testing;

pub use coordinator::{run_crawl, Crawl};
pub use dispatcher::{DispatchCounts, DispatchSettings, Dispatcher};
pub use extractor::{Extraction, Extractor, HtmlExtractor};
pub use fetcher::{
    classify_status, parse_retry_after, FetchResult, FetchSettings, FetchStatus, Fetcher, Payload,
    ReqwestFetcher,
};
pub use queue::FetchQueue;
pub use rate_limiter::{HostPermit, RateLimiter};
pub use retry::{FailureKind, RetryDecision, RetryPolicy};
