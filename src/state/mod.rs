//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `UrlTask`: one URL to fetch, with depth, provenance and attempt count
//! - `TaskState`: lifecycle of a URL (pending, in flight, succeeded, failed)
//! - `HostState`: per-host politeness bookkeeping for the rate limiter
//! - `Record`: a structured item extracted from a page
//! - `CrawlState`: the resumable snapshot written to checkpoints

mod crawl_state;
mod host_state;
mod record;
mod task;
mod task_state;

pub use crawl_state::{CrawlState, FailureEntry};
pub use host_state::HostState;
pub use record::Record;
pub use task::UrlTask;
pub use task_state::TaskState;
