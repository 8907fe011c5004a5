//! Worker pool driving the crawl
//!
//! Each worker repeats one cycle until the queue is drained or the crawl is
//! cancelled:
//!
//! 1. Pop the next task from the [`FetchQueue`]
//! 2. Wait for the task's host at the [`RateLimiter`]
//! 3. Fetch exactly once, then release the host
//! 4. On success: extract, persist records, enqueue links, mark visited
//! 5. On transient failure: schedule a delayed retry or give up
//! 6. On permanent failure: persist the failure, mark failed
//!
//! A failure of one URL never stops other workers. A sink error does: it
//! cancels the whole pool and is returned as [`HarvestError::System`].

use crate::crawler::extractor::Extractor;
use crate::crawler::fetcher::{FetchResult, Fetcher};
use crate::crawler::queue::FetchQueue;
use crate::crawler::rate_limiter::RateLimiter;
use crate::crawler::retry::{FailureKind, RetryDecision, RetryPolicy};
use crate::state::UrlTask;
use crate::storage::ResultSink;
use crate::HarvestError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Running totals, updated by workers as they go
#[derive(Debug, Default)]
pub struct DispatchStats {
    fetched: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    permanently_failed: AtomicU64,
    records: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchCounts {
    /// Fetch attempts made
    pub fetched: u64,
    /// URLs processed successfully
    pub succeeded: u64,
    /// Retries scheduled
    pub retried: u64,
    /// URLs given up on
    pub permanently_failed: u64,
    /// Records persisted
    pub records: u64,
}

impl DispatchStats {
    pub fn counts(&self) -> DispatchCounts {
        DispatchCounts {
            fetched: self.fetched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            permanently_failed: self.permanently_failed.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
        }
    }
}

/// Tunables for the worker pool
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub worker_count: usize,
    pub max_depth: u32,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl DispatchSettings {
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            worker_count: config.crawler.worker_count as usize,
            max_depth: config.crawler.max_depth,
            request_timeout: config.crawler.request_timeout(),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

struct Shared {
    queue: Arc<FetchQueue>,
    limiter: Arc<RateLimiter>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn ResultSink>,
    settings: DispatchSettings,
    cancel: CancellationToken,
    stats: DispatchStats,
}

/// Fixed-size pool of crawl workers
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<FetchQueue>,
        limiter: Arc<RateLimiter>,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn ResultSink>,
        settings: DispatchSettings,
    ) -> Self {
        Self::with_cancellation(
            queue,
            limiter,
            fetcher,
            extractor,
            sink,
            settings,
            CancellationToken::new(),
        )
    }

    /// Creates a pool that stops when `cancel` is triggered
    pub fn with_cancellation(
        queue: Arc<FetchQueue>,
        limiter: Arc<RateLimiter>,
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn ResultSink>,
        settings: DispatchSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                limiter,
                fetcher,
                extractor,
                sink,
                settings,
                cancel,
                stats: DispatchStats::default(),
            }),
        }
    }

    /// Token that stops the pool when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    pub fn counts(&self) -> DispatchCounts {
        self.shared.stats.counts()
    }

    /// Runs the workers until the queue drains or the pool is cancelled
    ///
    /// # Returns
    ///
    /// * `Ok(DispatchCounts)` - All workers exited normally
    /// * `Err(HarvestError)` - The first system failure (or worker panic)
    pub async fn run(&self) -> Result<DispatchCounts, HarvestError> {
        let worker_count = self.shared.settings.worker_count.max(1);
        tracing::info!("Starting {} workers", worker_count);

        let mut workers = JoinSet::new();
        for id in 0..worker_count {
            workers.spawn(worker_loop(self.shared.clone(), id));
        }

        let mut outcome = Ok(());
        while let Some(joined) = workers.join_next().await {
            let error = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) => {
                    self.shared.cancel.cancel();
                    HarvestError::Worker(e.to_string())
                }
            };
            if outcome.is_ok() {
                outcome = Err(error);
            } else {
                tracing::error!("Additional worker error: {}", error);
            }
        }

        let counts = self.counts();
        tracing::info!(
            "Workers stopped: {} fetched, {} succeeded, {} failed, {} retries across {} hosts",
            counts.fetched,
            counts.succeeded,
            counts.permanently_failed,
            counts.retried,
            self.shared.limiter.host_count()
        );
        outcome.map(|_| counts)
    }
}

async fn worker_loop(shared: Arc<Shared>, id: usize) -> Result<(), HarvestError> {
    tracing::debug!("Worker {} started", id);

    let result = loop {
        let task = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break Ok(()),
            task = shared.queue.pop() => match task {
                Some(task) => task,
                None => break Ok(()),
            },
        };

        if let Err(e) = shared.process(task).await {
            tracing::error!("Worker {} hit a system failure: {}", id, e);
            shared.cancel.cancel();
            break Err(e);
        }
    };

    tracing::debug!("Worker {} stopped", id);
    result
}

impl Shared {
    async fn process(&self, task: UrlTask) -> Result<(), HarvestError> {
        let Some(host) = task.host() else {
            return self.give_up(task, "URL has no host".to_string());
        };

        if task.attempt >= self.settings.retry.max_attempts() {
            let reason = format!("Retry limit reached ({} attempts)", task.attempt);
            return self.give_up(task, reason);
        }

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!("Cancelled before fetching {}, requeueing", task.url);
                self.queue.requeue(task);
                return Ok(());
            }
            permit = self.limiter.acquire(&host) => permit,
        };

        // An attempt that has started is allowed to finish; the request
        // timeout bounds how long that takes.
        let result = self
            .fetcher
            .fetch(task, self.settings.request_timeout)
            .await;
        permit.release();
        self.stats.fetched.fetch_add(1, Ordering::Relaxed);

        self.handle(result, &host)
    }

    fn handle(&self, result: FetchResult, host: &str) -> Result<(), HarvestError> {
        match result.failure_kind() {
            None => self.handle_success(result),
            Some(kind) => self.handle_failure(result, kind, host),
        }
    }

    fn handle_success(&self, result: FetchResult) -> Result<(), HarvestError> {
        let task = result.task;
        let Some(payload) = result.payload else {
            return self.give_up(task, "Response had no payload".to_string());
        };

        let extraction = self.extractor.extract(&task.url, &payload);
        if let Some(diagnostic) = extraction.diagnostic {
            return self.give_up(task, format!("Extraction failed: {}", diagnostic));
        }

        for record in &extraction.records {
            self.sink.record(record)?;
            self.stats.records.fetch_add(1, Ordering::Relaxed);
        }

        // A redirect target counts as visited so it is not fetched again
        if self.queue.mark_visited(&payload.final_url) {
            tracing::debug!("{} redirected to {}", task.url, payload.final_url);
        }

        // Links go in before the task completes so the queue never looks
        // drained while this page still has children to add.
        if task.depth < self.settings.max_depth {
            let mut added = 0;
            for link in &extraction.links {
                match UrlTask::discovered(link, &task) {
                    Ok(child) => {
                        if self.queue.push(child) {
                            added += 1;
                        }
                    }
                    Err(e) => tracing::trace!("Skipping link {}: {}", link, e),
                }
            }
            tracing::debug!(
                "{}: {} records, {} new links",
                task.url,
                extraction.records.len(),
                added
            );
        }

        self.queue.complete(&task);
        self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn handle_failure(
        &self,
        result: FetchResult,
        kind: FailureKind,
        host: &str,
    ) -> Result<(), HarvestError> {
        let policy = &self.settings.retry;
        let attempt = result.task.attempt;
        let decision = policy.should_retry_after(attempt, kind, result.retry_after);

        // The host pause never outlasts max-delay, whatever the server asked for
        if result.is_rate_limited() {
            let pause = match decision {
                RetryDecision::Retry(delay) => delay,
                RetryDecision::Abandon => result
                    .retry_after
                    .unwrap_or_else(|| policy.backoff(attempt))
                    .min(policy.max_delay()),
            };
            self.limiter.back_off(host, pause);
        }

        let reason = result.reason();
        match decision {
            RetryDecision::Retry(delay) => {
                tracing::info!(
                    "{} failed ({}), retry {} in {:?}",
                    result.task.url,
                    reason,
                    attempt + 1,
                    delay
                );
                self.queue
                    .retry(result.task.next_attempt(), Instant::now() + delay);
                self.stats.retried.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            RetryDecision::Abandon if kind == FailureKind::Permanent => {
                self.give_up(result.task, reason)
            }
            RetryDecision::Abandon => {
                let reason = format!("{} (gave up after {} attempts)", reason, attempt + 1);
                self.give_up(result.task, reason)
            }
        }
    }

    /// Records a permanent failure and retires the task
    fn give_up(&self, task: UrlTask, reason: String) -> Result<(), HarvestError> {
        tracing::warn!("Giving up on {}: {}", task.url, reason);
        self.sink.record_failure(task.key(), &reason)?;
        self.queue.fail(&task, &reason);
        self.stats.permanently_failed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
