//! Crawl coordinator - top-level orchestration
//!
//! This module wires the pieces of a crawl together:
//! - Opening the result sink and starting (or resuming) a run
//! - Rebuilding the queue from the last checkpoint, then seeding it
//! - Running the worker pool alongside a periodic checkpoint ticker
//! - Writing a final checkpoint and retiring it when the crawl completed

use crate::config::Config;
use crate::crawler::dispatcher::{DispatchSettings, Dispatcher};
use crate::crawler::extractor::{Extractor, HtmlExtractor};
use crate::crawler::fetcher::{FetchSettings, Fetcher, ReqwestFetcher};
use crate::crawler::queue::FetchQueue;
use crate::crawler::rate_limiter::RateLimiter;
use crate::output::CrawlSummary;
use crate::state::UrlTask;
use crate::storage::{open_sink, ResultSink, RunStatus};
use crate::HarvestError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A configured crawl, ready to run
///
/// The sink, fetcher and extractor default to the ones named by the
/// configuration; any of them can be swapped before calling [`Crawl::run`].
pub struct Crawl {
    config: Config,
    config_hash: String,
    fresh: bool,
    sink: Option<Arc<dyn ResultSink>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    extractor: Option<Arc<dyn Extractor>>,
    cancel: CancellationToken,
}

impl Crawl {
    /// Creates a crawl that resumes from the sink's checkpoint if one exists
    pub fn new(config: Config) -> Self {
        Self {
            config,
            config_hash: String::new(),
            fresh: false,
            sink: None,
            fetcher: None,
            extractor: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Hash of the configuration file, recorded with the run
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Discard any checkpoint and start over from the seeds
    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Token that stops the crawl gracefully when cancelled
    ///
    /// Workers stop taking new URLs, in-flight fetches finish and a final
    /// checkpoint is written before [`Crawl::run`] returns.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the crawl until the queue drains or it is cancelled
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlSummary)` - The crawl completed or stopped cleanly
    /// * `Err(HarvestError)` - Setup failed, or a system failure aborted the crawl
    pub async fn run(self) -> Result<CrawlSummary, HarvestError> {
        let started = Instant::now();
        let config = self.config;

        let sink = match self.sink {
            Some(sink) => sink,
            None => open_sink(&config.output)?,
        };

        if self.fresh {
            tracing::info!("Starting fresh crawl, discarding any checkpoint");
            sink.clear_checkpoint()?;
        }
        sink.begin_run(&self.config_hash, !self.fresh)?;

        let state = sink.load_checkpoint()?;
        let queue = if state.is_empty() {
            Arc::new(FetchQueue::new())
        } else {
            tracing::info!(
                "Resuming from checkpoint: {} visited, {} pending, {} failed",
                state.visited.len(),
                state.pending.len(),
                state.permanent_failures.len()
            );
            Arc::new(FetchQueue::from_state(state))
        };
        let seeded = seed_queue(&queue, &config.crawler.seeds);
        tracing::info!("Queued {} seed URLs ({} waiting)", seeded, queue.len());

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(ReqwestFetcher::new(FetchSettings::from_config(&config))?),
        };
        let extractor: Arc<dyn Extractor> = match self.extractor {
            Some(extractor) => extractor,
            None => Arc::new(HtmlExtractor::new(config.extract.link_filter.clone())),
        };
        let limiter = Arc::new(RateLimiter::new(
            config.crawler.per_host_interval(),
            config.crawler.per_host_concurrency as usize,
        ));

        let dispatcher = Dispatcher::with_cancellation(
            queue.clone(),
            limiter,
            fetcher,
            extractor,
            sink.clone(),
            DispatchSettings::from_config(&config),
            self.cancel.clone(),
        );

        let ticker_stop = CancellationToken::new();
        let ticker = tokio::spawn(checkpoint_loop(
            queue.clone(),
            sink.clone(),
            config.crawler.checkpoint_interval(),
            ticker_stop.clone(),
            self.cancel.clone(),
        ));

        let outcome = dispatcher.run().await;
        ticker_stop.cancel();
        let ticker_outcome = match ticker.await {
            Ok(result) => result,
            Err(e) => Err(HarvestError::Worker(e.to_string())),
        };

        let mut failure = outcome.err().or(ticker_outcome.err());

        let snapshot = queue.snapshot();
        if let Err(e) = sink.checkpoint(&snapshot) {
            tracing::error!("Final checkpoint failed: {}", e);
            if failure.is_none() {
                failure = Some(e.into());
            }
        }

        if let Some(error) = failure {
            tracing::error!("Crawl aborted: {}", error);
            if let Err(e) = sink.end_run(RunStatus::Failed) {
                tracing::warn!("Could not mark run as failed: {}", e);
            }
            return Err(error);
        }

        let completed = !self.cancel.is_cancelled() && snapshot.pending.is_empty();
        if completed {
            sink.finish()?;
            tracing::info!("Crawl complete");
        } else {
            sink.end_run(RunStatus::Interrupted)?;
            tracing::info!(
                "Crawl stopped with {} URLs pending; run again to resume",
                snapshot.pending.len()
            );
        }

        Ok(
            CrawlSummary::from_counts(dispatcher.counts(), snapshot.pending.len(), started.elapsed())
                .mark_completed(completed),
        )
    }
}

/// Pushes every seed onto the queue, returning how many were new
///
/// On resume, seeds that were already visited or are still pending are
/// dropped by the queue's de-duplication.
fn seed_queue(queue: &FetchQueue, seeds: &[String]) -> usize {
    let mut added = 0;
    for seed in seeds {
        match UrlTask::seed(seed) {
            Ok(task) => {
                if queue.push(task) {
                    added += 1;
                }
            }
            Err(e) => tracing::warn!("Skipping invalid seed {}: {}", seed, e),
        }
    }
    added
}

/// Writes a checkpoint every `every` until `stop` is cancelled
///
/// A checkpoint failure cancels the crawl and is returned.
async fn checkpoint_loop(
    queue: Arc<FetchQueue>,
    sink: Arc<dyn ResultSink>,
    every: Duration,
    stop: CancellationToken,
    crawl: CancellationToken,
) -> Result<(), HarvestError> {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(()),
            _ = ticker.tick() => {
                tracing::debug!(
                    "Checkpointing: {} waiting, {} in flight",
                    queue.len(),
                    queue.in_flight()
                );
                if let Err(e) = sink.checkpoint(&queue.snapshot()) {
                    tracing::error!("Periodic checkpoint failed: {}", e);
                    crawl.cancel();
                    return Err(e.into());
                }
            }
        }
    }
}

/// Runs a crawl with the components named by `config`
///
/// This is the main entry point for library users. It resumes from an
/// existing checkpoint when there is one.
///
/// # Example
///
/// ```no_run
/// use ripple_harvest::config::load_config;
/// use ripple_harvest::run_crawl;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("harvest.toml"))?;
/// let summary = run_crawl(config).await?;
/// println!("{} records", summary.records);
/// # Ok(())
/// # }
/// ```
pub async fn run_crawl(config: Config) -> Result<CrawlSummary, HarvestError> {
    Crawl::new(config).run().await
}
