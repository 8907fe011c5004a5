//! Fetch queue: the crawl frontier
//!
//! This module handles:
//! - De-duplication by normalized URL (a URL is "seen" the moment it is pushed)
//! - Breadth-first ordering (smallest depth first, FIFO within a depth)
//! - Delayed retries that cannot be popped before their not-before instant
//! - Tracking which URLs are in flight, visited or permanently failed
//! - Snapshots for checkpointing and restoring a crawl

use crate::state::{CrawlState, FailureEntry, TaskState, UrlTask};
use crate::url::normalize_url;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::Instant;
use url::Url;

/// A task waiting in the ready heap
#[derive(Debug)]
struct QueuedTask {
    task: UrlTask,
    seq: u64,
}

// Lower depth pops first, then lower insertion sequence
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .task
            .depth
            .cmp(&self.task.depth)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

/// A retried task that may not be popped before `not_before`
#[derive(Debug)]
struct DelayedTask {
    task: UrlTask,
    not_before: Instant,
    seq: u64,
}

// Earliest deadline pops first
impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .not_before
            .cmp(&self.not_before)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for DelayedTask {}

enum PopOutcome {
    Task(UrlTask),
    Drained,
    Wait(Option<Instant>),
}

#[derive(Default)]
struct QueueInner {
    /// Tasks ready to fetch
    ready: BinaryHeap<QueuedTask>,

    /// Retries waiting for their backoff to elapse
    delayed: BinaryHeap<DelayedTask>,

    /// Tasks currently claimed by a worker, keyed by normalized URL
    in_flight: HashMap<String, UrlTask>,

    /// Every URL ever accepted and where it is in its lifecycle
    states: HashMap<String, TaskState>,

    /// Succeeded URLs in completion order
    visited: Vec<String>,

    /// Permanently failed URLs in failure order
    failures: Vec<FailureEntry>,

    next_seq: u64,
    closed: bool,
}

impl QueueInner {
    fn push_ready(&mut self, task: UrlTask) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ready.push(QueuedTask { task, seq });
    }

    fn push_delayed(&mut self, task: UrlTask, not_before: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.delayed.push(DelayedTask {
            task,
            not_before,
            seq,
        });
    }

    fn transition(&mut self, key: &str, next: TaskState) -> bool {
        match self.states.get_mut(key) {
            Some(state) if state.can_transition_to(next) => {
                *state = next;
                true
            }
            Some(state) => {
                tracing::warn!("Ignoring invalid transition for {}: {} -> {}", key, state, next);
                false
            }
            None => {
                tracing::warn!("Ignoring transition to {} for unknown URL {}", next, key);
                false
            }
        }
    }

    fn take(&mut self, now: Instant) -> PopOutcome {
        // Promote retries whose backoff has elapsed
        while self.delayed.peek().map_or(false, |d| d.not_before <= now) {
            if let Some(delayed) = self.delayed.pop() {
                self.push_ready(delayed.task);
            }
        }

        if let Some(queued) = self.ready.pop() {
            let task = queued.task;
            self.transition(task.key(), TaskState::InFlight);
            self.in_flight.insert(task.key().to_string(), task.clone());
            return PopOutcome::Task(task);
        }

        if self.delayed.is_empty() && (self.closed || self.in_flight.is_empty()) {
            return PopOutcome::Drained;
        }

        PopOutcome::Wait(self.delayed.peek().map(|d| d.not_before))
    }

    fn release_in_flight(&mut self, task: &UrlTask, next: TaskState) -> bool {
        if !self.transition(task.key(), next) {
            return false;
        }
        self.in_flight.remove(task.key());
        true
    }
}

/// Shared, de-duplicating, breadth-first work queue
///
/// All state lives behind one mutex that is never held across an `.await`;
/// waiting poppers are woken through a [`Notify`].
#[derive(Default)]
pub struct FetchQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl FetchQueue {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a queue from a checkpointed crawl state
    ///
    /// Visited and failed URLs are marked seen so they are never re-enqueued;
    /// pending tasks (including ones that were in flight or delayed when the
    /// checkpoint was taken) become ready again.
    pub fn from_state(state: CrawlState) -> Self {
        let queue = Self::new();
        {
            let mut inner = queue.lock();
            for url in state.visited {
                if inner.states.insert(url.clone(), TaskState::Succeeded).is_none() {
                    inner.visited.push(url);
                }
            }
            for failure in state.permanent_failures {
                if !inner.states.contains_key(&failure.url) {
                    inner.states.insert(failure.url.clone(), TaskState::Failed);
                    inner.failures.push(failure);
                }
            }
            for task in state.pending {
                if !inner.states.contains_key(task.key()) {
                    inner.states.insert(task.key().to_string(), TaskState::Pending);
                    inner.push_ready(task);
                }
            }
        }
        queue
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a task unless its normalized URL has been seen before
    ///
    /// Returns true if the task was enqueued. The URL is marked seen before
    /// this returns, so concurrent pushes of the same URL enqueue it once.
    pub fn push(&self, mut task: UrlTask) -> bool {
        match normalize_url(task.url.as_str()) {
            Ok(url) => task.url = url,
            Err(e) => {
                tracing::debug!("Rejecting unnormalizable URL {}: {}", task.url, e);
                return false;
            }
        }

        {
            let mut inner = self.lock();
            if inner.closed {
                tracing::trace!("Queue closed, dropping {}", task.url);
                return false;
            }
            if inner.states.contains_key(task.key()) {
                tracing::trace!("Already seen: {}", task.url);
                return false;
            }
            inner
                .states
                .insert(task.key().to_string(), TaskState::Pending);
            inner.push_ready(task);
        }

        self.notify.notify_waiters();
        true
    }

    /// Waits for the next task in breadth-first order
    ///
    /// Returns `None` once the queue is closed and drained, or when nothing is
    /// queued, nothing is delayed and nothing is in flight (no more work can
    /// ever appear). In the latter case the queue closes itself.
    pub async fn pop(&self) -> Option<UrlTask> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut inner = self.lock();
                match inner.take(Instant::now()) {
                    PopOutcome::Task(task) => return Some(task),
                    PopOutcome::Drained => {
                        inner.closed = true;
                        drop(inner);
                        self.notify.notify_waiters();
                        return None;
                    }
                    PopOutcome::Wait(deadline) => deadline,
                }
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Signals that no more tasks will be pushed
    ///
    /// Pending pops drain what is already queued, then return `None`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Marks an in-flight task as successfully processed
    pub fn complete(&self, task: &UrlTask) {
        {
            let mut inner = self.lock();
            if inner.release_in_flight(task, TaskState::Succeeded) {
                inner.visited.push(task.key().to_string());
            }
        }
        self.notify.notify_waiters();
    }

    /// Records a redirect target as visited without fetching it
    ///
    /// Returns false if the URL had already been seen; its existing state is
    /// left alone.
    pub fn mark_visited(&self, url: &Url) -> bool {
        let Ok(url) = normalize_url(url.as_str()) else {
            return false;
        };
        let key = url.as_str();
        let mut inner = self.lock();
        if inner.states.contains_key(key) {
            return false;
        }
        inner.states.insert(key.to_string(), TaskState::Succeeded);
        inner.visited.push(key.to_string());
        true
    }

    /// Marks an in-flight task as permanently failed
    pub fn fail(&self, task: &UrlTask, reason: &str) {
        {
            let mut inner = self.lock();
            if inner.release_in_flight(task, TaskState::Failed) {
                inner.failures.push(FailureEntry {
                    url: task.key().to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        self.notify.notify_waiters();
    }

    /// Puts an in-flight task back, not to be popped before `not_before`
    ///
    /// The URL stays seen, so it cannot be pushed again in the meantime.
    pub fn retry(&self, task: UrlTask, not_before: Instant) {
        {
            let mut inner = self.lock();
            if inner.release_in_flight(&task, TaskState::Pending) {
                inner.push_delayed(task, not_before);
            }
        }
        self.notify.notify_waiters();
    }

    /// Returns a popped but unstarted task to the ready heap
    pub fn requeue(&self, task: UrlTask) {
        {
            let mut inner = self.lock();
            if inner.release_in_flight(&task, TaskState::Pending) {
                inner.push_ready(task);
            }
        }
        self.notify.notify_waiters();
    }

    /// Captures the current progress as a resumable crawl state
    ///
    /// In-flight and delayed tasks are reported as pending: if the process
    /// dies now they must be fetched again on resume.
    pub fn snapshot(&self) -> CrawlState {
        let inner = self.lock();

        let mut ready: Vec<&QueuedTask> = inner.ready.iter().collect();
        ready.sort_by_key(|q| (q.task.depth, q.seq));

        let mut pending: Vec<UrlTask> = ready.into_iter().map(|q| q.task.clone()).collect();
        pending.extend(inner.in_flight.values().cloned());
        pending.extend(inner.delayed.iter().map(|d| d.task.clone()));
        pending.sort_by_key(|t| t.depth);

        CrawlState {
            visited: inner.visited.clone(),
            pending,
            permanent_failures: inner.failures.clone(),
        }
    }

    /// Returns the state of a URL, if it has ever been accepted
    pub fn state_of(&self, url: &str) -> Option<TaskState> {
        let key = normalize_url(url).ok()?;
        self.lock().states.get(key.as_str()).copied()
    }

    /// Number of tasks waiting (ready or delayed)
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.ready.len() + inner.delayed.len()
    }

    /// Returns true if no task is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks currently claimed by workers
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn task(url: &str, depth: u32) -> UrlTask {
        let mut task = UrlTask::seed(url).unwrap();
        task.depth = depth;
        task
    }

    #[tokio::test]
    async fn test_duplicate_push_enqueued_once() {
        let queue = FetchQueue::new();

        assert!(queue.push(task("http://a.test/", 0)));
        assert!(!queue.push(task("http://a.test/", 0)));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_dedup_uses_normalized_form() {
        let queue = FetchQueue::new();
        let mut raw = task("http://a.test/", 0);
        raw.url = url::Url::parse("HTTP://A.TEST:80/#frag").unwrap();

        assert!(queue.push(task("http://a.test/", 0)));
        assert!(!queue.push(raw));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_pushes_enqueue_once() {
        let queue = Arc::new(FetchQueue::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.push(task("http://a.test/same", 1))
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_breadth_first_order() {
        let queue = FetchQueue::new();
        queue.push(task("http://a.test/deep1", 1));
        queue.push(task("http://a.test/root", 0));
        queue.push(task("http://a.test/deep2", 1));
        queue.push(task("http://a.test/deeper", 2));

        let mut order = Vec::new();
        while let Some(t) = queue.pop().await {
            order.push(t.url.path().to_string());
            queue.complete(&t);
        }

        assert_eq!(order, vec!["/root", "/deep1", "/deep2", "/deeper"]);
    }

    #[tokio::test]
    async fn test_in_flight_and_visited_are_not_reenqueued() {
        let queue = FetchQueue::new();
        queue.push(task("http://a.test/", 0));

        let popped = queue.pop().await.unwrap();
        assert_eq!(queue.in_flight(), 1);
        assert!(!queue.push(task("http://a.test/", 1)));

        queue.complete(&popped);
        assert_eq!(queue.state_of("http://a.test/"), Some(TaskState::Succeeded));
        assert!(!queue.push(task("http://a.test/", 1)));
    }

    #[tokio::test]
    async fn test_pop_returns_none_when_idle_and_empty() {
        let queue = FetchQueue::new();
        assert!(queue.pop().await.is_none());
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_pop_waits_for_work_from_in_flight_task() {
        let queue = Arc::new(FetchQueue::new());
        queue.push(task("http://a.test/", 0));
        let parent = queue.pop().await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;

        queue.push(task("http://a.test/child", 1));
        queue.complete(&parent);

        let child = waiter.await.unwrap().unwrap();
        assert_eq!(child.url.path(), "/child");
    }

    #[tokio::test]
    async fn test_waiters_released_when_last_task_completes() {
        let queue = Arc::new(FetchQueue::new());
        queue.push(task("http://a.test/", 0));
        let only = queue.pop().await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;

        queue.complete(&only);
        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_drains_then_stops() {
        let queue = FetchQueue::new();
        queue.push(task("http://a.test/1", 0));
        queue.push(task("http://a.test/2", 0));
        let first = queue.pop().await.unwrap();

        queue.close();
        assert!(!queue.push(task("http://a.test/3", 0)));

        let second = queue.pop().await.unwrap();
        assert_eq!(second.url.path(), "/2");
        assert!(queue.pop().await.is_none());

        queue.complete(&first);
        queue.complete(&second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_not_popped_before_deadline() {
        let queue = FetchQueue::new();
        queue.push(task("http://a.test/", 0));
        let first = queue.pop().await.unwrap();

        let start = Instant::now();
        queue.retry(first.next_attempt(), start + Duration::from_secs(5));
        assert_eq!(queue.state_of("http://a.test/"), Some(TaskState::Pending));

        let again = queue.pop().await.unwrap();
        assert!(Instant::now() >= start + Duration::from_secs(5));
        assert_eq!(again.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_work_not_blocked_by_delayed_retry() {
        let queue = FetchQueue::new();
        queue.push(task("http://a.test/slow", 0));
        let slow = queue.pop().await.unwrap();
        queue.retry(slow.next_attempt(), Instant::now() + Duration::from_secs(60));

        queue.push(task("http://a.test/fast", 1));
        let next = queue.pop().await.unwrap();
        assert_eq!(next.url.path(), "/fast");
    }

    #[tokio::test]
    async fn test_fail_is_terminal() {
        let queue = FetchQueue::new();
        queue.push(task("http://a.test/gone", 0));
        let t = queue.pop().await.unwrap();
        queue.fail(&t, "HTTP 404");

        assert_eq!(queue.state_of("http://a.test/gone"), Some(TaskState::Failed));
        assert!(!queue.push(task("http://a.test/gone", 0)));

        let state = queue.snapshot();
        assert_eq!(state.permanent_failures.len(), 1);
        assert_eq!(state.permanent_failures[0].reason, "HTTP 404");
    }

    #[tokio::test]
    async fn test_mark_visited_blocks_later_push() {
        let queue = FetchQueue::new();
        let target = url::Url::parse("http://a.test/new#top").unwrap();

        assert!(queue.mark_visited(&target));
        assert!(!queue.mark_visited(&target));
        assert!(!queue.push(task("http://a.test/new", 1)));
        assert_eq!(queue.state_of("http://a.test/new"), Some(TaskState::Succeeded));
        assert_eq!(queue.snapshot().visited, vec!["http://a.test/new".to_string()]);
    }

    #[tokio::test]
    async fn test_mark_visited_leaves_in_flight_task_alone() {
        let queue = FetchQueue::new();
        queue.push(task("http://a.test/", 0));
        let t = queue.pop().await.unwrap();

        assert!(!queue.mark_visited(&t.url));
        assert_eq!(queue.state_of("http://a.test/"), Some(TaskState::InFlight));
    }

    #[tokio::test]
    async fn test_snapshot_keeps_in_flight_and_delayed_as_pending() {
        let queue = FetchQueue::new();
        queue.push(task("http://a.test/", 0));
        queue.push(task("http://a.test/x", 1));
        queue.push(task("http://a.test/y", 1));

        let root = queue.pop().await.unwrap();
        queue.complete(&root);
        let x = queue.pop().await.unwrap();
        queue.retry(x.next_attempt(), Instant::now() + Duration::from_secs(30));
        let _y = queue.pop().await.unwrap();

        let state = queue.snapshot();
        assert_eq!(state.visited, vec!["http://a.test/".to_string()]);
        assert_eq!(state.pending.len(), 2);
        let retried = state
            .pending
            .iter()
            .find(|t| t.url.path() == "/x")
            .unwrap();
        assert_eq!(retried.attempt, 1);
    }

    #[tokio::test]
    async fn test_from_state_restores_seen_set() {
        let state = CrawlState {
            visited: vec!["http://a.test/".into()],
            pending: vec![task("http://a.test/x", 1)],
            permanent_failures: vec![FailureEntry {
                url: "http://a.test/gone".into(),
                reason: "HTTP 410".into(),
            }],
        };

        let queue = FetchQueue::from_state(state.clone());
        assert!(!queue.push(task("http://a.test/", 1)));
        assert!(!queue.push(task("http://a.test/gone", 1)));
        assert!(!queue.push(task("http://a.test/x", 1)));
        assert!(queue.snapshot().is_equivalent_to(&state));

        let next = queue.pop().await.unwrap();
        assert_eq!(next.url.path(), "/x");
    }
}
