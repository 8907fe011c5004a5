//! Per-host politeness gate
//!
//! Every host gets its own fair semaphore (concurrency cap) and its own
//! start-slot schedule (minimum interval between request starts). Waiters on
//! the same host are served in the order they arrived. Different hosts never
//! wait on each other.

use crate::state::HostState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

struct HostGate {
    permits: Arc<Semaphore>,
    state: Mutex<HostState>,
}

impl HostGate {
    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof that the holder may talk to a host
///
/// Dropping the permit (or calling [`HostPermit::release`]) frees the host's
/// concurrency slot.
pub struct HostPermit {
    gate: Arc<HostGate>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl HostPermit {
    /// Releases the host slot
    pub fn release(self) {}
}

impl Drop for HostPermit {
    fn drop(&mut self) {
        self.gate.state().release();
    }
}

/// Rate limiter shared by all workers
pub struct RateLimiter {
    interval: Duration,
    concurrency: usize,
    hosts: Mutex<HashMap<String, Arc<HostGate>>>,
}

impl RateLimiter {
    /// Creates a rate limiter
    ///
    /// - `interval`: minimum time between request starts on one host
    /// - `concurrency`: maximum requests in flight per host (at least 1)
    pub fn new(interval: Duration, concurrency: usize) -> Self {
        Self {
            interval,
            concurrency: concurrency.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, host: &str) -> Arc<HostGate> {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        hosts
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(HostGate {
                    permits: Arc::new(Semaphore::new(self.concurrency)),
                    state: Mutex::new(HostState::new(host)),
                })
            })
            .clone()
    }

    /// Waits until a request to `host` may start
    ///
    /// Blocks until the host has a free concurrency slot and the interval
    /// since the previous start on this host has elapsed. Dropping the
    /// returned future while it waits gives the slot back.
    pub async fn acquire(&self, host: &str) -> HostPermit {
        let gate = self.gate(host);

        // The semaphore is never closed, so this only fails if it were
        let permit = gate.permits.clone().acquire_owned().await.ok();

        let start = gate.state().reserve(Instant::now(), self.interval);
        let permit = HostPermit {
            gate,
            _permit: permit,
        };

        if start > Instant::now() {
            tracing::trace!("Waiting {:?} for host {}", start - Instant::now(), host);
            tokio::time::sleep_until(start).await;
        }

        permit
    }

    /// Delays every future request to `host` by at least `delay` from now
    pub fn back_off(&self, host: &str, delay: Duration) {
        tracing::debug!("Backing off host {} for {:?}", host, delay);
        self.gate(host).state().back_off(Instant::now(), delay);
    }

    /// Returns a copy of the bookkeeping for a host, if it has been seen
    pub fn host_state(&self, host: &str) -> Option<HostState> {
        let hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        hosts.get(host).map(|gate| gate.state().clone())
    }

    /// Requests currently in flight to `host`
    pub fn in_flight(&self, host: &str) -> u32 {
        self.host_state(host).map_or(0, |s| s.in_flight)
    }

    /// Number of distinct hosts seen so far
    pub fn host_count(&self) -> usize {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
