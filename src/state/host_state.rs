use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for "never" when a pause would overflow the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn saturating_add(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay).unwrap_or(now + FAR_FUTURE)
}

/// Tracks the politeness state of one host during crawling
///
/// This structure maintains the per-host information needed for rate
/// limiting: when the next request may start and how many are in flight.
#[derive(Debug, Clone)]
pub struct HostState {
    /// Host key (`host` or `host:port`)
    pub hostname: String,

    /// Earliest instant the next request to this host may start
    pub next_allowed: Option<Instant>,

    /// Requests currently in flight to this host
    pub in_flight: u32,

    /// Number of requests started against this host in the current crawl
    pub request_count: u64,
}

impl HostState {
    /// Creates a new HostState with default values
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            next_allowed: None,
            in_flight: 0,
            request_count: 0,
        }
    }

    /// Reserves the next start slot for a request
    ///
    /// Returns the instant the caller may start; the following slot is pushed
    /// `interval` past it, so reserved starts are always `interval` apart.
    pub fn reserve(&mut self, now: Instant, interval: Duration) -> Instant {
        let start = match self.next_allowed {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_allowed = Some(saturating_add(start, interval));
        self.in_flight += 1;
        self.request_count += 1;
        start
    }

    /// Records that a request to this host finished
    pub fn release(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Pushes the next allowed start at least `delay` past `now`
    ///
    /// Used when the host answers 429; never moves the slot earlier.
    pub fn back_off(&mut self, now: Instant, delay: Duration) {
        let until = saturating_add(now, delay);
        if self.next_allowed.map_or(true, |next| next < until) {
            self.next_allowed = Some(until);
        }
    }
}
