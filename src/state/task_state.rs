//! Task state definitions for tracking crawl progress
//!
//! Every normalized URL the queue has ever accepted carries one of these states.
use std::fmt;

/// Represents the current state of a URL in the crawl process
///
/// ```text
/// Pending -> InFlight -> Succeeded
///                     -> Pending   (transient failure, attempts remain)
///                     -> Failed    (permanent failure or attempts exhausted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    // ===== Active States =====
    /// Queued (possibly delayed) and waiting for a worker
    Pending,

    /// Claimed by exactly one worker for one fetch attempt
    InFlight,

    // ===== Terminal States =====
    /// Fetched and extracted successfully
    Succeeded,

    /// Abandoned; never fetched again
    Failed,
}

impl TaskState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Checks whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::InFlight, Self::Pending)
                | (Self::InFlight, Self::Succeeded)
                | (Self::InFlight, Self::Failed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
