//! Runner life-cycle status and pull result records.

use std::sync::Arc;

/// Life-cycle status of a runner.
///
/// `Complete`, `Failed`, and `Aborted` are final: once reached, no further
/// transitions happen and no background work survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created, background production has not begun.
    NotStarted,
    /// Running, but no data is currently available.
    Stalled,
    /// Running with data available to pull.
    Progressed,
    /// The source ended and every produced item has been delivered.
    Complete,
    /// The source faulted; the failure is captured on the runner.
    Failed,
    /// The runner was cancelled.
    Aborted,
}

impl Status {
    /// Whether this status is terminal.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Aborted)
    }
}

/// Result of a pull against a sequence runner.
#[derive(Debug, Clone)]
pub struct Pull<T> {
    /// Items delivered by this pull, in source order.
    pub items: Vec<T>,
    /// Runner status observed at the end of the pull.
    pub status: Status,
    /// Position after this pull: total items delivered so far.
    pub position: u64,
    /// The captured source failure, if the runner has failed.
    pub failure: Option<Arc<anyhow::Error>>,
}

/// Result of a pull against a progress runner.
#[derive(Debug, Clone)]
pub struct Progress<R> {
    /// Progress units gained by this pull, relative to its start position.
    pub advanced: u64,
    /// Latest value reported by the task, if any.
    pub value: Option<R>,
    /// Runner status observed at the end of the pull.
    pub status: Status,
    /// Position after this pull.
    pub position: u64,
    /// The captured task failure, if the runner has failed.
    pub failure: Option<Arc<anyhow::Error>>,
}
