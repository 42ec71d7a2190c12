//! Usage-error taxonomy for runner operations.

use thiserror::Error;

/// Error returned by runner pull operations.
///
/// These are caller mistakes or per-call cancellations and never mutate
/// runner state. Failures of the underlying source are not errors in this
/// sense: they latch the runner into `Failed` and are surfaced through the
/// `failure` field of the pull result instead.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The runner has been disposed.
    #[error("runner is disposed")]
    Disposed,

    /// The caller's start position does not match the runner's position.
    #[error("start position {given} differs from current position {current}")]
    PositionMismatch { given: u64, current: u64 },

    /// The requested advance was not positive.
    #[error("invalid advance: must be positive")]
    InvalidAdvance,

    /// Another pull operation is already in flight on this runner.
    #[error("parallel pull operations are not allowed")]
    ParallelPull,

    /// The requested target lies at or behind the position already reached.
    #[error("start position {given} is behind current position {current}")]
    PositionBehind { given: u64, current: u64 },

    /// The pull was cancelled through its cancel signal.
    #[error("pull operation cancelled")]
    Cancelled,
}
