//! # Pullflow
//!
//! Cancellable, position-addressable pull streams over arbitrary sources.
//!
//! Pullflow turns a data source or long-running computation — a blocking
//! iterator, an async stream, a periodic sampling process, or a task
//! reporting scalar progress — into a *runner*: a uniform engine that a
//! single logical consumer pulls from at its own pace, with backpressure
//! against the source.
//!
//! ## Why Pullflow?
//!
//! - **Pull at your own pace** - Background production fills a bounded
//!   look-ahead buffer; consumers take what is ready or wait for exactly as
//!   much as they need
//! - **Position-addressable** - Every pull is validated against the number
//!   of items already delivered, so a consumer can never skip or replay
//! - **Cancellable everywhere** - Runners, individual pulls, and individual
//!   progress waiters each observe their own cancel signal
//! - **Embeddable** - A library, not a service. Runs in your process.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pullflow::{RunnerBuilder, Status};
//!
//! let runner = RunnerBuilder::new()
//!     .lookahead(16)
//!     .stream(my_async_source);
//!
//! // Wait for the next two items.
//! let pull = runner.get_required(None, Some(2), None).await?;
//! assert_eq!(pull.position, 2);
//!
//! // Take whatever is ready right now, without waiting.
//! let pull = runner.get_available(None, None)?;
//! if pull.status == Status::Complete {
//!     runner.dispose().await;
//! }
//! ```
//!
//! ## Progress runners
//!
//! Long-running tasks report scalar progress instead of discrete items:
//!
//! ```rust,ignore
//! let runner = RunnerBuilder::new().task(|progress, cancel| async move {
//!     for chunk in work {
//!         if cancel.is_cancelled() {
//!             anyhow::bail!("cancelled");
//!         }
//!         progress.advance(process(chunk)?);
//!     }
//!     Ok(summary)
//! });
//!
//! // Suspend until three units of progress exist.
//! let progress = runner.get_required(None, Some(3), None).await?;
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod runner;
pub mod status;

pub use cancel::{CancelSource, CancelToken};
pub use config::{RunnerConfig, DEFAULT_LOOKAHEAD, DEFAULT_PULL_SIZE};
pub use error::RunnerError;
pub use runner::{
    sample, BlockingRunner, ProgressHandle, RunnerBuilder, SequenceRunner, StreamRunner,
    TaskRunner,
};
pub use status::{Progress, Pull, Status};
