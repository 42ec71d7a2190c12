//! Runners: cancellable, position-addressable pull streams over a source.
//!
//! A runner decouples how a source produces (a blocking iterator, an async
//! stream, a periodic sampler, or a task reporting scalar progress) from how
//! a single logical consumer pulls: non-suspending pulls return whatever is
//! ready, suspending pulls wait until enough data or progress exists, and
//! every runner carries a cancellation authority and an idempotent
//! asynchronous disposal that quiesces background work before releasing
//! resources.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream, StreamExt};
use tokio::task::JoinHandle;

use crate::cancel::{CancelSource, CancelToken};
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::status::{Pull, Status};

mod blocking;
mod buffer;
mod core;
mod queue;
mod sampler;
mod stream;
mod task;

pub use blocking::BlockingRunner;
pub use sampler::sample;
pub use stream::StreamRunner;
pub use task::{ProgressHandle, TaskRunner};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Await a chain of background steps to a fixed point.
///
/// A running step may chain a successor into `tail` while we await it, so a
/// single join is not enough: take the tail, await it, and re-check until no
/// new handle appears.
pub(crate) async fn drain_chain(tail: &Mutex<Option<JoinHandle<()>>>) {
    loop {
        let handle = lock(tail).take();
        match handle {
            Some(handle) => {
                let _ = handle.await;
            }
            None => break,
        }
    }
}

/// Pull interface shared by the sequence runners.
#[async_trait]
pub trait SequenceRunner: Send + Sync {
    type Item: Send;

    /// Current externally observed status.
    fn status(&self) -> Status;

    /// Items delivered to the consumer so far.
    fn position(&self) -> u64;

    /// The captured source failure, if the runner has failed.
    fn failure(&self) -> Option<Arc<anyhow::Error>>;

    /// Cancel the runner.
    fn abort(&self);

    /// Non-suspending pull.
    fn get_available(
        &self,
        start: Option<u64>,
        advance: Option<u64>,
    ) -> Result<Pull<Self::Item>, RunnerError>;

    /// Suspending pull.
    async fn get_required(
        &self,
        start: Option<u64>,
        advance: Option<u64>,
        cancel: Option<CancelToken>,
    ) -> Result<Pull<Self::Item>, RunnerError>;

    /// Idempotent asynchronous disposal.
    async fn dispose(&self);
}

/// Builder for constructing runners.
///
/// Must be finished from within a Tokio runtime: the terminal methods spawn
/// the runner's background production.
pub struct RunnerBuilder {
    config: RunnerConfig,
    cancel: Option<CancelSource>,
    owns_cancel: bool,
}

impl RunnerBuilder {
    /// Create a builder with the default limits and an internally owned
    /// cancellation authority.
    pub fn new() -> Self {
        Self {
            config: RunnerConfig::default(),
            cancel: None,
            owns_cancel: false,
        }
    }

    /// Set the default pull size.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    pub fn pull_size(mut self, n: u64) -> Self {
        self.config = self.config.pull_size(n);
        self
    }

    /// Set the look-ahead buffer capacity.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    pub fn lookahead(mut self, n: usize) -> Self {
        self.config = self.config.lookahead(n);
        self
    }

    /// Attach an external cancellation authority.
    ///
    /// When it fires, the runner aborts. With `transfer` set the authority's
    /// lifecycle belongs to the runner and disposal fires it; without,
    /// disposal leaves it untouched.
    pub fn cancel_source(mut self, source: CancelSource, transfer: bool) -> Self {
        self.cancel = Some(source);
        self.owns_cancel = transfer;
        self
    }

    /// Run an asynchronous sequence.
    pub fn stream<T, S>(self, source: S) -> StreamRunner<T>
    where
        T: Send + 'static,
        S: Stream<Item = anyhow::Result<T>> + Send + 'static,
    {
        StreamRunner::start(self.config, self.cancel, self.owns_cancel, source.boxed())
    }

    /// Run a periodic sampling process through the asynchronous adapter.
    pub fn sampled<T, F, Fut>(self, period: Duration, f: F) -> StreamRunner<T>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let source = sampler::sample(period, f);
        StreamRunner::start(self.config, self.cancel, self.owns_cancel, source.boxed())
    }

    /// Run a blocking sequence on a dedicated background task.
    pub fn blocking<T, I>(self, iter: I) -> BlockingRunner<T>
    where
        T: Send + 'static,
        I: Iterator<Item = anyhow::Result<T>> + Send + 'static,
    {
        BlockingRunner::start(self.config, self.cancel, self.owns_cancel, iter)
    }

    /// Run a task body that reports scalar progress.
    pub fn task<R, F, Fut>(self, body: F) -> TaskRunner<R>
    where
        R: Send + 'static,
        F: FnOnce(ProgressHandle<R>, CancelToken) -> Fut,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        TaskRunner::start(self.config, self.cancel, self.owns_cancel, body)
    }
}

impl Default for RunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
