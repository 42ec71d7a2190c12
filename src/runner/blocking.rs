//! Synchronous-source adapter: dedicated background production.
//!
//! Iterating a blocking source can stall a worker, so production runs on a
//! dedicated blocking task: take one item, place it with the backpressured
//! blocking push (waiting while the look-ahead buffer is full), and wake the
//! suspended consumer after each placement. A watcher task forwards runner
//! cancellation into the buffer so a producer stuck on a full buffer cannot
//! deadlock.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::cancel::{CancelSource, CancelToken};
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::status::{Pull, Status};

use super::queue::QueueEngine;
use super::{lock, SequenceRunner};

struct BlockingShared<T> {
    engine: QueueEngine<T>,
    producer: Mutex<Option<JoinHandle<()>>>,
}

/// Runner over an ordinary blocking sequence.
pub struct BlockingRunner<T> {
    inner: Arc<BlockingShared<T>>,
}

impl<T: Send + 'static> BlockingRunner<T> {
    pub(crate) fn start<I>(
        config: RunnerConfig,
        external: Option<CancelSource>,
        owns_external: bool,
        iter: I,
    ) -> Self
    where
        I: Iterator<Item = anyhow::Result<T>> + Send + 'static,
    {
        let inner = Arc::new(BlockingShared {
            engine: QueueEngine::new(config, external, owns_external),
            producer: Mutex::new(None),
        });
        inner.engine.core.spawn_cancel_link();
        tracing::debug!("starting blocking-source runner");

        // Wake a producer blocked on a full buffer when the runner is
        // cancelled; exits as soon as production finishes on its own.
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let watched = inner.clone();
        tokio::spawn(async move {
            let cancel = watched.engine.core.cancel_token();
            tokio::select! {
                _ = cancel.cancelled() => {
                    watched.engine.core.set_status(Status::Aborted);
                    watched.engine.buffer.close();
                }
                _ = done_rx => {}
            }
        });

        let producing = inner.clone();
        let handle = tokio::task::spawn_blocking(move || {
            produce(&producing, iter);
            let _ = done_tx.send(());
        });
        *lock(&inner.producer) = Some(handle);
        Self { inner }
    }

    /// Current externally observed status.
    pub fn status(&self) -> Status {
        self.inner.engine.observed_status()
    }

    /// Items delivered to the consumer so far.
    pub fn position(&self) -> u64 {
        self.inner.engine.core.position()
    }

    /// The captured source failure, if the runner has failed.
    pub fn failure(&self) -> Option<Arc<anyhow::Error>> {
        self.inner.engine.core.failure()
    }

    /// Cancel the runner. Already-produced items stay drainable.
    pub fn abort(&self) {
        self.inner.engine.core.abort();
    }

    /// Non-suspending pull: returns at most what is currently buffered.
    pub fn get_available(
        &self,
        start: Option<u64>,
        advance: Option<u64>,
    ) -> Result<Pull<T>, RunnerError> {
        self.inner.engine.get_available(start, advance)
    }

    /// Suspending pull: drains the buffer and waits on its readiness
    /// awaitable until `advance` items were delivered, production ended, or
    /// `cancel` fired. A cancelled pull returns the items already delivered.
    pub async fn get_required(
        &self,
        start: Option<u64>,
        advance: Option<u64>,
        cancel: Option<CancelToken>,
    ) -> Result<Pull<T>, RunnerError> {
        let engine = &self.inner.engine;
        let _guard = engine.core.begin_pull()?;
        engine.check_start(start)?;
        let wanted = engine.wanted(advance)?;

        let mut items = Vec::new();
        loop {
            let need = wanted.saturating_sub(items.len());
            engine.take_ready(&mut items, need);
            if items.len() >= wanted || engine.buffer.is_drained() {
                break;
            }
            match &cancel {
                Some(token) => {
                    tokio::select! {
                        _ = engine.buffer.ready() => {}
                        _ = token.cancelled() => break,
                    }
                }
                None => engine.buffer.ready().await,
            }
        }
        Ok(engine.finish(items))
    }

    /// Dispose the runner: stop production, join the producer, then release
    /// any owned cancellation authority. Idempotent.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if !inner.engine.core.mark_disposed() {
            return;
        }
        tracing::debug!("disposing blocking-source runner");
        inner.engine.core.abort();
        inner.engine.buffer.abort();
        let handle = lock(&inner.producer).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        inner.engine.core.release_external();
    }
}

impl<T> Drop for BlockingRunner<T> {
    fn drop(&mut self) {
        if !self.inner.engine.core.is_disposed() {
            self.inner.engine.core.abort();
            self.inner.engine.buffer.abort();
            self.inner.engine.core.release_external();
        }
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> SequenceRunner for BlockingRunner<T> {
    type Item = T;

    fn status(&self) -> Status {
        BlockingRunner::status(self)
    }

    fn position(&self) -> u64 {
        BlockingRunner::position(self)
    }

    fn failure(&self) -> Option<Arc<anyhow::Error>> {
        BlockingRunner::failure(self)
    }

    fn abort(&self) {
        BlockingRunner::abort(self)
    }

    fn get_available(
        &self,
        start: Option<u64>,
        advance: Option<u64>,
    ) -> Result<Pull<T>, RunnerError> {
        BlockingRunner::get_available(self, start, advance)
    }

    async fn get_required(
        &self,
        start: Option<u64>,
        advance: Option<u64>,
        cancel: Option<CancelToken>,
    ) -> Result<Pull<T>, RunnerError> {
        BlockingRunner::get_required(self, start, advance, cancel).await
    }

    async fn dispose(&self) {
        BlockingRunner::dispose(self).await
    }
}

/// The background production loop. Runs on a blocking task; every successful
/// placement wakes a waiting consumer through the buffer.
fn produce<T, I>(inner: &BlockingShared<T>, iter: I)
where
    I: Iterator<Item = anyhow::Result<T>>,
{
    let core = &inner.engine.core;
    core.set_status(Status::Stalled);
    let cancel = core.cancel_token();

    for item in iter {
        if core.is_disposed() || cancel.is_cancelled() {
            core.set_status(Status::Aborted);
            break;
        }
        match item {
            Ok(value) => {
                if !inner.engine.buffer.push_blocking(value) {
                    // Closed under us: cancellation or teardown.
                    if cancel.is_cancelled() {
                        core.set_status(Status::Aborted);
                    }
                    break;
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "blocking source failed");
                core.fail(err);
                break;
            }
        }
    }
    inner.engine.buffer.close();
}
