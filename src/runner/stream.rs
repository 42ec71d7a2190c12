//! Asynchronous-source adapter: a continuation-chained background pump.
//!
//! Each advance of the source runs as its own spawned step. A step awaits one
//! item, buffers it, pumps the active pull context, and then chains its
//! successor, recording the new handle in the shared tail slot. Successors
//! are spawned while the tail lock is held, so the tail is always replaced in
//! chain order and disposal can drain the chain to a fixed point: take the
//! tail, await it, and repeat until no successor appears.

use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::cancel::{CancelSource, CancelToken};
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::status::{Pull, Status};

use super::queue::QueueEngine;
use super::{drain_chain, lock, SequenceRunner};

/// A single outstanding suspending pull. Steps pump ready items into it and
/// complete its channel once the request is satisfied or no more items can
/// arrive.
struct PullContext<T> {
    wanted: usize,
    collected: Vec<T>,
    tx: oneshot::Sender<Vec<T>>,
}

struct StreamShared<T> {
    engine: QueueEngine<T>,
    source: Mutex<Option<BoxStream<'static, anyhow::Result<T>>>>,
    tail: Mutex<Option<JoinHandle<()>>>,
    context: Mutex<Option<PullContext<T>>>,
}

/// Runner over an asynchronous sequence.
///
/// Items are produced by a self-perpetuating chain of background steps and
/// delivered through the look-ahead buffer in source order.
pub struct StreamRunner<T> {
    inner: Arc<StreamShared<T>>,
}

impl<T: Send + 'static> StreamRunner<T> {
    pub(crate) fn start(
        config: RunnerConfig,
        external: Option<CancelSource>,
        owns_external: bool,
        source: BoxStream<'static, anyhow::Result<T>>,
    ) -> Self {
        let inner = Arc::new(StreamShared {
            engine: QueueEngine::new(config, external, owns_external),
            source: Mutex::new(Some(source)),
            tail: Mutex::new(None),
            context: Mutex::new(None),
        });
        inner.engine.core.spawn_cancel_link();
        tracing::debug!("starting async-source runner");
        chain_next(&inner);
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

    /// Suspending pull: waits until `advance` items were delivered, the
    /// source ended, or `cancel` fired. A cancelled pull returns the items
    /// already delivered to it rather than dropping them.
    pub async fn get_required(
        &self,
        start: Option<u64>,
        advance: Option<u64>,
        cancel: Option<CancelToken>,
    ) -> Result<Pull<T>, RunnerError> {
        let inner = &self.inner;
        let _guard = inner.engine.core.begin_pull()?;
        inner.engine.check_start(start)?;
        let wanted = inner.engine.wanted(advance)?;

        let mut items = Vec::new();
        inner.engine.take_ready(&mut items, wanted);
        if items.len() >= wanted || inner.engine.buffer.is_drained() {
            return Ok(inner.engine.finish(items));
        }

        let (tx, mut rx) = oneshot::channel();
        *lock(&inner.context) = Some(PullContext {
            wanted,
            collected: items,
            tx,
        });
        // Cover items that raced in between the drain above and installation.
        pump_context(inner);

        let collected = match cancel {
            Some(token) => {
                tokio::select! {
                    result = &mut rx => {
                        return Ok(inner.engine.finish(result.unwrap_or_default()));
                    }
                    _ = token.cancelled() => {}
                }
                // Cancelled: reclaim the context unless a step completed it
                // concurrently, in which case the channel already holds the
                // delivered items.
                let reclaimed = lock(&inner.context).take();
                match reclaimed {
                    Some(context) => context.collected,
                    None => rx.await.unwrap_or_default(),
                }
            }
            None => rx.await.unwrap_or_default(),
        };
        Ok(inner.engine.finish(collected))
    }

    /// Dispose the runner: stop new steps, drain the in-flight chain to a
    /// fixed point, then release the source and any owned cancellation
    /// authority. Idempotent.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if !inner.engine.core.mark_disposed() {
            return;
        }
        tracing::debug!("disposing async-source runner");
        inner.engine.core.abort();
        inner.engine.buffer.abort();
        drain_chain(&inner.tail).await;
        *lock(&inner.source) = None;
        pump_context(inner);
        inner.engine.core.release_external();
    }
}

impl<T> Drop for StreamRunner<T> {
    fn drop(&mut self) {
        if !self.inner.engine.core.is_disposed() {
            self.inner.engine.core.abort();
            self.inner.engine.buffer.abort();
            self.inner.engine.core.release_external();
        }
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> SequenceRunner for StreamRunner<T> {
    type Item = T;

    fn status(&self) -> Status {
        StreamRunner::status(self)
    }

    fn position(&self) -> u64 {
        StreamRunner::position(self)
    }

    fn failure(&self) -> Option<Arc<anyhow::Error>> {
        StreamRunner::failure(self)
    }

    fn abort(&self) {
        StreamRunner::abort(self)
    }

    fn get_available(
        &self,
        start: Option<u64>,
        advance: Option<u64>,
    ) -> Result<Pull<T>, RunnerError> {
        StreamRunner::get_available(self, start, advance)
    }

    async fn get_required(
        &self,
        start: Option<u64>,
        advance: Option<u64>,
        cancel: Option<CancelToken>,
    ) -> Result<Pull<T>, RunnerError> {
        StreamRunner::get_required(self, start, advance, cancel).await
    }

    async fn dispose(&self) {
        StreamRunner::dispose(self).await
    }
}

/// Spawn the next chain step and record it as the new tail.
///
/// The spawn happens under the tail lock: a successor chained from inside the
/// new step must wait for that lock, so tail replacements always happen in
/// chain order and the fixed-point drain cannot miss a step.
fn chain_next<T: Send + 'static>(inner: &Arc<StreamShared<T>>) {
    let mut tail = lock(&inner.tail);
    let next = inner.clone();
    *tail = Some(tokio::spawn(async move {
        step(next).await;
    }));
}

enum Advance<T> {
    Item(T),
    End,
    Fault(anyhow::Error),
    Cancelled,
}

/// One advance of the source: await an item, buffer it, pump the active pull
/// context, and chain the successor unless the runner is winding down.
async fn step<T: Send + 'static>(inner: Arc<StreamShared<T>>) {
    let core = &inner.engine.core;
    if core.is_disposed() || core.status().is_final() {
        inner.engine.buffer.close();
        pump_context(&inner);
        return;
    }
    if core.status() == Status::NotStarted {
        core.set_status(Status::Stalled);
    }

    let Some(mut source) = lock(&inner.source).take() else {
        return;
    };
    let cancel = core.cancel_token();
    let advance = tokio::select! {
        _ = cancel.cancelled() => Advance::Cancelled,
        item = source.next() => match item {
            Some(Ok(value)) => Advance::Item(value),
            Some(Err(err)) => Advance::Fault(err),
            None => Advance::End,
        },
    };
    *lock(&inner.source) = Some(source);

    match advance {
        Advance::Item(value) => {
            let pushed = tokio::select! {
                result = inner.engine.buffer.push(value) => result.is_ok(),
                _ = cancel.cancelled() => false,
            };
            if !pushed {
                if cancel.is_cancelled() {
                    core.set_status(Status::Aborted);
                }
                inner.engine.buffer.close();
                pump_context(&inner);
                return;
            }
            pump_context(&inner);
            if core.is_disposed() || core.status().is_final() {
                inner.engine.buffer.close();
                pump_context(&inner);
                return;
            }
            chain_next(&inner);
        }
        Advance::End => {
            inner.engine.buffer.close();
            pump_context(&inner);
        }
        Advance::Fault(err) => {
            tracing::error!(error = %err, "source advance failed");
            core.fail(err);
            inner.engine.buffer.close();
            pump_context(&inner);
        }
        Advance::Cancelled => {
            core.set_status(Status::Aborted);
            inner.engine.buffer.close();
            pump_context(&inner);
        }
    }
}

/// Drain ready items into the active pull context and complete it once the
/// request is satisfied or no more items can arrive.
fn pump_context<T>(inner: &StreamShared<T>) {
    let mut slot = lock(&inner.context);
    let Some(context) = slot.as_mut() else {
        return;
    };
    let remaining = context.wanted.saturating_sub(context.collected.len());
    inner.engine.take_ready(&mut context.collected, remaining);
    if context.collected.len() >= context.wanted || inner.engine.buffer.is_drained() {
        if let Some(context) = slot.take() {
            let _ = context.tx.send(context.collected);
        }
    }
}
