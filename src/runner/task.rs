//! Progress/position waiter engine for long-running scalar-progress tasks.
//!
//! One background unit of work reports incremental progress through a
//! [`ProgressHandle`] and a final value at the end. Suspended pulls are
//! waiters in a priority queue keyed ascending by target position: each
//! progress increment releases every waiter whose target is now satisfied,
//! and reaching a final state releases everyone. A waiter cancelled at the
//! call site drops its receiver; the release sweep tolerates such dead
//! entries without removing them from the queue eagerly.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::cancel::{CancelSource, CancelToken};
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::status::{Progress, Status};

use super::core::RunnerCore;
use super::lock;

/// A pending suspended pull, keyed by the position it waits for.
struct Waiter {
    target: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.target == other.target
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.target.cmp(&other.target)
    }
}

struct ProgressState<R> {
    progress: u64,
    value: Option<R>,
    estimated_end: Option<u64>,
    waiters: BinaryHeap<Reverse<Waiter>>,
}

struct TaskShared<R> {
    core: RunnerCore,
    config: RunnerConfig,
    state: Mutex<ProgressState<R>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Reporting handle passed to the task body.
pub struct ProgressHandle<R> {
    inner: Arc<TaskShared<R>>,
}

impl<R> Clone for ProgressHandle<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R> ProgressHandle<R> {
    /// Report one unit of progress together with the latest value.
    ///
    /// Releases every waiter whose target is now satisfied, in ascending
    /// target order. Returns the new progress. Ignored once the runner has
    /// reached a final state.
    pub fn advance(&self, value: R) -> u64 {
        let mut state = lock(&self.inner.state);
        if self.inner.core.status().is_final() {
            return state.progress;
        }
        state.progress += 1;
        state.value = Some(value);
        let progress = state.progress;
        release_due(&mut state, progress);
        progress
    }

    /// Publish a hint of where progress is expected to end.
    pub fn set_estimated_end(&self, end: u64) {
        lock(&self.inner.state).estimated_end = Some(end);
    }

    /// Highest progress reached so far.
    pub fn progress(&self) -> u64 {
        lock(&self.inner.state).progress
    }
}

/// Runner over a single long-running task reporting scalar progress.
pub struct TaskRunner<R> {
    inner: Arc<TaskShared<R>>,
}

impl<R: Send + 'static> TaskRunner<R> {
    pub(crate) fn start<F, Fut>(
        config: RunnerConfig,
        external: Option<CancelSource>,
        owns_external: bool,
        body: F,
    ) -> Self
    where
        F: FnOnce(ProgressHandle<R>, CancelToken) -> Fut,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let inner = Arc::new(TaskShared {
            core: RunnerCore::new(external, owns_external),
            config,
            state: Mutex::new(ProgressState {
                progress: 0,
                value: None,
                estimated_end: None,
                waiters: BinaryHeap::new(),
            }),
            handle: Mutex::new(None),
        });
        inner.core.spawn_cancel_link();
        tracing::debug!("starting task runner");

        let token = inner.core.cancel_token();
        let fut = body(ProgressHandle { inner: inner.clone() }, token.clone());
        let run = inner.clone();
        let handle = tokio::spawn(async move {
            run.core.set_status(Status::Stalled);
            let guarded = AssertUnwindSafe(fut).catch_unwind();
            let outcome = tokio::select! {
                result = guarded => Some(result),
                _ = token.cancelled() => None,
            };
            match outcome {
                Some(Ok(Ok(value))) => {
                    lock(&run.state).value = Some(value);
                    run.core.set_status(Status::Complete);
                }
                Some(Ok(Err(err))) => {
                    if token.is_cancelled() {
                        run.core.set_status(Status::Aborted);
                    } else {
                        tracing::error!(error = %err, "task body failed");
                        run.core.fail(err);
                    }
                }
                Some(Err(panic)) => {
                    run.core.fail(anyhow::anyhow!(
                        "task panicked: {}",
                        panic_message(panic.as_ref())
                    ));
                }
                None => {
                    run.core.set_status(Status::Aborted);
                }
            }
            // Final states unblock everyone, whatever their target.
            release_all(&run);
        });
        *lock(&inner.handle) = Some(handle);
        Self { inner }
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.inner.core.status()
    }

    /// Position already delivered to the consumer.
    pub fn position(&self) -> u64 {
        self.inner.core.position()
    }

    /// The captured task failure, if the runner has failed.
    pub fn failure(&self) -> Option<Arc<anyhow::Error>> {
        self.inner.core.failure()
    }

    /// Highest progress reached and the estimated end, if published.
    pub fn progress(&self) -> (u64, Option<u64>) {
        let state = lock(&self.inner.state);
        (state.progress, state.estimated_end)
    }

    /// Cancel the runner and its task body.
    pub fn abort(&self) {
        self.inner.core.abort();
    }

    /// Non-suspending pull: advance the position as far as current progress
    /// allows, up to `advance` units.
    pub fn get_available(
        &self,
        start: Option<u64>,
        advance: Option<u64>,
    ) -> Result<Progress<R>, RunnerError>
    where
        R: Clone,
    {
        let inner = &self.inner;
        let _guard = inner.core.begin_pull()?;
        let current = inner.core.position();
        let start0 = start.unwrap_or(current);
        if start0 != current {
            return Err(RunnerError::PositionMismatch {
                given: start0,
                current,
            });
        }
        let advance = self.resolve_advance(advance)?;
        let target = current.saturating_add(advance);
        Ok(self.resolve(start0, target))
    }

    /// Suspending pull: wait until progress reaches `start + advance`, the
    /// runner reaches a final state, or `cancel` fires.
    ///
    /// A target at or behind the position already reached is a usage error.
    /// A cancelled waiter resolves as cancelled exactly once and never
    /// receives a normal result, even if its target is satisfied later.
    pub async fn get_required(
        &self,
        start: Option<u64>,
        advance: Option<u64>,
        cancel: Option<CancelToken>,
    ) -> Result<Progress<R>, RunnerError>
    where
        R: Clone,
    {
        let inner = &self.inner;
        let _guard = inner.core.begin_pull()?;
        let current = inner.core.position();
        let start0 = start.unwrap_or(current);
        let advance = self.resolve_advance(advance)?;
        let target = start0
            .checked_add(advance)
            .ok_or(RunnerError::InvalidAdvance)?;
        if target <= current {
            return Err(RunnerError::PositionBehind {
                given: start0,
                current,
            });
        }

        // Enqueue under the state lock: the terminal sweep also runs under
        // it, so a waiter can never slip in after the final release.
        let rx = {
            let mut state = lock(&inner.state);
            if target <= state.progress || inner.core.status().is_final() {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(Reverse(Waiter { target, tx }));
                Some(rx)
            }
        };

        if let Some(mut rx) = rx {
            match &cancel {
                Some(token) => {
                    tokio::select! {
                        _ = &mut rx => {}
                        _ = token.cancelled() => return Err(RunnerError::Cancelled),
                    }
                }
                None => {
                    let _ = rx.await;
                }
            }
        }
        Ok(self.resolve(start0, target))
    }

    /// Dispose the runner: cancel the body, join it, then release any owned
    /// cancellation authority. Idempotent.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if !inner.core.mark_disposed() {
            return;
        }
        tracing::debug!("disposing task runner");
        inner.core.abort();
        let handle = lock(&inner.handle).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        inner.core.release_external();
    }

    fn resolve_advance(&self, advance: Option<u64>) -> Result<u64, RunnerError> {
        match advance {
            None => Ok(self.inner.config.pull_size),
            Some(0) => Err(RunnerError::InvalidAdvance),
            Some(n) => Ok(n),
        }
    }

    /// Advance the position as far as produced progress allows, never past
    /// `target` and never backwards, and assemble the pull result.
    fn resolve(&self, start0: u64, target: u64) -> Progress<R>
    where
        R: Clone,
    {
        let inner = &self.inner;
        let (progress, value) = {
            let state = lock(&inner.state);
            (state.progress, state.value.clone())
        };
        let current = inner.core.position();
        let reachable = target.min(progress).max(current);
        if reachable > current {
            inner.core.advance_position(reachable - current);
        }
        let position = inner.core.position();
        let status = {
            let status = inner.core.status();
            if status.is_final() {
                status
            } else if position >= target {
                Status::Progressed
            } else {
                Status::Stalled
            }
        };
        Progress {
            advanced: position.saturating_sub(start0),
            value,
            status,
            position,
            failure: inner.core.failure(),
        }
    }
}

impl<R> Drop for TaskRunner<R> {
    fn drop(&mut self) {
        if !self.inner.core.is_disposed() {
            self.inner.core.abort();
            self.inner.core.release_external();
        }
    }
}

/// Release every waiter whose target is satisfied by `progress`, in
/// ascending target order. Dead entries (cancelled waiters) fail the send
/// and are simply passed over.
fn release_due<R>(state: &mut ProgressState<R>, progress: u64) {
    loop {
        let due = match state.waiters.peek() {
            Some(Reverse(waiter)) => waiter.target <= progress,
            None => false,
        };
        if !due {
            break;
        }
        if let Some(Reverse(waiter)) = state.waiters.pop() {
            let _ = waiter.tx.send(());
        }
    }
}

/// Release every remaining waiter, whatever its target.
fn release_all<R>(run: &TaskShared<R>) {
    let mut state = lock(&run.state);
    while let Some(Reverse(waiter)) = state.waiters.pop() {
        let _ = waiter.tx.send(());
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
