//! Status/position state machine shared by every runner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::cancel::{CancelSource, CancelToken};
use crate::error::RunnerError;
use crate::status::Status;

use super::lock;

struct CoreState {
    status: Status,
    position: u64,
    failure: Option<Arc<anyhow::Error>>,
}

/// Authoritative status/position storage plus the bookkeeping every runner
/// shares: final-state latching, cancellation authority ownership, idempotent
/// disposal, and the single-flight pull guard.
pub(crate) struct RunnerCore {
    state: Mutex<CoreState>,
    disposed: AtomicBool,
    pull_active: AtomicBool,
    /// Authority driving this runner's own background work.
    local: CancelSource,
    /// Externally supplied authority, if any.
    external: Option<CancelSource>,
    /// Whether the external authority's lifecycle was transferred to us.
    owns_external: bool,
}

impl RunnerCore {
    pub(crate) fn new(external: Option<CancelSource>, owns_external: bool) -> Self {
        Self {
            state: Mutex::new(CoreState {
                status: Status::NotStarted,
                position: 0,
                failure: None,
            }),
            disposed: AtomicBool::new(false),
            pull_active: AtomicBool::new(false),
            local: CancelSource::new(),
            external,
            owns_external,
        }
    }

    /// Forward external cancellation into the local authority.
    ///
    /// The link task exits as soon as either side fires, so it never outlives
    /// the runner's teardown.
    pub(crate) fn spawn_cancel_link(&self) {
        if let Some(external) = &self.external {
            let external = external.token();
            let local_source = self.local.clone();
            let local = self.local.token();
            tokio::spawn(async move {
                tokio::select! {
                    _ = external.cancelled() => local_source.cancel(),
                    _ = local.cancelled() => {}
                }
            });
        }
    }

    pub(crate) fn status(&self) -> Status {
        lock(&self.state).status
    }

    pub(crate) fn position(&self) -> u64 {
        lock(&self.state).position
    }

    pub(crate) fn failure(&self) -> Option<Arc<anyhow::Error>> {
        lock(&self.state).failure.clone()
    }

    /// Transition to `next` unless the current status is final.
    ///
    /// Returns whether the transition took effect.
    pub(crate) fn set_status(&self, next: Status) -> bool {
        let mut state = lock(&self.state);
        if state.status.is_final() {
            return false;
        }
        state.status = next;
        true
    }

    /// Latch `Failed` and capture the failure. The first failure wins.
    pub(crate) fn fail(&self, err: anyhow::Error) {
        let mut state = lock(&self.state);
        if state.status.is_final() {
            return;
        }
        state.status = Status::Failed;
        state.failure = Some(Arc::new(err));
    }

    /// Fire the local authority and latch `Aborted` unless a terminal
    /// `Complete`/`Failed` already won. Safe to call concurrently with
    /// background production.
    pub(crate) fn abort(&self) {
        self.local.cancel();
        if self.set_status(Status::Aborted) {
            tracing::debug!("runner aborted");
        }
    }

    /// Advance the delivered position by `n` and return the new position.
    pub(crate) fn advance_position(&self, n: u64) -> u64 {
        let mut state = lock(&self.state);
        state.position += n;
        state.position
    }

    /// Token observed by this runner's background work.
    pub(crate) fn cancel_token(&self) -> CancelToken {
        self.local.token()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Latch the disposed flag. Returns true for the first caller only.
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::AcqRel)
    }

    /// Release the external authority at the end of disposal. Only an
    /// authority whose ownership was transferred is fired; a borrowed one
    /// stays untouched.
    pub(crate) fn release_external(&self) {
        if self.owns_external {
            if let Some(external) = &self.external {
                external.cancel();
            }
        }
    }

    /// Claim the single-flight pull slot.
    ///
    /// Fails with [`RunnerError::Disposed`] once disposal has begun and with
    /// [`RunnerError::ParallelPull`] while another pull is in flight. The
    /// returned guard releases the slot on drop, including across suspension.
    pub(crate) fn begin_pull(&self) -> Result<PullGuard<'_>, RunnerError> {
        if self.is_disposed() {
            return Err(RunnerError::Disposed);
        }
        if self
            .pull_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RunnerError::ParallelPull);
        }
        Ok(PullGuard { core: self })
    }
}

/// RAII release of the single-flight pull slot.
pub(crate) struct PullGuard<'a> {
    core: &'a RunnerCore,
}

impl Drop for PullGuard<'_> {
    fn drop(&mut self) {
        self.core.pull_active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_status_latches() {
        let core = RunnerCore::new(None, false);
        assert!(core.set_status(Status::Stalled));
        assert!(core.set_status(Status::Complete));
        assert!(!core.set_status(Status::Stalled));
        assert_eq!(core.status(), Status::Complete);
    }

    #[test]
    fn test_fail_captures_first_failure() {
        let core = RunnerCore::new(None, false);
        core.fail(anyhow::anyhow!("first"));
        core.fail(anyhow::anyhow!("second"));
        assert_eq!(core.status(), Status::Failed);
        assert_eq!(core.failure().unwrap().to_string(), "first");
    }

    #[test]
    fn test_abort_does_not_override_complete() {
        let core = RunnerCore::new(None, false);
        core.set_status(Status::Complete);
        core.abort();
        assert_eq!(core.status(), Status::Complete);
        assert!(core.cancel_token().is_cancelled());
    }

    #[test]
    fn test_single_flight_guard() {
        let core = RunnerCore::new(None, false);
        let guard = core.begin_pull().unwrap();
        assert!(matches!(core.begin_pull(), Err(RunnerError::ParallelPull)));
        drop(guard);
        assert!(core.begin_pull().is_ok());
    }

    #[test]
    fn test_disposed_blocks_pulls() {
        let core = RunnerCore::new(None, false);
        assert!(core.mark_disposed());
        assert!(!core.mark_disposed());
        assert!(matches!(core.begin_pull(), Err(RunnerError::Disposed)));
    }
}
