//! Shared engine for runners whose result is a sequence of items.
//!
//! Both sequence adapters compose this: the state machine, the look-ahead
//! buffer, and the configured limits, plus the pull plumbing they share —
//! argument validation, delivery-time position advancement, result assembly,
//! and the drain-then-complete rule.

use crate::cancel::CancelSource;
use crate::config::RunnerConfig;
use crate::error::RunnerError;
use crate::status::{Pull, Status};

use super::buffer::LookaheadBuffer;
use super::core::RunnerCore;

pub(crate) struct QueueEngine<T> {
    pub(crate) core: RunnerCore,
    pub(crate) buffer: LookaheadBuffer<T>,
    pub(crate) config: RunnerConfig,
}

impl<T> QueueEngine<T> {
    pub(crate) fn new(
        config: RunnerConfig,
        external: Option<CancelSource>,
        owns_external: bool,
    ) -> Self {
        let buffer = LookaheadBuffer::new(config.lookahead);
        Self {
            core: RunnerCore::new(external, owns_external),
            buffer,
            config,
        }
    }

    /// Resolve the advance argument: `None` means the configured default,
    /// zero is the invalid-advance usage error.
    pub(crate) fn wanted(&self, advance: Option<u64>) -> Result<usize, RunnerError> {
        match advance {
            None => Ok(self.config.pull_size as usize),
            Some(0) => Err(RunnerError::InvalidAdvance),
            Some(n) => Ok(n as usize),
        }
    }

    /// Validate the caller's start position against the runner's position.
    /// `None` means "current".
    pub(crate) fn check_start(&self, start: Option<u64>) -> Result<(), RunnerError> {
        if let Some(given) = start {
            let current = self.core.position();
            if given != current {
                return Err(RunnerError::PositionMismatch { given, current });
            }
        }
        Ok(())
    }

    /// Drain up to `max` ready items into `out`, advancing the position by
    /// the number actually delivered.
    pub(crate) fn take_ready(&self, out: &mut Vec<T>, max: usize) -> usize {
        let taken = self.buffer.drain_into(out, max);
        if taken > 0 {
            self.core.advance_position(taken as u64);
        }
        taken
    }

    /// The externally observed status.
    ///
    /// While the stored status is non-final, a non-empty buffer reports
    /// `Progressed` even if production is idle, and a closed, fully drained
    /// buffer latches `Complete`.
    pub(crate) fn observed_status(&self) -> Status {
        let status = self.core.status();
        if status.is_final() {
            return status;
        }
        if self.buffer.is_drained() {
            self.core.set_status(Status::Complete);
            return Status::Complete;
        }
        if !self.buffer.is_empty() {
            return Status::Progressed;
        }
        status
    }

    /// Assemble a pull result from delivered items and the current state.
    pub(crate) fn finish(&self, items: Vec<T>) -> Pull<T> {
        Pull {
            items,
            status: self.observed_status(),
            position: self.core.position(),
            failure: self.core.failure(),
        }
    }

    /// Non-suspending pull: return whatever is buffered, up to the advance.
    pub(crate) fn get_available(
        &self,
        start: Option<u64>,
        advance: Option<u64>,
    ) -> Result<Pull<T>, RunnerError> {
        let _guard = self.core.begin_pull()?;
        self.check_start(start)?;
        let wanted = self.wanted(advance)?;
        let mut items = Vec::new();
        self.take_ready(&mut items, wanted);
        Ok(self.finish(items))
    }
}
