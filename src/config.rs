//! Runner limits configuration.

/// Default number of items a pull returns when no advance is given.
pub const DEFAULT_PULL_SIZE: u64 = 16;

/// Default capacity of the look-ahead buffer.
pub const DEFAULT_LOOKAHEAD: usize = 64;

/// Numeric limits for a runner.
///
/// Injected at construction; runners never consult global state.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Number of items (or progress units) a pull requests when the caller
    /// uses the "default" advance sentinel.
    pub pull_size: u64,
    /// Capacity of the look-ahead buffer that decouples production speed
    /// from consumer pull speed.
    pub lookahead: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pull_size: DEFAULT_PULL_SIZE,
            lookahead: DEFAULT_LOOKAHEAD,
        }
    }
}

impl RunnerConfig {
    /// Create a config with the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default pull size.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    pub fn pull_size(mut self, n: u64) -> Self {
        assert!(n > 0, "default pull size must be at least 1");
        self.pull_size = n;
        self
    }

    /// Set the look-ahead buffer capacity.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    pub fn lookahead(mut self, n: usize) -> Self {
        assert!(n > 0, "look-ahead capacity must be at least 1");
        self.lookahead = n;
        self
    }
}
