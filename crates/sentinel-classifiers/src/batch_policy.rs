//! Adaptive batch sizing
//!
//! The batch size is the main lever for keeping inference inside device
//! memory. The policy halves on every failed batch and doubles again after
//! a run of consecutive successes, always staying within `[min, max]`.

use sentinel_core::ScoringConfig;

/// Consecutive successful batches before the size doubles
pub const DEFAULT_GROW_AFTER: u32 = 4;

/// Batch-size policy driven by success/failure history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveBatchPolicy {
    current: usize,
    min: usize,
    max: usize,
    grow_after: u32,
    successes: u32,
}

impl AdaptiveBatchPolicy {
    /// Create a policy; bounds are normalized so that `1 <= min <= initial <= max`
    pub fn new(initial: usize, min: usize, max: usize) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            current: initial.clamp(min, max),
            min,
            max,
            grow_after: DEFAULT_GROW_AFTER,
            successes: 0,
        }
    }

    /// Create from scoring configuration
    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(
            config.batch_size_initial,
            config.batch_size_min,
            config.batch_size_max,
        )
    }

    /// Set how many consecutive successes trigger growth
    pub fn with_grow_after(mut self, successes: u32) -> Self {
        self.grow_after = successes.max(1);
        self
    }

    /// Batch size for the next inference call
    pub fn current(&self) -> usize {
        self.current
    }

    /// Smallest batch size the policy shrinks to
    pub fn min(&self) -> usize {
        self.min
    }

    /// Largest batch size the policy grows to
    pub fn max(&self) -> usize {
        self.max
    }

    /// Record a successful batch; returns the next batch size
    pub fn record_success(&mut self) -> usize {
        self.successes += 1;
        if self.successes >= self.grow_after && self.current < self.max {
            self.current = (self.current * 2).min(self.max);
            self.successes = 0;
        }
        self.current
    }

    /// Record a failed batch; returns the next batch size
    pub fn record_failure(&mut self) -> usize {
        self.successes = 0;
        self.current = (self.current / 2).max(self.min);
        self.current
    }

    /// Chunk size for retrying a failed batch of `len` items
    pub fn retry_chunk(&self, len: usize) -> usize {
        len.div_ceil(2).max(self.min).min(len.max(1))
    }
}
