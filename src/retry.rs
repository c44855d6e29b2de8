//! Retry policies and per-batch backoff cursors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for retry behavior
///
/// A `RetryPolicy` is a factory: each batch that fails gets its own
/// [`RetryCursor`] from [`RetryPolicy::cursor`], created lazily on the first
/// failure so batches that never fail allocate no backoff state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts per batch
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    /// Base backoff duration in milliseconds
    #[serde(default = "default_base_backoff_ms")]
    base_backoff_ms: u64,
    /// Maximum backoff duration in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    max_backoff_ms: u64,
    /// Backoff multiplier for exponential backoff
    #[serde(default = "default_multiplier")]
    multiplier: f64,
    /// Add jitter to backoff to avoid thundering herd
    #[serde(default = "default_jitter")]
    jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_backoff_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    30000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(max_retries: u32, base_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            base_backoff_ms,
            max_backoff_ms,
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Create exponential backoff policy
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_backoff_ms: 1000,
            max_backoff_ms: 30000,
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Create linear backoff policy
    pub fn linear(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            max_retries,
            base_backoff_ms: backoff_ms,
            max_backoff_ms: backoff_ms,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Create fixed delay policy
    pub fn fixed(max_retries: u32, delay_ms: u64) -> Self {
        Self::linear(max_retries, delay_ms)
    }

    /// A policy that never retries: every failure finalizes the batch
    pub fn none() -> Self {
        Self::linear(0, 0)
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Set custom multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Create a fresh cursor for one batch
    pub fn cursor(&self) -> RetryCursor {
        RetryCursor {
            policy: self.clone(),
            attempt: 0,
        }
    }

    /// Calculate the backoff duration for a given attempt (1-indexed)
    fn calculate_backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let mut backoff_ms =
            self.base_backoff_ms as f64 * self.multiplier.powi((attempt - 1) as i32);

        // Cap at max backoff
        backoff_ms = backoff_ms.min(self.max_backoff_ms as f64);

        // Add jitter if enabled
        if self.jitter {
            use rand::Rng;
            let jitter_factor = rand::rng().random_range(0.5..1.5);
            backoff_ms *= jitter_factor;
            // Ensure we don't exceed max after jitter
            backoff_ms = backoff_ms.min(self.max_backoff_ms as f64);
        }

        Duration::from_millis(backoff_ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3)
    }
}

/// Stateful per-batch backoff iterator
///
/// Advanced once per NACK. `next_delay` returns the delay before the next
/// send attempt, or `None` once the policy's retry budget is exhausted,
/// which finalizes the batch as dropped.
#[derive(Debug, Clone)]
pub struct RetryCursor {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryCursor {
    /// Advance the cursor and return the next backoff delay, or `None` to stop
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        self.attempt += 1;
        Some(self.policy.calculate_backoff(self.attempt))
    }

    /// Number of failed attempts recorded so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
