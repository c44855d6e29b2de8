//! Configuration for the dispatch engine.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::behavior::FullBehavior;
use crate::error::{DispatchError, DispatchResult};
use crate::limiter::RateLimiter;
use crate::retry::RetryPolicy;

/// Decides whether a failed batch is retried (`true`) or dropped (`false`)
pub type ErrorFn<T> = Box<dyn FnMut(&Batch<T>, &DispatchError) -> bool + Send>;

/// Observer invoked once per dropped or finalized batch
///
/// The second argument is `true` when the engine is flushing for shutdown.
/// At final shutdown the observer is invoked exactly once more with
/// `(None, true)` so it can flush any buffered statistics.
pub type DropFn<T> = Box<dyn FnMut(Option<&Batch<T>>, bool) + Send>;

/// Invoked exactly once when the channel is fully drained
pub type DrainedFn = Box<dyn FnOnce() + Send>;

/// Buffer-level options: batching, leasing, overflow, and retry settings
///
/// # Structure
/// - **Cutting**: a batch is cut when it reaches `batch_size` items or when
///   `batch_duration_ms` elapses since the open batch started, whichever
///   comes first.
/// - **Leasing**: at most `max_leases` batches are in flight concurrently.
/// - **Overflow**: `full_behavior` decides between blocking producers and
///   evicting the oldest waiting batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferOptions {
    /// Maximum number of batches in flight concurrently
    #[serde(default = "default_max_leases")]
    pub max_leases: usize,

    /// Items per batch; `None` means unbounded (cut by time only)
    #[serde(default = "default_batch_size")]
    pub batch_size: Option<usize>,

    /// Maximum time in milliseconds an open batch may keep filling
    #[serde(default = "default_batch_duration_ms")]
    pub batch_duration_ms: u64,

    /// Overflow policy applied when the buffer's capacity is reached
    #[serde(default)]
    pub full_behavior: FullBehavior,

    /// Strict oldest-first leasing; only valid with `max_leases == 1`
    #[serde(default)]
    pub fifo: bool,

    /// Backoff policy; each failing batch gets its own cursor from this
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_max_leases() -> usize {
    4
}
fn default_batch_size() -> Option<usize> {
    Some(20)
}
fn default_batch_duration_ms() -> u64 {
    10_000
}

impl BufferOptions {
    /// Load options from a TOML file
    pub fn from_file(path: &str) -> DispatchResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::config(format!("Failed to read options file {}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            DispatchError::config(format!("Failed to parse options file {}: {}", path, e))
        })
    }

    /// The batch duration as a [`Duration`]
    pub fn batch_duration(&self) -> Duration {
        Duration::from_millis(self.batch_duration_ms)
    }

    /// Validate the options
    pub fn validate(&self) -> DispatchResult<()> {
        if self.max_leases == 0 {
            return Err(DispatchError::config("max_leases must be > 0"));
        }

        if self.batch_size == Some(0) {
            return Err(DispatchError::config(
                "batch_size must be > 0 (use None for unbounded)",
            ));
        }

        if self.batch_duration_ms == 0 {
            return Err(DispatchError::config("batch_duration_ms must be > 0"));
        }

        if self.fifo && self.max_leases != 1 {
            return Err(DispatchError::config("fifo requires max_leases == 1"));
        }

        self.full_behavior.validate()
    }
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            max_leases: 4,
            batch_size: Some(20),
            batch_duration_ms: 10_000,
            full_behavior: FullBehavior::default(),
            fifo: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Channel-level options: buffer settings plus callbacks and the rate limit
///
/// Callback defaults: failed batches are retried iff the error is transient,
/// dropped batches are logged at `warn`, and nothing runs on drain beyond
/// the drained signal itself.
pub struct ChannelOptions<T> {
    /// Channel name, used as the metrics label
    pub name: String,

    /// Buffer-level options
    pub buffer: BufferOptions,

    /// Rate limit on send attempts; defaults to unlimited
    pub rate: RateLimiter,

    /// Retry-or-drop decision for failed batches
    pub error_fn: Option<ErrorFn<T>>,

    /// Observer for dropped and finalized batches
    pub drop_fn: Option<DropFn<T>>,

    /// One-shot cleanup hook invoked just before the drained signal
    pub drained_fn: Option<DrainedFn>,
}

impl<T> ChannelOptions<T> {
    /// Set the retry-or-drop decision callback
    pub fn on_error(mut self, f: impl FnMut(&Batch<T>, &DispatchError) -> bool + Send + 'static) -> Self {
        self.error_fn = Some(Box::new(f));
        self
    }

    /// Set the dropped-batch observer
    pub fn on_drop(mut self, f: impl FnMut(Option<&Batch<T>>, bool) + Send + 'static) -> Self {
        self.drop_fn = Some(Box::new(f));
        self
    }

    /// Set the drained cleanup hook
    pub fn on_drained(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.drained_fn = Some(Box::new(f));
        self
    }

    /// Validate the options
    pub fn validate(&self) -> DispatchResult<()> {
        if self.name.is_empty() {
            return Err(DispatchError::config("name cannot be empty"));
        }
        self.buffer.validate()
    }
}

impl<T> Default for ChannelOptions<T> {
    fn default() -> Self {
        Self {
            name: "default-channel".to_string(),
            buffer: BufferOptions::default(),
            rate: RateLimiter::unlimited(),
            error_fn: None,
            drop_fn: None,
            drained_fn: None,
        }
    }
}

impl<T> fmt::Debug for ChannelOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelOptions")
            .field("name", &self.name)
            .field("buffer", &self.buffer)
            .field("rate", &self.rate)
            .field("error_fn", &self.error_fn.as_ref().map(|_| "..."))
            .field("drop_fn", &self.drop_fn.as_ref().map(|_| "..."))
            .field("drained_fn", &self.drained_fn.as_ref().map(|_| "..."))
            .finish()
    }
}
