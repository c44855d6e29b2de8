//! The sender contract.
//!
//! The engine never talks to the network itself: cut batches are handed to a
//! caller-supplied [`BatchSender`], one batch per concurrent send task.

use async_trait::async_trait;

use crate::batch::Batch;
use crate::error::DispatchResult;

/// Trait for the transport that delivers leased batches
///
/// The sender owns the batch exclusively for the duration of the call. It
/// may shrink `batch.data` to record partial success (the engine's
/// accounting follows it down; growing `data` is ignored) and may mutate
/// `batch.meta` freely, for example to carry attempt state across retries.
///
/// A sender that can block indefinitely must watch the channel's
/// cancellation token (the caller supplies both, so the sender can hold a
/// clone) and return promptly once it fires; the engine waits for every
/// in-flight send before declaring itself drained.
///
/// # Example
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use dispatch_core::{Batch, BatchSender, DispatchError, DispatchResult};
///
/// pub struct HttpSender {
///     endpoint: String,
/// }
///
/// #[async_trait]
/// impl BatchSender<String> for HttpSender {
///     async fn send_batch(&self, batch: &mut Batch<String>) -> DispatchResult<()> {
///         // POST batch.data to self.endpoint; classify failures so the
///         // channel's error callback can decide retry vs drop.
///         if batch.data.is_empty() {
///             return Ok(());
///         }
///         Err(DispatchError::transient("connection reset"))
///     }
/// }
/// ```
#[async_trait]
pub trait BatchSender<T>: Send + Sync {
    /// Deliver one batch
    ///
    /// # Return Value
    ///
    /// - `Ok(())`: unconditional acknowledgment; the batch is discarded
    /// - `Err(DispatchError::Transient)`: retried with backoff by default
    /// - `Err(DispatchError::Fatal)`: dropped and reported by default
    ///
    /// The default classification can be overridden per channel with
    /// [`ChannelOptions::on_error`](crate::ChannelOptions::on_error).
    async fn send_batch(&self, batch: &mut Batch<T>) -> DispatchResult<()>;
}
