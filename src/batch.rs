//! The unit of work handed to a sender.

use serde_json::Value;
use tokio::time::Instant;

use crate::retry::RetryCursor;

/// A bounded group of items cut together for one send attempt
///
/// Batches are created only by the engine when it cuts the open batch, and
/// destroyed on acknowledgment, drop, or final flush. While a batch is
/// leased, the sender owns it exclusively and may mutate `data` and `meta`:
/// shrinking `data` records partial success (the counted size follows it
/// down), growing it is ignored for accounting.
#[derive(Debug)]
pub struct Batch<T> {
    /// The items in this batch, in submission order
    pub data: Vec<T>,
    /// Opaque caller metadata, carried untouched by the engine
    pub meta: Value,
    pub(crate) id: u64,
    pub(crate) retry: Option<RetryCursor>,
    pub(crate) next_send: Instant,
    pub(crate) counted_size: usize,
}

impl<T> Batch<T> {
    pub(crate) fn cut(id: u64, data: Vec<T>, now: Instant) -> Self {
        let counted_size = data.len();
        Self {
            data,
            meta: Value::Null,
            id,
            retry: None,
            next_send: now,
            counted_size,
        }
    }

    /// Monotonically increasing identifier, assigned at cut time
    ///
    /// Ids order batches for FIFO tie-breaking; they are unique within one
    /// channel.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The item count used for backpressure accounting
    ///
    /// Set to `data.len()` at cut time; only ever decreases afterward.
    pub fn counted_size(&self) -> usize {
        self.counted_size
    }

    /// Re-derive the counted size after a sender returned the batch.
    /// Shrink-only: lengthening `data` never raises it.
    pub(crate) fn reconcile_counted_size(&mut self) {
        self.counted_size = self.counted_size.min(self.data.len());
    }
}
