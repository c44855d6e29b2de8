//! Overflow policies applied when the buffer's capacity is reached.

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Strategy for handling a full buffer
///
/// The total queued item count is the sum of items in the open, pending, and
/// leased batches. Leased batches count toward capacity but are never
/// evicted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FullBehavior {
    /// Hold new submissions once `max_items` items are queued
    ///
    /// The producer-facing `send` call does not return until enough items
    /// are acknowledged or dropped to free space. Nothing is ever evicted.
    BlockNewItems {
        /// Queued item count at which submissions block
        max_items: usize,
    },

    /// Evict the oldest waiting batch to make room for new items
    ///
    /// Once accepting an item would push the queued count past
    /// `max_live_items`, the oldest pending batch is evicted and reported
    /// through the drop callback; when no pending batch can make room, the
    /// open batch itself is cut and evicted. The new item is always
    /// accepted.
    DropOldestBatch {
        /// Queued item count the buffer may not exceed
        max_live_items: usize,
    },
}

impl FullBehavior {
    /// Whether a new submission may be accepted at the current queue depth
    ///
    /// Only the blocking policy ever answers `false`; callers implementing
    /// block semantics suspend the producer until this flips back.
    pub(crate) fn accepts_new_item(&self, total_items: usize) -> bool {
        match self {
            FullBehavior::BlockNewItems { max_items } => total_items < *max_items,
            FullBehavior::DropOldestBatch { .. } => true,
        }
    }

    /// Whether the queue would be over capacity at the given depth
    pub(crate) fn over_capacity(&self, total_items: usize) -> bool {
        match self {
            FullBehavior::BlockNewItems { .. } => false,
            FullBehavior::DropOldestBatch { max_live_items } => total_items > *max_live_items,
        }
    }

    /// Validate the policy's own configuration
    pub(crate) fn validate(&self) -> DispatchResult<()> {
        match self {
            FullBehavior::BlockNewItems { max_items } if *max_items == 0 => Err(
                DispatchError::config("block_new_items requires max_items > 0"),
            ),
            FullBehavior::DropOldestBatch { max_live_items } if *max_live_items == 0 => Err(
                DispatchError::config("drop_oldest_batch requires max_live_items > 0"),
            ),
            _ => Ok(()),
        }
    }
}

impl Default for FullBehavior {
    fn default() -> Self {
        FullBehavior::BlockNewItems { max_items: 1000 }
    }
}
