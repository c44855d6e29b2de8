//! The batching and eviction state machine.
//!
//! A `Buffer` owns one open batch being filled, the pending batches waiting
//! to be leased (ordered by next-eligible-send time), and the bookkeeping
//! for batches currently leased to senders. It is owned exclusively by the
//! coordinator task; everything here is crate-private, so no other component
//! can reach the mutators and the buffer needs no internal locking.

use std::collections::{BTreeMap, HashMap};

use tokio::time::Instant;
use tracing::debug;

use crate::batch::Batch;
use crate::config::BufferOptions;

/// Item and batch counts across the buffer's three collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct BufferStats {
    pub open_items: usize,
    pub pending_items: usize,
    pub leased_items: usize,
    pub pending_batches: usize,
    pub leased_batches: usize,
}

impl BufferStats {
    pub fn total_items(&self) -> usize {
        self.open_items + self.pending_items + self.leased_items
    }

    /// True when nothing is open, waiting, or in flight
    pub fn is_empty(&self) -> bool {
        self.open_items == 0 && self.pending_batches == 0 && self.leased_batches == 0
    }
}

/// Outcome of negatively acknowledging a leased batch
pub(crate) enum NackOutcome<T> {
    /// The batch went back to pending with a backoff delay
    Requeued,
    /// The retry budget is exhausted; the caller reports and discards it
    Dropped(Batch<T>),
}

/// The open batch: items accumulated since the last cut, and the time by
/// which the duration policy forces a cut.
struct OpenBatch<T> {
    items: Vec<T>,
    deadline: Instant,
}

pub(crate) struct Buffer<T> {
    opts: BufferOptions,
    open: Option<OpenBatch<T>>,
    /// Pending batches keyed by (next_send, id): iteration order is lease
    /// eligibility order, with ids breaking ties FIFO.
    pending: BTreeMap<(Instant, u64), Batch<T>>,
    pending_items: usize,
    /// Leased batches have been moved out to send tasks; only their id and
    /// the item count they were leased with remain here.
    leased: HashMap<u64, usize>,
    leased_items: usize,
    next_id: u64,
}

impl<T> Buffer<T> {
    pub fn new(opts: BufferOptions) -> Self {
        Self {
            opts,
            open: None,
            pending: BTreeMap::new(),
            pending_items: 0,
            leased: HashMap::new(),
            leased_items: 0,
            next_id: 0,
        }
    }

    /// Accept one item, cutting and evicting as the options dictate.
    ///
    /// Returns the batches evicted to make room (empty for the blocking
    /// policy). Never suspends: callers implementing block semantics gate on
    /// [`Buffer::can_add_item`] before handing an item over.
    pub fn add_no_block(&mut self, now: Instant, item: T) -> Vec<Batch<T>> {
        let mut evicted = Vec::new();
        while self.opts.full_behavior.over_capacity(self.total_items() + 1) {
            match self.evict_oldest(now) {
                Some(batch) => evicted.push(batch),
                None => break,
            }
        }

        let deadline = now + self.opts.batch_duration();
        let open = self.open.get_or_insert_with(|| OpenBatch {
            items: Vec::new(),
            deadline,
        });
        open.items.push(item);
        let full = matches!(self.opts.batch_size, Some(limit) if open.items.len() >= limit);

        if full {
            self.cut_open(now);
        }
        evicted
    }

    /// True unless a blocking overflow policy's threshold is reached
    pub fn can_add_item(&self) -> bool {
        self.opts.full_behavior.accepts_new_item(self.total_items())
    }

    /// Cut the open batch if its duration deadline has passed
    pub fn cut_due(&mut self, now: Instant) {
        if let Some(open) = &self.open {
            if now >= open.deadline {
                self.cut_open(now);
            }
        }
    }

    /// Force the open batch into pending immediately (draining / canceling)
    pub fn flush(&mut self, now: Instant) {
        self.cut_open(now);
    }

    /// Whether `lease_one` would currently return a batch
    pub fn has_leasable(&self, now: Instant) -> bool {
        self.leased.len() < self.opts.max_leases && self.eligible_key(now).is_some()
    }

    /// Lease the earliest-eligible pending batch, if the ceiling allows.
    ///
    /// Eligibility is `next_send <= now`, earliest `(next_send, id)` first.
    /// In FIFO mode the lowest-id batch is the only candidate and other
    /// eligible batches never overtake it, which is why FIFO requires a
    /// single lease: the true-oldest batch would otherwise block parallel
    /// senders behind its backoff.
    pub fn lease_one(&mut self, now: Instant) -> Option<Batch<T>> {
        if self.leased.len() >= self.opts.max_leases {
            return None;
        }
        let key = self.eligible_key(now)?;
        let batch = self.pending.remove(&key)?;
        self.pending_items -= batch.counted_size();
        self.leased.insert(batch.id(), batch.counted_size());
        self.leased_items += batch.counted_size();
        Some(batch)
    }

    /// Release a leased batch's bookkeeping: on success, or when the caller
    /// is discarding the batch without a retry.
    pub fn ack(&mut self, batch: &Batch<T>) {
        if let Some(size) = self.leased.remove(&batch.id()) {
            self.leased_items -= size;
        }
    }

    /// Handle a failed send: reconcile the counted size, advance (or lazily
    /// create) the retry cursor, and either requeue with backoff or hand the
    /// batch back as dropped.
    pub fn nack(&mut self, now: Instant, mut batch: Batch<T>) -> NackOutcome<T> {
        if let Some(size) = self.leased.remove(&batch.id()) {
            self.leased_items -= size;
        }
        batch.reconcile_counted_size();

        let policy = &self.opts.retry;
        let batch_id = batch.id();
        let cursor = batch.retry.get_or_insert_with(|| policy.cursor());
        match cursor.next_delay() {
            Some(delay) => {
                batch.next_send = now + delay;
                debug!(
                    batch_id = batch_id,
                    attempt = cursor.attempts(),
                    backoff_ms = delay.as_millis() as u64,
                    "batch requeued for retry"
                );
                self.pending_items += batch.counted_size();
                self.pending.insert((batch.next_send, batch.id()), batch);
                NackOutcome::Requeued
            }
            None => NackOutcome::Dropped(batch),
        }
    }

    /// Remove and return every pending batch, bypassing the lease ceiling.
    /// Used only when canceling, so the caller can drop them all.
    pub fn force_lease_all(&mut self) -> Vec<Batch<T>> {
        self.pending_items = 0;
        std::mem::take(&mut self.pending).into_values().collect()
    }

    /// Deadline by which the open batch must be cut, if one is filling
    pub fn open_deadline(&self) -> Option<Instant> {
        self.open.as_ref().map(|o| o.deadline)
    }

    /// The next instant at which the buffer needs attention: the earlier of
    /// the open batch's cut deadline and the next pending batch becoming
    /// eligible. `None` when nothing is scheduled.
    pub fn next_send_time(&self) -> Option<Instant> {
        let open_deadline = self.open_deadline();
        let pending_next = self.candidate_key().map(|(at, _)| at);
        match (open_deadline, pending_next) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            open_items: self.open.as_ref().map_or(0, |o| o.items.len()),
            pending_items: self.pending_items,
            leased_items: self.leased_items,
            pending_batches: self.pending.len(),
            leased_batches: self.leased.len(),
        }
    }

    fn total_items(&self) -> usize {
        self.stats().total_items()
    }

    /// The single batch that would be leased next, ignoring eligibility
    fn candidate_key(&self) -> Option<(Instant, u64)> {
        if self.opts.fifo {
            self.pending
                .keys()
                .min_by_key(|(_, id)| *id)
                .copied()
        } else {
            self.pending.keys().next().copied()
        }
    }

    fn eligible_key(&self, now: Instant) -> Option<(Instant, u64)> {
        self.candidate_key().filter(|(at, _)| *at <= now)
    }

    /// Cut the open batch into pending, assigning its id and counted size
    fn cut_open(&mut self, now: Instant) {
        let Some(open) = self.open.take() else { return };
        if open.items.is_empty() {
            return;
        }
        let id = self.next_id;
        self.next_id += 1;
        let batch = Batch::cut(id, open.items, now);
        debug!(batch_id = id, items = batch.counted_size(), "batch cut");
        self.pending_items += batch.counted_size();
        self.pending.insert((batch.next_send, batch.id()), batch);
    }

    /// Evict the oldest unleased batch: oldest pending by id, or the open
    /// batch itself when nothing is pending. `None` when there is nothing
    /// evictable.
    fn evict_oldest(&mut self, now: Instant) -> Option<Batch<T>> {
        let oldest = self.pending.keys().min_by_key(|(_, id)| *id).copied();
        if let Some(batch) = oldest.and_then(|key| self.pending.remove(&key)) {
            self.pending_items -= batch.counted_size();
            return Some(batch);
        }
        // No pending batch can make room; sacrifice the open batch.
        if self.open.as_ref().is_some_and(|o| !o.items.is_empty()) {
            self.cut_open(now);
            return self.evict_oldest(now);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::FullBehavior;
    use crate::retry::RetryPolicy;
    use std::time::Duration;

    fn opts() -> BufferOptions {
        BufferOptions {
            retry: RetryPolicy::linear(2, 1000),
            ..BufferOptions::default()
        }
    }

    #[test]
    fn test_cut_by_size() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(3),
            ..opts()
        });
        let now = Instant::now();

        buf.add_no_block(now, 1);
        buf.add_no_block(now, 2);
        assert_eq!(buf.stats().open_items, 2);
        assert_eq!(buf.stats().pending_batches, 0);

        buf.add_no_block(now, 3);
        assert_eq!(buf.stats().open_items, 0);
        assert_eq!(buf.stats().pending_batches, 1);
        assert_eq!(buf.stats().pending_items, 3);
    }

    #[test]
    fn test_cut_by_deadline() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: None,
            batch_duration_ms: 1000,
            ..opts()
        });
        let now = Instant::now();

        buf.add_no_block(now, "a");
        buf.cut_due(now + Duration::from_millis(500));
        assert_eq!(buf.stats().open_items, 1);

        buf.cut_due(now + Duration::from_millis(1000));
        assert_eq!(buf.stats().open_items, 0);
        assert_eq!(buf.stats().pending_batches, 1);
    }

    #[test]
    fn test_ids_are_strictly_increasing() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(1),
            ..opts()
        });
        let now = Instant::now();
        for i in 0..5 {
            buf.add_no_block(now, i);
        }

        let mut last = None;
        while let Some(batch) = buf.lease_one(now) {
            if let Some(prev) = last {
                assert!(batch.id() > prev);
            }
            last = Some(batch.id());
        }
    }

    #[test]
    fn test_lease_ceiling() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(1),
            max_leases: 2,
            ..opts()
        });
        let now = Instant::now();
        for i in 0..4 {
            buf.add_no_block(now, i);
        }

        assert!(buf.lease_one(now).is_some());
        assert!(buf.lease_one(now).is_some());
        assert!(!buf.has_leasable(now));
        assert!(buf.lease_one(now).is_none());
        assert_eq!(buf.stats().leased_batches, 2);
        assert_eq!(buf.stats().pending_batches, 2);
    }

    #[test]
    fn test_ack_releases_lease() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(1),
            max_leases: 1,
            ..opts()
        });
        let now = Instant::now();
        buf.add_no_block(now, 1);
        buf.add_no_block(now, 2);

        let batch = buf.lease_one(now).unwrap();
        assert!(buf.lease_one(now).is_none());

        buf.ack(&batch);
        assert_eq!(buf.stats().leased_batches, 0);
        assert!(buf.lease_one(now).is_some());
    }

    #[test]
    fn test_nack_requeues_with_backoff() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(1),
            ..opts()
        });
        let now = Instant::now();
        buf.add_no_block(now, 1);

        let batch = buf.lease_one(now).unwrap();
        assert!(matches!(buf.nack(now, batch), NackOutcome::Requeued));

        // Under backoff: not leasable yet
        assert!(!buf.has_leasable(now));
        assert!(buf.lease_one(now).is_none());

        let later = now + Duration::from_millis(1000);
        assert!(buf.has_leasable(later));
        let batch = buf.lease_one(later).unwrap();
        assert!(batch.retry.is_some());
    }

    #[test]
    fn test_nack_exhausted_drops() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(1),
            retry: RetryPolicy::none(),
            ..BufferOptions::default()
        });
        let now = Instant::now();
        buf.add_no_block(now, 42);

        let batch = buf.lease_one(now).unwrap();
        match buf.nack(now, batch) {
            NackOutcome::Dropped(batch) => assert_eq!(batch.data, vec![42]),
            NackOutcome::Requeued => panic!("expected drop"),
        }
        assert!(buf.stats().is_empty());
    }

    #[test]
    fn test_nack_shrinks_counted_size() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(4),
            ..opts()
        });
        let now = Instant::now();
        for i in 0..4 {
            buf.add_no_block(now, i);
        }

        let mut batch = buf.lease_one(now).unwrap();
        assert_eq!(batch.counted_size(), 4);
        // Sender delivered the first three items before failing
        batch.data.drain(..3);
        buf.nack(now, batch);

        assert_eq!(buf.stats().pending_items, 1);
    }

    #[test]
    fn test_retry_overtaken_without_fifo() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(1),
            max_leases: 1,
            ..opts()
        });
        let now = Instant::now();
        buf.add_no_block(now, "first");

        let batch = buf.lease_one(now).unwrap();
        buf.nack(now, batch);
        buf.add_no_block(now, "second");

        // The fresh batch is eligible now; the nacked one waits out backoff
        let leased = buf.lease_one(now).unwrap();
        assert_eq!(leased.data, vec!["second"]);
    }

    #[test]
    fn test_fifo_head_of_line_blocking() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(1),
            max_leases: 1,
            fifo: true,
            ..opts()
        });
        let now = Instant::now();
        buf.add_no_block(now, "first");

        let batch = buf.lease_one(now).unwrap();
        buf.nack(now, batch);
        buf.add_no_block(now, "second");

        // The newer batch is eligible but FIFO holds the line for id 0
        assert!(!buf.has_leasable(now));
        assert!(buf.lease_one(now).is_none());

        let later = now + Duration::from_millis(1000);
        let leased = buf.lease_one(later).unwrap();
        assert_eq!(leased.data, vec!["first"]);
    }

    #[test]
    fn test_block_policy_gates_intake() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(2),
            full_behavior: FullBehavior::BlockNewItems { max_items: 3 },
            ..opts()
        });
        let now = Instant::now();

        assert!(buf.can_add_item());
        buf.add_no_block(now, 1);
        buf.add_no_block(now, 2);
        buf.add_no_block(now, 3);
        assert!(!buf.can_add_item());

        // Acking a leased batch frees space
        let batch = buf.lease_one(now).unwrap();
        buf.ack(&batch);
        assert!(buf.can_add_item());
    }

    #[test]
    fn test_drop_oldest_evicts_pending() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(1),
            full_behavior: FullBehavior::DropOldestBatch { max_live_items: 2 },
            ..opts()
        });
        let now = Instant::now();

        assert!(buf.add_no_block(now, 0).is_empty());
        assert!(buf.add_no_block(now, 1).is_empty());

        let evicted = buf.add_no_block(now, 2);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].data, vec![0]);
        assert_eq!(buf.stats().total_items(), 2);
    }

    #[test]
    fn test_drop_oldest_never_evicts_leased() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(1),
            full_behavior: FullBehavior::DropOldestBatch { max_live_items: 1 },
            ..opts()
        });
        let now = Instant::now();

        buf.add_no_block(now, 0);
        let leased = buf.lease_one(now).unwrap();
        assert_eq!(leased.data, vec![0]);

        // The leased batch stays; each new item sacrifices the open batch
        // that preceded it.
        let evicted = buf.add_no_block(now, 1);
        assert!(evicted.is_empty());
        let evicted = buf.add_no_block(now, 2);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].data, vec![1]);
        assert_eq!(buf.stats().leased_batches, 1);
    }

    #[test]
    fn test_drop_oldest_evicts_open_when_nothing_pending() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: None,
            full_behavior: FullBehavior::DropOldestBatch { max_live_items: 1 },
            ..opts()
        });
        let now = Instant::now();

        let mut dropped = Vec::new();
        for i in 0..20 {
            dropped.extend(buf.add_no_block(now, i));
        }
        assert_eq!(dropped.len(), 19);
        assert_eq!(buf.stats().open_items, 1);

        buf.flush(now);
        let survivor = buf.lease_one(now).unwrap();
        assert_eq!(survivor.data, vec![19]);
    }

    #[test]
    fn test_flush_and_force_lease_all() {
        let mut buf = Buffer::new(BufferOptions {
            batch_size: Some(2),
            ..opts()
        });
        let now = Instant::now();
        for i in 0..5 {
            buf.add_no_block(now, i);
        }
        assert_eq!(buf.stats().pending_batches, 2);
        assert_eq!(buf.stats().open_items, 1);

        buf.flush(now);
        assert_eq!(buf.stats().open_items, 0);

        let all = buf.force_lease_all();
        assert_eq!(all.len(), 3);
        assert!(buf.stats().is_empty());
    }

    #[test]
    fn test_next_send_time() {
        let mut buf: Buffer<u32> = Buffer::new(BufferOptions {
            batch_size: Some(10),
            batch_duration_ms: 500,
            max_leases: 1,
            ..opts()
        });
        let now = Instant::now();
        assert!(buf.next_send_time().is_none());

        // An open batch contributes its cut deadline
        buf.add_no_block(now, 1);
        assert_eq!(buf.next_send_time(), Some(now + Duration::from_millis(500)));

        // A cut batch is eligible immediately
        buf.flush(now);
        assert_eq!(buf.next_send_time(), Some(now));

        // A nacked batch pushes its eligibility out by the backoff
        let batch = buf.lease_one(now).unwrap();
        buf.nack(now, batch);
        assert_eq!(
            buf.next_send_time(),
            Some(now + Duration::from_millis(1000))
        );

        // The open batch's deadline wins when it is sooner
        buf.add_no_block(now, 2);
        assert_eq!(buf.next_send_time(), Some(now + Duration::from_millis(500)));
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let mut buf: Buffer<u32> = Buffer::new(opts());
        buf.flush(Instant::now());
        assert!(buf.stats().is_empty());
        assert!(buf.next_send_time().is_none());
    }
}
