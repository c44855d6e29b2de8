//! The coordinator: the single control loop driving a channel's buffer.
//!
//! Exactly one coordinator task exists per channel and it is the only
//! mutator of the buffer. Incoming items, completed sends, timer wakeups,
//! and the close/cancel signals are multiplexed through one `select!` loop;
//! each iteration leases as many batches as the rate limiter and lease
//! ceiling allow, then sleeps until the next event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::buffer::{Buffer, NackOutcome};
use crate::config::{ChannelOptions, DrainedFn, DropFn, ErrorFn};
use crate::error::{DispatchError, DispatchResult};
use crate::limiter::RateLimiter;
use crate::metrics::DispatchMetrics;
use crate::sender::BatchSender;

/// One producer submission awaiting acceptance into the buffer
pub(crate) struct SubmitRequest<T> {
    pub item: T,
    /// Completed when the coordinator accepts the item. Dropping it without
    /// sending releases the producer without acceptance (silent drop).
    pub accepted: oneshot::Sender<()>,
}

/// A finished send attempt, reported back by its send task
struct SendOutcome<T> {
    batch: Batch<T>,
    result: DispatchResult<()>,
    elapsed: Duration,
}

pub(crate) struct Coordinator<T, S> {
    name: String,
    buffer: Buffer<T>,
    sender: Arc<S>,
    limiter: RateLimiter,
    error_fn: ErrorFn<T>,
    drop_fn: DropFn<T>,
    drained_fn: Option<DrainedFn>,
    metrics: DispatchMetrics,
    item_rx: mpsc::Receiver<SubmitRequest<T>>,
    result_tx: mpsc::Sender<SendOutcome<T>>,
    result_rx: mpsc::Receiver<SendOutcome<T>>,
    close: CancellationToken,
    cancel: CancellationToken,
    drained_tx: watch::Sender<bool>,
    closed: bool,
    canceled: bool,
    intake_open: bool,
}

impl<T, S> Coordinator<T, S>
where
    T: Send + 'static,
    S: BatchSender<T> + 'static,
{
    pub fn new(
        mut options: ChannelOptions<T>,
        sender: S,
        item_rx: mpsc::Receiver<SubmitRequest<T>>,
        close: CancellationToken,
        cancel: CancellationToken,
        drained_tx: watch::Sender<bool>,
    ) -> Self {
        // The result queue never parks a send task: at most `max_leases`
        // outcomes can be outstanding at once.
        let (result_tx, result_rx) = mpsc::channel(options.buffer.max_leases);
        let metrics = DispatchMetrics::new(&options.name);

        let error_fn = options
            .error_fn
            .take()
            .unwrap_or_else(|| Box::new(|_: &Batch<T>, err: &DispatchError| err.is_retryable()));
        let drop_fn = options.drop_fn.take().unwrap_or_else(|| {
            Box::new(|batch: Option<&Batch<T>>, _flushing: bool| {
                if let Some(batch) = batch {
                    warn!(
                        batch_id = batch.id(),
                        items = batch.counted_size(),
                        "batch dropped"
                    );
                }
            })
        });
        let drained_fn = options.drained_fn.take();

        Self {
            name: options.name,
            buffer: Buffer::new(options.buffer),
            sender: Arc::new(sender),
            limiter: options.rate,
            error_fn,
            drop_fn,
            drained_fn,
            metrics,
            item_rx,
            result_tx,
            result_rx,
            close,
            cancel,
            drained_tx,
            closed: false,
            canceled: false,
            intake_open: true,
        }
    }

    pub async fn run(mut self) {
        debug!(channel = %self.name, "coordinator running");

        loop {
            let now = Instant::now();
            if self.shutting_down() && !self.intake_open {
                // Force the open batch out so the drain can resolve it
                self.buffer.flush(now);
            }
            self.buffer.cut_due(now);
            let limiter_wait = self.pump_sends(now);
            self.metrics
                .set_queued_items(self.buffer.stats().total_items());

            if self.shutting_down() && !self.intake_open && self.buffer.stats().is_empty() {
                break;
            }

            let wakeup = self.next_wakeup(now, limiter_wait);
            let deadline = wakeup.unwrap_or(now);

            tokio::select! {
                biased;

                _ = self.cancel.cancelled(), if !self.canceled => {
                    self.handle_cancel();
                }
                Some(outcome) = self.result_rx.recv() => {
                    self.handle_outcome(outcome);
                }
                _ = self.close.cancelled(), if !self.closed => {
                    self.handle_close();
                }
                req = self.item_rx.recv(), if self.intake_open && self.buffer.can_add_item() => {
                    match req {
                        Some(req) => self.handle_item(req),
                        None => {
                            // Every producer handle is gone; nothing further
                            // can arrive, so drain as if closed.
                            self.intake_open = false;
                            self.closed = true;
                        }
                    }
                }
                _ = sleep_until(deadline), if wakeup.is_some() => {}
            }
        }

        self.finalize();
    }

    fn shutting_down(&self) -> bool {
        self.closed || self.canceled
    }

    /// Lease and dispatch batches while one is eligible and the limiter
    /// grants tokens. Returns the limiter's wait when it denies one.
    fn pump_sends(&mut self, now: Instant) -> Option<Duration> {
        while self.buffer.has_leasable(now) {
            match self.limiter.try_acquire(now) {
                Ok(()) => {
                    let Some(batch) = self.buffer.lease_one(now) else {
                        break;
                    };
                    self.spawn_send(batch);
                }
                Err(wait) => return Some(wait),
            }
        }
        None
    }

    fn spawn_send(&self, mut batch: Batch<T>) {
        debug!(batch_id = batch.id(), items = batch.data.len(), "batch leased");
        self.metrics.record_batch_size(batch.data.len());
        self.metrics.increment_inflight();

        let sender = Arc::clone(&self.sender);
        let result_tx = self.result_tx.clone();
        tokio::spawn(async move {
            let start = Instant::now();
            let result = sender.send_batch(&mut batch).await;
            let elapsed = start.elapsed();
            // The coordinator holds the receiver until it finalizes, and it
            // only finalizes once every lease has reported.
            let _ = result_tx
                .send(SendOutcome {
                    batch,
                    result,
                    elapsed,
                })
                .await;
        });
    }

    /// The next instant at which new work could become actionable. `None`
    /// means no timer is needed: only an event can unblock the loop.
    fn next_wakeup(&self, now: Instant, limiter_wait: Option<Duration>) -> Option<Instant> {
        let candidate = match limiter_wait {
            // Rate-limited: an eligible batch is already waiting, so the
            // next send happens when the token accrues. The open batch may
            // still need its duration cut sooner.
            Some(wait) => {
                let token_at = now + wait;
                match self.buffer.open_deadline() {
                    Some(cut_at) => Some(cut_at.min(token_at)),
                    None => Some(token_at),
                }
            }
            None => self.buffer.next_send_time(),
        };
        // Anything already due and still unleased is blocked on the lease
        // ceiling; a send result will wake the loop, not a timer.
        candidate.filter(|at| *at > now)
    }

    fn handle_item(&mut self, req: SubmitRequest<T>) {
        let now = Instant::now();
        let evicted = self.buffer.add_no_block(now, req.item);
        let _ = req.accepted.send(());
        self.metrics.record_submitted();
        for batch in evicted {
            debug!(batch_id = batch.id(), "oldest batch evicted to make room");
            self.report_drop(Some(&batch), false);
        }
    }

    fn handle_outcome(&mut self, outcome: SendOutcome<T>) {
        let SendOutcome {
            batch,
            result,
            elapsed,
        } = outcome;
        self.metrics.decrement_inflight();
        self.metrics.record_send_duration(elapsed);

        match result {
            Ok(()) => {
                debug!(batch_id = batch.id(), "batch acknowledged");
                self.buffer.ack(&batch);
                self.metrics.record_sent();
            }
            Err(err) => {
                self.metrics.record_send_failure(error_label(&err));
                if self.canceled {
                    // Canceled: retry outcomes are ignored, the batch drops.
                    self.buffer.ack(&batch);
                    self.report_drop(Some(&batch), true);
                } else if (self.error_fn)(&batch, &err) {
                    warn!(batch_id = batch.id(), error = %err, "send failed; retrying");
                    self.metrics.record_retry();
                    match self.buffer.nack(Instant::now(), batch) {
                        NackOutcome::Requeued => {}
                        NackOutcome::Dropped(batch) => {
                            warn!(batch_id = batch.id(), "retry budget exhausted");
                            self.report_drop(Some(&batch), false);
                        }
                    }
                } else {
                    warn!(batch_id = batch.id(), error = %err, "send failed; dropping");
                    self.buffer.ack(&batch);
                    self.report_drop(Some(&batch), false);
                }
            }
        }
    }

    fn handle_close(&mut self) {
        info!(channel = %self.name, "close requested; draining");
        self.closed = true;
        // Requests already submitted drain out of the queue and are still
        // accepted; new sends fail at the facade and drop silently.
        self.item_rx.close();
    }

    fn handle_cancel(&mut self) {
        info!(channel = %self.name, "cancellation requested; dropping pending work");
        self.canceled = true;
        self.item_rx.close();
        while let Ok(req) = self.item_rx.try_recv() {
            // Producer unblocks without acceptance; the item is lost.
            drop(req);
        }
        self.intake_open = false;

        let now = Instant::now();
        self.buffer.flush(now);
        for batch in self.buffer.force_lease_all() {
            self.report_drop(Some(&batch), true);
        }
    }

    fn report_drop(&mut self, batch: Option<&Batch<T>>, flushing: bool) {
        if batch.is_some() {
            self.metrics.record_dropped();
        }
        (self.drop_fn)(batch, flushing);
    }

    fn finalize(mut self) {
        // Terminal sentinel so drop observers can flush buffered statistics
        self.report_drop(None, true);
        if let Some(drained_fn) = self.drained_fn.take() {
            drained_fn();
        }
        let _ = self.drained_tx.send(true);
        info!(channel = %self.name, "channel drained");
    }
}

fn error_label(err: &DispatchError) -> &'static str {
    match err {
        DispatchError::Transient { .. } => "transient",
        DispatchError::Fatal { .. } => "fatal",
        DispatchError::Configuration(_) => "configuration",
        DispatchError::Io(_) => "io",
    }
}
