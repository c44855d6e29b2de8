//! The public channel facade.
//!
//! A [`Channel`] wraps one coordinator task: producers submit items through
//! it, close it exactly once (idempotently), and observe the one-shot
//! drained signal once every outstanding batch has been resolved.

use std::fmt;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ChannelOptions;
use crate::coordinator::{Coordinator, SubmitRequest};
use crate::error::DispatchResult;
use crate::sender::BatchSender;

/// Intake queue depth. One request may be parked with the coordinator while
/// its producer awaits acceptance; acceptance itself is confirmed per
/// request, so depth does not weaken the blocking contract.
const INTAKE_DEPTH: usize = 1;

/// Handle to a running dispatch channel
///
/// Cloning is cheap; all clones feed the same coordinator. The channel
/// accepts items until [`close`](Channel::close) is called or the governing
/// cancellation token fires, then drains and signals
/// [`drained`](Channel::drained) exactly once. A drained channel must not be
/// reused.
pub struct Channel<T> {
    item_tx: mpsc::Sender<SubmitRequest<T>>,
    close: CancellationToken,
    drained_rx: watch::Receiver<bool>,
}

impl<T: Send + 'static> Channel<T> {
    /// Validate `options`, spawn the coordinator, and return the facade
    ///
    /// `cancel` is the governing cancellation signal: once it fires, every
    /// batch not yet leased is dropped and reported, retries are abandoned,
    /// and the channel drains as soon as in-flight sends finish.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` for invalid options; no item
    /// is ever accepted by a misconfigured channel.
    pub fn new<S>(
        cancel: CancellationToken,
        options: ChannelOptions<T>,
        sender: S,
    ) -> DispatchResult<Self>
    where
        S: BatchSender<T> + 'static,
    {
        options.validate()?;
        info!(channel = %options.name, "starting dispatch channel");

        let (item_tx, item_rx) = mpsc::channel(INTAKE_DEPTH);
        let (drained_tx, drained_rx) = watch::channel(false);
        let close = CancellationToken::new();

        let coordinator =
            Coordinator::new(options, sender, item_rx, close.clone(), cancel, drained_tx);
        tokio::spawn(coordinator.run());

        Ok(Self {
            item_tx,
            close,
            drained_rx,
        })
    }

    /// Submit one item
    ///
    /// Suspends until the coordinator accepts the item into the buffer —
    /// with a blocking overflow policy this is the backpressure point.
    /// Writing to a closed or canceled channel is not an error: the item is
    /// silently dropped, so producers may race shutdown safely.
    pub async fn send(&self, item: T) {
        if self.close.is_cancelled() {
            return;
        }
        let (accepted_tx, accepted_rx) = oneshot::channel();
        let request = SubmitRequest {
            item,
            accepted: accepted_tx,
        };
        if self.item_tx.send(request).await.is_err() {
            // Coordinator already shut its intake (canceled or drained)
            return;
        }
        let _ = accepted_rx.await;
    }

    /// Stop accepting new items and drain gracefully. Idempotent.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Wait for the channel to finish draining
    ///
    /// Resolves immediately once the drained signal has fired; may be
    /// awaited any number of times, from any clone.
    pub async fn drained(&self) {
        let mut rx = self.drained_rx.clone();
        let _ = rx.wait_for(|drained| *drained).await;
    }

    /// Whether the drained signal has fired
    pub fn is_drained(&self) -> bool {
        *self.drained_rx.borrow()
    }

    /// Close, then wait for the drain to complete
    pub async fn close_and_drain(&self) {
        self.close();
        self.drained().await;
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            item_tx: self.item_tx.clone(),
            close: self.close.clone(),
            drained_rx: self.drained_rx.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("closed", &self.close.is_cancelled())
            .field("drained", &*self.drained_rx.borrow())
            .finish()
    }
}
