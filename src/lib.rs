//! # Dispatch Core
//!
//! Generic batching and dispatch engine.
//!
//! This library turns a stream of individually submitted work items into
//! size- or time-bounded batches, leases those batches out to a bounded pool
//! of concurrent senders under a global rate limit, and manages retries,
//! backpressure, and graceful shutdown. It implements no transport of its
//! own: sending is supplied by the caller as a [`BatchSender`].
//!
//! ## Overview
//!
//! Internally a [`Channel`] wraps a single coordinator task that owns the
//! batching buffer exclusively:
//!
//! - items accumulate in an **open** batch until it reaches `batch_size` or
//!   `batch_duration` elapses, then it is cut into the **pending** set;
//! - pending batches are **leased** to concurrent send tasks (at most
//!   `max_leases` in flight) in next-eligible order, gated by the rate
//!   limiter;
//! - a failed send is retried with per-batch backoff or dropped, as decided
//!   by the channel's error callback;
//! - when the buffer's capacity is reached, the overflow policy either
//!   blocks producers or evicts the oldest waiting batch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use dispatch_core::{
//!     Batch, BatchSender, CancellationToken, Channel, ChannelOptions, DispatchResult,
//! };
//!
//! struct StdoutSender;
//!
//! #[async_trait]
//! impl BatchSender<String> for StdoutSender {
//!     async fn send_batch(&self, batch: &mut Batch<String>) -> DispatchResult<()> {
//!         for line in &batch.data {
//!             println!("{line}");
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DispatchResult<()> {
//!     let channel = Channel::new(
//!         CancellationToken::new(),
//!         ChannelOptions::default(),
//!         StdoutSender,
//!     )?;
//!
//!     channel.send("hello".to_string()).await;
//!     channel.send("world".to_string()).await;
//!     channel.close_and_drain().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Single-owner buffer**: one control loop mutates all batching state,
//!   so the engine needs no internal locking
//! - **Pluggable overflow policies**: block new submissions, or drop the
//!   oldest waiting batch to make room
//! - **Per-batch retry with backoff**: lazily allocated cursors, transient
//!   vs fatal classification, custom retry decisions
//! - **Rate limiting**: token-bucket gate consulted before every lease
//! - **Observability**: structured logging and metrics for every state
//!   transition

mod batch;
mod behavior;
mod buffer;
mod channel;
mod config;
mod coordinator;
mod error;
mod limiter;
mod metrics;
mod retry;
mod sender;

// Re-export public API
pub use batch::Batch;
pub use behavior::FullBehavior;
pub use channel::Channel;
pub use config::{BufferOptions, ChannelOptions, DrainedFn, DropFn, ErrorFn};
pub use error::{DispatchError, DispatchResult};
pub use limiter::RateLimiter;
pub use metrics::DispatchMetrics;
pub use retry::{RetryCursor, RetryPolicy};
pub use sender::BatchSender;

// Re-export the cancellation token accepted by `Channel::new`
pub use tokio_util::sync::CancellationToken;

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
