//! Metrics and observability for dispatch channels.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metrics collector for one dispatch channel
#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    /// Channel name for labeling
    channel: String,
}

impl DispatchMetrics {
    /// Create a new metrics collector
    pub fn new(channel: impl Into<String>) -> Self {
        let channel = channel.into();

        // Register metric descriptions
        Self::register_metrics();

        Self { channel }
    }

    /// Register metric descriptions
    fn register_metrics() {
        // Counters
        describe_counter!(
            "dispatch_items_submitted_total",
            "Total number of items accepted into the buffer"
        );
        describe_counter!(
            "dispatch_batches_sent_total",
            "Total number of batches acknowledged by the sender"
        );
        describe_counter!(
            "dispatch_send_failures_total",
            "Total number of failed send attempts"
        );
        describe_counter!(
            "dispatch_batches_retried_total",
            "Total number of batches requeued for retry"
        );
        describe_counter!(
            "dispatch_batches_dropped_total",
            "Total number of batches evicted, finalized, or retry-exhausted"
        );

        // Histograms
        describe_histogram!(
            "dispatch_send_duration_seconds",
            "Time spent in the sender for each leased batch"
        );
        describe_histogram!("dispatch_batch_size", "Number of items in each leased batch");

        // Gauges
        describe_gauge!(
            "dispatch_inflight_batches",
            "Current number of batches leased to send tasks"
        );
        describe_gauge!(
            "dispatch_queued_items",
            "Current number of items across open, pending, and leased batches"
        );
    }

    /// Record an item accepted into the buffer
    pub fn record_submitted(&self) {
        counter!(
            "dispatch_items_submitted_total",
            "channel" => self.channel.clone(),
        )
        .increment(1);
    }

    /// Record a batch acknowledged by the sender
    pub fn record_sent(&self) {
        counter!(
            "dispatch_batches_sent_total",
            "channel" => self.channel.clone(),
        )
        .increment(1);
    }

    /// Record a failed send attempt
    pub fn record_send_failure(&self, error_type: &str) {
        counter!(
            "dispatch_send_failures_total",
            "channel" => self.channel.clone(),
            "error_type" => error_type.to_string(),
        )
        .increment(1);
    }

    /// Record a batch requeued for retry
    pub fn record_retry(&self) {
        counter!(
            "dispatch_batches_retried_total",
            "channel" => self.channel.clone(),
        )
        .increment(1);
    }

    /// Record a dropped batch
    pub fn record_dropped(&self) {
        counter!(
            "dispatch_batches_dropped_total",
            "channel" => self.channel.clone(),
        )
        .increment(1);
    }

    /// Record time spent in the sender
    pub fn record_send_duration(&self, duration: Duration) {
        histogram!(
            "dispatch_send_duration_seconds",
            "channel" => self.channel.clone(),
        )
        .record(duration.as_secs_f64());
    }

    /// Record the size of a leased batch
    pub fn record_batch_size(&self, size: usize) {
        histogram!(
            "dispatch_batch_size",
            "channel" => self.channel.clone(),
        )
        .record(size as f64);
    }

    /// Increment the in-flight batch count
    pub fn increment_inflight(&self) {
        gauge!(
            "dispatch_inflight_batches",
            "channel" => self.channel.clone(),
        )
        .increment(1.0);
    }

    /// Decrement the in-flight batch count
    pub fn decrement_inflight(&self) {
        gauge!(
            "dispatch_inflight_batches",
            "channel" => self.channel.clone(),
        )
        .decrement(1.0);
    }

    /// Set the queued item count
    pub fn set_queued_items(&self, count: usize) {
        gauge!(
            "dispatch_queued_items",
            "channel" => self.channel.clone(),
        )
        .set(count as f64);
    }
}
