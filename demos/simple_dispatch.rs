//! Minimal dispatch channel: batch stdin-style lines and print them.
//!
//! Run with: cargo run --example simple_dispatch

use async_trait::async_trait;
use dispatch_core::{
    Batch, BatchSender, BufferOptions, CancellationToken, Channel, ChannelOptions, DispatchResult,
};

struct PrintSender;

#[async_trait]
impl BatchSender<String> for PrintSender {
    async fn send_batch(&self, batch: &mut Batch<String>) -> DispatchResult<()> {
        println!("--- batch {} ({} items)", batch.id(), batch.data.len());
        for line in &batch.data {
            println!("    {line}");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> DispatchResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let options = ChannelOptions {
        name: "simple-dispatch".to_string(),
        buffer: BufferOptions {
            batch_size: Some(3),
            batch_duration_ms: 1_000,
            ..BufferOptions::default()
        },
        ..ChannelOptions::default()
    };

    let channel = Channel::new(CancellationToken::new(), options, PrintSender)?;

    for i in 0..10 {
        channel.send(format!("event {i}")).await;
    }

    channel.close_and_drain().await;
    Ok(())
}
