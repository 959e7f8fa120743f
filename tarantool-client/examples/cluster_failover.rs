//! Cluster client example: round-robin reconnection with call retry.
//!
//! Run with: `cargo run --example cluster_failover`
//!
//! Requires Tarantool replicas on localhost:3301 and localhost:3302. Stop
//! either while the example runs; calls keep succeeding as long as the
//! other comes back within the operation expiry.

use std::time::Duration;

use tarantool_client::{ClientConfig, ClusterClient, ExecutorExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ClientConfig::builder()
        .add_address("127.0.0.1:3301".parse()?)
        .add_address("127.0.0.1:3302".parse()?)
        .operation_expiry(Duration::from_secs(3))
        .retry(|r| r.initial_backoff(Duration::from_millis(50)).max_backoff(Duration::from_secs(1)))
        .build()?;

    let client = ClusterClient::connect(config).await?;

    for round in 0..60u64 {
        match client.call("box.info", vec![]).await {
            Ok(_) => println!("round {}: ok ({} queued)", round, client.queued_retry_count()),
            Err(err) => println!("round {}: {}", round, err),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    client.close();
    Ok(())
}
