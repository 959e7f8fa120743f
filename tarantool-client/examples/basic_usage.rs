//! Basic usage example: connect, write, read and call.
//!
//! Run with: `cargo run --example basic_usage`
//!
//! Requires a Tarantool instance listening on localhost:3301 with a space
//! whose id is 512 and a primary index on the first field.

use std::time::Duration;

use tarantool_client::{ClientConfig, ConnectionEvent, ExecutorExt, IteratorType, TarantoolClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ClientConfig::builder()
        .add_address("127.0.0.1:3301".parse()?)
        .init_timeout(Duration::from_secs(10))
        .operation_timeout(Duration::from_secs(5))
        .build()?;

    println!("Connecting to Tarantool...");
    let client = TarantoolClient::connect(config).await?;
    println!(
        "Connected: {}\n",
        client.server_version().unwrap_or_default()
    );

    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ConnectionEvent::Disconnected { address, error, .. } = event {
                println!("lost connection to {}: {}", address, error);
            }
        }
    });

    for id in 1..=3u64 {
        client
            .replace(512, vec![id.into(), format!("value-{}", id).into()])
            .await?;
    }

    let tuples = client
        .select(512, 0, vec![], 0, 10, IteratorType::All)
        .await?;
    println!("Tuples in space 512: {}", tuples);

    let version = client.eval("return box.info.version", vec![]).await?;
    println!("box.info.version: {}", version);

    client.ping().await?;
    println!("Schema id: {:?}", client.schema_id());

    client.close();
    Ok(())
}
