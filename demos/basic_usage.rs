//! Basic Usage Example
//!
//! Demonstrates a single client/server request-response round trip over a
//! Standard backend.
//!
//! Run with: cargo run --example basic_usage

use redis_gateway_transport::{BackendConfig, ClientReceiveOutcome, ClientTransport, ReceiveOutcome, ServerTransport, TransportConfig};
use serde_json::{json, Map};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== Redis Gateway Transport: Basic Usage ===\n");

    let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let backend_config = BackendConfig::Standard { hosts: vec![redis_url] };
    let backend = backend_config.connect().await?;

    let client = ClientTransport::new("echo", backend.clone(), TransportConfig::default());
    let server = ServerTransport::new("echo", backend.clone(), TransportConfig::default())?;

    println!("Sending request...");
    let mut meta = Map::new();
    meta.insert("caller".into(), json!("basic_usage demo"));
    client
        .send_request_message(1, meta, json!({"greeting": "hello"}), None)
        .await?;
    println!();

    println!("Server receiving request...");
    let (request_id, request_meta, body) = match server.receive_request_message(None).await? {
        ReceiveOutcome::Message { request_id, meta, body } => (request_id, meta, body),
        ReceiveOutcome::Timeout => anyhow::bail!("no request arrived"),
    };
    println!("✅ Received request {request_id}: {body}\n");

    println!("Server replying...");
    server
        .send_response_message(request_id, request_meta, json!({"greeting": "hello back"}))
        .await?;
    println!();

    println!("Client receiving response...");
    match client.receive_response_message(None).await? {
        ClientReceiveOutcome::Message { body, .. } => println!("✅ Received response: {body}"),
        ClientReceiveOutcome::Timeout => anyhow::bail!("no response arrived"),
        ClientReceiveOutcome::NoMoreExpected => anyhow::bail!("no response expected"),
    }

    Ok(())
}
