// Streams a simulated chat exchange through the runner and prints every
// sequenced event as one JSON line.
//
// Run with: cargo run --example stream_demo

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;

use alias_core::{ResponseRunner, RunnerConfig, SimulatedBackend, StaticConversations};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let runner = Arc::new(ResponseRunner::new(
        Arc::new(SimulatedBackend::new()),
        Arc::new(StaticConversations::new()),
        RunnerConfig::default(),
    ));

    let mut events = runner.handle(json!({
        "session_id": "demo",
        "input": "Hello from the demo",
    }));

    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event).unwrap());
    }
}
