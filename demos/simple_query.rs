//! Simple query example
//!
//! Demonstrates a single turn through the agent loop engine, streaming
//! text to stdout as it arrives.

use open_agent::provider::http::HttpProvider;
use open_agent::{AgentLoopEngine, CancellationToken, Callbacks, EngineConfig, Session, ToolRegistry};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let provider = Arc::new(HttpProvider::new("qwen3:8b", "http://localhost:11434/v1", None));
    let session = Arc::new(Session::new(".", "qwen3:8b"));
    let registry = Arc::new(ToolRegistry::new());

    let mut engine = AgentLoopEngine::new(
        EngineConfig::new(provider, registry, session)
            .with_system_prompt("You are a helpful assistant")
            .with_temperature(0.7)
            .with_max_tokens(500),
    );

    print!("Response: ");
    engine.set_callbacks(Callbacks::new().on_text(|text| {
        print!("{text}");
        std::io::Write::flush(&mut std::io::stdout()).ok();
    }));

    println!("Sending query to model...\n");
    engine
        .run(CancellationToken::new(), "What's the capital of France? Please be brief.")
        .await?;

    println!("\n\nQuery complete!");
    Ok(())
}
