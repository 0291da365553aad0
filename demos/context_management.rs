//! Context Management Examples
//!
//! Demonstrates manual history management using the context utilities. The
//! engine never truncates on its own — you decide when and how, based on
//! your domain.
//!
//! Patterns demonstrated:
//! 1. Stateless turns (a fresh session per task, recommended for single-task agents)
//! 2. Manual truncation at natural breakpoints
//! 3. Token budget monitoring with periodic checks

use open_agent::provider::http::HttpProvider;
use open_agent::{
    estimate_tokens, is_approaching_limit, truncate_messages, AgentLoopEngine, CancellationToken,
    EngineConfig, Session, ToolRegistry,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!("CONTEXT MANAGEMENT EXAMPLES");
    println!("{}", "=".repeat(70));

    pattern_1_stateless().await?;
    pattern_2_manual_truncation().await?;
    pattern_3_token_monitoring().await?;

    Ok(())
}

fn provider() -> Arc<HttpProvider> {
    Arc::new(HttpProvider::new("qwen3:8b", "http://localhost:11434/v1", None))
}

/// Best for: single-task agents (copy editor, code formatter, etc.) where no
/// cross-task context is wanted.
async fn pattern_1_stateless() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n=== Pattern 1: Stateless Turns ===");

    for task in ["Explain Rust", "Explain Python", "Explain JavaScript"] {
        // A fresh session per task: no history accumulation across tasks.
        let session = Arc::new(Session::new(".", "qwen3:8b"));
        let engine = AgentLoopEngine::new(EngineConfig::new(
            provider(),
            Arc::new(ToolRegistry::new()),
            session.clone(),
        ));
        engine.run(CancellationToken::new(), task).await?;

        let messages = session.messages().await;
        println!("Task: {task}");
        println!("  history size: {} messages", messages.len());
        println!("  estimated tokens: {}", estimate_tokens(&messages));
    }
    Ok(())
}

/// Best for: multi-turn conversations with clear task boundaries where you
/// want to discard early turns once a milestone completes.
async fn pattern_2_manual_truncation() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n=== Pattern 2: Manual Truncation ===");

    let session = Arc::new(Session::new(".", "qwen3:8b"));
    let engine = AgentLoopEngine::new(EngineConfig::new(
        provider(),
        Arc::new(ToolRegistry::new()),
        session.clone(),
    ));

    engine.run(CancellationToken::new(), "Analyze this: def add(a, b): return a + b").await?;
    println!("After task 1: {} messages", session.messages().await.len());

    engine.run(CancellationToken::new(), "Write unit tests for the add function").await?;
    println!("After task 2: {} messages", session.messages().await.len());

    println!("Truncating history (keeping last 3 messages)...");
    let truncated = truncate_messages(&session.messages().await, 3);
    let truncated_session = Arc::new(Session::new(".", "qwen3:8b"));
    for message in truncated {
        truncated_session.append_message(message).await;
    }
    println!("After truncation: {} messages", truncated_session.messages().await.len());
    Ok(())
}

/// Best for: long-running conversations where you want to stay under a
/// fixed token budget by truncating before it's exceeded.
async fn pattern_3_token_monitoring() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n=== Pattern 3: Token Budget Monitoring ===");

    let session = Arc::new(Session::new(".", "qwen3:8b"));
    let mut engine = AgentLoopEngine::new(EngineConfig::new(
        provider(),
        Arc::new(ToolRegistry::new()),
        session.clone(),
    ));
    engine.set_callbacks(Default::default());

    let token_limit = 1000;
    let margin = 0.8;
    let interactions = [
        "What is Rust?",
        "Explain ownership",
        "What are lifetimes?",
        "How do traits work?",
        "Explain async/await",
    ];

    for (i, prompt) in interactions.iter().enumerate() {
        println!("Interaction {}: {prompt}", i + 1);
        let current = estimate_tokens(&session.messages().await);
        println!("  current tokens: {current}");

        if is_approaching_limit(&session.messages().await, token_limit, margin) {
            println!("  approaching token limit, truncating");
            let truncated = truncate_messages(&session.messages().await, 3);
            for message in truncated {
                session.append_message(message).await;
            }
        }

        engine.run(CancellationToken::new(), prompt).await?;
    }

    let messages = session.messages().await;
    println!("Final history size: {} messages", messages.len());
    println!("Final token count: {}", estimate_tokens(&messages));
    Ok(())
}
