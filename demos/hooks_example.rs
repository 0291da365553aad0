//! Hooks Example
//!
//! Demonstrates the two tool-execution hooks and the run-completion hook:
//! - PreToolUse: block or rewrite a tool call before it runs
//! - PostToolUse: observe a tool's result after it runs
//! - OnStop: observe why a run ended

use open_agent::provider::http::HttpProvider;
use open_agent::{
    tool, AgentLoopEngine, CancellationToken, EngineConfig, HookDecision, Hooks, Session,
    ToolOutput, ToolRegistry,
};
use serde_json::Value;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "=".repeat(70));
    println!("HOOKS EXAMPLE");
    println!("{}", "=".repeat(70));

    let registry = Arc::new(ToolRegistry::new());
    registry.register(
        tool("delete_file", "Delete a file by path")
            .param("path", "string")
            .build(Arc::new(|args: Value| {
                Box::pin(async move { Ok(ToolOutput::ok(format!("deleted {}", args["path"]))) })
            })),
    );

    let hooks = Hooks::new()
        .add_pre_tool_use(|event| async move {
            if event.tool_name == "delete_file" {
                println!("  [PreToolUse] blocking delete_file: {}", event.tool_input);
                return Some(HookDecision::block("destructive tool calls require confirmation"));
            }
            None
        })
        .add_post_tool_use(|event| async move {
            println!("  [PostToolUse] {} -> {}", event.tool_name, event.tool_result);
            None
        })
        .add_on_stop(|event| async move {
            println!("  [OnStop] run ended: {}", event.reason);
        });

    let provider = Arc::new(HttpProvider::new("qwen3:8b", "http://localhost:11434/v1", None));
    let session = Arc::new(Session::new(".", "qwen3:8b"));
    let engine = AgentLoopEngine::new(
        EngineConfig::new(provider, registry, session)
            .with_system_prompt("You are a helpful assistant with file tools.")
            .with_hooks(hooks),
    );

    println!("\nAsking the model to delete a file (PreToolUse should block it)...\n");
    engine
        .run(CancellationToken::new(), "Please delete the file /tmp/scratch.txt")
        .await?;

    println!("\n{}", "=".repeat(70));
    println!("Hooks example complete!");
    Ok(())
}
