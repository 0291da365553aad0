//! Calculator with Tools Example
//!
//! Demonstrates registering tools and letting the agent loop engine
//! dispatch them automatically as the model calls them.

use open_agent::provider::http::HttpProvider;
use open_agent::{tool, AgentLoopEngine, CancellationToken, Callbacks, EngineConfig, Session, ToolOutput, ToolRegistry};
use serde_json::Value;
use std::sync::Arc;

fn arith_tool(name: &'static str, desc: &'static str, f: fn(f64, f64) -> Result<f64, String>) -> open_agent::Tool {
    tool(name, desc)
        .param("a", "number")
        .param("b", "number")
        .build(Arc::new(move |args: Value| {
            Box::pin(async move {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                Ok(match f(a, b) {
                    Ok(result) => ToolOutput::ok(result.to_string()),
                    Err(e) => ToolOutput::error(e),
                })
            })
        }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(ToolRegistry::new());
    registry.register(arith_tool("add", "Add two numbers", |a, b| Ok(a + b)));
    registry.register(arith_tool("subtract", "Subtract two numbers", |a, b| Ok(a - b)));
    registry.register(arith_tool("multiply", "Multiply two numbers", |a, b| Ok(a * b)));
    registry.register(arith_tool("divide", "Divide two numbers", |a, b| {
        if b == 0.0 {
            Err("cannot divide by zero".to_string())
        } else {
            Ok(a / b)
        }
    }));

    let provider = Arc::new(HttpProvider::new("qwen3:8b", "http://localhost:11434/v1", None));
    let queries = [
        "What is 25 plus 17?",
        "Calculate 144 divided by 12",
        "What's 7 times 8, then add 5?",
    ];

    println!("{}", "=".repeat(70));
    println!("CALCULATOR TOOLS EXAMPLE");
    println!("{}", "=".repeat(70));

    for query in queries {
        println!("\nUser: {query}");
        println!("{}", "-".repeat(50));

        let session = Arc::new(Session::new(".", "qwen3:8b"));
        let mut engine = AgentLoopEngine::new(
            EngineConfig::new(provider.clone(), registry.clone(), session)
                .with_system_prompt(
                    "You are a helpful calculator assistant. Use the provided tools to \
                     perform calculations. Always show your work and explain the result.",
                )
                .with_temperature(0.1)
                .with_max_iterations(5),
        );
        engine.set_callbacks(
            Callbacks::new()
                .on_text(|text| print!("{text}"))
                .on_tool_use(|name, input| println!("\n  tool call: {name} {input}"))
                .on_tool_result(|name, output| println!("  {name} -> {}", output.content)),
        );

        engine.run(CancellationToken::new(), query).await?;
        println!();
    }

    println!("{}", "=".repeat(70));
    println!("Example complete!");
    Ok(())
}
