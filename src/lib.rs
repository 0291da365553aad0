//! # Open Agent
//!
//! A streaming-first, tool-using agent loop for local and hosted
//! OpenAI-compatible LLM backends, plus a multi-agent workflow orchestrator
//! that plans, executes, reviews, and evaluates software-engineering tasks.
//!
//! ## Key Features
//!
//! - **Zero API Costs**: run models on your own hardware
//! - **Privacy-First**: all data stays local on your machine
//! - **Streaming Responses**: real-time token-by-token streaming
//! - **Tool Calling**: define and execute tools with JSON-Schema input
//! - **Lifecycle Hooks**: intercept and control tool execution and run completion
//! - **Cancellation**: cooperative, cancel an in-flight run or workflow at any suspension point
//! - **Multi-Agent Workflows**: plan a requirement into a task DAG, run executors
//!   concurrently, review and auto-fix results, evaluate the outcome
//! - **Retry Logic**: exponential backoff with jitter for transient transport errors
//!
//! ## Two Ways to Drive an Agent
//!
//! ### 1. A single conversational loop (`AgentLoopEngine`)
//!
//! ```rust,no_run
//! use open_agent::{AgentLoopEngine, EngineConfig, CancellationToken, Session, ToolRegistry};
//! use open_agent::provider::http::HttpProvider;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> open_agent::Result<()> {
//!     let provider = Arc::new(HttpProvider::new("lm-studio", "http://localhost:1234/v1", None));
//!     let session = Arc::new(Session::new(".", "qwen2.5-32b-instruct"));
//!     let registry = Arc::new(ToolRegistry::new());
//!
//!     let engine = AgentLoopEngine::new(EngineConfig::new(provider, registry, session));
//!     let stop_reason = engine.run(CancellationToken::new(), "What's the capital of France?").await?;
//!     println!("{stop_reason:?}");
//!     Ok(())
//! }
//! ```
//!
//! ### 2. A multi-agent workflow (`Workflow`)
//!
//! ```rust,no_run
//! use open_agent::provider::http::HttpProvider;
//! use open_agent::workflow::{Workflow, WorkflowConfig};
//! use open_agent::{CancellationToken, ToolRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> open_agent::Result<()> {
//!     let factory = Arc::new(|model: &str| {
//!         Arc::new(HttpProvider::new(model, "http://localhost:1234/v1", None)) as Arc<dyn open_agent::provider::Provider>
//!     });
//!     let workflow = Workflow::new(factory, Arc::new(ToolRegistry::new()), WorkflowConfig::new("qwen2.5-32b-instruct"));
//!     let report = workflow.run(CancellationToken::new(), "add a health check endpoint").await?;
//!     println!("{:?}", report.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **engine**: the agent loop — streams a provider, executes tools, loops until `end_turn`
//! - **provider**: the `Provider` trait plus HTTP (OpenAI-compatible SSE) and subprocess
//!   (JSON-lines CLI) adapters
//! - **session**: the append-only conversation log a single `run` mutates
//! - **workflow**: planner, scheduler, review/fix stage, and evaluator for multi-task runs
//! - **types**: message, content block, request/response, and streaming event data model
//! - **tools**: tool definition, registry, and execution contract
//! - **hooks**: lifecycle hooks for tool gating and run-completion notification
//! - **cancel**: the cooperative cancellation token threaded through every layer
//! - **config**: provider/model/base-url resolution helpers
//! - **error**: the error taxonomy and retryability rule
//! - **context**: token estimation and manual history truncation
//! - **retry**: exponential backoff with jitter

mod cancel;

/// Provider configuration helpers for LM Studio, Ollama, llama.cpp, and vLLM.
/// Resolves base URL, model name, and API key from explicit arguments or
/// environment variables.
mod config;

/// Context window management utilities for token estimation and history
/// truncation. Opt-in: the engine never truncates on its own.
mod context;

/// Error types and conversions used across every public API.
mod error;

pub mod engine;

/// Lifecycle hooks for gating tool execution and observing run completion.
mod hooks;

pub mod provider;

mod session;

/// Tool definition and execution system: descriptors, JSON-Schema-lite
/// validation, and the process-wide registry the engine dispatches through.
mod tools;

/// Core type definitions for messages, content blocks, requests/responses,
/// and streaming events.
mod types;

pub mod workflow;

/// Retry utilities with exponential backoff and jitter, public so callers
/// can reuse them for their own operations.
pub mod retry;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

pub use cancel::CancellationToken;

pub use config::{detect_provider_from_model, get_api_key, get_base_url, get_model, Provider, ProviderKind};

pub use context::{estimate_tokens, is_approaching_limit, truncate_messages};

pub use engine::{AgentLoopEngine, Callbacks, EngineConfig};

pub use error::{Error, Result};

pub use hooks::{HookDecision, Hooks, OnStopEvent, PostToolUseEvent, PreToolUseEvent};

pub use session::{Session, SharedSession};

pub use tools::{tool, Tool, ToolBuilder, ToolOutput, ToolRegistry};

pub use types::{
    ContentBlock, Message, MessageRole, Request, Response, StopReason, TextBlock, ThinkingLevel,
    ToolDescriptor, ToolResultBlock, ToolUseBlock, Usage,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// The most commonly used types for a single-session agent loop. Import with
/// `use open_agent::prelude::*;`. Workflow orchestration lives in
/// [`workflow`] and is not re-exported here since it pulls in the planner,
/// scheduler, and evaluator types most single-session callers don't need.
pub mod prelude {
    pub use crate::{
        tool, AgentLoopEngine, CancellationToken, Callbacks, ContentBlock, EngineConfig, Error,
        HookDecision, Hooks, Result, Session, Tool, ToolRegistry, ToolUseBlock,
    };
}
