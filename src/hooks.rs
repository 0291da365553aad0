//! Hook Manager: three ordered interceptor lists around tool execution and
//! run termination.
//!
//! # Examples
//!
//! ```rust,no_run
//! use open_agent::{Hooks, PreToolUseEvent, HookDecision};
//!
//! async fn approve_tool(event: PreToolUseEvent) -> Option<HookDecision> {
//!     if event.tool_name == "delete_file" {
//!         return Some(HookDecision::block("dangerous operation blocked"));
//!     }
//!     None
//! }
//!
//! let hooks = Hooks::new().add_pre_tool_use(approve_tool);
//! ```

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// Event fired before tool execution.
#[derive(Debug, Clone)]
pub struct PreToolUseEvent {
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_use_id: String,
}

impl PreToolUseEvent {
    pub fn new(tool_name: String, tool_input: Value, tool_use_id: String) -> Self {
        Self {
            tool_name,
            tool_input,
            tool_use_id,
        }
    }
}

/// Event fired after tool execution.
#[derive(Debug, Clone)]
pub struct PostToolUseEvent {
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_use_id: String,
    pub tool_result: Value,
}

impl PostToolUseEvent {
    pub fn new(tool_name: String, tool_input: Value, tool_use_id: String, tool_result: Value) -> Self {
        Self {
            tool_name,
            tool_input,
            tool_use_id,
            tool_result,
        }
    }
}

/// Event fired once per engine `run` termination.
#[derive(Debug, Clone)]
pub struct OnStopEvent {
    /// The terminal stop reason, or the literal "cancelled".
    pub reason: String,
}

impl OnStopEvent {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Decision returned by a PreToolUse/PostToolUse handler.
#[derive(Debug, Clone, Default)]
pub struct HookDecision {
    pub continue_execution: bool,
    pub modified_input: Option<Value>,
    pub reason: Option<String>,
}

impl HookDecision {
    pub fn continue_() -> Self {
        Self {
            continue_execution: true,
            modified_input: None,
            reason: None,
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            continue_execution: false,
            modified_input: None,
            reason: Some(reason.into()),
        }
    }

    pub fn modify_input(input: Value, reason: impl Into<String>) -> Self {
        Self {
            continue_execution: true,
            modified_input: Some(input),
            reason: Some(reason.into()),
        }
    }
}

pub type PreToolUseHandler = Arc<
    dyn Fn(PreToolUseEvent) -> Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>
        + Send
        + Sync,
>;

pub type PostToolUseHandler = Arc<
    dyn Fn(PostToolUseEvent) -> Pin<Box<dyn Future<Output = Option<HookDecision>> + Send>>
        + Send
        + Sync,
>;

pub type OnStopHandler =
    Arc<dyn Fn(OnStopEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Container for the three hook lists. Registered once before `run`;
/// concurrent mutation during a run is undefined.
#[derive(Clone, Default)]
pub struct Hooks {
    pub pre_tool_use: Vec<PreToolUseHandler>,
    pub post_tool_use: Vec<PostToolUseHandler>,
    pub on_stop: Vec<OnStopHandler>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pre_tool_use<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(PreToolUseEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.pre_tool_use
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    pub fn add_post_tool_use<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(PostToolUseEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<HookDecision>> + Send + 'static,
    {
        self.post_tool_use
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    pub fn add_on_stop<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(OnStopEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_stop
            .push(Arc::new(move |event| Box::pin(handler(event))));
        self
    }

    /// Run PreToolUse hooks in registration order; the first `blocked=true`
    /// decision short-circuits the chain. A `modified_input` carries forward
    /// to subsequent hooks and to execution.
    pub async fn execute_pre_tool_use(&self, mut event: PreToolUseEvent) -> Option<HookDecision> {
        for handler in &self.pre_tool_use {
            if let Some(decision) = handler(event.clone()).await {
                if let Some(input) = &decision.modified_input {
                    event.tool_input = input.clone();
                }
                if !decision.continue_execution {
                    return Some(decision);
                }
            }
        }
        None
    }

    /// Run every PostToolUse hook; errors are not surfaced here because a
    /// hook has no way to fail other than panicking, and panics already
    /// unwind past this loop — the contract this enforces is "all run",
    /// not "first wins".
    pub async fn execute_post_tool_use(&self, event: PostToolUseEvent) {
        for handler in &self.post_tool_use {
            if let Some(decision) = handler(event.clone()).await {
                if let Some(reason) = decision.reason {
                    warn!(tool = %event.tool_name, %reason, "post_tool_use hook flagged a concern");
                }
            }
        }
    }

    /// Fire once per `run` termination with the terminal stop reason or
    /// "cancelled".
    pub async fn execute_on_stop(&self, event: OnStopEvent) {
        for handler in &self.on_stop {
            handler(event.clone()).await;
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("pre_tool_use", &format!("{} handlers", self.pre_tool_use.len()))
            .field("post_tool_use", &format!("{} handlers", self.post_tool_use.len()))
            .field("on_stop", &format!("{} handlers", self.on_stop.len()))
            .finish()
    }
}
