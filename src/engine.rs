//! Agent Loop Engine: the streaming, tool-capable conversational driver
//! that turns one user turn into a sequence of provider calls interleaved
//! with local tool invocations.

use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, instrument, warn};

use crate::cancel::CancellationToken;
use crate::hooks::{Hooks, OnStopEvent, PostToolUseEvent, PreToolUseEvent};
use crate::provider::Provider;
use crate::session::SharedSession;
use crate::tools::{ToolOutput, ToolRegistry};
use crate::types::{
    BlockPrototype, ContentBlock, ContentDelta, Request, Response, StopReason, StreamEvent,
    ThinkingLevel, ToolResultBlock, ToolUseBlock, Usage,
};
use crate::{Error, Result};

type TextCallback = Arc<dyn Fn(&str) + Send + Sync>;
type ToolUseCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;
type ToolResultCallback = Arc<dyn Fn(&str, &ToolOutput) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;
type UsageCallback = Arc<dyn Fn(&Usage) + Send + Sync>;

/// Observer callbacks fired as one `run` progresses. None of these can
/// influence control flow — that's what hooks are for.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_text: Option<TextCallback>,
    pub on_thinking: Option<TextCallback>,
    pub on_tool_use: Option<ToolUseCallback>,
    pub on_tool_result: Option<ToolResultCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_usage: Option<UsageCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_text(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_text = Some(Arc::new(f));
        self
    }

    pub fn on_thinking(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_thinking = Some(Arc::new(f));
        self
    }

    pub fn on_tool_use(mut self, f: impl Fn(&str, &Value) + Send + Sync + 'static) -> Self {
        self.on_tool_use = Some(Arc::new(f));
        self
    }

    pub fn on_tool_result(mut self, f: impl Fn(&str, &ToolOutput) + Send + Sync + 'static) -> Self {
        self.on_tool_result = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_usage(mut self, f: impl Fn(&Usage) + Send + Sync + 'static) -> Self {
        self.on_usage = Some(Arc::new(f));
        self
    }
}

pub struct EngineConfig {
    pub provider: Arc<dyn Provider>,
    pub tool_registry: Arc<ToolRegistry>,
    pub session: SharedSession,
    pub hooks: Hooks,
    pub max_iterations: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    pub thinking_level: ThinkingLevel,
    pub system_prompt: String,
}

impl EngineConfig {
    pub fn new(provider: Arc<dyn Provider>, tool_registry: Arc<ToolRegistry>, session: SharedSession) -> Self {
        Self {
            provider,
            tool_registry,
            session,
            hooks: Hooks::new(),
            max_iterations: 100,
            max_tokens: 16384,
            temperature: 0.7,
            thinking_level: ThinkingLevel::None,
            system_prompt: String::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_thinking_level(mut self, level: ThinkingLevel) -> Self {
        self.thinking_level = level;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }
}

/// Drives one session through the provider <-> tool cycle. Constructed once
/// per role/session; `run` is called once per user turn.
pub struct AgentLoopEngine {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    session: SharedSession,
    hooks: Hooks,
    callbacks: Callbacks,
    max_iterations: u32,
    max_tokens: u32,
    temperature: f32,
    thinking_level: ThinkingLevel,
    system_prompt: String,
}

/// A content block fully assembled from a provider's stream: its prototype
/// plus accumulated text/thinking/input state, in source order.
enum AssembledBlock {
    Text(String),
    Thinking(String),
    ToolUse { id: String, name: String, json_buffer: String },
    Image(String),
}

impl AgentLoopEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            provider: config.provider,
            tools: config.tool_registry,
            session: config.session,
            hooks: config.hooks,
            callbacks: Callbacks::new(),
            max_iterations: config.max_iterations,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            thinking_level: config.thinking_level,
            system_prompt: config.system_prompt,
        }
    }

    pub fn set_callbacks(&mut self, callbacks: Callbacks) {
        self.callbacks = callbacks;
    }

    fn compose_system_blocks(&self) -> Vec<String> {
        let mut blocks = Vec::new();
        if !self.system_prompt.is_empty() {
            blocks.push(self.system_prompt.clone());
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        blocks.push(format!(
            "Environment: cwd={} platform={} unix_time={}",
            self.session.cwd(),
            std::env::consts::OS,
            now
        ));

        let descriptors = self.tools.descriptors();
        if !descriptors.is_empty() {
            let summary = descriptors
                .iter()
                .map(|d| format!("- {}: {}", d.name, d.description))
                .collect::<Vec<_>>()
                .join("\n");
            blocks.push(format!("Available tools:\n{summary}"));
        }

        blocks
    }

    async fn build_request(&self) -> Request {
        Request {
            model: self.session.model().to_string(),
            messages: self.session.messages().await,
            system_blocks: self.compose_system_blocks(),
            tools: self.tools.descriptors(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            thinking_budget: self.thinking_level.token_budget(),
            stream: true,
        }
    }

    /// Fold one provider stream into a full [`Response`], executing tools
    /// the instant their `ToolUse` block closes and firing observer
    /// callbacks as content arrives. Tool results are returned alongside
    /// the response rather than appended to the session here, so the
    /// caller can append the assistant message first and preserve the
    /// protocol ordering every provider's tool-use contract depends on.
    #[instrument(skip(self, cancel), fields(session = %self.session.id()))]
    async fn run_one_request(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(Response, Vec<ToolResultBlock>)> {
        use futures::StreamExt;

        let request = self.build_request().await;
        let mut stream = self.provider.create_message_stream(request, cancel.clone()).await?;

        let mut blocks: Vec<Option<AssembledBlock>> = Vec::new();
        let mut id = String::new();
        let mut model = String::new();
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = Usage::default();
        let mut tool_results = Vec::new();

        while let Some(event) = stream.next().await {
            let event = event?;
            match event {
                StreamEvent::MessageStart { message_stub } => {
                    id = message_stub.id;
                    model = message_stub.model;
                }
                StreamEvent::ContentBlockStart { index, block_prototype } => {
                    if blocks.len() <= index {
                        blocks.resize_with(index + 1, || None);
                    }
                    blocks[index] = Some(match block_prototype {
                        BlockPrototype::Text => AssembledBlock::Text(String::new()),
                        BlockPrototype::Thinking => AssembledBlock::Thinking(String::new()),
                        BlockPrototype::ToolUse { id, name } => AssembledBlock::ToolUse {
                            id,
                            name,
                            json_buffer: String::new(),
                        },
                        BlockPrototype::Image => AssembledBlock::Image(String::new()),
                    });
                }
                StreamEvent::ContentBlockDelta { index, delta } => {
                    if let Some(Some(block)) = blocks.get_mut(index) {
                        match (block, delta) {
                            (AssembledBlock::Text(text), ContentDelta::TextDelta { text: t }) => {
                                text.push_str(&t);
                                if let Some(cb) = &self.callbacks.on_text {
                                    cb(&t);
                                }
                            }
                            (AssembledBlock::Thinking(thinking), ContentDelta::ThinkingDelta { text }) => {
                                thinking.push_str(&text);
                                if let Some(cb) = &self.callbacks.on_thinking {
                                    cb(&text);
                                }
                            }
                            (
                                AssembledBlock::ToolUse { json_buffer, .. },
                                ContentDelta::InputJsonDelta { partial_json },
                            ) => {
                                json_buffer.push_str(&partial_json);
                            }
                            _ => {}
                        }
                    }
                }
                StreamEvent::ContentBlockStop { index } => {
                    if let Some(Some(AssembledBlock::ToolUse { id, name, json_buffer })) =
                        blocks.get(index)
                    {
                        let input = parse_tool_input(json_buffer);
                        if let Some(cb) = &self.callbacks.on_tool_use {
                            cb(name, &input);
                        }
                        let output = self.execute_tool(name, id, input.clone()).await;
                        if let Some(cb) = &self.callbacks.on_tool_result {
                            cb(name, &output);
                        }
                        tool_results.push(ToolResultBlock {
                            tool_use_id: id.clone(),
                            content: output.content,
                            is_error: output.is_error,
                        });
                    }
                }
                StreamEvent::MessageDelta { stop_reason: sr, usage: u } => {
                    if let Some(sr) = sr {
                        stop_reason = sr;
                    }
                    if let Some(u) = u {
                        usage.merge(&u);
                        if let Some(cb) = &self.callbacks.on_usage {
                            cb(&usage);
                        }
                    }
                }
                StreamEvent::MessageStop => break,
                StreamEvent::ToolInfo { .. } | StreamEvent::ToolResultInfo { .. } => {
                    // Subprocess adapters only: the backend already executed
                    // the tool itself, nothing for the engine to dispatch.
                }
            }
        }

        let content = blocks
            .into_iter()
            .flatten()
            .map(|block| match block {
                AssembledBlock::Text(text) => ContentBlock::text(text),
                AssembledBlock::Thinking(thinking) => {
                    ContentBlock::Thinking(crate::types::ThinkingBlock::new(thinking))
                }
                AssembledBlock::ToolUse { id, name, json_buffer } => {
                    ContentBlock::ToolUse(ToolUseBlock::new(id, name, parse_tool_input(&json_buffer)))
                }
                AssembledBlock::Image(url) => ContentBlock::Image(
                    crate::types::ImageBlock::from_url(if url.is_empty() { "data:,".to_string() } else { url })
                        .unwrap_or_else(|_| crate::types::ImageBlock::from_url("data:,").unwrap()),
                ),
            })
            .collect();

        Ok((
            Response {
                id,
                model,
                content,
                stop_reason,
                usage,
            },
            tool_results,
        ))
    }

    /// Tool execution sub-routine: lookup, PreToolUse, validate, execute,
    /// PostToolUse. Never propagates a tool failure out of `run` — every
    /// branch returns a [`ToolOutput`] that becomes a `ToolResult`.
    async fn execute_tool(&self, name: &str, tool_use_id: &str, input: Value) -> ToolOutput {
        let Some(tool) = self.tools.get(name) else {
            warn!(tool = name, "unknown tool requested by model");
            return ToolOutput::error(format!("unknown tool: {name}"));
        };

        let pre_event = PreToolUseEvent::new(name.to_string(), input.clone(), tool_use_id.to_string());
        let mut effective_input = input;
        if let Some(decision) = self.hooks.execute_pre_tool_use(pre_event).await {
            if let Some(modified) = &decision.modified_input {
                effective_input = modified.clone();
            }
            if !decision.continue_execution {
                let reason = decision.reason.unwrap_or_else(|| "blocked by hook".to_string());
                info!(tool = name, %reason, "tool execution blocked by PreToolUse hook");
                return ToolOutput::error(reason);
            }
        }

        if let Err(e) = tool.validate(&effective_input) {
            debug!(tool = name, error = %e, "tool input failed validation");
            return ToolOutput::error(e.to_string());
        }

        let output = match tool.execute(effective_input.clone()).await {
            Ok(output) => output,
            Err(e) => {
                error!(tool = name, error = %e, "tool execution failed");
                ToolOutput::error(e.to_string())
            }
        };

        let post_event = PostToolUseEvent::new(
            name.to_string(),
            effective_input,
            tool_use_id.to_string(),
            serde_json::json!({ "content": output.content, "is_error": output.is_error }),
        );
        self.hooks.execute_post_tool_use(post_event).await;

        output
    }

    /// Run one user turn to completion: append the user message, then
    /// iterate provider calls until the model stops producing tool calls,
    /// hits `end_turn`, or the iteration cap is reached.
    pub async fn run(&self, cancel: CancellationToken, user_text: &str) -> Result<StopReason> {
        self.session.append_user(user_text).await;

        let outcome = self.run_inner(&cancel).await;

        let reason = match &outcome {
            Ok(stop_reason) => format!("{stop_reason:?}"),
            Err(Error::Cancelled) => "cancelled".to_string(),
            Err(e) => format!("error: {e}"),
        };
        self.hooks.execute_on_stop(OnStopEvent::new(reason)).await;

        if let (Err(e), Some(cb)) = (&outcome, &self.callbacks.on_error) {
            cb(e);
        }

        outcome
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<StopReason> {
        for iteration in 1..=self.max_iterations {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let (response, tool_results) = self.run_one_request(cancel).await?;
            let stop_reason = response.stop_reason;
            let has_tool_use = response
                .content
                .iter()
                .any(|b| matches!(b, ContentBlock::ToolUse(_)));

            self.session.append_assistant(&response).await;
            for result in tool_results {
                self.session
                    .append_tool_result(result.tool_use_id, result.content, result.is_error)
                    .await;
            }

            if stop_reason == StopReason::EndTurn || !has_tool_use {
                info!(iteration, ?stop_reason, "run completed");
                return Ok(stop_reason);
            }

            if stop_reason == StopReason::MaxTokens {
                warn!(iteration, "max_tokens reached mid-turn, continuing");
                self.session.append_user("continue").await;
                continue;
            }

            // stop_reason == ToolUse: tool results are already in the
            // session above; loop to let the model see them.
        }

        Err(Error::MaxIterationsExceeded)
    }
}

fn parse_tool_input(buf: &str) -> Value {
    if buf.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(buf).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{EventStream, ProviderFeature};
    use crate::session::Session;
    use crate::tools::{tool, ToolOutput as TO};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// A scripted provider: returns one canned response per call, as a
    /// pre-built event sequence, advancing through a fixed script.
    struct ScriptedProvider {
        script: Mutex<Vec<Response>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Response>) -> Self {
            Self {
                script: Mutex::new(script),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn create_message(&self, _request: Request, _cancel: CancellationToken) -> Result<Response> {
            unimplemented!()
        }

        async fn create_message_stream(
            &self,
            _request: Request,
            _cancel: CancellationToken,
        ) -> Result<EventStream> {
            let response = self.script.lock().unwrap().remove(0);
            let events = crate::provider::response_to_events(&response);
            Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn supported_models(&self) -> Vec<String> {
            vec!["scripted".to_string()]
        }

        fn supports(&self, _feature: ProviderFeature) -> bool {
            true
        }
    }

    fn response(content: Vec<ContentBlock>, stop_reason: StopReason) -> Response {
        Response {
            id: "r".into(),
            model: "scripted".into(),
            content,
            stop_reason,
            usage: Usage::default(),
        }
    }

    #[tokio::test]
    async fn test_trivial_turn() {
        let session = Arc::new(Session::new("/tmp", "scripted"));
        let provider = Arc::new(ScriptedProvider::new(vec![response(
            vec![ContentBlock::text("hello")],
            StopReason::EndTurn,
        )]));
        let registry = Arc::new(ToolRegistry::new());
        let text_calls = Arc::new(AtomicUsize::new(0));
        let tc = text_calls.clone();

        let mut engine = AgentLoopEngine::new(EngineConfig::new(provider, registry, session.clone()));
        engine.set_callbacks(Callbacks::new().on_text(move |_| {
            tc.fetch_add(1, Ordering::SeqCst);
        }));

        let stop_reason = engine.run(CancellationToken::new(), "hi").await.unwrap();
        assert_eq!(stop_reason, StopReason::EndTurn);
        assert_eq!(text_calls.load(Ordering::SeqCst), 1);

        let messages = session.messages().await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text_content(), "hello");
    }

    #[tokio::test]
    async fn test_one_tool_call() {
        let session = Arc::new(Session::new("/tmp", "scripted"));
        let provider = Arc::new(ScriptedProvider::new(vec![
            response(
                vec![ContentBlock::ToolUse(ToolUseBlock::new(
                    "t1",
                    "read",
                    serde_json::json!({"path": "a.txt"}),
                ))],
                StopReason::ToolUse,
            ),
            response(vec![ContentBlock::text("file says contents")], StopReason::EndTurn),
        ]));

        let registry = Arc::new(ToolRegistry::new());
        registry.register(
            tool("read", "reads a file")
                .param("path", "string")
                .build(Arc::new(|_input: Value| {
                    Box::pin(async move { Ok(TO::ok("contents")) })
                })),
        );

        let engine = AgentLoopEngine::new(EngineConfig::new(provider, registry, session.clone()));
        let stop_reason = engine.run(CancellationToken::new(), "read a.txt").await.unwrap();
        assert_eq!(stop_reason, StopReason::EndTurn);

        let messages = session.messages().await;
        // user, assistant[ToolUse], tool_result, assistant[Text]
        assert_eq!(messages.len(), 4);
        match &messages[2].content[0] {
            ContentBlock::ToolResult(r) => {
                assert_eq!(r.content, "contents");
                assert!(!r.is_error);
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_error_result() {
        let session = Arc::new(Session::new("/tmp", "scripted"));
        let provider = Arc::new(ScriptedProvider::new(vec![
            response(
                vec![ContentBlock::ToolUse(ToolUseBlock::new(
                    "t1",
                    "nope",
                    serde_json::json!({}),
                ))],
                StopReason::ToolUse,
            ),
            response(vec![ContentBlock::text("done")], StopReason::EndTurn),
        ]));
        let registry = Arc::new(ToolRegistry::new());

        let engine = AgentLoopEngine::new(EngineConfig::new(provider, registry, session.clone()));
        engine.run(CancellationToken::new(), "do it").await.unwrap();

        let messages = session.messages().await;
        match &messages[2].content[0] {
            ContentBlock::ToolResult(r) => {
                assert!(r.is_error);
                assert!(r.content.contains("unknown tool"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_max_tokens_continuation() {
        let session = Arc::new(Session::new("/tmp", "scripted"));
        let provider = Arc::new(ScriptedProvider::new(vec![
            response(vec![ContentBlock::text("partial")], StopReason::MaxTokens),
            response(vec![ContentBlock::text("rest")], StopReason::EndTurn),
        ]));
        let registry = Arc::new(ToolRegistry::new());

        let engine = AgentLoopEngine::new(EngineConfig::new(provider, registry, session.clone()));
        let stop_reason = engine.run(CancellationToken::new(), "go").await.unwrap();
        assert_eq!(stop_reason, StopReason::EndTurn);

        let messages = session.messages().await;
        // user, assistant[partial], user[continue], assistant[rest]
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].text_content(), "continue");
    }

    #[tokio::test]
    async fn test_cancelled_before_first_iteration() {
        let session = Arc::new(Session::new("/tmp", "scripted"));
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let registry = Arc::new(ToolRegistry::new());
        let engine = AgentLoopEngine::new(EngineConfig::new(provider, registry, session));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = engine.run(cancel, "hi").await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_iteration_cap_exhausted() {
        let session = Arc::new(Session::new("/tmp", "scripted"));
        let mut script = Vec::new();
        for _ in 0..5 {
            script.push(response(
                vec![ContentBlock::ToolUse(ToolUseBlock::new(
                    "t",
                    "loop_tool",
                    serde_json::json!({}),
                ))],
                StopReason::ToolUse,
            ));
        }
        let provider = Arc::new(ScriptedProvider::new(script));
        let registry = Arc::new(ToolRegistry::new());
        registry.register(tool("loop_tool", "loops forever").build(Arc::new(|_: Value| {
            Box::pin(async move { Ok(TO::ok("x")) })
        })));

        let mut engine = AgentLoopEngine::new(EngineConfig::new(provider, registry, session));
        engine.max_iterations = 3;
        let result = engine.run(CancellationToken::new(), "go").await;
        assert!(matches!(result, Err(Error::MaxIterationsExceeded)));
    }
}
