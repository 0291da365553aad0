//! HTTP/SSE adapter for the OpenAI-compatible backend family (LM Studio,
//! Ollama, llama.cpp, vLLM, hosted OpenAI-protocol services).
//!
//! POSTs a JSON request with `stream=true`, reads the SSE body line by
//! line, and turns each chunk into the canonical [`StreamEvent`] sequence
//! as it arrives — unlike a batch aggregator, blocks are opened, streamed
//! into, and closed incrementally so callers see deltas in real time.

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

use super::{EventStream, Provider, ProviderFeature};
use crate::cancel::CancellationToken;
use crate::types::{
    BlockPrototype, ContentBlock, ContentDelta, Message, MessageRole, MessageStub, Request,
    Response, StopReason, StreamEvent, ToolDescriptor, Usage,
};
use crate::{Error, Result};

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAIContent {
    Text(String),
    Parts(Vec<OpenAIContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAIContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: OpenAIFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<OpenAIContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIToolFunctionDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIToolDescriptor {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: OpenAIToolFunctionDescriptor,
}

impl From<&ToolDescriptor> for OpenAIToolDescriptor {
    fn from(tool: &ToolDescriptor) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: OpenAIToolFunctionDescriptor {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    pub stream: bool,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAIToolDescriptor>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChunk {
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<OpenAIChoice>,
    #[serde(default)]
    pub usage: Option<OpenAIUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIChoice {
    #[serde(default)]
    pub delta: OpenAIDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAIDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAIToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIToolCallDelta {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<OpenAIFunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAIFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "stop" => StopReason::EndTurn,
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        other => {
            warn!(reason = other, "unrecognized finish_reason, treating as end_turn");
            StopReason::EndTurn
        }
    }
}

/// Flatten the session's messages into OpenAI wire messages. Every content
/// block is represented, not just text: a `ToolUse` becomes a `tool_calls`
/// entry, a `ToolResult` becomes its own `role: "tool"` message, and an
/// `Image` becomes a vision content part.
fn to_openai_messages(system_blocks: &[String], messages: &[Message]) -> Vec<OpenAIMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);

    if !system_blocks.is_empty() {
        out.push(OpenAIMessage {
            role: "system".to_string(),
            content: Some(OpenAIContent::Text(system_blocks.join("\n\n"))),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for message in messages {
        match message.role {
            MessageRole::ToolResult => {
                for block in &message.content {
                    if let ContentBlock::ToolResult(result) = block {
                        out.push(OpenAIMessage {
                            role: "tool".to_string(),
                            content: Some(OpenAIContent::Text(result.content.clone())),
                            tool_calls: None,
                            tool_call_id: Some(result.tool_use_id.clone()),
                        });
                    }
                }
            }
            MessageRole::User | MessageRole::Assistant => {
                let role = match message.role {
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::ToolResult => unreachable!(),
                };

                let mut parts = Vec::new();
                let mut tool_calls = Vec::new();
                for block in &message.content {
                    match block {
                        ContentBlock::Text(text) => {
                            parts.push(OpenAIContentPart::Text {
                                text: text.text.clone(),
                            });
                        }
                        ContentBlock::Thinking(_) => {
                            // Opaque reasoning is never sent back to the backend.
                        }
                        ContentBlock::ToolUse(tool) => {
                            tool_calls.push(OpenAIToolCall {
                                id: tool.id.clone(),
                                call_type: "function".to_string(),
                                function: OpenAIFunction {
                                    name: tool.name.clone(),
                                    arguments: tool.input.to_string(),
                                },
                            });
                        }
                        ContentBlock::Image(image) => {
                            parts.push(OpenAIContentPart::ImageUrl {
                                image_url: OpenAIImageUrl {
                                    url: image.url.clone(),
                                },
                            });
                        }
                        ContentBlock::ToolResult(_) => {}
                    }
                }

                let content = if parts.is_empty() {
                    None
                } else if parts.len() == 1 {
                    match &parts[0] {
                        OpenAIContentPart::Text { text } => {
                            Some(OpenAIContent::Text(text.clone()))
                        }
                        _ => Some(OpenAIContent::Parts(parts)),
                    }
                } else {
                    Some(OpenAIContent::Parts(parts))
                };

                out.push(OpenAIMessage {
                    role: role.to_string(),
                    content,
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                    tool_call_id: None,
                });
            }
        }
    }

    out
}

/// Streaming assembly state for one in-flight request: which block index a
/// tool-call's API-provided index maps to, and whether the text block has
/// been opened yet.
#[derive(Default)]
struct StreamState {
    text_block_index: Option<usize>,
    tool_block_indices: HashMap<u32, usize>,
    tool_block_ready: HashMap<u32, bool>,
    next_index: usize,
}

impl StreamState {
    fn open_text_block(&mut self) -> (usize, bool) {
        if let Some(i) = self.text_block_index {
            return (i, false);
        }
        let i = self.next_index;
        self.next_index += 1;
        self.text_block_index = Some(i);
        (i, true)
    }

    fn open_tool_block(&mut self, tool_index: u32) -> (usize, bool) {
        if let Some(&i) = self.tool_block_indices.get(&tool_index) {
            return (i, false);
        }
        let i = self.next_index;
        self.next_index += 1;
        self.tool_block_indices.insert(tool_index, i);
        (i, true)
    }

    fn open_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.tool_block_indices.values().copied().collect();
        if let Some(i) = self.text_block_index {
            indices.push(i);
        }
        indices.sort_unstable();
        indices
    }
}

/// Per-tool-call id/name buffer: OpenAI-compatible APIs usually send `id`
/// and `function.name` together in the delta that introduces a tool call,
/// but nothing in the protocol guarantees it — this buffers until both are
/// known before opening the block, so the first emitted event always has a
/// real name rather than an empty placeholder.
#[derive(Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    buffered_args: String,
    opened: bool,
}

fn process_chunk(
    chunk: OpenAIChunk,
    state: &mut StreamState,
    pending: &mut HashMap<u32, PendingToolCall>,
) -> (Vec<StreamEvent>, Option<(StopReason, Usage)>) {
    let mut events = Vec::new();
    let mut terminal = None;

    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                let (index, opened) = state.open_text_block();
                if opened {
                    events.push(StreamEvent::ContentBlockStart {
                        index,
                        block_prototype: BlockPrototype::Text,
                    });
                }
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::TextDelta { text: content },
                });
            }
        }

        if let Some(tool_calls) = choice.delta.tool_calls {
            for delta in tool_calls {
                let entry = pending.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    entry.id = Some(id);
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        entry.name = Some(name);
                    }
                    if let Some(args) = function.arguments {
                        if entry.opened {
                            let (index, _) = state.open_tool_block(delta.index);
                            events.push(StreamEvent::ContentBlockDelta {
                                index,
                                delta: ContentDelta::InputJsonDelta { partial_json: args },
                            });
                        } else {
                            entry.buffered_args.push_str(&args);
                        }
                    }
                }

                if !entry.opened {
                    if let (Some(id), Some(name)) = (entry.id.clone(), entry.name.clone()) {
                        let (index, _) = state.open_tool_block(delta.index);
                        events.push(StreamEvent::ContentBlockStart {
                            index,
                            block_prototype: BlockPrototype::ToolUse { id, name },
                        });
                        if !entry.buffered_args.is_empty() {
                            events.push(StreamEvent::ContentBlockDelta {
                                index,
                                delta: ContentDelta::InputJsonDelta {
                                    partial_json: std::mem::take(&mut entry.buffered_args),
                                },
                            });
                        }
                        entry.opened = true;
                    }
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            let stop_reason = map_stop_reason(&reason);
            let usage = chunk
                .usage
                .as_ref()
                .map(|u| Usage {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                })
                .unwrap_or_default();
            terminal = Some((stop_reason, usage));
        }
    }

    (events, terminal)
}

/// Parse the raw SSE body into a stream of [`OpenAIChunk`]s. Each `data: `
/// line carries one JSON chunk; `data: [DONE]` is the end-of-stream
/// sentinel and is skipped rather than parsed.
fn parse_sse_chunks(
    body: reqwest::Response,
) -> Pin<Box<dyn Stream<Item = Result<OpenAIChunk>> + Send>> {
    let stream = body.bytes_stream().filter_map(move |result| async move {
        let bytes = match result {
            Ok(b) => b,
            Err(e) => return Some(Err(Error::Transport(e))),
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();
        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                if data == "[DONE]" {
                    continue;
                }
                return Some(
                    serde_json::from_str::<OpenAIChunk>(data)
                        .map_err(|e| Error::protocol(format!("malformed SSE chunk: {e}"))),
                );
            }
        }
        None
    });
    Box::pin(stream)
}

/// The default model alias table for this family — short, memorable names
/// mapped to concrete backend model ids. An unrecognized model name is
/// passed through unchanged so callers can always address a model by its
/// exact id.
fn resolve_model_alias(name: &str) -> String {
    match name {
        "default" => "qwen2.5-32b-instruct".to_string(),
        other => other.to_string(),
    }
}

pub struct HttpProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .expect("failed to build HTTP client");
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key,
            client,
        }
    }

    fn build_wire_request(&self, request: &Request) -> OpenAIRequest {
        OpenAIRequest {
            model: resolve_model_alias(&request.model),
            messages: to_openai_messages(&request.system_blocks, &request.messages),
            stream: true,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools.iter().map(OpenAIToolDescriptor::from).collect())
            },
        }
    }

    async fn post_stream(&self, wire_request: &OpenAIRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(wire_request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await.map_err(Error::Transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(Error::protocol(format!("backend returned {status}: {body}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn create_message(&self, request: Request, cancel: CancellationToken) -> Result<Response> {
        let mut stream = self.create_message_stream(request, cancel).await?;
        let mut blocks: Vec<Option<ContentBlock>> = Vec::new();
        let mut json_buffers: HashMap<usize, String> = HashMap::new();
        let mut prototypes: HashMap<usize, BlockPrototype> = HashMap::new();
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = Usage::default();
        let mut id = String::new();
        let mut model = String::new();

        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::MessageStart { message_stub } => {
                    id = message_stub.id;
                    model = message_stub.model;
                }
                StreamEvent::ContentBlockStart { index, block_prototype } => {
                    if blocks.len() <= index {
                        blocks.resize(index + 1, None);
                    }
                    prototypes.insert(index, block_prototype.clone());
                    blocks[index] = Some(fold_prototype(&block_prototype));
                }
                StreamEvent::ContentBlockDelta { index, delta } => {
                    if let Some(Some(block)) = blocks.get_mut(index) {
                        fold_delta(block, delta, &mut json_buffers, index);
                    }
                }
                StreamEvent::ContentBlockStop { index } => {
                    if let Some(Some(ContentBlock::ToolUse(tool))) = blocks.get_mut(index) {
                        if let Some(buf) = json_buffers.get(&index) {
                            tool.input = parse_tool_input(buf);
                        }
                    }
                }
                StreamEvent::MessageDelta { stop_reason: sr, usage: u } => {
                    if let Some(sr) = sr {
                        stop_reason = sr;
                    }
                    if let Some(u) = u {
                        usage = u;
                    }
                }
                StreamEvent::MessageStop => break,
                StreamEvent::ToolInfo { .. } | StreamEvent::ToolResultInfo { .. } => {}
            }
        }

        let content = blocks.into_iter().flatten().collect();
        Ok(Response {
            id,
            model,
            content,
            stop_reason,
            usage,
        })
    }

    async fn create_message_stream(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let wire_request = self.build_wire_request(&request);
        let response = self.post_stream(&wire_request).await?;
        let chunk_stream = parse_sse_chunks(response);

        let stream = futures::stream::unfold(
            (
                chunk_stream,
                StreamState::default(),
                HashMap::<u32, PendingToolCall>::new(),
                std::collections::VecDeque::<StreamEvent>::new(),
                false,
                cancel,
                wire_request.model.clone(),
            ),
            move |(mut chunks, mut state, mut pending, mut queue, mut done, cancel, model)| async move {
                loop {
                    if let Some(event) = queue.pop_front() {
                        return Some((Ok(event), (chunks, state, pending, queue, done, cancel, model)));
                    }
                    if done {
                        return None;
                    }
                    if cancel.is_cancelled() {
                        return Some((Err(Error::Cancelled), (chunks, state, pending, queue, done, cancel, model)));
                    }

                    match chunks.next().await {
                        None => {
                            done = true;
                            for index in state.open_indices() {
                                queue.push_back(StreamEvent::ContentBlockStop { index });
                            }
                            queue.push_back(StreamEvent::MessageDelta {
                                stop_reason: Some(StopReason::EndTurn),
                                usage: None,
                            });
                            queue.push_back(StreamEvent::MessageStop);
                        }
                        Some(Err(e)) => {
                            return Some((Err(e), (chunks, state, pending, queue, done, cancel, model)));
                        }
                        Some(Ok(chunk)) => {
                            if state.next_index == 0 && queue.is_empty() {
                                debug!(id = %chunk.id, "stream message started");
                                queue.push_back(StreamEvent::MessageStart {
                                    message_stub: MessageStub {
                                        id: chunk.id.clone(),
                                        model: model.clone(),
                                    },
                                });
                            }
                            let (events, terminal) = process_chunk(chunk, &mut state, &mut pending);
                            queue.extend(events);
                            if let Some((stop_reason, usage)) = terminal {
                                for index in state.open_indices() {
                                    queue.push_back(StreamEvent::ContentBlockStop { index });
                                }
                                queue.push_back(StreamEvent::MessageDelta {
                                    stop_reason: Some(stop_reason),
                                    usage: Some(usage),
                                });
                                queue.push_back(StreamEvent::MessageStop);
                                done = true;
                            }
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supported_models(&self) -> Vec<String> {
        vec!["default".to_string()]
    }

    fn supports(&self, feature: ProviderFeature) -> bool {
        matches!(
            feature,
            ProviderFeature::Streaming | ProviderFeature::ToolUse | ProviderFeature::Vision
        )
    }
}

fn fold_prototype(prototype: &BlockPrototype) -> ContentBlock {
    match prototype {
        BlockPrototype::Text => ContentBlock::text(""),
        BlockPrototype::Thinking => {
            ContentBlock::Thinking(crate::types::ThinkingBlock::new(""))
        }
        BlockPrototype::ToolUse { id, name } => ContentBlock::ToolUse(crate::types::ToolUseBlock::new(
            id.clone(),
            name.clone(),
            Value::Null,
        )),
        BlockPrototype::Image => {
            ContentBlock::Image(crate::types::ImageBlock::from_url("data:,").unwrap())
        }
    }
}

fn fold_delta(
    block: &mut ContentBlock,
    delta: ContentDelta,
    json_buffers: &mut HashMap<usize, String>,
    index: usize,
) {
    match (block, delta) {
        (ContentBlock::Text(text), ContentDelta::TextDelta { text: t }) => text.text.push_str(&t),
        (ContentBlock::Thinking(thinking), ContentDelta::ThinkingDelta { text }) => {
            thinking.thinking.push_str(&text)
        }
        (ContentBlock::ToolUse(_), ContentDelta::InputJsonDelta { partial_json }) => {
            json_buffers.entry(index).or_default().push_str(&partial_json);
        }
        _ => {}
    }
}

fn parse_tool_input(buf: &str) -> Value {
    if buf.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(buf).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}
