//! Core data types: messages, content blocks, requests/responses, and the
//! streaming event model shared by every provider adapter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// NEWTYPES
// ============================================================================

/// A validated, non-empty model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelName(String);

impl ModelName {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::config("model name must not be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated base URL, required to start with `http://` or `https://`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseUrl(String);

impl BaseUrl {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(Error::config("base URL must not be empty"));
        }
        if !value.starts_with("http://") && !value.starts_with("https://") {
            return Err(Error::config("base URL must start with http:// or https://"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sampling temperature, clamped to the [0.0, 2.0] range accepted by the
/// OpenAI-compatible family of backends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature(f32);

impl Temperature {
    pub fn new(value: f32) -> Result<Self> {
        if !(0.0..=2.0).contains(&value) {
            return Err(Error::config("temperature must be between 0.0 and 2.0"));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

// ============================================================================
// MESSAGES AND CONTENT BLOCKS
// ============================================================================

/// The role a message plays in the session log.
///
/// Unlike some wire protocols, the system prompt is not a message role here:
/// it is composed separately into the `Request::system_blocks` field by the
/// engine, keeping `messages()` an honest log of turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    ToolResult,
}

/// A typed fragment of a message: text, opaque reasoning, a tool invocation
/// request, a tool's result, or an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Thinking(ThinkingBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    Image(ImageBlock),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text(TextBlock::new(text))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text(t) => Some(&t.text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUseBlock> {
        match self {
            ContentBlock::ToolUse(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Opaque model reasoning, kept separate from visible text. Providers that
/// don't support thinking never produce this variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub thinking: String,
}

impl ThinkingBlock {
    pub fn new(thinking: impl Into<String>) -> Self {
        Self {
            thinking: thinking.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl ToolUseBlock {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Invariant (enforced by the engine, not this type): every `ToolUse` id
/// appearing in an assistant message is answered exactly once by a
/// `ToolResult` before the next provider call is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResultBlock {
    pub fn ok(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBlock {
    pub url: String,
    #[serde(default)]
    pub detail: ImageDetail,
}

impl ImageBlock {
    pub fn from_url(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        if !url.starts_with("http://") && !url.starts_with("https://") && !url.starts_with("data:") {
            return Err(Error::validation(
                "image URL must be http(s):// or a data: URI",
            ));
        }
        Ok(Self {
            url,
            detail: ImageDetail::default(),
        })
    }

    pub fn with_detail(mut self, detail: ImageDetail) -> Self {
        self.detail = detail;
        self
    }
}

/// One turn in the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![ContentBlock::text(text)])
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool_result(block: ToolResultBlock) -> Self {
        Self::new(MessageRole::ToolResult, vec![ContentBlock::ToolResult(block)])
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// STOP REASON / USAGE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

// ============================================================================
// REQUEST / RESPONSE / TOOL DESCRIPTOR
// ============================================================================

/// A tool's shape as advertised to the provider, independent of its handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Thinking budget resolved from a `ThinkingLevel`, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    None,
    Low,
    Medium,
    High,
}

impl ThinkingLevel {
    pub fn token_budget(&self) -> Option<u32> {
        match self {
            ThinkingLevel::None => None,
            ThinkingLevel::Low => Some(2000),
            ThinkingLevel::Medium => Some(5000),
            ThinkingLevel::High => Some(10000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    pub system_blocks: Vec<String>,
    pub tools: Vec<ToolDescriptor>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub thinking_budget: Option<u32>,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

// ============================================================================
// STREAMING EVENT MODEL
// ============================================================================

/// A prototype of the block a `ContentBlockStart` is opening — carries no
/// accumulated text/input yet, only the variant discriminant and any fields
/// known up-front (a `ToolUse` start knows `id`/`name` before input arrives).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockPrototype {
    Text,
    Thinking,
    ToolUse { id: String, name: String },
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta { text: String },
    ThinkingDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStub {
    pub id: String,
    pub model: String,
}

/// The canonical streaming event sequence every provider adapter must
/// produce: one `MessageStart`, then per content block in order a matched
/// `ContentBlockStart`/`ContentBlockDelta*`/`ContentBlockStop`, then a
/// `MessageDelta` carrying the stop reason, then `MessageStop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart { message_stub: MessageStub },
    ContentBlockStart { index: usize, block_prototype: BlockPrototype },
    ContentBlockDelta { index: usize, delta: ContentDelta },
    ContentBlockStop { index: usize },
    MessageDelta { stop_reason: Option<StopReason>, usage: Option<Usage> },
    MessageStop,
    /// Observational only: a subprocess adapter's child CLI has already
    /// executed the tool itself, so these two variants exist purely to
    /// surface that fact to callers — the engine never dispatches through
    /// the Tool Port in response to them.
    ToolInfo { name: String, input: Value },
    ToolResultInfo { name: String, output: String, is_error: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_rejects_empty() {
        assert!(ModelName::new("").is_err());
        assert!(ModelName::new("   ").is_err());
        assert!(ModelName::new("gpt-4").is_ok());
    }

    #[test]
    fn test_base_url_requires_scheme() {
        assert!(BaseUrl::new("localhost:1234").is_err());
        assert!(BaseUrl::new("http://localhost:1234/v1").is_ok());
        assert!(BaseUrl::new("https://api.example.com").is_ok());
    }

    #[test]
    fn test_temperature_range() {
        assert!(Temperature::new(-0.1).is_err());
        assert!(Temperature::new(2.1).is_err());
        assert!(Temperature::new(0.7).is_ok());
    }

    #[test]
    fn test_message_text_content_joins_blocks() {
        let msg = Message::assistant(vec![
            ContentBlock::text("hello"),
            ContentBlock::text("world"),
        ]);
        assert_eq!(msg.text_content(), "hello\nworld");
    }

    #[test]
    fn test_tool_result_block_error() {
        let block = ToolResultBlock::error("t1", "boom");
        assert!(block.is_error);
        assert_eq!(block.tool_use_id, "t1");
    }

    #[test]
    fn test_image_block_requires_scheme() {
        assert!(ImageBlock::from_url("ftp://example.com/x.png").is_err());
        assert!(ImageBlock::from_url("https://example.com/x.png").is_ok());
        assert!(ImageBlock::from_url("data:image/png;base64,AAAA").is_ok());
    }

    #[test]
    fn test_thinking_level_budgets() {
        assert_eq!(ThinkingLevel::None.token_budget(), None);
        assert_eq!(ThinkingLevel::Low.token_budget(), Some(2000));
        assert_eq!(ThinkingLevel::High.token_budget(), Some(10000));
    }

    #[test]
    fn test_stream_event_roundtrip() {
        let event = StreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentDelta::TextDelta {
                text: "hi".to_string(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: StreamEvent = serde_json::from_str(&json).unwrap();
        match back {
            StreamEvent::ContentBlockDelta { index, delta } => {
                assert_eq!(index, 0);
                match delta {
                    ContentDelta::TextDelta { text } => assert_eq!(text, "hi"),
                    _ => panic!("wrong delta variant"),
                }
            }
            _ => panic!("wrong event variant"),
        }
    }
}
