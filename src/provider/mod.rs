//! Provider Port: a uniform streaming request/response contract over
//! heterogeneous LLM backends. Two adapter families implement it —
//! [`http`] for OpenAI-compatible HTTP/SSE backends, [`subprocess`] for
//! local CLI backends that speak JSON-lines.

pub mod http;
pub mod subprocess;

use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

use crate::cancel::CancellationToken;
use crate::types::{Request, Response, StreamEvent};
use crate::Result;

/// A feature an adapter may or may not support; `supports` lets callers
/// degrade gracefully (e.g. skip `thinking_budget` for a backend that
/// ignores it) instead of discovering the gap from a wire-format error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFeature {
    Streaming,
    ToolUse,
    Vision,
    Thinking,
    Caching,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Uniform contract every backend adapter implements. `create_message` is
/// the blocking convenience form; `create_message_stream` is what the
/// engine actually drives.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn create_message(&self, request: Request, cancel: CancellationToken) -> Result<Response>;

    async fn create_message_stream(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Result<EventStream>;

    fn name(&self) -> &str;

    fn supported_models(&self) -> Vec<String>;

    fn supports(&self, feature: ProviderFeature) -> bool;
}

/// Fold a non-streaming [`Response`] into the canonical event sequence a
/// streaming call would have produced: one `MessageStart`, then a matched
/// Start/Stop per content block (with a single Delta carrying the whole
/// block), then `MessageDelta`, then `MessageStop`. Used by
/// `create_message` default-style adapters and by the idempotence test in
/// §8 of the design: replaying these events through the engine's folding
/// logic must reconstruct an equal `Response`.
pub fn response_to_events(response: &Response) -> Vec<StreamEvent> {
    use crate::types::{BlockPrototype, ContentBlock, ContentDelta, MessageStub};

    let mut events = vec![StreamEvent::MessageStart {
        message_stub: MessageStub {
            id: response.id.clone(),
            model: response.model.clone(),
        },
    }];

    for (index, block) in response.content.iter().enumerate() {
        let (prototype, delta) = match block {
            ContentBlock::Text(text) => (
                BlockPrototype::Text,
                ContentDelta::TextDelta {
                    text: text.text.clone(),
                },
            ),
            ContentBlock::Thinking(thinking) => (
                BlockPrototype::Thinking,
                ContentDelta::ThinkingDelta {
                    text: thinking.thinking.clone(),
                },
            ),
            ContentBlock::ToolUse(tool) => (
                BlockPrototype::ToolUse {
                    id: tool.id.clone(),
                    name: tool.name.clone(),
                },
                ContentDelta::InputJsonDelta {
                    partial_json: tool.input.to_string(),
                },
            ),
            ContentBlock::ToolResult(_) | ContentBlock::Image(_) => {
                // Neither variant is ever produced by a provider response —
                // ToolResult comes from the engine, Image from the user —
                // so there is nothing to replay here.
                continue;
            }
        };

        events.push(StreamEvent::ContentBlockStart {
            index,
            block_prototype: prototype,
        });
        events.push(StreamEvent::ContentBlockDelta { index, delta });
        events.push(StreamEvent::ContentBlockStop { index });
    }

    events.push(StreamEvent::MessageDelta {
        stop_reason: Some(response.stop_reason),
        usage: Some(response.usage),
    });
    events.push(StreamEvent::MessageStop);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, StopReason, Usage};

    #[test]
    fn test_response_to_events_shape() {
        let response = Response {
            id: "r1".into(),
            model: "m".into(),
            content: vec![ContentBlock::text("hi")],
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: 1,
                output_tokens: 2,
            },
        };
        let events = response_to_events(&response);
        assert!(matches!(events.first(), Some(StreamEvent::MessageStart { .. })));
        assert!(matches!(events.last(), Some(StreamEvent::MessageStop)));
        assert_eq!(events.len(), 6);
    }
}
