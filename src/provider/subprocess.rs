//! Subprocess adapter for local CLI backends that emit JSON-lines on
//! stdout. Because these CLIs typically emit a snapshot of the whole
//! assistant message so far on every line rather than a true delta, this
//! adapter maintains per-block `last_emitted_len` and synthesizes a
//! `TextDelta` of the suffix.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{EventStream, Provider, ProviderFeature};
use crate::cancel::CancellationToken;
use crate::types::{
    BlockPrototype, ContentDelta, MessageStub, Request, Response, StopReason, StreamEvent, Usage,
};
use crate::{Error, Result};

/// Maximum size of a single JSON-line frame this adapter will buffer,
/// tolerating backends that emit large accumulated-text snapshots on one
/// line.
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Bound on how long `close()` waits for the child to exit after
/// cancellation before it is killed outright.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// One JSON-line event a backend CLI can emit. The exact vocabulary is
/// backend-specific; this is the minimal shape the adapter understands.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CliEvent {
    /// The accumulated assistant text so far (a snapshot, not a delta).
    Text { text: String },
    /// The CLI invoked a tool on its own; purely observational.
    ToolUse { name: String, input: Value },
    /// The CLI's tool finished; purely observational.
    ToolResult {
        name: String,
        output: String,
        #[serde(default)]
        is_error: bool,
    },
    /// The CLI is done producing output for this turn.
    Done {
        #[serde(default)]
        stop_reason: Option<String>,
    },
}

fn map_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("max_tokens") | Some("length") => StopReason::MaxTokens,
        Some("tool_use") => StopReason::ToolUse,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

/// Builds the argv for one backend CLI invocation from a [`Request`]. Kept
/// as a trait so new CLI backends can be added without touching the
/// streaming/diffing logic below.
pub trait CliCommandBuilder: Send + Sync {
    fn build(&self, request: &Request) -> (String, Vec<String>);
}

/// The illustrative command builder: passes the last user message as a
/// single positional argument plus `--json` to request JSON-lines output.
/// Real backend integrations supply their own [`CliCommandBuilder`].
pub struct DefaultCliCommandBuilder;

impl CliCommandBuilder for DefaultCliCommandBuilder {
    fn build(&self, request: &Request) -> (String, Vec<String>) {
        let prompt = request
            .messages
            .last()
            .map(|m| m.text_content())
            .unwrap_or_default();
        (
            "true".to_string(),
            vec!["--json".to_string(), prompt],
        )
    }
}

pub struct SubprocessProvider {
    name: String,
    command_builder: Box<dyn CliCommandBuilder>,
}

impl SubprocessProvider {
    pub fn new(name: impl Into<String>, command_builder: Box<dyn CliCommandBuilder>) -> Self {
        Self {
            name: name.into(),
            command_builder,
        }
    }

    fn spawn(&self, request: &Request) -> Result<Child> {
        let (program, args) = self.command_builder.build(request);
        Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::subprocess(format!("failed to spawn backend CLI: {e}")))
    }
}

#[async_trait]
impl Provider for SubprocessProvider {
    async fn create_message(&self, request: Request, cancel: CancellationToken) -> Result<Response> {
        let mut stream = self.create_message_stream(request, cancel).await?;
        let mut text = String::new();
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = Usage::default();
        let mut id = String::new();
        let mut model = String::new();

        use futures::StreamExt;
        while let Some(event) = stream.next().await {
            match event? {
                StreamEvent::MessageStart { message_stub } => {
                    id = message_stub.id;
                    model = message_stub.model;
                }
                StreamEvent::ContentBlockDelta {
                    delta: ContentDelta::TextDelta { text: delta_text },
                    ..
                } => text.push_str(&delta_text),
                StreamEvent::MessageDelta { stop_reason: sr, usage: u } => {
                    if let Some(sr) = sr {
                        stop_reason = sr;
                    }
                    if let Some(u) = u {
                        usage = u;
                    }
                }
                StreamEvent::MessageStop => break,
                _ => {}
            }
        }

        Ok(Response {
            id,
            model,
            content: vec![crate::types::ContentBlock::text(text)],
            stop_reason,
            usage,
        })
    }

    async fn create_message_stream(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let model = request.model.clone();
        let mut child = self.spawn(&request)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::subprocess("backend CLI produced no stdout pipe"))?;
        let reader = BufReader::with_capacity(64 * 1024, stdout).lines();

        Ok(Box::pin(run_stream(child, reader, model, cancel)))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supported_models(&self) -> Vec<String> {
        vec!["cli:default".to_string()]
    }

    fn supports(&self, feature: ProviderFeature) -> bool {
        matches!(feature, ProviderFeature::Streaming)
    }
}

fn run_stream(
    mut child: Child,
    mut reader: tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
    model: String,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = Result<StreamEvent>> + Send {
    async_stream::try_stream! {
            let stub_id = uuid::Uuid::new_v4().to_string();
            yield StreamEvent::MessageStart {
                message_stub: MessageStub { id: stub_id, model: model.clone() },
            };

            let mut last_emitted_len: usize = 0;
            let mut block_opened = false;
            let mut terminal: Option<StopReason> = None;

            loop {
                if cancel.is_cancelled() {
                    let _ = tokio::time::timeout(CANCEL_GRACE, child.wait()).await;
                    let _ = child.start_kill();
                    Err(Error::Cancelled)?;
                }

                let line: Result<Option<String>> = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let _ = tokio::time::timeout(CANCEL_GRACE, child.wait()).await;
                        let _ = child.start_kill();
                        Err(Error::Cancelled)
                    }
                    line = reader.next_line() => line.map_err(|e| Error::subprocess(format!("reading backend stdout: {e}"))),
                };
                let line = line?;

                let Some(line) = line else { break };
                if line.len() > MAX_LINE_BYTES {
                    warn!(len = line.len(), "backend CLI line exceeded buffer cap, dropping");
                    continue;
                }
                if line.trim().is_empty() {
                    continue;
                }

                let event: CliEvent = match serde_json::from_str(&line) {
                    Ok(e) => e,
                    Err(e) => {
                        debug!(%e, "skipping unparseable backend CLI line");
                        continue;
                    }
                };

                match event {
                    CliEvent::Text { text } => {
                        if text.len() < last_emitted_len {
                            // Backend restarted its snapshot; treat as a fresh block.
                            last_emitted_len = 0;
                            block_opened = false;
                        }
                        if !block_opened {
                            yield StreamEvent::ContentBlockStart { index: 0, block_prototype: BlockPrototype::Text };
                            block_opened = true;
                        }
                        let suffix = &text[last_emitted_len..];
                        if !suffix.is_empty() {
                            yield StreamEvent::ContentBlockDelta {
                                index: 0,
                                delta: ContentDelta::TextDelta { text: suffix.to_string() },
                            };
                        }
                        last_emitted_len = text.len();
                    }
                    CliEvent::ToolUse { name, input } => {
                        yield StreamEvent::ToolInfo { name, input };
                    }
                    CliEvent::ToolResult { name, output, is_error } => {
                        yield StreamEvent::ToolResultInfo { name, output, is_error };
                    }
                    CliEvent::Done { stop_reason } => {
                        terminal = Some(map_stop_reason(stop_reason.as_deref()));
                        break;
                    }
                }
            }

            if block_opened {
                yield StreamEvent::ContentBlockStop { index: 0 };
            }
            yield StreamEvent::MessageDelta {
                stop_reason: Some(terminal.unwrap_or(StopReason::EndTurn)),
                usage: None,
            };
            yield StreamEvent::MessageStop;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_stop_reason() {
        assert_eq!(map_stop_reason(Some("max_tokens")), StopReason::MaxTokens);
        assert_eq!(map_stop_reason(Some("tool_use")), StopReason::ToolUse);
        assert_eq!(map_stop_reason(None), StopReason::EndTurn);
    }

    #[test]
    fn test_cli_event_text_parses() {
        let event: CliEvent = serde_json::from_str(r#"{"type":"text","text":"hello"}"#).unwrap();
        matches!(event, CliEvent::Text { .. });
    }

    #[test]
    fn test_cli_event_done_parses_without_stop_reason() {
        let event: CliEvent = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        match event {
            CliEvent::Done { stop_reason } => assert!(stop_reason.is_none()),
            _ => panic!("expected Done"),
        }
    }

    #[test]
    fn test_default_command_builder_uses_last_message() {
        let request = Request {
            model: "cli:default".into(),
            messages: vec![crate::types::Message::user("hello there")],
            system_blocks: vec![],
            tools: vec![],
            max_tokens: 100,
            temperature: 0.0,
            thinking_budget: None,
            stream: true,
        };
        let (program, args) = DefaultCliCommandBuilder.build(&request);
        assert_eq!(program, "true");
        assert!(args.contains(&"hello there".to_string()));
    }
}
