//! Session Contract: the append-only message log the engine exclusively
//! mutates for the duration of one `run`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::{Message, Response, ToolResultBlock};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The ordered message log for a single user-assistant conversation.
///
/// Guarded by a read-write lock: readers (building a `Request`) take the
/// read lock, writers (append) take the write lock. No lock is held across
/// a provider call or tool execution — callers read a snapshot with
/// `messages()`, do their I/O, then call an `append_*` method.
pub struct Session {
    id: String,
    cwd: String,
    model: String,
    messages: RwLock<Vec<Message>>,
}

impl Session {
    pub fn new(cwd: impl Into<String>, model: impl Into<String>) -> Self {
        let n = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("session-{n}-{}", Uuid::new_v4()),
            cwd: cwd.into(),
            model: model.into(),
            messages: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }

    pub async fn append_user(&self, text: impl Into<String>) {
        self.messages.write().await.push(Message::user(text));
    }

    pub async fn append_assistant(&self, response: &Response) {
        self.messages
            .write()
            .await
            .push(Message::assistant(response.content.clone()));
    }

    pub async fn append_tool_result(
        &self,
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) {
        let block = if is_error {
            ToolResultBlock::error(tool_use_id, content)
        } else {
            ToolResultBlock::ok(tool_use_id, content)
        };
        self.messages
            .write()
            .await
            .push(Message::tool_result(block));
    }

    /// Append a raw message, used by the engine for the synthetic
    /// `max_tokens` continuation and by workflow engines seeding history.
    pub async fn append_message(&self, message: Message) {
        self.messages.write().await.push(message);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("cwd", &self.cwd)
            .field("model", &self.model)
            .finish()
    }
}

pub type SharedSession = Arc<Session>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, StopReason, Usage};

    #[tokio::test]
    async fn test_append_user_and_read_back() {
        let session = Session::new("/tmp", "test-model");
        session.append_user("hello").await;
        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_append_assistant_from_response() {
        let session = Session::new("/tmp", "test-model");
        let response = Response {
            id: "r1".into(),
            model: "test-model".into(),
            content: vec![ContentBlock::text("hi")],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        };
        session.append_assistant(&response).await;
        let messages = session.messages().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text_content(), "hi");
    }

    #[tokio::test]
    async fn test_append_tool_result_marks_error() {
        let session = Session::new("/tmp", "test-model");
        session.append_tool_result("t1", "boom", true).await;
        let messages = session.messages().await;
        match &messages[0].content[0] {
            ContentBlock::ToolResult(r) => assert!(r.is_error),
            _ => panic!("expected tool result"),
        }
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let a = Session::new("/tmp", "m");
        let b = Session::new("/tmp", "m");
        assert_ne!(a.id(), b.id());
    }
}
