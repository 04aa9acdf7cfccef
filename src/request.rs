use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Deserialize;
use serde_json::Value;

use crate::error::MockError;
use crate::types::{ChatMessage, MessageContent, MessageRole};

/// Raw inbound HTTP request as handed to the dispatcher.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl MockRequest {
    pub fn new(method: Method, path: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// `POST /v1/chat/completions` carrying `body`.
    pub fn chat_completion(body: impl Into<String>) -> Self {
        Self::new(Method::POST, "/v1/chat/completions", body)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    /// No tool-role message in the history.
    FreshTurn,
    /// At least one tool-role message in the history.
    ToolContinuation,
}

pub fn classify(messages: &[ChatMessage]) -> TurnKind {
    if messages.iter().any(|message| message.role == MessageRole::Tool) {
        TurnKind::ToolContinuation
    } else {
        TurnKind::FreshTurn
    }
}

/// Decoded request body with accessors over its message history.
#[derive(Debug, Clone)]
pub struct RequestContext {
    root: Value,
    messages: Vec<ChatMessage>,
}

impl RequestContext {
    pub fn parse(body: &str) -> Result<Self, MockError> {
        let root: Value = serde_json::from_str(body)?;
        let messages = match root.get("messages") {
            Some(Value::Array(items)) => items.iter().filter_map(message_from_value).collect(),
            _ => Vec::new(),
        };

        Ok(Self { root, messages })
    }

    pub fn turn_kind(&self) -> TurnKind {
        classify(&self.messages)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Text of the first user message: the correlation key for both turn kinds.
    pub fn first_user_message(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|message| message.role == MessageRole::User)
            .and_then(ChatMessage::text)
    }

    pub fn last_tool_content(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::Tool)
            .and_then(ChatMessage::text)
    }

    /// `tool_call_id`s of tool results, in history order.
    pub fn tool_call_ids(&self) -> impl Iterator<Item = &str> {
        self.messages
            .iter()
            .filter(|message| message.role == MessageRole::Tool)
            .filter_map(|message| message.tool_call_id.as_deref())
    }

    /// The inbound `messages` array, verbatim.
    pub fn history(&self) -> Value {
        self.root
            .get("messages")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()))
    }

    pub fn root(&self) -> &Value {
        &self.root
    }
}

/// Reads one history entry field by field. Non-object entries are skipped; an
/// unknown role becomes [`MessageRole::Other`] and a numeric `tool_call_id` is
/// kept as its decimal text.
fn message_from_value(value: &Value) -> Option<ChatMessage> {
    let Some(object) = value.as_object() else {
        tracing::debug!(%value, "skipping non-object message");
        return None;
    };

    let role = object
        .get("role")
        .and_then(|role| MessageRole::deserialize(role).ok())
        .unwrap_or_default();
    let content = object
        .get("content")
        .filter(|content| !content.is_null())
        .and_then(|content| MessageContent::deserialize(content).ok());
    let tool_call_id = match object.get("tool_call_id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };

    Some(ChatMessage {
        role,
        content,
        tool_call_id,
    })
}
