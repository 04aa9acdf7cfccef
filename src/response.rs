use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::MockConfig;
use crate::error::MockError;
use crate::expectation::ToolExecutionStep;
use crate::functions::ToolCall;
use crate::types::{AssistantMessage, ChatCompletion, Choice, FinishReason, CHAT_COMPLETION_OBJECT};

/// Status, headers and body sent back for one request.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl MockResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self, MockError> {
        let body = serde_json::to_string(value)?;
        Ok(Self::new(status, body).with_json_content_type())
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        let body = json!({ "error": message.into() }).to_string();
        Self::new(status, body).with_json_content_type()
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    fn with_json_content_type(self) -> Self {
        self.with_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }
}

impl IntoResponse for MockResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// Builds chat-completion shaped payloads.
#[derive(Debug, Clone)]
pub struct ResponseSynthesizer {
    model: String,
    final_reply: String,
}

impl ResponseSynthesizer {
    pub fn new(config: &MockConfig) -> Self {
        Self {
            model: config.model.clone(),
            final_reply: config.final_reply.clone(),
        }
    }

    pub fn text(&self, content: Option<&str>) -> ChatCompletion {
        let message = AssistantMessage::new(content.map(str::to_string));
        self.completion(FinishReason::Stop, message, None)
    }

    /// One call per definition in the step, each with its own fresh id.
    pub fn tool_calls(&self, step: &ToolExecutionStep) -> ChatCompletion {
        let calls: Vec<ToolCall> = step
            .calls()
            .iter()
            .map(|definition| definition.to_tool_call())
            .collect();
        let message = AssistantMessage::new(None).with_tool_calls(calls);
        self.completion(FinishReason::ToolCalls, message, None)
    }

    /// Content falls back from the last tool result, to `reply`, to the configured placeholder.
    pub fn final_after_tools(
        &self,
        last_tool_content: Option<String>,
        reply: Option<&str>,
        history: Value,
    ) -> ChatCompletion {
        let content = last_tool_content
            .or_else(|| reply.map(str::to_string))
            .unwrap_or_else(|| self.final_reply.clone());
        let message = AssistantMessage::new(Some(content));
        self.completion(FinishReason::Stop, message, Some(history))
    }

    pub fn render(&self, completion: &ChatCompletion) -> Result<MockResponse, MockError> {
        MockResponse::json(StatusCode::OK, completion)
    }

    fn completion(
        &self,
        finish_reason: FinishReason,
        message: AssistantMessage,
        history: Option<Value>,
    ) -> ChatCompletion {
        ChatCompletion {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            object: CHAT_COMPLETION_OBJECT.to_string(),
            created: chrono::Utc::now().timestamp(),
            model: self.model.clone(),
            choices: vec![Choice {
                index: 0,
                finish_reason,
                message,
            }],
            history,
        }
    }
}
