use axum::http::StatusCode;
use thiserror::Error;

use crate::response::MockResponse;

#[derive(Debug, Error)]
pub enum MockError {
    #[error("invalid request body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("User message content not found in request")]
    MissingUserMessage,

    #[error("Original user input not found")]
    MissingOriginalInput,

    #[error("No matching mock expectation found for input: {input}")]
    NoMatchingExpectation { input: String },

    #[error("No matching expectation found for tool sequence")]
    NoMatchingToolSequence { input: String },

    #[error("request assertion failed: {0}")]
    AssertionFailed(String),

    #[error("custom response generator failed: {0}")]
    Generator(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MockError {
    pub fn status(&self) -> StatusCode {
        match self {
            MockError::MissingOriginalInput => StatusCode::BAD_REQUEST,
            MockError::NoMatchingToolSequence { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Renders the `{"error": ...}` envelope sent back to the client.
    pub fn to_response(&self) -> MockResponse {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            format!("Error processing request: {self}")
        } else {
            self.to_string()
        };
        MockResponse::error(status, message)
    }
}

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("trigger registered more than once: {0:?}")]
    DuplicateTrigger(String),

    #[error("expectation trigger must not be empty")]
    EmptyTrigger,

    #[error("tool name must not be empty (trigger {trigger:?}, step {step})")]
    EmptyToolName { trigger: String, step: usize },

    #[error("tool step {step} of trigger {trigger:?} has no tool calls")]
    EmptyStep { trigger: String, step: usize },

    #[error("failed to parse expectation document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("failed to read expectation document: {0}")]
    Io(#[from] std::io::Error),
}
