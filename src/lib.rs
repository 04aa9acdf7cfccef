pub mod builder;
pub mod config;
pub mod conversation;
pub mod document;
pub mod error;
pub mod expectation;
pub mod functions;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;
pub mod types;

pub use builder::{ExpectationBuilder, MockBuilder, ToolStepBuilder};
pub use config::MockConfig;
pub use conversation::{Advance, ConversationId, ConversationStore};
pub use document::{ExpectationDocument, ExpectationEntry, ToolCallEntry};
pub use error::{MockError, RegistrationError};
pub use expectation::{
    Expectation, ExpectationRegistry, RequestAssertion, ResponseGenerator, ResponsePlan,
    ToolCallDefinition, ToolExecutionSequence, ToolExecutionStep,
};
pub use functions::{FunctionCall, ToolCall, ToolCallType};
pub use handler::RequestHandler;
pub use request::{classify, MockRequest, RequestContext, TurnKind};
pub use response::{MockResponse, ResponseSynthesizer};
pub use server::MockServer;
pub use types::{
    AssistantMessage, ChatCompletion, ChatMessage, Choice, ErrorBody, FinishReason,
    MessageContent, MessageRole,
};
