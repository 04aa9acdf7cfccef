use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::MockConfig;
use crate::conversation::{Advance, ConversationId, ConversationStore};
use crate::error::MockError;
use crate::expectation::{Expectation, ExpectationRegistry, ResponsePlan, ToolExecutionStep};
use crate::request::{MockRequest, RequestContext, TurnKind};
use crate::response::{MockResponse, ResponseSynthesizer};

/// Turns each inbound request into a scripted reply.
#[derive(Debug)]
pub struct RequestHandler {
    registry: ExpectationRegistry,
    conversations: ConversationStore,
    synthesizer: ResponseSynthesizer,
    handled: AtomicUsize,
}

impl RequestHandler {
    pub fn new(registry: ExpectationRegistry, config: &MockConfig) -> Self {
        Self {
            registry,
            conversations: ConversationStore::with_capacity(config.max_conversations),
            synthesizer: ResponseSynthesizer::new(config),
            handled: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &ExpectationRegistry {
        &self.registry
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::Relaxed)
    }

    /// Entry point bound to the transport. Failures become error envelopes, never panics.
    pub fn handle_request(&self, request: &MockRequest) -> MockResponse {
        self.handled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(method = %request.method, path = %request.path, body = %request.body, "processing request");

        match self.dispatch(request) {
            Ok(response) => response,
            Err(error) => {
                if error.status().is_server_error() {
                    tracing::error!(%error, "error processing request");
                } else {
                    tracing::warn!(%error, status = %error.status(), "rejecting request");
                }
                error.to_response()
            }
        }
    }

    fn dispatch(&self, request: &MockRequest) -> Result<MockResponse, MockError> {
        let context = RequestContext::parse(&request.body)?;

        match context.turn_kind() {
            TurnKind::FreshTurn => self.handle_fresh_turn(request, &context),
            TurnKind::ToolContinuation => self.handle_tool_continuation(&context),
        }
    }

    fn handle_fresh_turn(
        &self,
        request: &MockRequest,
        context: &RequestContext,
    ) -> Result<MockResponse, MockError> {
        let input = context
            .first_user_message()
            .ok_or(MockError::MissingUserMessage)?;
        let expectation = self.find_expectation(&input)?;
        let conversation = self.conversations.open(expectation);

        if let Some(assertion) = expectation.assertion() {
            guarded(|| assertion(request.body.as_str())).map_err(MockError::AssertionFailed)?;
        }

        match expectation.plan() {
            ResponsePlan::Custom(generator) => {
                tracing::debug!(%input, "using custom response function");
                guarded(|| generator.respond(request, &input)).map_err(MockError::Generator)?
            }
            ResponsePlan::ToolPlan(steps) => match steps.first() {
                Some(step) => self.tool_call_response(conversation, step),
                None => self.text_response(expectation),
            },
            ResponsePlan::PlainText => self.text_response(expectation),
        }
    }

    fn handle_tool_continuation(&self, context: &RequestContext) -> Result<MockResponse, MockError> {
        let input = context
            .first_user_message()
            .ok_or(MockError::MissingOriginalInput)?;
        let expectation = self
            .registry
            .find(&input)
            .ok_or_else(|| MockError::NoMatchingToolSequence { input: input.clone() })?;

        let (conversation, outcome) = self
            .conversations
            .advance(expectation, context.tool_call_ids());

        match outcome {
            Advance::Step(step) => {
                tracing::debug!(%input, conversation, "executing next tool step");
                self.tool_call_response(conversation, &step)
            }
            Advance::Exhausted => {
                tracing::debug!(%input, conversation, "tool sequence completed");
                let completion = self.synthesizer.final_after_tools(
                    context.last_tool_content(),
                    expectation.reply(),
                    context.history(),
                );
                self.synthesizer.render(&completion)
            }
        }
    }

    fn find_expectation(&self, input: &str) -> Result<&Expectation, MockError> {
        self.registry.find(input).ok_or_else(|| {
            tracing::warn!(%input, "no matching expectation");
            MockError::NoMatchingExpectation {
                input: input.to_string(),
            }
        })
    }

    fn text_response(&self, expectation: &Expectation) -> Result<MockResponse, MockError> {
        tracing::debug!(trigger = expectation.trigger(), "creating simple text response");
        let completion = self.synthesizer.text(expectation.reply());
        self.synthesizer.render(&completion)
    }

    fn tool_call_response(
        &self,
        conversation: ConversationId,
        step: &ToolExecutionStep,
    ) -> Result<MockResponse, MockError> {
        let completion = self.synthesizer.tool_calls(step);
        let call_ids = completion
            .choices
            .iter()
            .flat_map(|choice| choice.message.tool_calls.iter())
            .map(|call| call.id.clone());
        self.conversations.bind_tool_calls(conversation, call_ids);
        self.synthesizer.render(&completion)
    }
}

/// Runs caller-supplied code, turning a panic into its message.
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
