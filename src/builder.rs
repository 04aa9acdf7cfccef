//! Fluent registration of expectations.
//!
//! ```
//! use openai_mock::MockBuilder;
//!
//! let registry = MockBuilder::new()
//!     .when("What is the weather in london?")
//!         .invoke_tool("FindsTheLatitudeAndLongitudeOfAGivenCity")
//!         .with_param("name", "London")
//!         .and_then_invoke_tool("ForecastsTheWeatherForTheGivenLatitudeAndLongitude")
//!         .with_param("latitude", "51.50758961965397")
//!         .with_param("longitude", "-0.13388057363742217")
//!     .when("another sentence")
//!         .reply_with("hello World")
//!     .build()
//!     .expect("valid expectations");
//!
//! assert_eq!(registry.len(), 2);
//! ```
//!
//! Parameters and extra calls can only be added through a [`ToolStepBuilder`],
//! which exists only once a tool has been invoked, so there is no way to attach
//! a parameter to a missing tool call.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::error::RegistrationError;
use crate::expectation::{
    Expectation, ExpectationRegistry, FnGenerator, RequestAssertion, ResponseGenerator,
    ResponsePlan, ToolCallDefinition, ToolExecutionStep,
};
use crate::request::MockRequest;
use crate::response::MockResponse;

#[derive(Default)]
struct ExpectationDraft {
    trigger: String,
    reply: Option<String>,
    steps: Vec<ToolExecutionStep>,
    generator: Option<Arc<dyn ResponseGenerator>>,
    assertion: Option<RequestAssertion>,
}

impl ExpectationDraft {
    fn validate(&self) -> Result<(), RegistrationError> {
        if self.trigger.is_empty() {
            return Err(RegistrationError::EmptyTrigger);
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.is_empty() {
                return Err(RegistrationError::EmptyStep {
                    trigger: self.trigger.clone(),
                    step: index,
                });
            }
            if step.calls().iter().any(|call| call.name().is_empty()) {
                return Err(RegistrationError::EmptyToolName {
                    trigger: self.trigger.clone(),
                    step: index,
                });
            }
        }

        Ok(())
    }

    fn finalize(self) -> Expectation {
        let steps: Arc<[ToolExecutionStep]> = Arc::from(self.steps);
        let plan = ResponsePlan::select(self.generator, &steps);
        Expectation::new(self.trigger, self.reply, steps, plan, self.assertion)
    }
}

#[derive(Default)]
pub struct MockBuilder {
    drafts: Vec<ExpectationDraft>,
}

impl MockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an expectation matched by exact equality on the first user message.
    pub fn when(self, trigger: impl Into<String>) -> ExpectationBuilder {
        let trigger = trigger.into();
        tracing::debug!(%trigger, "setting up expectation");
        ExpectationBuilder {
            parent: self,
            draft: ExpectationDraft {
                trigger,
                ..ExpectationDraft::default()
            },
        }
    }

    /// Freezes every expectation. Triggers must be non-empty and unique.
    pub fn build(self) -> Result<ExpectationRegistry, RegistrationError> {
        let mut seen = HashSet::new();
        let mut registry = ExpectationRegistry::new();

        for draft in self.drafts {
            draft.validate()?;
            if !seen.insert(draft.trigger.clone()) {
                return Err(RegistrationError::DuplicateTrigger(draft.trigger));
            }
            registry.push(draft.finalize());
        }

        tracing::info!(expectations = registry.len(), "built mock expectations");
        Ok(registry)
    }
}

pub struct ExpectationBuilder {
    parent: MockBuilder,
    draft: ExpectationDraft,
}

impl ExpectationBuilder {
    /// Plain-text reply; with a tool plan, the fallback content of the final response.
    pub fn reply_with(mut self, reply: impl Into<String>) -> Self {
        let reply = reply.into();
        tracing::debug!(%reply, "setting expected response");
        self.draft.reply = Some(reply);
        self
    }

    /// Starts a new sequential step whose first call is `tool`.
    pub fn invoke_tool(mut self, tool: impl Into<String>) -> ToolStepBuilder {
        let tool = tool.into();
        tracing::debug!(%tool, "adding tool execution step");
        let mut step = ToolExecutionStep::new();
        step.push(ToolCallDefinition::new(tool));
        self.draft.steps.push(step);
        ToolStepBuilder { inner: self }
    }

    /// Hands fresh turns to `respond`, bypassing text and tool plans.
    pub fn respond_with<F>(self, respond: F) -> Self
    where
        F: Fn(&MockRequest, &str) -> MockResponse + Send + Sync + 'static,
    {
        self.respond_with_generator(FnGenerator(respond))
    }

    pub fn respond_with_generator<G>(mut self, generator: G) -> Self
    where
        G: ResponseGenerator + 'static,
    {
        tracing::debug!("setting custom response function");
        self.draft.generator = Some(Arc::new(generator));
        self
    }

    /// Runs `assertion` on the raw body of every fresh turn; a panic fails the request.
    pub fn assert_request<F>(mut self, assertion: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        tracing::debug!("setting request assertion");
        self.draft.assertion = Some(Arc::new(assertion));
        self
    }

    pub(crate) fn with_step(mut self, step: ToolExecutionStep) -> Self {
        self.draft.steps.push(step);
        self
    }

    pub fn end(mut self) -> MockBuilder {
        tracing::debug!(trigger = %self.draft.trigger, "finalizing expectation");
        self.parent.drafts.push(self.draft);
        self.parent
    }

    pub fn when(self, trigger: impl Into<String>) -> ExpectationBuilder {
        self.end().when(trigger)
    }

    pub fn build(self) -> Result<ExpectationRegistry, RegistrationError> {
        self.end().build()
    }
}

/// An expectation whose current step holds at least one tool call.
pub struct ToolStepBuilder {
    inner: ExpectationBuilder,
}

impl ToolStepBuilder {
    /// Sets an argument on the most recently added tool call.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        if let Some(call) = self
            .inner
            .draft
            .steps
            .last_mut()
            .and_then(ToolExecutionStep::last_call_mut)
        {
            tracing::debug!(%key, %value, tool = call.name(), "adding parameter");
            call.insert_argument(key, value);
        }
        self
    }

    /// Adds a call issued in parallel with the others of the current step.
    pub fn and_invoke_tool(mut self, tool: impl Into<String>) -> Self {
        let tool = tool.into();
        tracing::debug!(%tool, "adding parallel tool to current step");
        if let Some(step) = self.inner.draft.steps.last_mut() {
            step.push(ToolCallDefinition::new(tool));
        }
        self
    }

    /// Starts the next sequential step.
    pub fn and_then_invoke_tool(self, tool: impl Into<String>) -> Self {
        self.inner.invoke_tool(tool)
    }

    pub fn reply_with(self, reply: impl Into<String>) -> Self {
        Self {
            inner: self.inner.reply_with(reply),
        }
    }

    pub fn respond_with<F>(self, respond: F) -> Self
    where
        F: Fn(&MockRequest, &str) -> MockResponse + Send + Sync + 'static,
    {
        Self {
            inner: self.inner.respond_with(respond),
        }
    }

    pub fn assert_request<F>(self, assertion: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self {
            inner: self.inner.assert_request(assertion),
        }
    }

    pub fn end(self) -> MockBuilder {
        self.inner.end()
    }

    pub fn when(self, trigger: impl Into<String>) -> ExpectationBuilder {
        self.inner.when(trigger)
    }

    pub fn build(self) -> Result<ExpectationRegistry, RegistrationError> {
        self.inner.build()
    }
}
