//! Registered expectations and the tool plans they script.
//!
//! Everything here is frozen once [`crate::MockBuilder::build`] returns. The only
//! mutable piece is [`ToolExecutionSequence`]'s cursor, and every conversation
//! owns its own copy of the sequence (see [`crate::conversation`]).

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::MockError;
use crate::functions::{FunctionCall, ToolCall};
use crate::request::MockRequest;
use crate::response::MockResponse;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallDefinition {
    name: String,
    arguments: Map<String, Value>,
}

impl ToolCallDefinition {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }

    pub(crate) fn insert_argument(&mut self, key: impl Into<String>, value: Value) {
        self.arguments.insert(key.into(), value);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    /// Builds the wire tool call with a freshly minted id.
    pub fn to_tool_call(&self) -> ToolCall {
        ToolCall::new(
            format!("call_{}", Uuid::new_v4().simple()),
            FunctionCall::new(self.name.clone(), Value::Object(self.arguments.clone())),
        )
    }
}

/// Tool calls issued together in one assistant turn, in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolExecutionStep {
    calls: Vec<ToolCallDefinition>,
}

impl ToolExecutionStep {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, call: ToolCallDefinition) {
        self.calls.push(call);
    }

    pub(crate) fn last_call_mut(&mut self) -> Option<&mut ToolCallDefinition> {
        self.calls.last_mut()
    }

    pub fn calls(&self) -> &[ToolCallDefinition] {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Ordered steps plus a cursor. `cursor == len()` means exhausted.
#[derive(Debug, Clone)]
pub struct ToolExecutionSequence {
    steps: Arc<[ToolExecutionStep]>,
    cursor: usize,
}

impl ToolExecutionSequence {
    pub fn new(steps: Arc<[ToolExecutionStep]>) -> Self {
        Self { steps, cursor: 0 }
    }

    pub fn empty() -> Self {
        Self::new(Arc::from(Vec::<ToolExecutionStep>::new()))
    }

    pub fn current_step(&self) -> Option<&ToolExecutionStep> {
        self.steps.get(self.cursor)
    }

    pub fn has_current_step(&self) -> bool {
        self.cursor < self.steps.len()
    }

    /// Moves to the next step. Never goes past the end.
    pub fn advance(&mut self) {
        if self.cursor < self.steps.len() {
            self.cursor += 1;
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn is_in_progress(&self) -> bool {
        self.cursor > 0 && self.cursor < self.steps.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor == self.steps.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn steps(&self) -> &[ToolExecutionStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Produces a caller-controlled response for a fresh turn.
pub trait ResponseGenerator: Send + Sync {
    fn respond(&self, request: &MockRequest, input: &str) -> Result<MockResponse, MockError>;
}

pub(crate) struct FnGenerator<F>(pub(crate) F);

impl<F> ResponseGenerator for FnGenerator<F>
where
    F: Fn(&MockRequest, &str) -> MockResponse + Send + Sync,
{
    fn respond(&self, request: &MockRequest, input: &str) -> Result<MockResponse, MockError> {
        Ok((self.0)(request, input))
    }
}

pub type RequestAssertion = Arc<dyn Fn(&str) + Send + Sync>;

/// How a fresh turn is answered. Continuations walk the expectation's steps
/// whichever plan wins.
#[derive(Clone)]
pub enum ResponsePlan {
    PlainText,
    ToolPlan(Arc<[ToolExecutionStep]>),
    Custom(Arc<dyn ResponseGenerator>),
}

impl ResponsePlan {
    /// Custom generator wins over a non-empty tool plan, which wins over text.
    pub(crate) fn select(
        generator: Option<Arc<dyn ResponseGenerator>>,
        steps: &Arc<[ToolExecutionStep]>,
    ) -> Self {
        match generator {
            Some(generator) => ResponsePlan::Custom(generator),
            None if !steps.is_empty() => ResponsePlan::ToolPlan(Arc::clone(steps)),
            None => ResponsePlan::PlainText,
        }
    }
}

impl fmt::Debug for ResponsePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponsePlan::PlainText => f.write_str("PlainText"),
            ResponsePlan::ToolPlan(steps) => f.debug_tuple("ToolPlan").field(steps).finish(),
            ResponsePlan::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub struct Expectation {
    trigger: String,
    reply: Option<String>,
    steps: Arc<[ToolExecutionStep]>,
    plan: ResponsePlan,
    assertion: Option<RequestAssertion>,
}

impl Expectation {
    pub(crate) fn new(
        trigger: String,
        reply: Option<String>,
        steps: Arc<[ToolExecutionStep]>,
        plan: ResponsePlan,
        assertion: Option<RequestAssertion>,
    ) -> Self {
        Self {
            trigger,
            reply,
            steps,
            plan,
            assertion,
        }
    }

    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    pub fn reply(&self) -> Option<&str> {
        self.reply.as_deref()
    }

    pub fn plan(&self) -> &ResponsePlan {
        &self.plan
    }

    pub fn assertion(&self) -> Option<&RequestAssertion> {
        self.assertion.as_ref()
    }

    pub fn matches(&self, input: &str) -> bool {
        self.trigger == input
    }

    /// Registered tool steps, kept even when a custom generator answers the fresh turn.
    pub fn steps(&self) -> &[ToolExecutionStep] {
        &self.steps
    }

    /// A fresh sequence over this expectation's steps, at cursor 0.
    pub fn tool_sequence(&self) -> ToolExecutionSequence {
        ToolExecutionSequence::new(Arc::clone(&self.steps))
    }
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation")
            .field("trigger", &self.trigger)
            .field("reply", &self.reply)
            .field("steps", &self.steps.len())
            .field("plan", &self.plan)
            .field("assertion", &self.assertion.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Expectations in registration order.
#[derive(Debug, Default)]
pub struct ExpectationRegistry {
    expectations: Vec<Expectation>,
}

impl ExpectationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, expectation: Expectation) {
        self.expectations.push(expectation);
    }

    pub fn find(&self, input: &str) -> Option<&Expectation> {
        self.expectations
            .iter()
            .find(|expectation| expectation.matches(input))
    }

    pub fn contains(&self, input: &str) -> bool {
        self.find(input).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Expectation> {
        self.expectations.iter()
    }

    pub fn len(&self) -> usize {
        self.expectations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expectations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(names: &[&str]) -> ToolExecutionStep {
        let mut step = ToolExecutionStep::new();
        for name in names {
            step.push(ToolCallDefinition::new(*name));
        }
        step
    }

    #[test]
    fn sequence_cursor_saturates_at_end() {
        let mut sequence = ToolExecutionSequence::new(Arc::from(vec![step(&["a"]), step(&["b"])]));
        assert_eq!(sequence.cursor(), 0);
        assert!(!sequence.is_in_progress());
        assert_eq!(sequence.current_step().map(|s| s.calls()[0].name()), Some("a"));

        sequence.advance();
        assert!(sequence.is_in_progress());
        assert_eq!(sequence.current_step().map(|s| s.calls()[0].name()), Some("b"));

        sequence.advance();
        sequence.advance();
        assert_eq!(sequence.cursor(), 2);
        assert!(sequence.is_exhausted());
        assert!(sequence.current_step().is_none());

        sequence.reset();
        assert_eq!(sequence.cursor(), 0);
        assert_eq!(sequence.len(), 2);
    }

    #[test]
    fn empty_sequence_is_exhausted_immediately() {
        let sequence = ToolExecutionSequence::empty();
        assert!(sequence.is_exhausted());
        assert!(!sequence.has_current_step());
    }

    #[test]
    fn steps_keep_duplicate_calls_in_order() {
        let step = step(&["lookup", "lookup", "forecast"]);
        let names: Vec<_> = step.calls().iter().map(ToolCallDefinition::name).collect();
        assert_eq!(names, ["lookup", "lookup", "forecast"]);
    }

    #[test]
    fn tool_call_ids_are_unique() {
        let mut definition = ToolCallDefinition::new("lookup");
        definition.insert_argument("name", json!("London"));

        let first = definition.to_tool_call();
        let second = definition.to_tool_call();
        assert_ne!(first.id, second.id);
        assert!(first.id.starts_with("call_"));
        assert_eq!(first.function.arguments, json!({"name": "London"}));
    }

    fn no_steps() -> Arc<[ToolExecutionStep]> {
        Arc::from(Vec::<ToolExecutionStep>::new())
    }

    fn custom() -> Arc<dyn ResponseGenerator> {
        Arc::new(FnGenerator(|_: &MockRequest, _: &str| MockResponse::ok("custom")))
    }

    #[test]
    fn plan_precedence() {
        let steps: Arc<[ToolExecutionStep]> = Arc::from(vec![step(&["a"])]);

        assert!(matches!(
            ResponsePlan::select(Some(custom()), &steps),
            ResponsePlan::Custom(_)
        ));
        assert!(matches!(ResponsePlan::select(None, &steps), ResponsePlan::ToolPlan(_)));
        assert!(matches!(ResponsePlan::select(None, &no_steps()), ResponsePlan::PlainText));
    }

    #[test]
    fn custom_plan_keeps_tool_steps() {
        let steps: Arc<[ToolExecutionStep]> = Arc::from(vec![step(&["a"]), step(&["b"])]);
        let plan = ResponsePlan::select(Some(custom()), &steps);
        let expectation = Expectation::new("q".into(), None, steps, plan, None);

        assert!(matches!(expectation.plan(), ResponsePlan::Custom(_)));
        let sequence = expectation.tool_sequence();
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence.current_step().map(|s| s.calls()[0].name()), Some("a"));
    }

    #[test]
    fn registry_first_match_wins() {
        let plain = |reply: &str| {
            Expectation::new("hi".into(), Some(reply.into()), no_steps(), ResponsePlan::PlainText, None)
        };
        let mut registry = ExpectationRegistry::new();
        registry.push(plain("first"));
        registry.push(plain("second"));

        assert_eq!(registry.find("hi").and_then(Expectation::reply), Some("first"));
        assert!(registry.find("Hi").is_none());
        assert_eq!(registry.len(), 2);
    }
}
