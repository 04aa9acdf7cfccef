//! Per-conversation tool sequence state.
//!
//! A fresh turn opens a conversation with its own cursor and binds every tool
//! call id it hands out to that conversation. A continuation is re-associated
//! through the first tool result whose `tool_call_id` we issued; clients that
//! invent their own ids fall back to the newest conversation for the trigger.
//!
//! A finished conversation is dropped, with its ids, once it is no longer the
//! newest for its trigger. Unfinished ones are dropped oldest first when the
//! store is over capacity.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::expectation::{Expectation, ToolExecutionSequence, ToolExecutionStep};

pub type ConversationId = u64;

/// Conversations kept before the oldest is dropped.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// The step now under the cursor.
    Step(ToolExecutionStep),
    Exhausted,
}

#[derive(Debug)]
struct Conversation {
    trigger: String,
    sequence: ToolExecutionSequence,
    tool_calls: Vec<String>,
}

#[derive(Debug)]
struct ConversationTable {
    conversations: BTreeMap<ConversationId, Conversation>,
    by_tool_call: HashMap<String, ConversationId>,
    latest_by_trigger: HashMap<String, ConversationId>,
    next_id: ConversationId,
    capacity: usize,
}

impl ConversationTable {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            conversations: BTreeMap::new(),
            by_tool_call: HashMap::new(),
            latest_by_trigger: HashMap::new(),
            next_id: 0,
            capacity: capacity.max(1),
        }
    }

    fn open(&mut self, expectation: &Expectation) -> ConversationId {
        let trigger = expectation.trigger();
        if let Some(previous) = self.latest_by_trigger.get(trigger).copied() {
            let finished = self
                .conversations
                .get(&previous)
                .is_some_and(|conversation| conversation.sequence.is_exhausted());
            if finished {
                self.evict(previous);
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.conversations.insert(
            id,
            Conversation {
                trigger: trigger.to_string(),
                sequence: expectation.tool_sequence(),
                tool_calls: Vec::new(),
            },
        );
        self.latest_by_trigger.insert(trigger.to_string(), id);

        // ids grow monotonically, so the first key is the oldest conversation
        while self.conversations.len() > self.capacity {
            match self.conversations.keys().next().copied() {
                Some(oldest) => {
                    tracing::debug!(conversation = oldest, "conversation store full, dropping oldest");
                    self.evict(oldest);
                }
                None => break,
            }
        }
        id
    }

    fn evict(&mut self, id: ConversationId) {
        let Some(conversation) = self.conversations.remove(&id) else {
            return;
        };
        for call_id in &conversation.tool_calls {
            if self.by_tool_call.get(call_id) == Some(&id) {
                self.by_tool_call.remove(call_id);
            }
        }
        if self.latest_by_trigger.get(&conversation.trigger) == Some(&id) {
            self.latest_by_trigger.remove(&conversation.trigger);
        }
    }

    fn is_latest(&self, trigger: &str, id: ConversationId) -> bool {
        self.latest_by_trigger.get(trigger) == Some(&id)
    }

    fn locate<'a>(
        &self,
        trigger: &str,
        tool_call_ids: impl IntoIterator<Item = &'a str>,
    ) -> Option<ConversationId> {
        tool_call_ids
            .into_iter()
            .filter_map(|call_id| self.by_tool_call.get(call_id))
            .copied()
            .find(|id| {
                self.conversations
                    .get(id)
                    .is_some_and(|conversation| conversation.trigger == trigger)
            })
            .or_else(|| self.latest_by_trigger.get(trigger).copied())
    }
}

#[derive(Debug)]
pub struct ConversationStore {
    inner: Mutex<ConversationTable>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A store holding at most `capacity` conversations (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(ConversationTable::with_capacity(capacity)),
        }
    }

    fn table(&self) -> MutexGuard<'_, ConversationTable> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a conversation at cursor 0. It becomes the trigger's newest conversation.
    pub fn open(&self, expectation: &Expectation) -> ConversationId {
        self.table().open(expectation)
    }

    pub fn bind_tool_calls<I, S>(&self, id: ConversationId, call_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = self.table();
        if !table.conversations.contains_key(&id) {
            return;
        }
        let call_ids: Vec<String> = call_ids.into_iter().map(Into::into).collect();
        for call_id in &call_ids {
            table.by_tool_call.insert(call_id.clone(), id);
        }
        if let Some(conversation) = table.conversations.get_mut(&id) {
            conversation.tool_calls.extend(call_ids);
        }
    }

    /// Finds the continuation's conversation (opening one if the trigger has none)
    /// and moves its cursor forward by exactly one step. A conversation that
    /// finishes while another is newest for its trigger is dropped.
    pub fn advance<'a>(
        &self,
        expectation: &Expectation,
        tool_call_ids: impl IntoIterator<Item = &'a str>,
    ) -> (ConversationId, Advance) {
        let mut table = self.table();
        let id = match table.locate(expectation.trigger(), tool_call_ids) {
            Some(id) => id,
            None => table.open(expectation),
        };

        let outcome = match table.conversations.get_mut(&id) {
            Some(conversation) => {
                conversation.sequence.advance();
                match conversation.sequence.current_step() {
                    Some(step) => Advance::Step(step.clone()),
                    None => Advance::Exhausted,
                }
            }
            None => Advance::Exhausted,
        };

        if outcome == Advance::Exhausted && !table.is_latest(expectation.trigger(), id) {
            table.evict(id);
        }

        (id, outcome)
    }

    pub fn cursor(&self, id: ConversationId) -> Option<usize> {
        self.table()
            .conversations
            .get(&id)
            .map(|conversation| conversation.sequence.cursor())
    }

    pub fn latest(&self, trigger: &str) -> Option<ConversationId> {
        self.table().latest_by_trigger.get(trigger).copied()
    }

    pub fn len(&self) -> usize {
        self.table().conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tool-call ids currently bound to a conversation.
    pub fn bound_tool_calls(&self) -> usize {
        self.table().by_tool_call.len()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MockBuilder;
    use crate::expectation::ExpectationRegistry;

    fn registry() -> ExpectationRegistry {
        MockBuilder::new()
            .when("weather")
            .invoke_tool("geo")
            .and_then_invoke_tool("forecast")
            .end()
            .when("hello")
            .reply_with("hi")
            .build()
            .expect("valid registry")
    }

    fn step_name(advance: &Advance) -> Option<&str> {
        match advance {
            Advance::Step(step) => step.calls().first().map(|call| call.name()),
            Advance::Exhausted => None,
        }
    }

    #[test]
    fn advances_one_step_per_continuation() {
        let registry = registry();
        let weather = registry.find("weather").unwrap();
        let store = ConversationStore::new();

        let id = store.open(weather);
        assert_eq!(store.cursor(id), Some(0));

        let (resumed, outcome) = store.advance(weather, []);
        assert_eq!(resumed, id);
        assert_eq!(step_name(&outcome), Some("forecast"));

        let (_, outcome) = store.advance(weather, []);
        assert_eq!(outcome, Advance::Exhausted);
        let (_, outcome) = store.advance(weather, []);
        assert_eq!(outcome, Advance::Exhausted);
        assert_eq!(store.cursor(id), Some(2));
    }

    #[test]
    fn reopening_a_trigger_starts_from_zero() {
        let registry = registry();
        let weather = registry.find("weather").unwrap();
        let store = ConversationStore::new();

        store.open(weather);
        store.advance(weather, []);
        store.advance(weather, []);

        let fresh = store.open(weather);
        assert_eq!(store.cursor(fresh), Some(0));
        assert_eq!(store.latest("weather"), Some(fresh));
    }

    #[test]
    fn bound_tool_calls_keep_conversations_apart() {
        let registry = registry();
        let weather = registry.find("weather").unwrap();
        let store = ConversationStore::new();

        let first = store.open(weather);
        store.bind_tool_calls(first, ["call_first"]);
        let second = store.open(weather);
        store.bind_tool_calls(second, ["call_second"]);

        let (id, outcome) = store.advance(weather, ["call_first"]);
        assert_eq!(id, first);
        assert_eq!(step_name(&outcome), Some("forecast"));
        assert_eq!(store.cursor(second), Some(0));

        let (id, outcome) = store.advance(weather, ["call_second"]);
        assert_eq!(id, second);
        assert_eq!(step_name(&outcome), Some("forecast"));
    }

    #[test]
    fn unknown_ids_fall_back_to_latest_conversation() {
        let registry = registry();
        let weather = registry.find("weather").unwrap();
        let store = ConversationStore::new();

        let id = store.open(weather);
        let (resumed, _) = store.advance(weather, ["made-up-id"]);
        assert_eq!(resumed, id);
    }

    #[test]
    fn finished_conversations_are_dropped_when_replaced() {
        let registry = registry();
        let weather = registry.find("weather").unwrap();
        let store = ConversationStore::new();

        for round in 0..500 {
            let id = store.open(weather);
            store.bind_tool_calls(id, [format!("call_{round}_a")]);
            store.advance(weather, [format!("call_{round}_a").as_str()]);
            store.bind_tool_calls(id, [format!("call_{round}_b")]);
            let (_, outcome) = store.advance(weather, [format!("call_{round}_b").as_str()]);
            assert_eq!(outcome, Advance::Exhausted);
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.bound_tool_calls(), 2);
    }

    #[test]
    fn finished_older_conversation_is_dropped_right_away() {
        let registry = registry();
        let weather = registry.find("weather").unwrap();
        let store = ConversationStore::new();

        let first = store.open(weather);
        store.bind_tool_calls(first, ["call_first"]);
        let second = store.open(weather);

        store.advance(weather, ["call_first"]);
        let (id, outcome) = store.advance(weather, ["call_first"]);
        assert_eq!((id, outcome), (first, Advance::Exhausted));
        assert_eq!(store.cursor(first), None);
        assert_eq!(store.bound_tool_calls(), 0);
        assert_eq!(store.latest("weather"), Some(second));
    }

    #[test]
    fn oldest_unfinished_conversation_is_dropped_over_capacity() {
        let registry = registry();
        let weather = registry.find("weather").unwrap();
        let store = ConversationStore::with_capacity(2);

        let oldest = store.open(weather);
        store.bind_tool_calls(oldest, ["call_oldest"]);
        let middle = store.open(weather);
        let newest = store.open(weather);

        assert_eq!(store.len(), 2);
        assert_eq!(store.cursor(oldest), None);
        assert_eq!(store.cursor(middle), Some(0));
        assert_eq!(store.bound_tool_calls(), 0);

        // the dropped conversation's id no longer resolves, so the newest one is resumed
        let (id, _) = store.advance(weather, ["call_oldest"]);
        assert_eq!(id, newest);
    }

    #[test]
    fn continuation_without_fresh_turn_opens_a_conversation() {
        let registry = registry();
        let hello = registry.find("hello").unwrap();
        let store = ConversationStore::new();

        let (id, outcome) = store.advance(hello, []);
        assert_eq!(outcome, Advance::Exhausted);
        assert_eq!(store.cursor(id), Some(0));
        assert_eq!(store.len(), 1);
    }
}
