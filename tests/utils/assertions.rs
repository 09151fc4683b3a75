//! Test assertion helpers - fluent API for verifying what clients received
#![allow(dead_code)] // Test utilities may not all be used in every test

use anony_chat::{MessageModel, ServerMessage};

use super::setup::TestSetup;

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Consumes the events a client received since the last assertion
pub struct EventAssertion {
    user_id: String,
    events: Vec<ServerMessage>,
}

impl EventAssertion {
    pub fn for_client(setup: &mut TestSetup, user_id: &str) -> Self {
        let events = setup.client(user_id).take_events();
        Self {
            user_id: user_id.to_string(),
            events,
        }
    }

    pub fn received_nothing(self) {
        assert!(
            self.events.is_empty(),
            "{} should not have received anything, got {:?}",
            self.user_id,
            self.events
        );
    }

    /// Asserts the event kinds in order, e.g. `["room-history", "new-message"]`
    pub fn received_sequence(self, expected: &[&str]) -> Self {
        let kinds: Vec<_> = self.events.iter().map(kind).collect();
        assert_eq!(
            kinds, expected,
            "{} received the wrong event sequence",
            self.user_id
        );
        self
    }

    /// Contents of every `new-message` event, in delivery order
    pub fn new_message_contents(&self) -> Vec<String> {
        self.new_messages()
            .into_iter()
            .map(|message| message.content)
            .collect()
    }

    pub fn new_messages(&self) -> Vec<MessageModel> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ServerMessage::NewMessage(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Messages carried by the (single) `room-history` event
    pub fn history(&self) -> Vec<MessageModel> {
        let histories: Vec<_> = self
            .events
            .iter()
            .filter_map(|event| match event {
                ServerMessage::RoomHistory { messages, .. } => Some(messages.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            histories.len(),
            1,
            "{} should have received exactly one history replay",
            self.user_id
        );
        histories.into_iter().next().unwrap_or_default()
    }

    pub fn room_closed_count(&self, room_id: &str) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, ServerMessage::RoomClosed { room_id: id } if id == room_id))
            .count()
    }

    /// Asserts the last event is an error with `code` and returns its retryable flag
    pub fn received_error(self, code: &str) -> bool {
        match self.events.last() {
            Some(ServerMessage::Error {
                code: actual,
                retryable,
                ..
            }) => {
                assert_eq!(actual, code, "{} got the wrong error code", self.user_id);
                *retryable
            }
            other => panic!(
                "{} should have received error {code}, last event was {other:?}",
                self.user_id
            ),
        }
    }

    pub fn events(&self) -> &[ServerMessage] {
        &self.events
    }
}

pub fn kind(event: &ServerMessage) -> &'static str {
    match event {
        ServerMessage::NewMessage(_) => "new-message",
        ServerMessage::RoomHistory { .. } => "room-history",
        ServerMessage::RoomClosed { .. } => "room-closed",
        ServerMessage::Error { .. } => "error",
    }
}
