//! Client actions, sent as the JSON frames a browser would send
#![allow(dead_code)] // Test utilities may not all be used in every test

use serde_json::json;

use anony_chat::websockets::MessageHandler;

use super::setup::TestSetup;

impl TestSetup {
    pub async fn send_frame(&mut self, user_id: &str, frame: serde_json::Value) {
        self.client(user_id)
            .gateway
            .handle_message(frame.to_string())
            .await;
    }

    pub async fn join(&mut self, user_id: &str, room_id: &str) {
        self.send_frame(user_id, json!({"type": "join-room", "payload": {"roomId": room_id}}))
            .await;
    }

    pub async fn join_since(&mut self, user_id: &str, room_id: &str, since_id: i64) {
        self.send_frame(
            user_id,
            json!({"type": "join-room", "payload": {"roomId": room_id, "sinceId": since_id}}),
        )
        .await;
    }

    pub async fn send(&mut self, user_id: &str, room_id: &str, content: &str) {
        self.send_frame(
            user_id,
            json!({"type": "send-message", "payload": {"roomId": room_id, "content": content}}),
        )
        .await;
    }

    pub async fn leave(&mut self, user_id: &str, room_id: &str) {
        self.send_frame(user_id, json!({"type": "leave-room", "payload": {"roomId": room_id}}))
            .await;
    }

    /// Sends `count` numbered messages from `user_id`
    pub async fn send_many(&mut self, user_id: &str, room_id: &str, count: usize) {
        for i in 1..=count {
            self.send(user_id, room_id, &format!("{user_id} #{i}")).await;
        }
    }
}
