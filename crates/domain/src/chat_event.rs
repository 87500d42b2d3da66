//! 房间广播事件
//!
//! 由连接处理器在持久化成功后产生，投递给房间内所有订阅者（包括发送者本身）。

use serde::{Deserialize, Serialize};

use crate::value_objects::{RoomName, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub room_id: RoomName,
    pub sender_username: String,
    pub message_body: String,
    pub server_timestamp: Timestamp,
}

impl ChatEvent {
    pub fn new(
        room_id: RoomName,
        sender_username: impl Into<String>,
        message_body: impl Into<String>,
        server_timestamp: Timestamp,
    ) -> Self {
        Self {
            room_id,
            sender_username: sender_username.into(),
            message_body: message_body.into(),
            server_timestamp,
        }
    }
}
