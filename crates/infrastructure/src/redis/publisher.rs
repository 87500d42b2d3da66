//! Redis 消息发布者
//!
//! 把 [`ChatEvent`] 包装成 [`Envelope`] 发布到房间频道 `<prefix><room>`。
//! 发布失败不重试，由调用方决定如何处理。

use domain::ChatEvent;
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::error::{RedisError, RedisResult};

/// 跨节点传输的事件信封，`origin` 标识发布节点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: Uuid,
    pub event: ChatEvent,
}

impl Envelope {
    pub fn encode(&self) -> RedisResult<String> {
        serde_json::to_string(self).map_err(|e| RedisError::SerializationError {
            message: e.to_string(),
        })
    }

    pub fn decode(payload: &str) -> RedisResult<Self> {
        serde_json::from_str(payload).map_err(|e| RedisError::DeserializationError {
            message: e.to_string(),
        })
    }
}

pub fn room_channel(prefix: &str, room: &str) -> String {
    format!("{prefix}{room}")
}

/// Redis 发布者
#[derive(Clone)]
pub struct RedisPublisher {
    connection: ConnectionManager,
    prefix: String,
    origin: Uuid,
}

impl RedisPublisher {
    pub fn new(connection: ConnectionManager, prefix: impl Into<String>, origin: Uuid) -> Self {
        Self {
            connection,
            prefix: prefix.into(),
            origin,
        }
    }

    /// 发布到房间频道，返回收到消息的 Redis 订阅者数量（即在线节点数）。
    pub async fn publish(&self, event: ChatEvent) -> RedisResult<usize> {
        let channel = room_channel(&self.prefix, event.room_id.as_str());
        let payload = Envelope {
            origin: self.origin,
            event,
        }
        .encode()?;

        let mut connection = self.connection.clone();
        let receivers: usize =
            connection
                .publish(&channel, payload)
                .await
                .map_err(|e| RedisError::PublishError {
                    message: format!("发布到频道 {channel} 失败: {e}"),
                })?;

        debug!(channel = %channel, receivers, "published room event");
        Ok(receivers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::RoomName;

    #[test]
    fn envelope_carries_origin_and_event() {
        let origin = Uuid::new_v4();
        let event = ChatEvent::new(
            RoomName::parse("general").expect("room"),
            "alice",
            "hello",
            Utc::now(),
        );
        let payload = Envelope {
            origin,
            event: event.clone(),
        }
        .encode()
        .expect("encode");

        let value: serde_json::Value = serde_json::from_str(&payload).expect("json");
        assert_eq!(value["event"]["room_id"], "general");
        assert_eq!(value["event"]["sender_username"], "alice");

        let decoded = Envelope::decode(&payload).expect("decode");
        assert_eq!(decoded.origin, origin);
        assert_eq!(decoded.event, event);
    }

    #[test]
    fn envelope_with_invalid_room_is_rejected() {
        let payload = format!(
            r#"{{"origin":"{}","event":{{"room_id":"bad room","sender_username":"a","message_body":"b","server_timestamp":"2024-01-01T00:00:00Z"}}}}"#,
            Uuid::new_v4()
        );
        assert!(matches!(
            Envelope::decode(&payload),
            Err(RedisError::DeserializationError { .. })
        ));
    }

    #[test]
    fn channel_uses_prefix() {
        assert_eq!(room_channel("chat_", "general"), "chat_general");
    }
}
