use crate::errors::DomainError;
use crate::value_objects::{ConversationId, RoomName, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Single,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Single => "single",
            ConversationKind::Group => "group",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "single" => Ok(ConversationKind::Single),
            "group" => Ok(ConversationKind::Group),
            other => Err(DomainError::invalid_argument(
                "type",
                format!("unknown conversation type '{other}'"),
            )),
        }
    }
}

/// 持久化的会话记录。房间名与实时广播分组一一对应。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub name: RoomName,
    pub kind: ConversationKind,
    pub created_at: Timestamp,
    pub last_message_at: Option<Timestamp>,
}

impl Conversation {
    pub fn new(
        id: ConversationId,
        name: RoomName,
        kind: ConversationKind,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            created_at,
            last_message_at: None,
        }
    }

    pub fn touch(&mut self, at: Timestamp) {
        self.last_message_at = Some(at);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConversationParticipant {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub joined_at: Timestamp,
    pub last_read_at: Option<Timestamp>,
}

impl ConversationParticipant {
    pub fn new(conversation_id: ConversationId, user_id: UserId, joined_at: Timestamp) -> Self {
        Self {
            conversation_id,
            user_id,
            joined_at,
            last_read_at: None,
        }
    }
}
