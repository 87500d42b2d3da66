use crate::value_objects::{ConversationId, MessageContent, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub timestamp: Timestamp,
    pub is_read: bool,
}

impl Message {
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: MessageContent,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id,
            content,
            timestamp,
            is_read: false,
        }
    }

    pub fn mark_read(&mut self) {
        self.is_read = true;
    }
}
