//! 聊天中继系统核心领域模型
//!
//! 包含用户、会话、消息、房间广播事件等实体与值对象。

pub mod chat_event;
pub mod conversation;
pub mod errors;
pub mod message;
pub mod user;
pub mod value_objects;

pub use chat_event::ChatEvent;
pub use conversation::{Conversation, ConversationKind, ConversationParticipant};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::Message;
pub use user::{ProfileChanges, User};
pub use value_objects::{
    ConversationId, MessageContent, MessageId, PasswordHash, RoomName, Timestamp, UserEmail,
    UserId, Username,
};
