use domain::{Conversation, ConversationKind, ConversationParticipant, Message, Timestamp, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDto {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub is_online: bool,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: Uuid::from(user.id),
            username: user.username.as_str().to_owned(),
            email: user.email.as_str().to_owned(),
            avatar: user.avatar.clone(),
            bio: user.bio.clone(),
            is_online: user.is_online,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            full_name: user.full_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: Uuid,
    pub sender: UserDto,
    pub content: String,
    pub timestamp: Timestamp,
    pub is_read: bool,
}

impl MessageDto {
    pub fn new(message: &Message, sender: &User) -> Self {
        Self {
            id: Uuid::from(message.id),
            sender: UserDto::from(sender),
            content: message.content.as_str().to_owned(),
            timestamp: message.timestamp,
            is_read: message.is_read,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantDto {
    pub user: UserDto,
    pub joined_at: Timestamp,
    pub last_read_at: Option<Timestamp>,
}

impl ParticipantDto {
    pub fn new(participant: &ConversationParticipant, user: &User) -> Self {
        Self {
            user: UserDto::from(user),
            joined_at: participant.joined_at,
            last_read_at: participant.last_read_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDto {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub created_at: Timestamp,
    pub last_message_at: Option<Timestamp>,
    pub participants: Vec<ParticipantDto>,
    pub last_message: Option<MessageDto>,
}

impl ConversationDto {
    pub fn new(
        conversation: &Conversation,
        participants: Vec<ParticipantDto>,
        last_message: Option<MessageDto>,
    ) -> Self {
        Self {
            id: Uuid::from(conversation.id),
            name: conversation.name.as_str().to_owned(),
            kind: conversation.kind,
            created_at: conversation.created_at,
            last_message_at: conversation.last_message_at,
            participants,
            last_message,
        }
    }
}
