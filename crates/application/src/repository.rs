use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, ConversationParticipant, Message, RepositoryError, RoomName,
    Timestamp, User, UserEmail, UserId, Username,
};
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn update(&self, user: User) -> Result<User, RepositoryError>;
    async fn delete(&self, id: UserId) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(&self, username: Username) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: UserEmail) -> Result<Option<User>, RepositoryError>;
    // 按用户名排序；query 为空时返回全部
    async fn search(&self, query: Option<String>) -> Result<Vec<User>, RepositoryError>;
    async fn set_online(
        &self,
        id: UserId,
        online: bool,
        at: Timestamp,
    ) -> Result<(), RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError>;
    async fn find_by_id(&self, id: ConversationId)
        -> Result<Option<Conversation>, RepositoryError>;
    async fn find_by_name(&self, name: RoomName) -> Result<Option<Conversation>, RepositoryError>;
    async fn list(&self) -> Result<Vec<Conversation>, RepositoryError>;
    async fn add_participant(
        &self,
        participant: ConversationParticipant,
    ) -> Result<ConversationParticipant, RepositoryError>;
    async fn list_participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ConversationParticipant>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    // 保存消息，同时刷新会话的 last_message_at
    async fn create(&self, message: Message) -> Result<Message, RepositoryError>;

    // 最近的消息，按时间正序返回
    async fn list_recent(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn last_message(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Message>, RepositoryError>;
}

/// 已注销的 refresh token（按 jti 记录）。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    async fn revoke(&self, jti: Uuid, expires_at: Timestamp) -> Result<(), RepositoryError>;
    async fn is_revoked(&self, jti: Uuid) -> Result<bool, RepositoryError>;
}
