//! 内存存储
//!
//! 未配置数据库时使用，也用于集成测试。语义与 Postgres 实现保持一致：
//! 用户名/邮箱/房间名唯一，消息写入会刷新会话的 `last_message_at`。

use std::{collections::HashMap, sync::Arc};

use application::repository::{
    ConversationRepository, MessageRepository, TokenBlacklist, UserRepository,
};
use async_trait::async_trait;
use chrono::Utc;
use domain::{
    Conversation, ConversationId, ConversationParticipant, Message, RepositoryError, RoomName,
    Timestamp, User, UserEmail, UserId, Username,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    conversations: HashMap<ConversationId, Conversation>,
    participants: Vec<ConversationParticipant>,
    messages: Vec<Message>,
    revoked: HashMap<Uuid, Timestamp>,
}

/// 所有仓储共享同一份表，保证跨仓储写入（例如消息 + 会话时间戳）原子可见。
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_repository(&self) -> Arc<dyn UserRepository> {
        Arc::new(self.clone())
    }

    pub fn conversation_repository(&self) -> Arc<dyn ConversationRepository> {
        Arc::new(self.clone())
    }

    pub fn message_repository(&self) -> Arc<dyn MessageRepository> {
        Arc::new(self.clone())
    }

    pub fn token_blacklist(&self) -> Arc<dyn TokenBlacklist> {
        Arc::new(self.clone())
    }

    pub async fn message_count(&self) -> usize {
        self.tables.read().await.messages.len()
    }

    pub async fn revoked_count(&self) -> usize {
        self.tables.read().await.revoked.len()
    }
}

fn is_taken(tables: &Tables, user: &User) -> bool {
    tables.users.values().any(|other| {
        other.id != user.id && (other.username == user.username || other.email == user.email)
    })
}

#[async_trait]
impl UserRepository for InMemoryStorage {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.id) || is_taken(&tables, &user) {
            return Err(RepositoryError::Conflict);
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user.id) {
            return Err(RepositoryError::NotFound);
        }
        if is_taken(&tables, &user) {
            return Err(RepositoryError::Conflict);
        }
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn delete(&self, id: UserId) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.users.remove(&id).is_none() {
            return Err(RepositoryError::NotFound);
        }
        // 与外键 ON DELETE CASCADE 一致
        tables.participants.retain(|p| p.user_id != id);
        tables.messages.retain(|m| m.sender_id != id);
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: Username) -> Result<Option<User>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: UserEmail) -> Result<Option<User>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|user| user.email == email).cloned())
    }

    async fn search(&self, query: Option<String>) -> Result<Vec<User>, RepositoryError> {
        let tables = self.tables.read().await;
        let query = query.unwrap_or_default();
        let mut users: Vec<User> = tables
            .users
            .values()
            .filter(|user| user.matches_search(&query))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.as_str().cmp(b.username.as_str()));
        Ok(users)
    }

    async fn set_online(
        &self,
        id: UserId,
        online: bool,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let user = tables.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        user.set_online(online, at);
        Ok(())
    }
}

#[async_trait]
impl ConversationRepository for InMemoryStorage {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let mut tables = self.tables.write().await;
        let taken = tables
            .conversations
            .values()
            .any(|other| other.id == conversation.id || other.name == conversation.name);
        if taken {
            return Err(RepositoryError::Conflict);
        }
        tables
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.tables.read().await.conversations.get(&id).cloned())
    }

    async fn find_by_name(&self, name: RoomName) -> Result<Option<Conversation>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .conversations
            .values()
            .find(|conversation| conversation.name == name)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Conversation>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut items: Vec<Conversation> = tables.conversations.values().cloned().collect();
        // 最近有消息的排前面，其余按创建时间倒序
        items.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(items)
    }

    async fn add_participant(
        &self,
        participant: ConversationParticipant,
    ) -> Result<ConversationParticipant, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables
            .conversations
            .contains_key(&participant.conversation_id)
            || !tables.users.contains_key(&participant.user_id)
        {
            return Err(RepositoryError::NotFound);
        }
        if let Some(existing) = tables.participants.iter_mut().find(|p| {
            p.conversation_id == participant.conversation_id && p.user_id == participant.user_id
        }) {
            existing.last_read_at = participant.last_read_at;
            return Ok(existing.clone());
        }
        tables.participants.push(participant.clone());
        Ok(participant)
    }

    async fn list_participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ConversationParticipant>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .participants
            .iter()
            .filter(|p| p.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageRepository for InMemoryStorage {
    async fn create(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&message.sender_id) {
            return Err(RepositoryError::NotFound);
        }
        let conversation = tables
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or(RepositoryError::NotFound)?;
        conversation.touch(message.timestamp);
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn list_recent(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut items: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        // 稳定排序，同一时间戳保持写入顺序
        items.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let skip = items.len().saturating_sub(limit as usize);
        Ok(items.split_off(skip))
    }

    async fn last_message(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Message>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
            .cloned())
    }
}

#[async_trait]
impl TokenBlacklist for InMemoryStorage {
    async fn revoke(&self, jti: Uuid, expires_at: Timestamp) -> Result<(), RepositoryError> {
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        // 过期的令牌本身已无法通过校验，顺手清掉
        tables.revoked.retain(|_, until| *until > now);
        tables.revoked.insert(jti, expires_at);
        Ok(())
    }

    async fn is_revoked(&self, jti: Uuid) -> Result<bool, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .revoked
            .get(&jti)
            .is_some_and(|until| *until > Utc::now()))
    }
}
