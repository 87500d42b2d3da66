use std::sync::Arc;

use application::repository::{
    ConversationRepository, MessageRepository, TokenBlacklist, UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Conversation, ConversationId, ConversationKind, ConversationParticipant, Message,
    MessageContent, MessageId, RepositoryError, RoomName, Timestamp, User, UserEmail, UserId,
    Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return RepositoryError::Conflict;
        }
    }
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

const USER_COLUMNS: &str = "id, username, email, password_hash, first_name, last_name, avatar, bio, \
     is_active, is_online, last_seen, created_at, updated_at";

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    avatar: Option<String>,
    bio: Option<String>,
    is_active: bool,
    is_online: bool,
    last_seen: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let username =
            Username::parse(value.username).map_err(|err| invalid_data(err.to_string()))?;
        let email = UserEmail::parse(value.email).map_err(|err| invalid_data(err.to_string()))?;
        let password = domain::PasswordHash::new(value.password_hash)
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(User {
            id: UserId::from(value.id),
            username,
            email,
            password,
            first_name: value.first_name,
            last_name: value.last_name,
            avatar: value.avatar,
            bio: value.bio,
            is_active: value.is_active,
            is_online: value.is_online,
            last_seen: value.last_seen,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    name: String,
    kind: String,
    created_at: DateTime<Utc>,
    last_message_at: Option<DateTime<Utc>>,
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = RepositoryError;

    fn try_from(value: ConversationRecord) -> Result<Self, Self::Error> {
        let name = RoomName::parse(value.name).map_err(|err| invalid_data(err.to_string()))?;
        let kind =
            ConversationKind::parse(&value.kind).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Conversation {
            id: ConversationId::from(value.id),
            name,
            kind,
            created_at: value.created_at,
            last_message_at: value.last_message_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ParticipantRecord {
    conversation_id: Uuid,
    user_id: Uuid,
    joined_at: DateTime<Utc>,
    last_read_at: Option<DateTime<Utc>>,
}

impl From<ParticipantRecord> for ConversationParticipant {
    fn from(value: ParticipantRecord) -> Self {
        ConversationParticipant {
            conversation_id: ConversationId::from(value.conversation_id),
            user_id: UserId::from(value.user_id),
            joined_at: value.joined_at,
            last_read_at: value.last_read_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    timestamp: DateTime<Utc>,
    is_read: bool,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        let mut message = Message::new(
            MessageId::from(value.id),
            ConversationId::from(value.conversation_id),
            UserId::from(value.sender_id),
            content,
            value.timestamp,
        );
        message.is_read = value.is_read;
        Ok(message)
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let sql = format!(
            r#"
            INSERT INTO users ({USER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {USER_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(Uuid::from(user.id))
            .bind(user.username.as_str())
            .bind(user.email.as_str())
            .bind(user.password.as_str())
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.avatar)
            .bind(&user.bio)
            .bind(user.is_active)
            .bind(user.is_online)
            .bind(user.last_seen)
            .bind(user.created_at)
            .bind(user.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn update(&self, user: User) -> Result<User, RepositoryError> {
        let sql = format!(
            r#"
            UPDATE users
            SET username = $2, email = $3, password_hash = $4, first_name = $5, last_name = $6,
                avatar = $7, bio = $8, is_active = $9, is_online = $10, last_seen = $11,
                updated_at = $12
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(Uuid::from(user.id))
            .bind(user.username.as_str())
            .bind(user.email.as_str())
            .bind(user.password.as_str())
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.avatar)
            .bind(&user.bio)
            .bind(user.is_active)
            .bind(user.is_online)
            .bind(user.last_seen)
            .bind(user.updated_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or(RepositoryError::NotFound)?;

        User::try_from(record)
    }

    async fn delete(&self, id: UserId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
    }

    async fn find_by_username(&self, username: Username) -> Result<Option<User>, RepositoryError> {
        self.find_one("username", username.as_str()).await
    }

    async fn find_by_email(&self, email: UserEmail) -> Result<Option<User>, RepositoryError> {
        self.find_one("email", email.as_str()).await
    }

    async fn search(&self, query: Option<String>) -> Result<Vec<User>, RepositoryError> {
        let pattern = query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", q.replace('%', "\\%").replace('_', "\\_")));

        let records = match pattern {
            Some(pattern) => {
                let sql = format!(
                    r#"
                    SELECT {USER_COLUMNS} FROM users
                    WHERE username ILIKE $1 OR email ILIKE $1
                       OR first_name ILIKE $1 OR last_name ILIKE $1
                    ORDER BY username
                    "#
                );
                sqlx::query_as::<_, UserRecord>(&sql)
                    .bind(pattern)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY username");
                sqlx::query_as::<_, UserRecord>(&sql)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }

    async fn set_online(
        &self,
        id: UserId,
        online: bool,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE users SET is_online = $2, last_seen = $3, updated_at = $3 WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .bind(online)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn create(&self, conversation: Conversation) -> Result<Conversation, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            INSERT INTO conversations (id, name, kind, created_at, last_message_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, kind, created_at, last_message_at
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(conversation.name.as_str())
        .bind(conversation.kind.as_str())
        .bind(conversation.created_at)
        .bind(conversation.last_message_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Conversation::try_from(record)
    }

    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"SELECT id, name, kind, created_at, last_message_at FROM conversations WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Conversation::try_from).transpose()
    }

    async fn find_by_name(&self, name: RoomName) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"SELECT id, name, kind, created_at, last_message_at FROM conversations WHERE name = $1"#,
        )
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Conversation::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<Conversation>, RepositoryError> {
        let records = sqlx::query_as::<_, ConversationRecord>(
            r#"
            SELECT id, name, kind, created_at, last_message_at FROM conversations
            ORDER BY last_message_at DESC NULLS LAST, created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Conversation::try_from).collect()
    }

    async fn add_participant(
        &self,
        participant: ConversationParticipant,
    ) -> Result<ConversationParticipant, RepositoryError> {
        let record = sqlx::query_as::<_, ParticipantRecord>(
            r#"
            INSERT INTO conversation_participants (conversation_id, user_id, joined_at, last_read_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (conversation_id, user_id)
            DO UPDATE SET last_read_at = EXCLUDED.last_read_at
            RETURNING conversation_id, user_id, joined_at, last_read_at
            "#,
        )
        .bind(Uuid::from(participant.conversation_id))
        .bind(Uuid::from(participant.user_id))
        .bind(participant.joined_at)
        .bind(participant.last_read_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn list_participants(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ConversationParticipant>, RepositoryError> {
        let records = sqlx::query_as::<_, ParticipantRecord>(
            r#"
            SELECT conversation_id, user_id, joined_at, last_read_at
            FROM conversation_participants
            WHERE conversation_id = $1
            ORDER BY joined_at
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Into::into).collect())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, timestamp, is_read)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, conversation_id, sender_id, content, timestamp, is_read
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .bind(message.timestamp)
        .bind(message.is_read)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query("UPDATE conversations SET last_message_at = $2 WHERE id = $1")
            .bind(Uuid::from(message.conversation_id))
            .bind(message.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Message::try_from(record)
    }

    async fn list_recent(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, conversation_id, sender_id, content, timestamp, is_read FROM (
                SELECT id, conversation_id, sender_id, content, timestamp, is_read
                FROM messages
                WHERE conversation_id = $1
                ORDER BY timestamp DESC
                LIMIT $2
            ) recent
            ORDER BY timestamp ASC
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn last_message(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, conversation_id, sender_id, content, timestamp, is_read
            FROM messages
            WHERE conversation_id = $1
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(Uuid::from(conversation_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }
}

#[derive(Clone)]
pub struct PgTokenBlacklist {
    pool: PgPool,
}

impl PgTokenBlacklist {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenBlacklist for PgTokenBlacklist {
    async fn revoke(&self, jti: Uuid, expires_at: Timestamp) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM token_blacklist WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO token_blacklist (jti, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (jti) DO NOTHING
            "#,
        )
        .bind(jti)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn is_revoked(&self, jti: Uuid) -> Result<bool, RepositoryError> {
        let found: Option<(Uuid,)> =
            sqlx::query_as("SELECT jti FROM token_blacklist WHERE jti = $1 AND expires_at > NOW()")
                .bind(jti)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        Ok(found.is_some())
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub conversation_repository: Arc<PgConversationRepository>,
    pub message_repository: Arc<PgMessageRepository>,
    pub token_blacklist: Arc<PgTokenBlacklist>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            conversation_repository: Arc::new(PgConversationRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            token_blacklist: Arc::new(PgTokenBlacklist::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
