use std::{sync::Arc, time::Duration};

use application::{
    ConversationRepository, LocalRoomBus, MessageRepository, PasswordHasher, RoomBus,
    TokenBlacklist, UserRepository,
};
use config::AppConfig;
use thiserror::Error;

use crate::{
    memory::InMemoryStorage,
    migrations::MIGRATOR,
    password::BcryptPasswordHasher,
    redis::{RedisBusConfig, RedisError, RedisRoomBus},
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Clone)]
pub struct InfrastructureConfig {
    /// 为空时使用内存存储
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub bcrypt_cost: Option<u32>,
    pub subscriber_buffer: usize,
    pub redis: Option<RedisBusConfig>,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            bcrypt_cost: None,
            subscriber_buffer: application::DEFAULT_SUBSCRIBER_BUFFER,
            redis: None,
        }
    }
}

impl From<&AppConfig> for InfrastructureConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            database_url: config.database.url.clone(),
            max_connections: config.database.max_connections,
            bcrypt_cost: config.server.bcrypt_cost,
            subscriber_buffer: config.relay.subscriber_buffer,
            redis: config.redis.url.as_ref().map(|url| RedisBusConfig {
                url: url.clone(),
                channel_prefix: config.redis.channel_prefix.clone(),
                reconnect_delay: Duration::from_millis(config.redis.reconnect_delay_ms),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] RedisError),
}

/// 组装好的适配器集合
#[derive(Clone)]
pub struct Infrastructure {
    pub user_repository: Arc<dyn UserRepository>,
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub token_blacklist: Arc<dyn TokenBlacklist>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub bus: Arc<dyn RoomBus>,
}

impl Infrastructure {
    pub async fn connect(config: InfrastructureConfig) -> Result<Self, InfrastructureError> {
        let password_hasher = Arc::new(BcryptPasswordHasher::new(config.bcrypt_cost));
        let local_bus = Arc::new(LocalRoomBus::new(config.subscriber_buffer));

        let bus: Arc<dyn RoomBus> = match config.redis {
            Some(redis) => Arc::new(RedisRoomBus::connect(redis, local_bus).await?),
            None => {
                tracing::info!("using in-process room bus");
                local_bus
            }
        };

        let infrastructure = match config.database_url {
            Some(url) => {
                let pool = create_pg_pool(&url, config.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!("connected to postgres");
                let storage = PgStorage::new(pool);
                Self {
                    user_repository: storage.user_repository,
                    conversation_repository: storage.conversation_repository,
                    message_repository: storage.message_repository,
                    token_blacklist: storage.token_blacklist,
                    password_hasher,
                    bus,
                }
            }
            None => {
                tracing::warn!("no database configured, using in-memory storage");
                Self::in_memory(InMemoryStorage::new(), password_hasher, bus)
            }
        };

        Ok(infrastructure)
    }

    pub fn in_memory(
        storage: InMemoryStorage,
        password_hasher: Arc<dyn PasswordHasher>,
        bus: Arc<dyn RoomBus>,
    ) -> Self {
        Self {
            user_repository: storage.user_repository(),
            conversation_repository: storage.conversation_repository(),
            message_repository: storage.message_repository(),
            token_blacklist: storage.token_blacklist(),
            password_hasher,
            bus,
        }
    }
}
