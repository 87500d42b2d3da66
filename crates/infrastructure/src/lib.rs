//! 基础设施层实现。
//!
//! 提供数据库与内存仓储、密码哈希、Redis 房间总线等适配器，实现应用层定义的端口。

pub mod builder;
pub mod memory;
pub mod migrations;
pub mod password;
pub mod redis;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError};
pub use memory::InMemoryStorage;
pub use migrations::MIGRATOR;
pub use password::BcryptPasswordHasher;
pub use crate::redis::{Envelope, RedisBusConfig, RedisError, RedisRoomBus};
pub use repository::{
    create_pg_pool, PgConversationRepository, PgMessageRepository, PgStorage, PgTokenBlacklist,
    PgUserRepository,
};
