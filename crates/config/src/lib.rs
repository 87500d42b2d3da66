//! 统一配置中心
//!
//! 配置按以下顺序叠加（后者覆盖前者）：
//! 1. 内置默认值
//! 2. YAML 配置文件（`ROOM_RELAY_CONFIG` 指定，默认 `config.yaml`，不存在则跳过）
//! 3. `ROOM_RELAY_` 前缀的环境变量，嵌套字段用 `__` 分隔，例如
//!    `ROOM_RELAY_JWT__SECRET`

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "ROOM_RELAY_";
pub const CONFIG_PATH_ENV: &str = "ROOM_RELAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEV_JWT_SECRET: &str = "dev-secret-key-not-for-production-use-minimum-32-chars";

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub relay: RelayConfig,
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub bcrypt_cost: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            bcrypt_cost: None,
        }
    }
}

/// 数据库配置；未设置 url 时使用内存存储
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// Redis 配置；设置 url 后房间广播跨进程共享
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub channel_prefix: String,
    pub reconnect_delay_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            channel_prefix: "chat_".to_string(),
            reconnect_delay_ms: 1_000,
        }
    }
}

/// access token 最长一周
pub const MAX_ACCESS_TTL_MINUTES: i64 = 7 * 24 * 60;
/// refresh token 最长一年
pub const MAX_REFRESH_TTL_HOURS: i64 = 365 * 24;

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: DEV_JWT_SECRET.to_string(),
            access_ttl_minutes: 60,
            refresh_ttl_hours: 24 * 7,
        }
    }
}

/// 实时中继配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 每个订阅者的事件缓冲上限，溢出即断开
    pub subscriber_buffer: usize,
    /// 每个连接待持久化帧的队列长度
    pub frame_queue: usize,
    /// 单条消息最大字节数
    pub max_message_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            frame_queue: 32,
            max_message_len: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,tower_http=info".to_string(),
        }
    }
}

impl AppConfig {
    /// 默认值 + 配置文件 + 环境变量
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::figment(Some(Path::new(&path)))
            .extract()
            .map_err(|err| ConfigError::Load(err.to_string()))
    }

    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(file) = file.filter(|path| path.exists()) {
            figment = figment.merge(Yaml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.jwt.secret == DEV_JWT_SECRET
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }
        if !(1..=MAX_ACCESS_TTL_MINUTES).contains(&self.jwt.access_ttl_minutes) {
            return Err(ConfigError::InvalidJwtConfig(format!(
                "access_ttl_minutes must be between 1 and {MAX_ACCESS_TTL_MINUTES}"
            )));
        }
        if !(1..=MAX_REFRESH_TTL_HOURS).contains(&self.jwt.refresh_ttl_hours) {
            return Err(ConfigError::InvalidJwtConfig(format!(
                "refresh_ttl_hours must be between 1 and {MAX_REFRESH_TTL_HOURS}"
            )));
        }

        if let Some(url) = &self.database.url {
            if url.is_empty() {
                return Err(ConfigError::InvalidDatabaseUrl(
                    "Database URL cannot be empty".to_string(),
                ));
            }
            if self.database.max_connections == 0 {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "Max connections must be greater than 0".to_string(),
                ));
            }
        }

        if let Some(cost) = self.server.bcrypt_cost {
            if !(4..=31).contains(&cost) {
                return Err(ConfigError::InvalidServerConfig(
                    "bcrypt cost must be between 4 and 31".to_string(),
                ));
            }
        }

        if self.relay.subscriber_buffer == 0 || self.relay.frame_queue == 0 {
            return Err(ConfigError::InvalidRelayConfig(
                "relay buffers must be greater than 0".to_string(),
            ));
        }
        if self.relay.max_message_len == 0 {
            return Err(ConfigError::InvalidRelayConfig(
                "max_message_len must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid JWT configuration: {0}")]
    InvalidJwtConfig(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid relay configuration: {0}")]
    InvalidRelayConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.database.url.is_none());
        assert!(config.redis.url.is_none());
        assert_eq!(config.relay.subscriber_buffer, 256);
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert!(config.uses_dev_secret());
    }

    #[test]
    fn env_overrides_nested_fields() {
        Jail::expect_with(|jail| {
            jail.set_env("ROOM_RELAY_SERVER__PORT", "9000");
            jail.set_env("ROOM_RELAY_RELAY__SUBSCRIBER_BUFFER", "8");
            jail.set_env("ROOM_RELAY_DATABASE__URL", "postgres://db/relay");

            let config: AppConfig = AppConfig::figment(None).extract()?;
            assert_eq!(config.server.port, 9000);
            assert_eq!(config.relay.subscriber_buffer, 8);
            assert_eq!(config.database.url.as_deref(), Some("postgres://db/relay"));
            Ok(())
        });
    }

    #[test]
    fn yaml_file_is_merged_below_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "relay.yaml",
                r#"
server:
  port: 7000
redis:
  url: redis://cache:6379
jwt:
  secret: file-secret-that-is-long-enough-for-validation
"#,
            )?;
            jail.set_env("ROOM_RELAY_SERVER__PORT", "7001");

            let config: AppConfig =
                AppConfig::figment(Some(Path::new("relay.yaml"))).extract()?;
            assert_eq!(config.server.port, 7001);
            assert_eq!(config.redis.url.as_deref(), Some("redis://cache:6379"));
            assert_eq!(config.redis.channel_prefix, "chat_");
            assert!(!config.uses_dev_secret());
            Ok(())
        });
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.jwt.secret = "short".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.relay.subscriber_buffer = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRelayConfig(_))
        ));

        let mut config = AppConfig::default();
        config.jwt.access_ttl_minutes = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidJwtConfig(_))
        ));

        let mut config = AppConfig::default();
        config.jwt.refresh_ttl_hours = i64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidJwtConfig(_))
        ));

        let mut config = AppConfig::default();
        config.jwt.access_ttl_minutes = MAX_ACCESS_TTL_MINUTES;
        config.jwt.refresh_ttl_hours = MAX_REFRESH_TTL_HOURS;
        assert!(config.validate().is_ok());

        let mut config = AppConfig::default();
        config.server.bcrypt_cost = Some(40);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.url = Some("postgres://db/relay".to_string());
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }
}
