use async_trait::async_trait;
use domain::PasswordHash;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordHasherError {
    #[error("failed to hash password: {0}")]
    Hash(String),
    #[error("failed to verify password: {0}")]
    Verify(String),
}

impl PasswordHasherError {
    pub fn hash_error(message: impl Into<String>) -> Self {
        Self::Hash(message.into())
    }

    pub fn verify_error(message: impl Into<String>) -> Self {
        Self::Verify(message.into())
    }
}

/// 密码哈希端口，具体算法由基础设施层提供。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError>;
    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError>;
}
