use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::{broadcaster::BusError, password::PasswordHasherError};

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
    #[error("authentication failed")]
    Authentication,
    #[error("authorization failed")]
    Authorization,
}

impl ApplicationError {
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}
