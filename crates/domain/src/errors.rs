//! 领域模型错误定义
//!
//! 定义了领域层与仓储层可能出现的错误类型。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("user already exists")]
    UserAlreadyExists,

    #[error("user not found")]
    UserNotFound,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("conversation already exists")]
    ConversationAlreadyExists,

    #[error("user is inactive")]
    UserInactive,

    #[error("operation not allowed")]
    OperationNotAllowed,
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 仓储层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    /// 唯一约束冲突
    #[error("record already exists")]
    Conflict,

    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
