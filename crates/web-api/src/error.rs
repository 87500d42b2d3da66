use application::{ApplicationError, BusError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "METHOD_NOT_ALLOWED", message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;
        use domain::DomainError;

        match error {
            AppErr::Domain(DomainError::InvalidArgument { field, reason }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                format!("{}: {}", field, reason),
            ),
            AppErr::Domain(DomainError::UserAlreadyExists) => {
                ApiError::new(StatusCode::CONFLICT, "USER_EXISTS", "user already exists")
            }
            AppErr::Domain(DomainError::UserNotFound) => {
                ApiError::new(StatusCode::NOT_FOUND, "USER_NOT_FOUND", "user not found")
            }
            AppErr::Domain(DomainError::ConversationNotFound) => ApiError::new(
                StatusCode::NOT_FOUND,
                "CONVERSATION_NOT_FOUND",
                "conversation not found",
            ),
            AppErr::Domain(DomainError::ConversationAlreadyExists) => ApiError::new(
                StatusCode::CONFLICT,
                "CONVERSATION_EXISTS",
                "conversation already exists",
            ),
            AppErr::Domain(DomainError::UserInactive) => {
                ApiError::new(StatusCode::FORBIDDEN, "USER_INACTIVE", "user is inactive")
            }
            AppErr::Domain(DomainError::OperationNotAllowed) => ApiError::new(
                StatusCode::FORBIDDEN,
                "OPERATION_NOT_ALLOWED",
                "operation not allowed",
            ),
            AppErr::Repository(repo_err) => match repo_err {
                domain::RepositoryError::NotFound => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "requested resource not found",
                ),
                domain::RepositoryError::Conflict => {
                    ApiError::new(StatusCode::CONFLICT, "CONFLICT", "resource already exists")
                }
                domain::RepositoryError::Storage { message } => {
                    tracing::error!(error = %message, "storage failure");
                    ApiError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "DATABASE_ERROR",
                        "database error",
                    )
                }
            },
            AppErr::Password(err) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "PASSWORD_ERROR",
                format!("password error: {}", err),
            ),
            AppErr::Bus(BusError::Unavailable(message)) => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "BUS_UNAVAILABLE",
                message,
            ),
            AppErr::Bus(err) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "BUS_ERROR",
                format!("bus error: {}", err),
            ),
            AppErr::Authentication => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "AUTHENTICATION_FAILED",
                "authentication failed",
            ),
            AppErr::Authorization => ApiError::new(
                StatusCode::FORBIDDEN,
                "AUTHORIZATION_FAILED",
                "authorization failed",
            ),
            AppErr::Infrastructure(message) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INFRASTRUCTURE_ERROR",
                message,
            ),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", errors.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// 房间连接处理器的错误分类。
///
/// 只有 `ConnectProtocol` 与 `BusUnavailable` 会终止连接，其余错误只丢弃当前帧。
#[derive(Debug, Error)]
pub enum RelayError {
    /// 连接阶段失败（房间名非法、加入房间失败），拒绝连接
    #[error("connection refused: {0}")]
    ConnectProtocol(String),
    /// 客户端帧不合法
    #[error("invalid frame: {0}")]
    FrameValidation(String),
    /// 查找发送者/会话或保存消息失败
    #[error("persistence failed: {0}")]
    Persistence(#[source] ApplicationError),
    /// 传输层读写失败
    #[error("transport error: {0}")]
    Transport(String),
    #[error("room bus unavailable")]
    BusUnavailable,
}

impl RelayError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RelayError::ConnectProtocol(_) | RelayError::BusUnavailable)
    }
}

impl From<BusError> for RelayError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Unavailable(_) => RelayError::BusUnavailable,
            other => RelayError::ConnectProtocol(other.to_string()),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::ConnectProtocol(message) | RelayError::FrameValidation(message) => {
                ApiError::new(StatusCode::BAD_REQUEST, "CONNECT_REFUSED", message)
            }
            RelayError::BusUnavailable => ApiError::service_unavailable("room bus unavailable"),
            RelayError::Persistence(err) => ApiError::from(err),
            RelayError::Transport(message) => ApiError::internal_server_error(message),
        }
    }
}
