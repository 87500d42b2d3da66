use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;

use application::{
    services::{
        AuthenticateUserRequest, ChangePasswordRequest, CreateConversationRequest,
        RegisterUserRequest, UpdateUserRequest,
    },
    ApplicationError, ConversationDto, MessageDto, UserDto,
};
use domain::{ConversationKind, DomainError, RoomName};

use crate::{
    auth::{TokenPair, TokenType},
    error::ApiError,
    state::AppState,
    websocket::chat_socket,
};

#[derive(Debug, Deserialize, Validate)]
struct RegisterPayload {
    #[validate(length(min = 1, max = 150))]
    username: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 1))]
    password: String,
    confirm_password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct LoginPayload {
    #[validate(length(min = 1))]
    email_or_username: String,
    #[validate(length(min = 1))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct ChangePasswordPayload {
    old_password: String,
    #[validate(length(min = 1))]
    new_password: String,
    confirm_new_password: String,
}

#[derive(Debug, Deserialize)]
struct RefreshPayload {
    refresh: String,
}

/// PUT 与 PATCH 共用；PUT 要求 username 与 email 必填。
#[derive(Debug, Default, Deserialize, Validate)]
struct UpdateUserPayload {
    #[validate(length(min = 1, max = 150))]
    username: Option<String>,
    #[validate(email)]
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    avatar: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    bio: Option<Option<String>>,
}

/// 区分字段缺省（`None`）与显式 `null`（`Some(None)`）
fn nullable<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize, Validate)]
struct CreateConversationPayload {
    #[validate(length(min = 1, max = 99))]
    name: String,
    #[serde(rename = "type", default = "default_kind")]
    kind: ConversationKind,
}

fn default_kind() -> ConversationKind {
    ConversationKind::Group
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    search: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    user: UserDto,
    #[serde(flatten)]
    tokens: TokenPair,
}

#[derive(Debug, Serialize)]
struct AccessResponse {
    access: String,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    message: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes())
        .route("/ws/chat/{room_name}", get(chat_socket))
        .route("/ws/chat/{room_name}/", get(chat_socket))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/check-server-status/", get(check_server_status))
        .route("/auth/register/", post(register_user))
        .route("/auth/login/", post(login_user))
        .route("/auth/change_password/", post(change_password))
        .route("/auth/logout/", post(logout))
        .route("/token/refresh/", post(refresh_token))
        .route("/users/", get(list_users).post(create_user))
        .route(
            "/users/{id}/",
            get(get_user)
                .put(replace_user)
                .patch(update_user)
                .delete(delete_user),
        )
        .route(
            "/conversations/",
            get(list_conversations).post(create_conversation),
        )
        .route("/conversations/{name}/", get(get_conversation))
        .route("/conversations/{name}/messages/", get(conversation_messages))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn check_server_status() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    payload.validate()?;
    let user = state
        .user_service
        .register(RegisterUserRequest {
            username: payload.username,
            email: payload.email,
            password: payload.password,
            confirm_password: payload.confirm_password,
        })
        .await?;

    let tokens = state.jwt_service.issue_pair(user.id.into())?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: UserDto::from(&user),
            tokens,
        }),
    ))
}

async fn login_user(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<AuthResponse>, ApiError> {
    payload.validate()?;
    let user = state
        .user_service
        .authenticate(AuthenticateUserRequest {
            email_or_username: payload.email_or_username,
            password: payload.password,
        })
        .await?;

    let tokens = state.jwt_service.issue_pair(user.id.into())?;
    tracing::info!(user_id = %user.id, "user logged in");
    Ok(Json(AuthResponse {
        user: UserDto::from(&user),
        tokens,
    }))
}

async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChangePasswordPayload>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user_id = state.jwt_service.extract_user_from_headers(&headers)?;
    payload.validate()?;
    state
        .user_service
        .change_password(ChangePasswordRequest {
            user_id,
            old_password: payload.old_password,
            new_password: payload.new_password,
            confirm_new_password: payload.confirm_new_password,
        })
        .await?;

    Ok(Json(MessageResponse {
        message: "Password changed successfully",
    }))
}

async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<RefreshPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = state
        .jwt_service
        .verify(&payload.refresh, TokenType::Refresh)?;
    state
        .token_blacklist
        .revoke(claims.jti, claims.expires_at())
        .await
        .map_err(ApplicationError::from)?;

    match state.user_service.mark_offline(claims.sub).await {
        Ok(()) => {}
        // 用户已被删除时注销仍然成功
        Err(ApplicationError::Repository(domain::RepositoryError::NotFound)) => {}
        Err(err) => return Err(err.into()),
    }
    tracing::info!(user_id = %claims.sub, "user logged out");
    Ok(Json(serde_json::json!({})))
}

async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshPayload>,
) -> Result<Json<AccessResponse>, ApiError> {
    let claims = state
        .jwt_service
        .verify(&payload.refresh, TokenType::Refresh)?;
    let revoked = state
        .token_blacklist
        .is_revoked(claims.jti)
        .await
        .map_err(ApplicationError::from)?;
    if revoked {
        return Err(ApiError::unauthorized("Token is blacklisted"));
    }

    let access = state.jwt_service.issue(claims.sub, TokenType::Access)?;
    Ok(Json(AccessResponse { access }))
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserDto>>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let users = state.user_service.list_users(query.search).await?;
    Ok(Json(users.iter().map(UserDto::from).collect()))
}

async fn create_user() -> ApiError {
    ApiError::method_not_allowed("Method \"POST\" not allowed.")
}

async fn get_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<UserDto>, ApiError> {
    state.jwt_service.extract_user_from_headers(&headers)?;
    let user = state.user_service.get_user(id).await?;
    Ok(Json(UserDto::from(&user)))
}

/// 只允许用户修改自己的资料
fn authorize_self(state: &AppState, headers: &HeaderMap, id: Uuid) -> Result<(), ApiError> {
    let caller = state.jwt_service.extract_user_from_headers(headers)?;
    if caller != id {
        return Err(ApplicationError::Authorization.into());
    }
    Ok(())
}

async fn replace_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserPayload>,
) -> Result<Json<UserDto>, ApiError> {
    authorize_self(&state, &headers, id)?;
    if payload.username.is_none() || payload.email.is_none() {
        return Err(ApiError::bad_request(
            "username and email are required for a full update",
        ));
    }
    apply_update(&state, id, payload).await
}

async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserPayload>,
) -> Result<Json<UserDto>, ApiError> {
    authorize_self(&state, &headers, id)?;
    apply_update(&state, id, payload).await
}

async fn apply_update(
    state: &AppState,
    id: Uuid,
    payload: UpdateUserPayload,
) -> Result<Json<UserDto>, ApiError> {
    payload.validate()?;
    let user = state
        .user_service
        .update_user(
            id,
            UpdateUserRequest {
                username: payload.username,
                email: payload.email,
                first_name: payload.first_name,
                last_name: payload.last_name,
                avatar: payload.avatar,
                bio: payload.bio,
            },
        )
        .await?;
    Ok(Json(UserDto::from(&user)))
}

async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    authorize_self(&state, &headers, id)?;
    state.user_service.delete_user(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationDto>>, ApiError> {
    Ok(Json(state.conversation_service.list().await?))
}

async fn create_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateConversationPayload>,
) -> Result<(StatusCode, Json<ConversationDto>), ApiError> {
    let creator_id = state.jwt_service.extract_user_from_headers(&headers)?;
    payload.validate()?;
    let dto = state
        .conversation_service
        .create(CreateConversationRequest {
            name: payload.name,
            kind: payload.kind,
            creator_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(dto)))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ConversationDto>, ApiError> {
    Ok(Json(state.conversation_service.get(&name).await?))
}

async fn conversation_messages(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    let room = RoomName::parse(name)
        .map_err(|_| ApplicationError::from(DomainError::ConversationNotFound))?;
    let messages = state.chat_service.history(room, query.limit).await?;
    Ok(Json(messages))
}
