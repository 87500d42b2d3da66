//! WebSocket 升级入口
//!
//! 房间名校验与加入分组都在升级之前完成，失败时直接返回 HTTP 错误
//! （400 房间名非法，503 总线不可用），客户端不会进入 Open 状态。

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
};

use crate::{error::ApiError, state::AppState, ws_connection::RoomConnection};

pub async fn chat_socket(
    ws: WebSocketUpgrade,
    Path(room_name): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let connection = RoomConnection::connect(
        state.chat_service.clone(),
        state.relay.clone(),
        state.connections.clone(),
        &room_name,
    )
    .await?;

    Ok(ws
        .on_failed_upgrade(|err| tracing::warn!(error = %err, "websocket upgrade failed"))
        .on_upgrade(move |socket| connection.run(socket)))
}
