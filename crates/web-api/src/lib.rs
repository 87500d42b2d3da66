//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给应用层的用例服务。
//! 每条 WebSocket 连接由 [`RoomConnection`] 驱动：加入房间分组、转发广播、
//! 把收到的帧交给消息存储。

mod auth;
mod error;
mod routes;
mod state;
mod websocket;
mod ws_connection;

pub use auth::{Claims, JwtService, TokenPair, TokenType};
pub use config::{JwtConfig, RelayConfig};
pub use error::{ApiError, ErrorBody, RelayError};
pub use routes::router;
pub use state::AppState;
pub use ws_connection::{
    parse_frame, ConnectionGauge, ConnectionState, InboundFrame, OutboundFrame, RoomConnection,
};
