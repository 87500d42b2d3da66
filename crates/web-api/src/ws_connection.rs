//! 房间连接处理器
//!
//! 每个 WebSocket 连接对应一个 [`RoomConnection`]：连接时加入房间分组，
//! 之后同时等待客户端帧与总线事件，断开时离开分组且只离开一次。

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use application::{
    services::PostMessageRequest, ChatService, CloseReason, HandleId, RoomBus, RoomSubscription,
};
use axum::{
    body::Bytes,
    extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket},
};
use config::RelayConfig;
use domain::{ChatEvent, RoomName};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::RelayError;

const WRITER_QUEUE: usize = 64;
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 当前存活的房间连接数
#[derive(Debug, Default)]
pub struct ConnectionGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConnectionGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn opened(&self) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
    }

    fn closed(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// 连接生命周期：`Connecting → Open → Closing → Closed`，连接失败时
/// `Connecting → Closed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Open) | (Connecting, Closed) | (Open, Closing) | (Closing, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(text)
    }
}

/// 客户端发送的帧，额外字段（例如 `type`）被忽略。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub message: String,
    pub username: String,
}

/// 推送给客户端的帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub message: String,
    pub username: String,
}

impl From<&ChatEvent> for OutboundFrame {
    fn from(event: &ChatEvent) -> Self {
        Self {
            message: event.message_body.clone(),
            username: event.sender_username.clone(),
        }
    }
}

fn required_string(
    object: &serde_json::Map<String, serde_json::Value>,
    field: &str,
) -> Result<String, RelayError> {
    match object.get(field) {
        Some(serde_json::Value::String(value)) if !value.trim().is_empty() => Ok(value.clone()),
        Some(serde_json::Value::String(_)) => {
            Err(RelayError::FrameValidation(format!("`{field}` is empty")))
        }
        Some(_) => Err(RelayError::FrameValidation(format!(
            "`{field}` must be a string"
        ))),
        None => Err(RelayError::FrameValidation(format!("`{field}` is missing"))),
    }
}

/// 解析客户端文本帧
pub fn parse_frame(text: &str, max_message_len: usize) -> Result<InboundFrame, RelayError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| RelayError::FrameValidation(format!("not json: {err}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| RelayError::FrameValidation("frame is not an object".into()))?;

    let message = required_string(object, "message")?;
    let username = required_string(object, "username")?;
    if message.len() > max_message_len {
        return Err(RelayError::FrameValidation(format!(
            "message exceeds {max_message_len} bytes"
        )));
    }
    Ok(InboundFrame { message, username })
}

/// 订阅被总线结束时发给客户端的关闭帧；正常离开时不发送。
fn close_frame_for(reason: CloseReason) -> Option<CloseFrame> {
    let (code, text) = match reason {
        CloseReason::Left => return None,
        CloseReason::Lagged => (close_code::POLICY, "subscriber too slow"),
        CloseReason::BusUnavailable => (close_code::ERROR, "room bus unavailable"),
    };
    Some(CloseFrame {
        code,
        reason: text.into(),
    })
}

/// WebSocket 写操作命令
///
/// 所有对 sender 的写操作都经由写任务串行执行
#[derive(Debug)]
enum WsCommand {
    Text(String),
    Pong(Bytes),
    Close(CloseFrame),
}

enum Flow {
    Continue,
    Close,
}

pub struct RoomConnection {
    chat_service: Arc<ChatService>,
    bus: Arc<dyn RoomBus>,
    relay: RelayConfig,
    gauge: Arc<ConnectionGauge>,
    room: RoomName,
    handle: HandleId,
    subscription: Option<RoomSubscription>,
    lifecycle: ConnectionState,
    left: bool,
}

impl RoomConnection {
    /// 校验房间名并加入分组；任何失败都直接拒绝连接，不重试。
    pub async fn connect(
        chat_service: Arc<ChatService>,
        relay: RelayConfig,
        gauge: Arc<ConnectionGauge>,
        room: &str,
    ) -> Result<Self, RelayError> {
        let handle = HandleId::new();
        let room = match RoomName::parse(room) {
            Ok(room) => room,
            Err(err) => {
                tracing::info!(room, error = %err, "connection refused: invalid room name");
                return Err(RelayError::ConnectProtocol(err.to_string()));
            }
        };

        let bus = chat_service.bus();
        let subscription = match bus.join(&room, handle).await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::warn!(room = %room, error = %err, "connection refused: join failed");
                return Err(RelayError::from(err));
            }
        };

        let mut connection = Self {
            chat_service,
            bus,
            relay,
            gauge,
            room,
            handle,
            subscription: Some(subscription),
            lifecycle: ConnectionState::Connecting,
            left: false,
        };
        connection.gauge.opened();
        connection.transition(ConnectionState::Open);
        tracing::info!(room = %connection.room, handle = %connection.handle, "room connection opened");
        Ok(connection)
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    fn transition(&mut self, next: ConnectionState) {
        if !self.lifecycle.can_transition_to(next) {
            tracing::warn!(from = %self.lifecycle, to = %next, "unexpected connection transition");
        }
        tracing::debug!(handle = %self.handle, from = %self.lifecycle, to = %next, "connection state");
        self.lifecycle = next;
    }

    /// 离开房间分组，整个生命周期只执行一次
    async fn leave(&mut self) {
        if self.left {
            return;
        }
        self.left = true;
        if let Err(err) = self.bus.leave(&self.room, self.handle).await {
            tracing::warn!(room = %self.room, handle = %self.handle, error = %err, "leave failed");
        }
    }

    /// 连接主循环，返回时连接已处于 `Closed`。
    pub async fn run(mut self, socket: WebSocket) {
        let Some(mut subscription) = self.subscription.take() else {
            self.transition(ConnectionState::Closing);
            self.leave().await;
            self.transition(ConnectionState::Closed);
            return;
        };

        let (sink, mut incoming) = socket.split();
        let (cmd_tx, cmd_rx) = mpsc::channel::<WsCommand>(WRITER_QUEUE);
        let mut writer = tokio::spawn(write_loop(sink, cmd_rx));

        let stop = Arc::new(AtomicBool::new(false));
        let (frame_tx, frame_rx) = mpsc::channel::<InboundFrame>(self.relay.frame_queue.max(1));
        tokio::spawn(persist_loop(
            self.chat_service.clone(),
            self.room.clone(),
            frame_rx,
            stop.clone(),
        ));

        let close_frame = loop {
            tokio::select! {
                inbound = incoming.next() => match inbound {
                    Some(Ok(message)) => {
                        if let Flow::Close = self.handle_incoming(message, &cmd_tx, &frame_tx) {
                            break None;
                        }
                    }
                    Some(Err(err)) => {
                        let err = RelayError::Transport(err.to_string());
                        tracing::debug!(handle = %self.handle, error = %err, "inbound transport error");
                        break None;
                    }
                    None => break None,
                },
                event = subscription.recv() => match event {
                    Ok(event) => {
                        let frame = OutboundFrame::from(event.as_ref());
                        let payload = match serde_json::to_string(&frame) {
                            Ok(json) => json,
                            Err(err) => {
                                tracing::warn!(error = %err, "failed to serialize outbound frame");
                                continue;
                            }
                        };
                        // 客户端不读时写队列会满，按慢订阅者处理
                        match cmd_tx.try_send(WsCommand::Text(payload)) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                tracing::warn!(
                                    room = %self.room, handle = %self.handle,
                                    "client not reading, closing connection"
                                );
                                break close_frame_for(CloseReason::Lagged);
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => {
                                tracing::debug!(handle = %self.handle, "writer closed, dropping event");
                                break None;
                            }
                        }
                    }
                    Err(reason) => {
                        match reason {
                            CloseReason::Lagged => tracing::warn!(
                                room = %self.room, handle = %self.handle,
                                "subscriber evicted for lagging"
                            ),
                            CloseReason::BusUnavailable => tracing::error!(
                                room = %self.room, handle = %self.handle,
                                error = %RelayError::BusUnavailable,
                                "closing connection"
                            ),
                            CloseReason::Left => {}
                        }
                        break close_frame_for(reason);
                    }
                },
            }
        };

        self.transition(ConnectionState::Closing);

        // 已排队但未处理的帧直接放弃，正在处理的帧允许完成
        stop.store(true, Ordering::SeqCst);
        drop(frame_tx);
        drop(subscription);

        self.leave().await;

        if let Some(frame) = close_frame {
            if cmd_tx.try_send(WsCommand::Close(frame)).is_err() {
                tracing::debug!(handle = %self.handle, "writer queue full, skipping close frame");
            }
        }
        drop(cmd_tx);
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            tracing::debug!(handle = %self.handle, "writer did not drain in time, aborting");
            writer.abort();
        }

        self.transition(ConnectionState::Closed);
        tracing::info!(room = %self.room, handle = %self.handle, "room connection closed");
    }

    fn handle_incoming(
        &self,
        message: WsMessage,
        cmd_tx: &mpsc::Sender<WsCommand>,
        frame_tx: &mpsc::Sender<InboundFrame>,
    ) -> Flow {
        match message {
            WsMessage::Text(text) => match parse_frame(text.as_str(), self.relay.max_message_len) {
                Ok(frame) => match frame_tx.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(frame)) => {
                        tracing::warn!(
                            handle = %self.handle,
                            username = %frame.username,
                            "frame queue full, dropping frame"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return Flow::Close,
                },
                Err(err) => {
                    tracing::debug!(handle = %self.handle, error = %err, "dropping frame");
                }
            },
            WsMessage::Ping(data) => {
                match cmd_tx.try_send(WsCommand::Pong(data)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(handle = %self.handle, "writer queue full, dropping pong");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return Flow::Close,
                }
            }
            WsMessage::Pong(_) => {}
            WsMessage::Binary(_) => {
                tracing::debug!(handle = %self.handle, "ignoring binary frame");
            }
            WsMessage::Close(_) => {
                tracing::debug!(handle = %self.handle, "client closed connection");
                return Flow::Close;
            }
        }
        Flow::Continue
    }
}

impl Drop for RoomConnection {
    fn drop(&mut self) {
        self.gauge.closed();
        if self.left {
            return;
        }
        // 升级失败等未进入 run 的路径
        self.left = true;
        let bus = self.bus.clone();
        let room = self.room.clone();
        let handle = self.handle;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(err) = bus.leave(&room, handle).await {
                        tracing::warn!(room = %room, handle = %handle, error = %err, "leave failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(room = %room, handle = %handle, "no runtime to leave room");
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut commands: mpsc::Receiver<WsCommand>,
) {
    while let Some(command) = commands.recv().await {
        let (message, closing) = match command {
            WsCommand::Text(text) => (WsMessage::Text(text.into()), false),
            WsCommand::Pong(data) => (WsMessage::Pong(data), false),
            WsCommand::Close(frame) => (WsMessage::Close(Some(frame)), true),
        };
        if let Err(err) = sink.send(message).await {
            let err = RelayError::Transport(err.to_string());
            tracing::debug!(error = %err, "websocket write failed");
            return;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}

/// 按到达顺序逐帧持久化并发布，失败只影响当前帧。
async fn persist_loop(
    chat_service: Arc<ChatService>,
    room: RoomName,
    mut frames: mpsc::Receiver<InboundFrame>,
    stop: Arc<AtomicBool>,
) {
    while let Some(frame) = frames.recv().await {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let request = PostMessageRequest {
            room: room.clone(),
            username: frame.username,
            content: frame.message,
        };
        if let Err(err) = chat_service.post_message(request).await {
            let err = RelayError::Persistence(err);
            tracing::warn!(room = %room, error = %err, "message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::{ChatServiceDependencies, FixedClock, LocalRoomBus};
    use chrono::Utc;
    use infrastructure::InMemoryStorage;

    #[test]
    fn frame_requires_both_fields() {
        let frame = parse_frame(r#"{"message":"hi","username":"alice"}"#, 4096).expect("frame");
        assert_eq!(frame.message, "hi");
        assert_eq!(frame.username, "alice");

        for text in [
            r#"{"username":"alice"}"#,
            r#"{"message":"hi"}"#,
            r#"{"message":"  ","username":"alice"}"#,
            r#"{"message":"hi","username":7}"#,
            r#"["hi","alice"]"#,
            "not json",
        ] {
            assert!(
                matches!(parse_frame(text, 4096), Err(RelayError::FrameValidation(_))),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn frame_type_field_is_ignored() {
        let frame = parse_frame(
            r#"{"type":"chat_message","message":"hi","username":"alice"}"#,
            4096,
        )
        .expect("frame");
        assert_eq!(frame.message, "hi");
    }

    #[test]
    fn oversized_message_is_rejected() {
        let text = format!(r#"{{"message":"{}","username":"alice"}}"#, "x".repeat(11));
        assert!(parse_frame(&text, 10).is_err());
        assert!(parse_frame(&text, 11).is_ok());
    }

    #[test]
    fn outbound_frame_has_exact_wire_shape() {
        let event = ChatEvent::new(
            RoomName::parse("general").expect("room"),
            "alice",
            "hi",
            Utc::now(),
        );
        let json = serde_json::to_value(OutboundFrame::from(&event)).expect("json");
        assert_eq!(json, serde_json::json!({"message": "hi", "username": "alice"}));
    }

    #[test]
    fn lifecycle_transitions() {
        use ConnectionState::*;
        assert!(Connecting.can_transition_to(Open));
        assert!(Connecting.can_transition_to(Closed));
        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(!Open.can_transition_to(Connecting));
        assert!(!Closed.can_transition_to(Open));
    }

    #[test]
    fn close_codes_follow_close_reason() {
        assert!(close_frame_for(CloseReason::Left).is_none());
        assert_eq!(
            close_frame_for(CloseReason::Lagged).map(|f| f.code),
            Some(close_code::POLICY)
        );
        assert_eq!(
            close_frame_for(CloseReason::BusUnavailable).map(|f| f.code),
            Some(close_code::ERROR)
        );
    }

    fn chat_service(bus: Arc<LocalRoomBus>) -> Arc<ChatService> {
        let storage = InMemoryStorage::new();
        Arc::new(ChatService::new(ChatServiceDependencies {
            user_repository: storage.user_repository(),
            conversation_repository: storage.conversation_repository(),
            message_repository: storage.message_repository(),
            bus,
            clock: Arc::new(FixedClock(Utc::now())),
        }))
    }

    #[tokio::test]
    async fn connect_joins_and_drop_leaves() {
        let bus = Arc::new(LocalRoomBus::default());
        let gauge = Arc::new(ConnectionGauge::new());
        let connection = RoomConnection::connect(
            chat_service(bus.clone()),
            RelayConfig::default(),
            gauge.clone(),
            "general",
        )
        .await
        .expect("connect");
        assert_eq!(connection.state(), ConnectionState::Open);
        assert_eq!(gauge.active(), 1);
        let room = connection.room().clone();
        let handle = connection.handle();
        assert!(bus.is_member(&room, handle));

        drop(connection);
        for _ in 0..50 {
            if !bus.is_member(&room, handle) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!bus.is_member(&room, handle));
        assert_eq!(bus.room_count(), 0);
        assert_eq!(gauge.active(), 0);
        assert_eq!(gauge.peak(), 1);
    }

    #[tokio::test]
    async fn invalid_room_is_refused_without_joining() {
        let bus = Arc::new(LocalRoomBus::default());
        let gauge = Arc::new(ConnectionGauge::new());
        let result = RoomConnection::connect(
            chat_service(bus.clone()),
            RelayConfig::default(),
            gauge.clone(),
            "no spaces allowed",
        )
        .await;
        assert!(matches!(result, Err(RelayError::ConnectProtocol(_))));
        assert_eq!(bus.room_count(), 0);
        assert_eq!(gauge.active(), 0);
    }
}
