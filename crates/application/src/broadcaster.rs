//! 房间广播总线端口
//!
//! 连接处理器通过 [`RoomBus`] 加入/离开房间分组并发布 [`ChatEvent`]，
//! 订阅端通过 [`RoomSubscription`] 接收事件。

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use domain::{ChatEvent, RoomName};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 单个连接在总线上的不透明句柄。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(Uuid);

impl HandleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BusError {
    /// 总线后端不可用（例如 Redis 连接中断）
    #[error("room bus unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode event: {0}")]
    Encode(String),
}

impl BusError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// 订阅结束的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 正常离开，或被同一句柄的重复 join 取代
    Left,
    /// 缓冲区溢出被总线踢出
    Lagged,
    /// 总线后端失联
    BusUnavailable,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::Left => "left",
            CloseReason::Lagged => "lagged",
            CloseReason::BusUnavailable => "bus unavailable",
        };
        f.write_str(text)
    }
}

/// 总线持有的发送端。关闭前先写入原因，接收端在通道耗尽后读取。
#[derive(Debug)]
pub struct SubscriberSlot {
    sender: mpsc::Sender<Arc<ChatEvent>>,
    reason: Arc<OnceLock<CloseReason>>,
}

impl SubscriberSlot {
    pub fn sender(&self) -> &mpsc::Sender<Arc<ChatEvent>> {
        &self.sender
    }

    /// 标记关闭原因；只有第一次设置生效。
    pub fn close(self, reason: CloseReason) {
        let _ = self.reason.set(reason);
    }
}

/// 房间订阅的接收端，归属于创建它的连接处理器。
#[derive(Debug)]
pub struct RoomSubscription {
    room: RoomName,
    handle: HandleId,
    receiver: mpsc::Receiver<Arc<ChatEvent>>,
    reason: Arc<OnceLock<CloseReason>>,
}

impl RoomSubscription {
    /// 创建一对有界的订阅端点。
    pub fn channel(room: RoomName, handle: HandleId, buffer: usize) -> (SubscriberSlot, Self) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let reason = Arc::new(OnceLock::new());
        let slot = SubscriberSlot {
            sender,
            reason: reason.clone(),
        };
        let subscription = Self {
            room,
            handle,
            receiver,
            reason,
        };
        (slot, subscription)
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// 等待下一个事件；订阅结束时返回结束原因。
    pub async fn recv(&mut self) -> Result<Arc<ChatEvent>, CloseReason> {
        match self.receiver.recv().await {
            Some(event) => Ok(event),
            None => Err(self.close_reason()),
        }
    }

    /// 非阻塞读取，通道为空时返回 `None`。
    pub fn try_recv(&mut self) -> Option<Arc<ChatEvent>> {
        self.receiver.try_recv().ok()
    }

    fn close_reason(&self) -> CloseReason {
        self.reason.get().copied().unwrap_or(CloseReason::Left)
    }
}

#[async_trait]
pub trait RoomBus: Send + Sync {
    /// 把句柄加入房间分组。重复加入会去重（旧订阅以 `Left` 结束）。
    async fn join(&self, room: &RoomName, handle: HandleId)
        -> Result<RoomSubscription, BusError>;

    /// 把句柄移出房间分组。句柄不在分组内时为空操作。
    async fn leave(&self, room: &RoomName, handle: HandleId) -> Result<(), BusError>;

    /// 向房间发布事件，返回本进程内成功入队的订阅者数量。
    async fn publish(&self, event: ChatEvent) -> Result<usize, BusError>;
}
