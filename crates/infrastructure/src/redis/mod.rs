//! Redis Pub/Sub 房间总线
//!
//! 多节点部署时使用：发布经 Redis 扇出到所有节点，每个节点的中继把事件
//! 交给本地 [`LocalRoomBus`]，因此同一房间的事件在各节点上顺序一致。

pub mod error;
pub mod publisher;
pub mod subscriber;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use application::{BusError, HandleId, LocalRoomBus, RoomBus, RoomSubscription};
use async_trait::async_trait;
use domain::{ChatEvent, RoomName};
use redis::{aio::ConnectionManager, Client};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use error::{RedisError, RedisResult};
pub use publisher::{room_channel, Envelope, RedisPublisher};
pub use subscriber::RedisRelay;

#[derive(Debug, Clone)]
pub struct RedisBusConfig {
    pub url: String,
    pub channel_prefix: String,
    pub reconnect_delay: Duration,
}

pub struct RedisRoomBus {
    local: Arc<LocalRoomBus>,
    publisher: RedisPublisher,
    available: Arc<AtomicBool>,
    relay: JoinHandle<()>,
}

impl RedisRoomBus {
    /// 连接 Redis 并启动中继；首次连接失败直接返回错误。
    pub async fn connect(config: RedisBusConfig, local: Arc<LocalRoomBus>) -> RedisResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| RedisError::ConfigError {
            message: format!("创建 Redis 客户端失败: {e}"),
        })?;
        let origin = Uuid::new_v4();

        let connection = ConnectionManager::new(client.clone()).await?;
        let publisher = RedisPublisher::new(connection, config.channel_prefix.clone(), origin);

        let available = Arc::new(AtomicBool::new(false));
        let relay = RedisRelay::new(
            client,
            config.channel_prefix,
            origin,
            local.clone(),
            available.clone(),
            config.reconnect_delay,
        );
        let pubsub = relay.connect().await?;
        available.store(true, Ordering::SeqCst);
        let relay = tokio::spawn(relay.run(Some(pubsub)));

        tracing::info!(node = %origin, "redis room bus connected");
        Ok(Self {
            local,
            publisher,
            available,
            relay,
        })
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn local(&self) -> &Arc<LocalRoomBus> {
        &self.local
    }

    fn ensure_available(&self) -> Result<(), BusError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BusError::unavailable("redis relay disconnected"))
        }
    }
}

impl Drop for RedisRoomBus {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

#[async_trait]
impl RoomBus for RedisRoomBus {
    async fn join(&self, room: &RoomName, handle: HandleId) -> Result<RoomSubscription, BusError> {
        self.ensure_available()?;
        Ok(self.local.subscribe(room, handle))
    }

    async fn leave(&self, room: &RoomName, handle: HandleId) -> Result<(), BusError> {
        self.local.unsubscribe(room, handle);
        Ok(())
    }

    /// 返回值是收到消息的节点数，本地投递由中继完成。
    async fn publish(&self, event: ChatEvent) -> Result<usize, BusError> {
        self.ensure_available()?;
        Ok(self.publisher.publish(event).await?)
    }
}
