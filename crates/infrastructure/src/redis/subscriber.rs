//! Redis 中继订阅者
//!
//! 以 `PSUBSCRIBE <prefix>*` 接收全部房间频道，把事件投递给本节点的
//! [`LocalRoomBus`]。连接断开时标记总线不可用并以 `BusUnavailable`
//! 结束本地所有订阅，随后按固定间隔重连。

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use application::{CloseReason, LocalRoomBus};
use futures_util::StreamExt;
use redis::{aio::PubSub, Client, Msg};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    error::{RedisError, RedisResult},
    publisher::{room_channel, Envelope},
};

pub struct RedisRelay {
    client: Client,
    prefix: String,
    origin: Uuid,
    local: Arc<LocalRoomBus>,
    available: Arc<AtomicBool>,
    reconnect_delay: Duration,
}

impl RedisRelay {
    pub fn new(
        client: Client,
        prefix: impl Into<String>,
        origin: Uuid,
        local: Arc<LocalRoomBus>,
        available: Arc<AtomicBool>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            origin,
            local,
            available,
            reconnect_delay,
        }
    }

    fn pattern(&self) -> String {
        format!("{}*", self.prefix)
    }

    /// 建立 PubSub 连接并订阅房间频道模式
    pub async fn connect(&self) -> RedisResult<PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let pattern = self.pattern();
        pubsub
            .psubscribe(&pattern)
            .await
            .map_err(|e| RedisError::SubscribeError {
                message: format!("订阅模式 {pattern} 失败: {e}"),
            })?;
        info!(pattern = %pattern, "redis relay subscribed");
        Ok(pubsub)
    }

    /// 监听循环；`initial` 为启动时已建立的连接。
    pub async fn run(self, initial: Option<PubSub>) {
        let mut next = initial;
        loop {
            let pubsub = match next.take() {
                Some(pubsub) => pubsub,
                None => match self.connect().await {
                    Ok(pubsub) => pubsub,
                    Err(e) => {
                        warn!(error = %e, "redis relay reconnect failed");
                        sleep(self.reconnect_delay).await;
                        continue;
                    }
                },
            };

            self.available.store(true, Ordering::SeqCst);
            self.listen(pubsub).await;

            self.available.store(false, Ordering::SeqCst);
            let closed = self.local.close_all(CloseReason::BusUnavailable);
            error!(closed, "redis relay connection lost, local subscriptions closed");
            sleep(self.reconnect_delay).await;
        }
    }

    async fn listen(&self, pubsub: PubSub) {
        let mut messages = pubsub.into_on_message();
        while let Some(msg) = messages.next().await {
            self.handle(&msg);
        }
    }

    fn handle(&self, msg: &Msg) {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "unreadable redis payload");
                return;
            }
        };
        self.relay_payload(msg.get_channel_name(), &payload);
    }

    /// 解码信封并投递到本地总线，返回本地成功入队的订阅者数。
    /// 频道与事件房间不一致的信封直接丢弃。
    pub fn relay_payload(&self, channel: &str, payload: &str) -> usize {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(channel, error = %e, "dropping malformed envelope");
                return 0;
            }
        };

        if channel != room_channel(&self.prefix, envelope.event.room_id.as_str()) {
            warn!(
                channel,
                room = %envelope.event.room_id,
                "envelope room does not match channel"
            );
            return 0;
        }

        let remote = envelope.origin != self.origin;
        let delivered = self.local.deliver(envelope.event);
        debug!(delivered, remote, "relayed room event");
        delivered
    }
}
