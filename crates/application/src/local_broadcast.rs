//! 进程内的房间广播总线

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use domain::{ChatEvent, RoomName};
use tokio::sync::mpsc::error::TrySendError;

use crate::broadcaster::{
    BusError, CloseReason, HandleId, RoomBus, RoomSubscription, SubscriberSlot,
};

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

type Registry = HashMap<RoomName, HashMap<HandleId, SubscriberSlot>>;

/// 房间名 → 订阅句柄集合的注册表，由互斥锁保护。
///
/// `publish` 在持锁期间依次 `try_send`，因此同一房间内的发布顺序对每个
/// 订阅者都是一致的；缓冲区已满的订阅者会被直接踢出。
pub struct LocalRoomBus {
    rooms: Mutex<Registry>,
    subscriber_buffer: usize,
}

impl LocalRoomBus {
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            subscriber_buffer: subscriber_buffer.max(1),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, room: &RoomName, handle: HandleId) -> RoomSubscription {
        let (slot, subscription) =
            RoomSubscription::channel(room.clone(), handle, self.subscriber_buffer);
        let replaced = self
            .registry()
            .entry(room.clone())
            .or_default()
            .insert(handle, slot);
        if let Some(previous) = replaced {
            tracing::debug!(room = %room, handle = %handle, "duplicate join, replacing subscription");
            previous.close(CloseReason::Left);
        }
        subscription
    }

    pub fn unsubscribe(&self, room: &RoomName, handle: HandleId) -> bool {
        let mut rooms = self.registry();
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&handle);
        if members.is_empty() {
            rooms.remove(room);
        }
        drop(rooms);

        match removed {
            Some(slot) => {
                slot.close(CloseReason::Left);
                true
            }
            None => false,
        }
    }

    /// 把事件投递给房间当前的全部成员，返回成功入队的数量。
    pub fn deliver(&self, event: ChatEvent) -> usize {
        let event = Arc::new(event);
        let mut evicted = Vec::new();
        let mut delivered = 0;

        {
            let mut rooms = self.registry();
            let Some(members) = rooms.get_mut(&event.room_id) else {
                return 0;
            };

            let mut stale = Vec::new();
            for (handle, slot) in members.iter() {
                match slot.sender().try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => stale.push((*handle, CloseReason::Lagged)),
                    Err(TrySendError::Closed(_)) => stale.push((*handle, CloseReason::Left)),
                }
            }

            for (handle, reason) in stale {
                if let Some(slot) = members.remove(&handle) {
                    slot.close(reason);
                    if reason == CloseReason::Lagged {
                        evicted.push(handle);
                    }
                }
            }
            if members.is_empty() {
                rooms.remove(&event.room_id);
            }
        }

        for handle in evicted {
            tracing::warn!(room = %event.room_id, handle = %handle, "subscriber buffer full, evicted");
        }
        delivered
    }

    /// 结束所有订阅（后端失联时使用）。
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let rooms = std::mem::take(&mut *self.registry());
        let mut closed = 0;
        for (_, members) in rooms {
            for (_, slot) in members {
                slot.close(reason);
                closed += 1;
            }
        }
        closed
    }

    pub fn room_count(&self) -> usize {
        self.registry().len()
    }

    pub fn member_count(&self, room: &RoomName) -> usize {
        self.registry().get(room).map_or(0, HashMap::len)
    }

    pub fn is_member(&self, room: &RoomName, handle: HandleId) -> bool {
        self.registry()
            .get(room)
            .is_some_and(|members| members.contains_key(&handle))
    }
}

impl Default for LocalRoomBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

#[async_trait]
impl RoomBus for LocalRoomBus {
    async fn join(
        &self,
        room: &RoomName,
        handle: HandleId,
    ) -> Result<RoomSubscription, BusError> {
        Ok(self.subscribe(room, handle))
    }

    async fn leave(&self, room: &RoomName, handle: HandleId) -> Result<(), BusError> {
        self.unsubscribe(room, handle);
        Ok(())
    }

    async fn publish(&self, event: ChatEvent) -> Result<usize, BusError> {
        Ok(self.deliver(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn room(name: &str) -> RoomName {
        RoomName::parse(name).expect("room name")
    }

    fn event(room_name: &str, body: &str) -> ChatEvent {
        ChatEvent::new(room(room_name), "alice", body, Utc::now())
    }

    #[tokio::test]
    async fn publish_reaches_exactly_current_members() {
        let bus = LocalRoomBus::default();
        let general = room("general");
        let (a, b, c) = (HandleId::new(), HandleId::new(), HandleId::new());

        let mut sub_a = bus.join(&general, a).await.expect("join a");
        let mut sub_b = bus.join(&general, b).await.expect("join b");
        let mut sub_c = bus.join(&general, c).await.expect("join c");
        bus.leave(&general, c).await.expect("leave c");

        let delivered = bus.publish(event("general", "hi")).await.expect("publish");
        assert_eq!(delivered, 2);

        assert_eq!(sub_a.recv().await.expect("a event").message_body, "hi");
        assert_eq!(sub_b.recv().await.expect("b event").message_body, "hi");
        assert_eq!(sub_c.recv().await.unwrap_err(), CloseReason::Left);
    }

    #[tokio::test]
    async fn publish_to_other_room_is_not_delivered() {
        let bus = LocalRoomBus::default();
        let mut sub = bus.join(&room("general"), HandleId::new()).await.expect("join");

        let delivered = bus.publish(event("random", "elsewhere")).await.expect("publish");
        assert_eq!(delivered, 0);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_scoped_to_room() {
        let bus = LocalRoomBus::default();
        let handle = HandleId::new();
        let general = room("general");
        let random = room("random");

        // 从未加入
        bus.leave(&general, handle).await.expect("leave without join");

        let _general_sub = bus.join(&general, handle).await.expect("join general");
        let other = HandleId::new();
        let mut random_sub = bus.join(&random, other).await.expect("join random");

        bus.leave(&general, handle).await.expect("first leave");
        bus.leave(&general, handle).await.expect("second leave");
        bus.leave(&random, handle).await.expect("leave wrong room");

        assert_eq!(bus.member_count(&general), 0);
        assert!(bus.is_member(&random, other));
        bus.publish(event("random", "still here")).await.expect("publish");
        assert_eq!(random_sub.recv().await.expect("event").message_body, "still here");
    }

    #[tokio::test]
    async fn per_subscriber_order_matches_publish_order() {
        let bus = LocalRoomBus::new(64);
        let general = room("general");
        let mut first = bus.join(&general, HandleId::new()).await.expect("join");
        let mut second = bus.join(&general, HandleId::new()).await.expect("join");

        for i in 0..32 {
            bus.publish(event("general", &format!("m{i}"))).await.expect("publish");
        }

        for i in 0..32 {
            let expected = format!("m{i}");
            assert_eq!(first.recv().await.expect("first").message_body, expected);
            assert_eq!(second.recv().await.expect("second").message_body, expected);
        }
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_without_affecting_siblings() {
        let bus = LocalRoomBus::new(2);
        let general = room("general");
        let slow = HandleId::new();
        let fast = HandleId::new();
        let mut slow_sub = bus.join(&general, slow).await.expect("join slow");
        let mut fast_sub = bus.join(&general, fast).await.expect("join fast");

        for i in 0..2 {
            bus.publish(event("general", &format!("m{i}"))).await.expect("publish");
            fast_sub.recv().await.expect("fast keeps up");
        }
        // slow 的缓冲区已满，第三条消息会触发踢出
        let delivered = bus.publish(event("general", "m2")).await.expect("publish");
        assert_eq!(delivered, 1);
        assert!(!bus.is_member(&general, slow));
        assert!(bus.is_member(&general, fast));

        assert_eq!(fast_sub.recv().await.expect("fast").message_body, "m2");
        assert_eq!(slow_sub.recv().await.expect("buffered").message_body, "m0");
        assert_eq!(slow_sub.recv().await.expect("buffered").message_body, "m1");
        assert_eq!(slow_sub.recv().await.unwrap_err(), CloseReason::Lagged);
    }

    #[tokio::test]
    async fn duplicate_join_keeps_single_membership() {
        let bus = LocalRoomBus::default();
        let general = room("general");
        let handle = HandleId::new();

        let mut stale = bus.join(&general, handle).await.expect("first join");
        let mut current = bus.join(&general, handle).await.expect("second join");
        assert_eq!(bus.member_count(&general), 1);

        assert_eq!(bus.publish(event("general", "once")).await.expect("publish"), 1);
        assert_eq!(current.recv().await.expect("event").message_body, "once");
        assert_eq!(stale.recv().await.unwrap_err(), CloseReason::Left);
    }

    #[tokio::test]
    async fn empty_rooms_are_collected() {
        let bus = LocalRoomBus::default();
        let general = room("general");
        let handle = HandleId::new();

        let _sub = bus.join(&general, handle).await.expect("join");
        assert_eq!(bus.room_count(), 1);
        bus.leave(&general, handle).await.expect("leave");
        assert_eq!(bus.room_count(), 0);
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned_on_publish() {
        let bus = LocalRoomBus::default();
        let general = room("general");
        let sub = bus.join(&general, HandleId::new()).await.expect("join");
        drop(sub);

        assert_eq!(bus.publish(event("general", "nobody")).await.expect("publish"), 0);
        assert_eq!(bus.room_count(), 0);
    }

    #[tokio::test]
    async fn close_all_reports_bus_unavailable() {
        let bus = LocalRoomBus::default();
        let mut a = bus.join(&room("general"), HandleId::new()).await.expect("join");
        let mut b = bus.join(&room("random"), HandleId::new()).await.expect("join");

        assert_eq!(bus.close_all(CloseReason::BusUnavailable), 2);
        assert_eq!(a.recv().await.unwrap_err(), CloseReason::BusUnavailable);
        assert_eq!(b.recv().await.unwrap_err(), CloseReason::BusUnavailable);
        assert_eq!(bus.room_count(), 0);
    }
}
