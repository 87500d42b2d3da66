use std::{sync::Arc, time::Duration};

use application::{BusError, CloseReason, HandleId, LocalRoomBus, RoomBus};
use chrono::Utc;
use domain::{ChatEvent, RoomName};
use infrastructure::{RedisBusConfig, RedisRoomBus};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::{Redis, REDIS_PORT};
use tokio::time::{sleep, timeout};

async fn node(url: &str) -> (RedisRoomBus, Arc<LocalRoomBus>) {
    let local = Arc::new(LocalRoomBus::new(16));
    let bus = RedisRoomBus::connect(
        RedisBusConfig {
            url: url.to_string(),
            channel_prefix: "chat_".to_string(),
            reconnect_delay: Duration::from_millis(200),
        },
        local.clone(),
    )
    .await
    .expect("connect redis bus");
    (bus, local)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "requires local docker daemon"]
async fn redis_bus_fans_out_and_reports_outage() {
    let container = Redis::default().start().await.expect("start redis");
    let port = container
        .get_host_port_ipv4(REDIS_PORT)
        .await
        .expect("port");
    let url = format!("redis://127.0.0.1:{port}/");

    let (first, _) = node(&url).await;
    let (second, second_local) = node(&url).await;
    assert!(first.is_available());

    let general = RoomName::parse("general").expect("room");
    let mut on_first = first.join(&general, HandleId::new()).await.expect("join first");
    let mut on_second = second.join(&general, HandleId::new()).await.expect("join second");
    let mut elsewhere = second
        .join(&RoomName::parse("random").expect("room"), HandleId::new())
        .await
        .expect("join random");

    // 两个节点的中继都订阅了频道模式
    let receivers = first
        .publish(ChatEvent::new(general.clone(), "alice", "hello", Utc::now()))
        .await
        .expect("publish");
    assert_eq!(receivers, 2);

    for subscription in [&mut on_first, &mut on_second] {
        let event = timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("relay delivery")
            .expect("event");
        assert_eq!(event.message_body, "hello");
        assert_eq!(event.sender_username, "alice");
    }
    assert!(elsewhere.try_recv().is_none());

    container.stop().await.expect("stop redis");

    let reason = timeout(Duration::from_secs(10), on_second.recv())
        .await
        .expect("subscription should end");
    assert_eq!(reason.unwrap_err(), CloseReason::BusUnavailable);
    assert_eq!(second_local.room_count(), 0);

    // 中继重连期间总线不可用
    let mut unavailable = false;
    for _ in 0..50 {
        if !second.is_available() {
            unavailable = true;
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    assert!(unavailable);
    assert!(matches!(
        second.join(&general, HandleId::new()).await,
        Err(BusError::Unavailable(_))
    ));
    assert!(matches!(
        second
            .publish(ChatEvent::new(general, "alice", "lost", Utc::now()))
            .await,
        Err(BusError::Unavailable(_))
    ));
}
