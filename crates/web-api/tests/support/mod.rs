#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::LocalRoomBus;
use config::{JwtConfig, RelayConfig};
use infrastructure::{BcryptPasswordHasher, InMemoryStorage, Infrastructure};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::oneshot, time::sleep};
use web_api::{router, AppState};

/// 运行在随机端口上的测试服务器，析构时优雅关闭。
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub storage: InMemoryStorage,
    pub bus: Arc<LocalRoomBus>,
    pub state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let storage = InMemoryStorage::new();
        let bus = Arc::new(LocalRoomBus::new(16));
        let infrastructure = Infrastructure::in_memory(
            storage.clone(),
            Arc::new(BcryptPasswordHasher::new(Some(4))),
            bus.clone(),
        );
        let state = AppState::new(infrastructure, JwtConfig::default(), RelayConfig::default());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            client: Client::new(),
            storage,
            bus,
            state,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws(&self, room: &str) -> String {
        format!("ws://{}/ws/chat/{}/", self.addr, room)
    }

    /// 注册用户并返回 `{user, refresh, access}` 响应体
    pub async fn register(&self, username: &str) -> Value {
        let response = self
            .client
            .post(self.http("/api/auth/register/"))
            .json(&json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": "secret-password",
                "confirm_password": "secret-password",
            }))
            .send()
            .await
            .expect("register request");
        assert_eq!(response.status(), 201, "register {username}");
        response.json().await.expect("register json")
    }

    pub async fn create_room(&self, access: &str, name: &str) {
        let response = self
            .client
            .post(self.http("/api/conversations/"))
            .bearer_auth(access)
            .json(&json!({ "name": name, "type": "group" }))
            .send()
            .await
            .expect("create conversation");
        assert_eq!(response.status(), 201, "create room {name}");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// 轮询直到条件成立，最多等待约 2 秒
pub async fn eventually<F>(check: F) -> bool
where
    F: FnMut() -> bool,
{
    eventually_within(Duration::from_secs(2), check).await
}

pub async fn eventually_within<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(20)).await;
    }
}
