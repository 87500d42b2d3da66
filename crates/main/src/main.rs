//! 主应用程序入口
//!
//! 加载配置、连接基础设施并启动 Axum Web API 服务。

use anyhow::Context;
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;

    // RUST_LOG 优先于配置文件中的过滤规则
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.filter.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate().context("invalid configuration")?;
    if config.uses_dev_secret() {
        tracing::warn!("using the built-in development JWT secret");
    }

    let infrastructure = Infrastructure::connect((&config).into())
        .await
        .context("failed to connect infrastructure")?;
    let state = AppState::new(infrastructure, config.jwt.clone(), config.relay.clone());

    let app = router(state);
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!("聊天服务启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到停止信号，开始优雅关闭");
}
