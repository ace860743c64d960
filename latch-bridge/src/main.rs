use latch_bridge::{BridgeConfig, print_banner, setup_bridge, setup_environment};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 设置环境 (dotenv, 日志)
    setup_environment();

    print_banner();

    tracing::info!("Latch Bridge starting...");

    // 2. 加载并校验配置
    let config = BridgeConfig::from_env();
    config.validate()?;
    tracing::info!(
        region = %config.server_country,
        "lock cloud server: {}",
        config.server_name()
    );

    // 3. 登录云端, 构建 hub (云端不可用时以空设备列表启动)
    let bridge = Arc::new(setup_bridge(&config).await?);
    for lock in bridge.hub.locks() {
        tracing::info!(
            id = %lock.device_id(),
            name = %lock.name(),
            state = %lock.state(),
            battery = lock.battery_level(),
            "lock entity ready"
        );
    }

    // 4. 可选的周期刷新 (推送通道才是主数据源)
    if config.refresh_secs > 0 {
        let bridge = Arc::clone(&bridge);
        let period = Duration::from_secs(config.refresh_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match bridge
                    .hub
                    .refresh_from_cloud(&bridge.session, &bridge.cache)
                    .await
                {
                    Ok(updated) => tracing::debug!(updated, "device refresh done"),
                    Err(err) => tracing::warn!("device refresh failed: {err}"),
                }
            }
        });
    }

    // 5. 等待退出信号
    shutdown_signal().await;
    bridge.hub.stop();
    tracing::info!("Latch Bridge stopped");

    Ok(())
}

/// Graceful shutdown handler
///
/// Listens for SIGTERM and Ctrl+C signals
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
