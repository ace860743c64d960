//! Bridge 启动流程
//!
//! 对应一个账号从配置到可用 hub 的完整过程: 恢复缓存的认证,
//! 登录, 持久化新 token, 刷新设备目录, 过滤内部子设备, 建 hub。
//! 云端不可用时降级为空设备列表, 进程照常启动。

use crate::config::BridgeConfig;
use crate::hub::Hub;
use latch_cloud::auth::AuthStorage;
use latch_cloud::cache::DeviceCache;
use latch_cloud::config::CloudConfig;
use latch_cloud::error::{CloudError, CloudResult};
use latch_cloud::push::PushConfig;
use latch_cloud::session::CloudSession;

/// The running bridge: one cloud session, its cache and its hub
pub struct Bridge {
    pub session: CloudSession,
    pub cache: DeviceCache,
    pub hub: Hub,
}

/// Bring the bridge up for one account
///
/// Cloud failures degrade to a hub with no devices; only unusable
/// credentials abort.
pub async fn setup_bridge(config: &BridgeConfig) -> CloudResult<Bridge> {
    let mut cloud_config = CloudConfig::new(&config.username, &config.password)
        .with_server_region(&config.server_country);
    if let Some(url) = &config.cloud_url {
        cloud_config = cloud_config.with_base_url(url);
    }
    let mut session = CloudSession::new(cloud_config)?;

    let bootstrap = AuthStorage::new(&config.work_dir, session.identity(), &config.server_country);
    if let Some(auth) = bootstrap.load() {
        tracing::debug!(path = %bootstrap.path().display(), "restored cached auth");
        session.restore(&auth);
    }

    let cache = DeviceCache::new(&config.work_dir, &config.server_country);
    let mut devices = Vec::new();
    match establish(&mut session, config).await {
        Ok(()) => match cache.renew_devices(&session).await {
            Ok(fetched) => devices = fetched.unwrap_or_default(),
            Err(err) => {
                tracing::error!(
                    username = %config.username,
                    "setup lock cloud failed: {err}"
                );
            }
        },
        Err(err) => {
            tracing::error!(username = %config.username, "setup lock cloud failed: {err}");
        }
    }

    let visible: Vec<_> = devices.into_iter().filter(|d| !d.is_hidden()).collect();
    tracing::info!(hub = %config.username, locks = visible.len(), "hub ready");

    let push_config = PushConfig::default().with_broker(&config.push_host, config.push_port);
    let hub = Hub::new(config, &visible, push_config);
    Ok(Bridge {
        session,
        cache,
        hub,
    })
}

/// Log in and persist the session under its cloud identity
async fn establish(session: &mut CloudSession, config: &BridgeConfig) -> CloudResult<()> {
    if !session.login().await? {
        return Err(CloudError::Transient(
            "login did not complete".to_string(),
        ));
    }
    let storage = AuthStorage::new(&config.work_dir, session.identity(), &config.server_country);
    if let Err(err) = storage.save(&session.to_stored()) {
        tracing::warn!(path = %storage.path().display(), "could not persist auth: {err}");
    }
    Ok(())
}
