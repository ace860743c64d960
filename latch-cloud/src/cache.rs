//! Device-list cache with a 24-hour freshness window
//!
//! One snapshot file per (user, server region). Reads prefer the cache
//! while it is fresh; refreshes that fail on the network degrade to the
//! last persisted snapshot instead of erroring.

use crate::device::DeviceRecord;
use crate::error::{CloudError, CloudResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshots older than this are stale
const FRESHNESS_WINDOW_SECS: i64 = 86400;

/// Where device lists come from when the cache cannot answer
#[async_trait]
pub trait DeviceSource {
    /// Identity the snapshot is keyed by; `None` means not logged in
    fn user_id(&self) -> Option<&str>;

    /// Fetch the device list from the backend
    async fn fetch_devices(&self) -> CloudResult<Vec<DeviceRecord>>;
}

/// One persisted device-list snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub update_time: DateTime<Utc>,
    pub devices: Vec<DeviceRecord>,
    /// Present in the vendor document, always empty so far
    #[serde(default)]
    pub homes: Vec<serde_json::Value>,
}

impl DeviceSnapshot {
    pub fn new(update_time: DateTime<Utc>, devices: Vec<DeviceRecord>) -> Self {
        Self {
            update_time,
            devices,
            homes: Vec::new(),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.update_time < Duration::seconds(FRESHNESS_WINDOW_SECS)
    }
}

/// Device-list cache for one (account, server region)
#[derive(Debug, Clone)]
pub struct DeviceCache {
    base_path: PathBuf,
    server_region: String,
}

impl DeviceCache {
    pub fn new(base_path: impl Into<PathBuf>, server_region: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            server_region: server_region.into(),
        }
    }

    /// Return the device list, serving from disk while fresh
    ///
    /// `renew` forces a network refresh. A transient network failure
    /// falls back to the persisted snapshot, stale or empty included,
    /// and never surfaces as an error; an access rejection does
    /// propagate so the caller can tell the user. `None` means no user
    /// is logged in yet.
    pub async fn get_devices<S: DeviceSource + Sync>(
        &self,
        source: &S,
        renew: bool,
    ) -> CloudResult<Option<Vec<DeviceRecord>>> {
        let Some(user_id) = source.user_id() else {
            return Ok(None);
        };
        let path = self.snapshot_path(user_id);
        let now = Utc::now();
        let cached = match load_snapshot(&path) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!("device cache unreadable: {err}");
                None
            }
        };

        if !renew && let Some(snapshot) = cached.as_ref().filter(|s| s.is_fresh(now)) {
            return Ok(Some(snapshot.devices.clone()));
        }

        match source.fetch_devices().await {
            Ok(devices) => {
                let snapshot = DeviceSnapshot::new(now, devices);
                if let Err(err) = save_snapshot(&path, &snapshot) {
                    tracing::warn!("failed to persist device snapshot: {err}");
                }
                tracing::info!("Got {} devices from lock cloud", snapshot.devices.len());
                Ok(Some(snapshot.devices))
            }
            Err(CloudError::Transient(err)) => {
                let devices = cached.map(|s| s.devices).unwrap_or_default();
                tracing::warn!(
                    "fetching devices failed: {err}, using {} cached devices",
                    devices.len()
                );
                Ok(Some(devices))
            }
            Err(err) => Err(err),
        }
    }

    /// Forced refresh, bypassing the freshness window
    pub async fn renew_devices<S: DeviceSource + Sync>(
        &self,
        source: &S,
    ) -> CloudResult<Option<Vec<DeviceRecord>>> {
        self.get_devices(source, true).await
    }

    /// Find a device by MAC address
    pub async fn get_device_by_mac<S: DeviceSource + Sync>(
        &self,
        source: &S,
        mac: &str,
    ) -> CloudResult<Option<DeviceRecord>> {
        let devices = self.get_devices(source, false).await?.unwrap_or_default();
        Ok(devices.into_iter().find(|d| d.mac.as_deref() == Some(mac)))
    }

    /// Find a device by its LAN address
    pub async fn get_device_by_host<S: DeviceSource + Sync>(
        &self,
        source: &S,
        host: &str,
    ) -> CloudResult<Option<DeviceRecord>> {
        let devices = self.get_devices(source, false).await?.unwrap_or_default();
        Ok(devices
            .into_iter()
            .find(|d| d.localip.as_deref() == Some(host)))
    }

    fn snapshot_path(&self, user_id: &str) -> PathBuf {
        self.base_path
            .join(format!("devices-{}-{}.json", user_id, self.server_region))
    }
}

fn load_snapshot(path: &Path) -> CloudResult<Option<DeviceSnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path)?;
    let snapshot = serde_json::from_str(&json)
        .map_err(|err| CloudError::CacheUnavailable(err.to_string()))?;
    Ok(Some(snapshot))
}

fn save_snapshot(path: &Path, snapshot: &DeviceSnapshot) -> CloudResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|err| CloudError::CacheUnavailable(err.to_string()))?;
    fs::write(path, json)?;
    Ok(())
}
