//! Hub 层 - 把一组锁设备和它们的推送通道绑在一起
//!
//! Mirrors the shape of the cloud account: one hub per account, one
//! lock entity plus one push listener per visible device.

use crate::config::BridgeConfig;
use crate::entity::Lock;
use latch_cloud::cache::{DeviceCache, DeviceSource};
use latch_cloud::device::DeviceRecord;
use latch_cloud::error::CloudResult;
use latch_cloud::push::{PushConfig, PushListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Vendor name reported for every device
pub const MANUFACTURER: &str = "fingercrystal";

pub struct Hub {
    hub_id: String,
    locks: Vec<Arc<Lock>>,
    listeners: Vec<PushListener>,
    online: AtomicBool,
}

impl Hub {
    /// Build the hub and bring its push channels up
    ///
    /// Every device gets a lock entity and a started [`PushListener`]
    /// feeding it. Devices without a usable id are skipped.
    pub fn new(config: &BridgeConfig, devices: &[DeviceRecord], push_config: PushConfig) -> Self {
        let mut locks = Vec::new();
        let mut listeners = Vec::new();
        for device in devices {
            let push_id = device.push_id();
            if push_id.is_empty() {
                tracing::warn!(name = %device.name, "device has no usable id, skipped");
                continue;
            }
            let lock = Arc::new(Lock::new(device));
            let listener = PushListener::new(push_id, push_config.clone());
            let entity = Arc::clone(&lock);
            listener.add_listener(move |msg| {
                if let Some(data) = &msg.data {
                    entity.apply_push(data);
                }
            });
            listener.start();
            locks.push(lock);
            listeners.push(listener);
        }
        Self {
            hub_id: config.username.clone(),
            locks,
            listeners,
            online: AtomicBool::new(true),
        }
    }

    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }

    pub fn manufacturer(&self) -> &'static str {
        MANUFACTURER
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn locks(&self) -> &[Arc<Lock>] {
        &self.locks
    }

    pub fn lock_by_id(&self, device_id: &str) -> Option<&Arc<Lock>> {
        self.locks.iter().find(|lock| lock.device_id() == device_id)
    }

    /// Pull a fresh device directory and fold it into the entities
    ///
    /// Returns how many locks actually changed. Hidden devices and
    /// devices this hub does not track are ignored.
    pub async fn refresh_from_cloud<S>(&self, source: &S, cache: &DeviceCache) -> CloudResult<usize>
    where
        S: DeviceSource + Sync,
    {
        let Some(devices) = cache.renew_devices(source).await? else {
            return Ok(0);
        };
        let mut updated = 0;
        for device in &devices {
            if let Some(lock) = self.lock_by_id(device.push_id())
                && lock.apply_device(device)
            {
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Tear down every push channel. The entities stay readable.
    pub fn stop(&self) {
        self.online.store(false, Ordering::SeqCst);
        for listener in &self.listeners {
            listener.stop();
        }
    }
}
