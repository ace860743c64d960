//! Lock entities
//!
//! One [`Lock`] per visible cloud device. State lives in a watch channel
//! so the push thread can write it and any number of consumers can
//! follow it without polling.

use latch_cloud::device::DeviceRecord;
use latch_cloud::push::PushData;
use serde_json::Value;
use std::fmt;
use tokio::sync::watch;

/// Hardware model reported for every lock
pub const LOCK_MODEL: &str = "Lock Device";

/// Lock state, named after the conventional home-automation states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Locking,
    Unlocked,
    Unlocking,
    Jammed,
}

impl LockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockState::Locked => "locked",
            LockState::Locking => "locking",
            LockState::Unlocked => "unlocked",
            LockState::Unlocking => "unlocking",
            LockState::Jammed => "jammed",
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatus {
    pub state: LockState,
    /// Battery percentage, 0-100
    pub battery: i64,
}

/// A smart lock as seen by consumers of the bridge
pub struct Lock {
    device_id: String,
    name: String,
    firmware_version: String,
    status_tx: watch::Sender<LockStatus>,
}

impl Lock {
    pub fn new(device: &DeviceRecord) -> Self {
        let status = LockStatus {
            state: state_from_unlocking(device.unlocking),
            battery: device.battery.unwrap_or(0),
        };
        let (status_tx, _) = watch::channel(status);
        Self {
            device_id: device.push_id().to_string(),
            name: device.name.clone(),
            firmware_version: device
                .extra
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or("1.0.0")
                .to_string(),
            status_tx,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &'static str {
        LOCK_MODEL
    }

    pub fn firmware_version(&self) -> &str {
        &self.firmware_version
    }

    pub fn status(&self) -> LockStatus {
        self.status_tx.borrow().clone()
    }

    pub fn state(&self) -> LockState {
        self.status_tx.borrow().state
    }

    pub fn battery_level(&self) -> i64 {
        self.status_tx.borrow().battery
    }

    /// Follow state changes without polling
    pub fn subscribe(&self) -> watch::Receiver<LockStatus> {
        self.status_tx.subscribe()
    }

    /// Apply a push message. Returns true when the state changed.
    ///
    /// A message that does not claim `unlocking` means the lock is at
    /// rest, so the state falls back to locked.
    pub fn apply_push(&self, data: &PushData) -> bool {
        self.update(data.battery, data.unlocking)
    }

    /// Apply a device record from a directory refresh
    pub fn apply_device(&self, device: &DeviceRecord) -> bool {
        self.update(device.battery, device.unlocking)
    }

    fn update(&self, battery: Option<i64>, unlocking: Option<bool>) -> bool {
        self.status_tx.send_if_modified(|status| {
            let mut changed = false;
            if let Some(battery) = battery
                && battery != status.battery
            {
                status.battery = battery;
                changed = true;
            }
            let state = state_from_unlocking(unlocking);
            if state != status.state {
                status.state = state;
                changed = true;
            }
            changed
        })
    }
}

fn state_from_unlocking(unlocking: Option<bool>) -> LockState {
    if unlocking == Some(true) {
        LockState::Unlocking
    } else {
        LockState::Locked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(json: &str) -> DeviceRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn new_lock_reads_the_device_record() {
        let lock = Lock::new(&device(
            r#"{"id":"lock1","name":"Front Door","battery":88,"version":"2.3.1"}"#,
        ));
        assert_eq!(lock.device_id(), "lock1");
        assert_eq!(lock.name(), "Front Door");
        assert_eq!(lock.model(), "Lock Device");
        assert_eq!(lock.firmware_version(), "2.3.1");
        assert_eq!(lock.battery_level(), 88);
        assert_eq!(lock.state(), LockState::Locked);
    }

    #[test]
    fn missing_fields_get_defaults() {
        let lock = Lock::new(&device(r#"{"id":"lock1","name":"Front Door"}"#));
        assert_eq!(lock.battery_level(), 0);
        assert_eq!(lock.firmware_version(), "1.0.0");
        assert_eq!(lock.state(), LockState::Locked);
    }

    #[test]
    fn unlocking_device_starts_in_unlocking() {
        let lock = Lock::new(&device(
            r#"{"id":"lock1","name":"Front Door","unlocking":true}"#,
        ));
        assert_eq!(lock.state(), LockState::Unlocking);
    }

    #[test]
    fn push_updates_battery_and_state() {
        let lock = Lock::new(&device(r#"{"id":"lock1","name":"Front Door","battery":90}"#));
        let data: PushData =
            serde_json::from_str(r#"{"battery":72,"unlocking":true}"#).unwrap();
        assert!(lock.apply_push(&data));
        assert_eq!(lock.battery_level(), 72);
        assert_eq!(lock.state(), LockState::Unlocking);

        // Same payload again changes nothing
        assert!(!lock.apply_push(&data));

        let done: PushData = serde_json::from_str(r#"{"unlocking":false}"#).unwrap();
        assert!(lock.apply_push(&done));
        assert_eq!(lock.state(), LockState::Locked);
        // Battery untouched when the message does not carry one
        assert_eq!(lock.battery_level(), 72);
    }

    #[test]
    fn subscribers_see_the_change() {
        let lock = Lock::new(&device(r#"{"id":"lock1","name":"Front Door"}"#));
        let mut rx = lock.subscribe();
        assert!(!rx.has_changed().unwrap());

        let data: PushData = serde_json::from_str(r#"{"battery":50}"#).unwrap();
        assert!(lock.apply_push(&data));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().battery, 50);
    }

    #[test]
    fn state_names_match_convention() {
        assert_eq!(LockState::Locked.to_string(), "locked");
        assert_eq!(LockState::Locking.as_str(), "locking");
        assert_eq!(LockState::Unlocked.as_str(), "unlocked");
        assert_eq!(LockState::Unlocking.as_str(), "unlocking");
        assert_eq!(LockState::Jammed.as_str(), "jammed");
    }
}
