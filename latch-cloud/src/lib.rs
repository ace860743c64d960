//! Latch Cloud - client for the fingercrystal lock cloud
//!
//! Provides password login, the device directory with a local snapshot
//! cache, miot-spec property calls and the MQTT push channel.

pub mod auth;
pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod push;
pub mod session;

pub use config::CloudConfig;
pub use error::{CloudError, CloudResult};
pub use session::CloudSession;

// Storage and cache layers
pub use auth::{AuthStorage, StoredAuth};
pub use cache::{DeviceCache, DeviceSnapshot, DeviceSource};
pub use device::DeviceRecord;

// Push channel
pub use push::{PushConfig, PushData, PushListener, PushMessage};
