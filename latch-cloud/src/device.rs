//! Device records returned by the vendor cloud

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One device as reported by the device-list endpoint
///
/// The vendor payload is only partially documented; the fields below are
/// the ones this integration reads. Everything else is kept in `extra`
/// so a cache round trip does not drop data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(default)]
    pub id: String,

    /// Vendor device identifier, used in push topics and sub-device checks
    #[serde(default)]
    pub did: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocking: Option<bool>,

    /// Vendor product id; "21" marks sub-device candidates
    #[serde(default)]
    pub pid: String,

    #[serde(default)]
    pub parent_id: String,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl DeviceRecord {
    /// True when this record is a hidden sub-device
    ///
    /// The vendor lists lock accessories as separate devices with
    /// `pid == "21"` and the parent's identifier embedded in their own
    /// `did`. Those must not surface as user-facing devices.
    pub fn is_hidden(&self) -> bool {
        if self.pid != "21" {
            return false;
        }
        !self.parent_id.is_empty() && self.did.contains(&self.parent_id)
    }

    /// Identifier used for push topics, preferring `id` over `did`
    pub fn push_id(&self) -> &str {
        if !self.id.is_empty() { &self.id } else { &self.did }
    }
}
