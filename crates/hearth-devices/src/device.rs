//! Device records: the raw shape the portal serves and the canonical
//! descriptor this library exposes.

use serde::{Deserialize, Serialize};

/// A device record exactly as the portal's devices endpoint serves it.
///
/// Only deserialized, never constructed by this library; the registry turns
/// it into a [`Device`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDeviceRecord {
    /// User-visible device name.
    pub account_name: String,
    /// Unique device serial.
    pub serial_number: String,
    /// Portal type identifier, the registry's lookup key.
    pub device_type: String,
    /// Coarse family grouping reported by the portal.
    #[serde(default)]
    pub device_family: Option<String>,
    /// Customer id owning the device.
    #[serde(default)]
    pub device_owner_customer_id: Option<String>,
    /// Whether the device is currently reachable.
    #[serde(default)]
    pub online: bool,
    /// Capability identifiers, e.g. `MICROPHONE`.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Serials of group members when this record is a speaker group.
    #[serde(default)]
    pub cluster_members: Option<Vec<String>>,
    /// Firmware version string.
    #[serde(default)]
    pub software_version: Option<String>,
}

/// Canonical device descriptor, normalized by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// User-visible device name.
    pub name: String,
    /// Unique device serial.
    pub serial_number: String,
    /// Portal type identifier.
    pub device_type: String,
    /// Marketing model name from the lookup table.
    pub model: String,
    /// Manufacturer from the lookup table.
    pub manufacturer: String,
    /// Coarse family grouping, when reported.
    pub family: Option<String>,
    /// Whether the device is currently reachable.
    pub online: bool,
    /// Capability identifiers.
    pub capabilities: Vec<String>,
    /// Group member serials; a standalone device lists only itself.
    pub cluster_members: Vec<String>,
    /// Firmware version string.
    pub software_version: Option<String>,
}

impl Device {
    /// Whether the device reports the given capability.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}
