//! Static classification of raw portal device records.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use crate::device::{Device, RawDeviceRecord};

/// Model metadata for one portal device type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    /// Marketing model name.
    pub model: &'static str,
    /// Manufacturer name.
    pub manufacturer: &'static str,
}

/// Outcome of classifying one raw record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// A usable device.
    Device(Device),
    /// A type on the ignore list (companion apps, stale phantom entries).
    Ignored,
    /// A type absent from the lookup table.
    Unrecognized,
}

/// Device types the portal reports but that are not controllable devices:
/// the companion apps themselves and third-party integrations that only
/// mirror account state.
pub const DEFAULT_IGNORE_LIST: &[&str] = &[
    "HRTHVIRT0001", // this library's own virtual device type
    "HRTHAPPI0001", // companion app, phone
    "HRTHAPPI0002", // companion app, tablet
    "HRTHTHRD0001", // third-party thermostat shadow entry
    "HRTHTHRD0002", // third-party headset shadow entry
];

/// Built-in model lookup table.
pub fn default_model_table() -> HashMap<String, ModelInfo> {
    let entries: &[(&str, ModelInfo)] = &[
        (
            "HRTHSPKR0001",
            ModelInfo {
                model: "Hearth Speaker",
                manufacturer: "Hearth",
            },
        ),
        (
            "HRTHSPKR0002",
            ModelInfo {
                model: "Hearth Speaker Mini",
                manufacturer: "Hearth",
            },
        ),
        (
            "HRTHDISP0001",
            ModelInfo {
                model: "Hearth Display 8",
                manufacturer: "Hearth",
            },
        ),
        (
            "HRTHGRUP0001",
            ModelInfo {
                model: "Speaker Group",
                manufacturer: "Hearth",
            },
        ),
    ];
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Classifies raw portal records against an injected lookup table.
///
/// Unknown device types are reported once per type at warn level and then
/// silently skipped; a new device type in the account must never fail the
/// whole catalog fetch.
pub struct DeviceRegistry {
    table: HashMap<String, ModelInfo>,
    ignore: HashSet<String>,
    warned: Mutex<HashSet<String>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(
            default_model_table(),
            DEFAULT_IGNORE_LIST.iter().map(|s| s.to_string()).collect(),
        )
    }
}

impl DeviceRegistry {
    /// Build a registry from an explicit table and ignore list.
    pub fn new(table: HashMap<String, ModelInfo>, ignore: HashSet<String>) -> Self {
        Self {
            table,
            ignore,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Classify one raw record. The ignore list is consulted before the
    /// lookup table, so an ignored type never counts as unrecognized.
    pub fn classify(&self, raw: &RawDeviceRecord) -> Classified {
        if self.ignore.contains(&raw.device_type) {
            return Classified::Ignored;
        }

        let Some(info) = self.table.get(&raw.device_type) else {
            let mut warned = self.warned.lock().expect("Mutex is not poisoned");
            if warned.insert(raw.device_type.clone()) {
                tracing::warn!(
                    device_type = %raw.device_type,
                    "unknown device type, skipping; classification table may need an update"
                );
            }
            return Classified::Unrecognized;
        };

        let cluster_members = match &raw.cluster_members {
            Some(members) if !members.is_empty() => members.clone(),
            _ => vec![raw.serial_number.clone()],
        };

        Classified::Device(Device {
            name: raw.account_name.clone(),
            serial_number: raw.serial_number.clone(),
            device_type: raw.device_type.clone(),
            model: info.model.to_string(),
            manufacturer: info.manufacturer.to_string(),
            family: raw.device_family.clone(),
            online: raw.online,
            capabilities: raw.capabilities.clone(),
            cluster_members,
            software_version: raw.software_version.clone(),
        })
    }
}
