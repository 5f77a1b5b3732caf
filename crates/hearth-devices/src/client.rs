//! The authenticated device-control surface.
//!
//! Every call funnels through the [`Dispatcher`], so concurrent callers are
//! serialized, throttling is absorbed, and a mid-queue session expiry is
//! re-authenticated exactly once without the caller noticing.

use std::collections::HashMap;

use hearth_core::{
    Error, NetworkError, PortalSettings,
    dispatcher::Dispatcher,
    http::PortalRequest,
};
use serde::Deserialize;

use crate::{
    device::{Device, RawDeviceRecord},
    registry::{Classified, DeviceRegistry},
    sensors::{DeviceSensor, sensors_from_features},
};

/// Listing query for the graph endpoint; maps endpoint ids to serials.
const QUERY_ENDPOINTS: &str = "\
query listDeviceEndpoints {
  endpoints {
    endpointId: id
    category
    serialNumber { value { text } }
  }
}";

/// Per-endpoint sensor state query.
const QUERY_SENSOR_STATE: &str = "\
query getEndpointState($endpointIds: [String]!) {
  endpoints(ids: $endpointIds) {
    endpointId: id
    features {
      name
      properties {
        name
        error { type message }
        value
        detectionStateValue
        illuminanceValue
        reachabilityStatusValue
      }
    }
  }
}";

/// High-level client for the device-control API.
pub struct DeviceClient {
    dispatcher: Dispatcher,
    settings: PortalSettings,
    registry: DeviceRegistry,
}

impl DeviceClient {
    /// Build a client with the default classification table.
    pub fn new(dispatcher: Dispatcher, settings: PortalSettings) -> Self {
        Self::with_registry(dispatcher, settings, DeviceRegistry::default())
    }

    /// Build a client with a custom registry.
    pub fn with_registry(
        dispatcher: Dispatcher,
        settings: PortalSettings,
        registry: DeviceRegistry,
    ) -> Self {
        Self {
            dispatcher,
            settings,
            registry,
        }
    }

    /// Fetch the device catalog, keyed by serial number.
    ///
    /// Records the registry cannot classify are skipped, never fatal: a new
    /// device type appearing in the account degrades to a warning.
    pub async fn get_devices(&self) -> Result<HashMap<String, Device>, Error> {
        let response = self
            .dispatcher
            .enqueue(PortalRequest::get(format!(
                "{}/api/devices-v2/device?cached=false",
                self.settings.api_url
            )))
            .await?;

        let envelope: DevicesEnvelope =
            serde_json::from_str(&response.body).map_err(NetworkError::Serde)?;

        let mut devices = HashMap::new();
        for value in envelope.devices {
            let raw: RawDeviceRecord = match serde_json::from_value(value) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("skipping malformed device record: {e}");
                    continue;
                }
            };
            match self.registry.classify(&raw) {
                Classified::Device(device) => {
                    devices.insert(device.serial_number.clone(), device);
                }
                Classified::Ignored | Classified::Unrecognized => {}
            }
        }
        tracing::debug!(count = devices.len(), "device catalog fetched");
        Ok(devices)
    }

    /// Have a device speak the given text aloud.
    pub async fn speak(&self, device: &Device, text: &str) -> Result<(), Error> {
        self.send_behavior(device, "Speak", serde_json::json!({ "textToSpeak": text }))
            .await
    }

    /// Play an announcement chime and message on a device.
    pub async fn announce(&self, device: &Device, text: &str) -> Result<(), Error> {
        self.send_behavior(
            device,
            "Announcement",
            serde_json::json!({ "textToAnnounce": text }),
        )
        .await
    }

    /// Run a free-form text command as if it had been spoken to the device.
    pub async fn text_command(&self, device: &Device, text: &str) -> Result<(), Error> {
        self.send_behavior(device, "TextCommand", serde_json::json!({ "text": text }))
            .await
    }

    /// Enable or disable do-not-disturb on a device.
    pub async fn set_do_not_disturb(&self, device: &Device, enabled: bool) -> Result<(), Error> {
        self.dispatcher
            .enqueue(PortalRequest::put_json(
                format!("{}/api/dnd/status", self.settings.api_url),
                serde_json::json!({
                    "deviceSerialNumber": device.serial_number,
                    "deviceType": device.device_type,
                    "enabled": enabled,
                }),
            ))
            .await?;
        Ok(())
    }

    /// Fetch the do-not-disturb flag for every device, keyed by serial.
    pub async fn get_do_not_disturb(&self) -> Result<HashMap<String, bool>, Error> {
        let response = self
            .dispatcher
            .enqueue(PortalRequest::get(format!(
                "{}/api/dnd/deviceStatusList",
                self.settings.api_url
            )))
            .await?;

        let envelope: DndEnvelope =
            serde_json::from_str(&response.body).map_err(NetworkError::Serde)?;
        Ok(envelope
            .do_not_disturb_device_status_list
            .into_iter()
            .map(|entry| (entry.device_serial_number, entry.enabled))
            .collect())
    }

    /// Map graph endpoint ids to device serial numbers.
    ///
    /// Companion-app endpoints carry no sensors and are dropped. A malformed
    /// listing degrades to an empty map, so sensor support disappearing on
    /// the portal side never fails a refresh cycle.
    pub async fn get_endpoints(&self) -> Result<HashMap<String, String>, Error> {
        let response = self
            .dispatcher
            .enqueue(
                PortalRequest::post_json(
                    format!("{}/api/graphql", self.settings.api_url),
                    serde_json::json!({ "query": QUERY_ENDPOINTS }),
                )
                .idempotent(true),
            )
            .await?;

        let body: serde_json::Value =
            serde_json::from_str(&response.body).map_err(NetworkError::Serde)?;
        let Some(endpoints) = body.pointer("/data/endpoints").and_then(|v| v.as_array()) else {
            tracing::warn!("malformed endpoint listing, sensor data unavailable");
            return Ok(HashMap::new());
        };

        let mut mapping = HashMap::new();
        for endpoint in endpoints {
            if endpoint["category"].as_str() == Some("APP") {
                continue;
            }
            let (Some(id), Some(serial)) = (
                endpoint["endpointId"].as_str(),
                endpoint
                    .pointer("/serialNumber/value/text")
                    .and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            mapping.insert(id.to_string(), serial.to_string());
        }
        tracing::debug!(count = mapping.len(), "endpoint mapping fetched");
        Ok(mapping)
    }

    /// Fetch sensor readings for the given endpoint-to-serial mapping, keyed
    /// by serial number.
    ///
    /// Single unreadable sensors are skipped and a malformed reply degrades
    /// to an empty result, never a hard failure.
    pub async fn get_sensors(
        &self,
        endpoints: &HashMap<String, String>,
    ) -> Result<HashMap<String, HashMap<String, DeviceSensor>>, Error> {
        if endpoints.is_empty() {
            return Ok(HashMap::new());
        }

        let endpoint_ids: Vec<&str> = endpoints.keys().map(String::as_str).collect();
        let response = self
            .dispatcher
            .enqueue(
                PortalRequest::post_json(
                    format!("{}/api/graphql", self.settings.api_url),
                    serde_json::json!({
                        "operationName": "getEndpointState",
                        "variables": { "endpointIds": endpoint_ids },
                        "query": QUERY_SENSOR_STATE,
                    }),
                )
                .idempotent(true),
            )
            .await?;

        let body: serde_json::Value =
            serde_json::from_str(&response.body).map_err(NetworkError::Serde)?;
        let Some(listed) = body.pointer("/data/endpoints").and_then(|v| v.as_array()) else {
            tracing::warn!("malformed sensor state data received");
            return Ok(HashMap::new());
        };

        let mut by_serial = HashMap::new();
        for endpoint in listed {
            let Some(serial) = endpoint["endpointId"]
                .as_str()
                .and_then(|id| endpoints.get(id))
            else {
                continue;
            };
            let features = endpoint["features"].as_array().cloned().unwrap_or_default();
            by_serial.insert(serial.clone(), sensors_from_features(&features, serial));
        }
        Ok(by_serial)
    }

    /// Wrap one operation in the behavior-sequence envelope the portal
    /// expects and submit it as a non-idempotent POST; a duplicate delivery
    /// would replay the device action.
    async fn send_behavior(
        &self,
        device: &Device,
        operation: &str,
        mut payload: serde_json::Value,
    ) -> Result<(), Error> {
        if let Some(map) = payload.as_object_mut() {
            map.insert(
                "deviceSerialNumber".into(),
                serde_json::Value::String(device.serial_number.clone()),
            );
            map.insert(
                "deviceType".into(),
                serde_json::Value::String(device.device_type.clone()),
            );
        }

        let sequence = serde_json::json!({
            "@type": "Sequence",
            "startNode": {
                "@type": "SerialNode",
                "nodesToExecute": [{
                    "@type": "OpsNode",
                    "type": operation,
                    "operationPayload": payload,
                }],
            },
        });

        tracing::debug!(
            device = %device.serial_number,
            operation,
            "sending behavior sequence"
        );

        self.dispatcher
            .enqueue(PortalRequest::post_json(
                format!("{}/api/behaviors/preview", self.settings.api_url),
                serde_json::json!({
                    "behaviorId": "PREVIEW",
                    "sequenceJson": sequence.to_string(),
                    "status": "ENABLED",
                }),
            ))
            .await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct DevicesEnvelope {
    #[serde(default)]
    devices: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DndEnvelope {
    #[serde(default)]
    do_not_disturb_device_status_list: Vec<DndEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DndEntry {
    device_serial_number: String,
    #[serde(default)]
    enabled: bool,
}
