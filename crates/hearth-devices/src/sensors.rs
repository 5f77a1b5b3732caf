//! Sensor readings exposed through the portal's graph endpoint.
//!
//! Sensor state does not live on the REST device records; the portal reports
//! it as feature/property trees keyed by endpoint id. Only features in the
//! template table below become sensors, everything else is skipped, so a new
//! feature type appearing in an account never breaks a fetch.

use std::collections::HashMap;

use serde_json::Value;

/// One sensor reading on a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSensor {
    /// Canonical sensor name (`temperature`, `reachability`, ...).
    pub name: String,
    /// Raw reading; numeric or string depending on the sensor.
    pub value: Value,
    /// Unit scale, when the portal reports one.
    pub scale: Option<String>,
    /// Whether the portal flagged this reading as errored.
    pub error: bool,
}

/// How one portal feature maps onto a sensor reading.
struct SensorTemplate {
    feature: &'static str,
    name: &'static str,
    key: &'static str,
    subkey: Option<&'static str>,
    scale: Option<&'static str>,
}

const SENSOR_TEMPLATES: &[SensorTemplate] = &[
    SensorTemplate {
        feature: "temperatureSensor",
        name: "temperature",
        key: "value",
        subkey: Some("value"),
        scale: Some("scale"),
    },
    SensorTemplate {
        feature: "motionSensor",
        name: "detectionState",
        key: "detectionStateValue",
        subkey: None,
        scale: None,
    },
    SensorTemplate {
        feature: "lightSensor",
        name: "illuminance",
        key: "illuminanceValue",
        subkey: Some("value"),
        scale: None,
    },
    SensorTemplate {
        feature: "connectivity",
        name: "reachability",
        key: "reachabilityStatusValue",
        subkey: None,
        scale: None,
    },
];

/// Parse one endpoint's feature list into sensors, keyed by sensor name.
///
/// Features without a template, properties with an empty value, and readings
/// the portal reports as `NOT_FOUND` are skipped. A reading flagged with any
/// other error is kept with `error` set so callers can mark state as stale.
pub(crate) fn sensors_from_features(
    features: &[Value],
    serial: &str,
) -> HashMap<String, DeviceSensor> {
    let mut sensors = HashMap::new();

    for feature in features {
        let Some(template) = feature["name"]
            .as_str()
            .and_then(|name| SENSOR_TEMPLATES.iter().find(|t| t.feature == name))
        else {
            continue;
        };
        let Some(properties) = feature["properties"].as_array() else {
            continue;
        };

        for property in properties {
            if property["name"].as_str() != Some(template.name) {
                continue;
            }

            // "error" can be null, missing, or an object.
            let error = property["error"]
                .as_object()
                .is_some_and(|e| !e.is_empty());
            if property["error"]["type"].as_str() == Some("NOT_FOUND") {
                continue;
            }

            let mut value = Value::Null;
            let mut scale = None;
            if !error {
                let raw = &property[template.key];
                if raw.is_null() {
                    tracing::warn!(
                        sensor = template.name,
                        device = serial,
                        "sensor ignored due to empty value"
                    );
                    continue;
                }
                scale = template
                    .scale
                    .and_then(|key| raw[key].as_str().map(String::from));
                value = match template.subkey {
                    Some(subkey) => raw[subkey].clone(),
                    None => raw.clone(),
                };
            } else {
                tracing::debug!(
                    sensor = template.name,
                    device = serial,
                    error_type = property["error"]["type"].as_str().unwrap_or("unknown"),
                    "sensor reading carries an error"
                );
            }

            sensors.insert(
                template.name.to_string(),
                DeviceSensor {
                    name: template.name.to_string(),
                    value,
                    scale,
                    error,
                },
            );
        }
    }

    sensors
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn temperature_reading_carries_value_and_scale() {
        let features = vec![json!({
            "name": "temperatureSensor",
            "properties": [{
                "name": "temperature",
                "value": { "value": 21.5, "scale": "CELSIUS" },
            }],
        })];

        let sensors = sensors_from_features(&features, "S-1");
        let temperature = sensors.get("temperature").expect("reading present");
        assert_eq!(temperature.value, json!(21.5));
        assert_eq!(temperature.scale.as_deref(), Some("CELSIUS"));
        assert!(!temperature.error);
    }

    #[test]
    fn reachability_reading_is_the_raw_status() {
        let features = vec![json!({
            "name": "connectivity",
            "properties": [{
                "name": "reachability",
                "reachabilityStatusValue": "OK",
            }],
        })];

        let sensors = sensors_from_features(&features, "S-1");
        assert_eq!(
            sensors.get("reachability").map(|s| &s.value),
            Some(&json!("OK"))
        );
    }

    #[test]
    fn unknown_features_are_skipped() {
        let features = vec![json!({
            "name": "novelFeature",
            "properties": [{ "name": "novel", "value": 1 }],
        })];

        assert!(sensors_from_features(&features, "S-1").is_empty());
    }

    #[test]
    fn not_found_errors_drop_the_reading() {
        let features = vec![json!({
            "name": "lightSensor",
            "properties": [{
                "name": "illuminance",
                "error": { "type": "NOT_FOUND", "message": "gone" },
            }],
        })];

        assert!(sensors_from_features(&features, "S-1").is_empty());
    }

    #[test]
    fn other_errors_keep_the_reading_flagged() {
        let features = vec![json!({
            "name": "motionSensor",
            "properties": [{
                "name": "detectionState",
                "error": { "type": "TIMEOUT", "message": "device busy" },
            }],
        })];

        let sensors = sensors_from_features(&features, "S-1");
        let detection = sensors.get("detectionState").expect("reading kept");
        assert!(detection.error);
        assert_eq!(detection.value, Value::Null);
    }

    #[test]
    fn empty_values_are_skipped() {
        let features = vec![json!({
            "name": "temperatureSensor",
            "properties": [{ "name": "temperature" }],
        })];

        assert!(sensors_from_features(&features, "S-1").is_empty());
    }
}
