use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::constants::DEFAULT_AVAILABILITY_THRESHOLD_SECS;
use crate::error::LockError;

/// Per-lock settings handed to a session at attach time.
///
/// Field aliases accept the names used by the Airbnk cloud export.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Base64 provisioning blob
    #[serde(alias = "newSninfo", alias = "newSnInfo")]
    pub new_sn_info: String,
    #[serde(alias = "appKey")]
    pub app_key: String,
    /// Empty or missing: discover the MAC from advertisements
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Gateway topic the bridge publishes commands under
    #[serde(default)]
    pub mqtt_topic: String,
    #[serde(default, alias = "deviceName")]
    pub device_name: Option<String>,
    #[serde(default, alias = "deviceType")]
    pub device_type: Option<String>,
    #[serde(default, alias = "firmwareVersion")]
    pub firmware_version: Option<String>,
    #[serde(default = "default_availability_threshold")]
    pub availability_threshold_secs: u64,
    /// Unset: an unacknowledged operation stays in flight until the next request
    #[serde(default)]
    pub ack_timeout_secs: Option<u64>,
}

fn default_availability_threshold() -> u64 {
    DEFAULT_AVAILABILITY_THRESHOLD_SECS
}

impl DeviceConfig {
    pub fn new(new_sn_info: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            new_sn_info: new_sn_info.into(),
            app_key: app_key.into(),
            mac_address: None,
            mqtt_topic: String::new(),
            device_name: None,
            device_type: None,
            firmware_version: None,
            availability_threshold_secs: DEFAULT_AVAILABILITY_THRESHOLD_SECS,
            ack_timeout_secs: None,
        }
    }

    pub fn with_mac_address(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    pub fn with_mqtt_topic(mut self, topic: impl Into<String>) -> Self {
        self.mqtt_topic = topic.into();
        self
    }

    pub fn with_ack_timeout_secs(mut self, secs: u64) -> Self {
        self.ack_timeout_secs = Some(secs);
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self, LockError> {
        let config: DeviceConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), LockError> {
        if self.new_sn_info.trim().is_empty() {
            return Err(LockError::Config("new_sn_info is empty".to_string()));
        }
        if self.app_key.is_empty() {
            return Err(LockError::Config("app_key is empty".to_string()));
        }
        if self.availability_threshold_secs == 0 {
            return Err(LockError::Config("availability_threshold_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Configured MAC address, treating an empty string as unset.
    pub fn mac(&self) -> Option<&str> {
        self.mac_address.as_deref().map(str::trim).filter(|mac| !mac.is_empty())
    }

    pub fn availability_threshold(&self) -> Duration {
        seconds(self.availability_threshold_secs)
    }

    pub fn ack_timeout(&self) -> Option<Duration> {
        self.ack_timeout_secs.map(seconds)
    }
}

fn seconds(secs: u64) -> Duration {
    // chrono caps durations at i64::MAX milliseconds
    Duration::seconds(secs.min(i64::MAX as u64 / 1000) as i64)
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("new_sn_info", &"<redacted>")
            .field("app_key", &"<redacted>")
            .field("mac_address", &self.mac_address)
            .field("mqtt_topic", &self.mqtt_topic)
            .field("device_name", &self.device_name)
            .field("device_type", &self.device_type)
            .field("firmware_version", &self.firmware_version)
            .field("availability_threshold_secs", &self.availability_threshold_secs)
            .field("ack_timeout_secs", &self.ack_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_field_names() {
        let config = DeviceConfig::from_json_str(
            r#"{
                "newSninfo": "AAAA",
                "appKey": "0123456789abcdefWXYZ",
                "mac_address": "",
                "mqtt_topic": "tasmota_ble",
                "deviceName": "Front door",
                "deviceType": "M500"
            }"#,
        )
        .unwrap();
        assert_eq!(config.new_sn_info, "AAAA");
        assert_eq!(config.mac(), None);
        assert_eq!(config.device_name.as_deref(), Some("Front door"));
        assert_eq!(config.availability_threshold(), Duration::seconds(30));
        assert_eq!(config.ack_timeout(), None);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            DeviceConfig::from_json_str(r#"{"new_sn_info": "", "app_key": "k"}"#),
            Err(LockError::Config(_))
        ));
        assert!(matches!(
            DeviceConfig::from_json_str(r#"{"new_sn_info": "x", "app_key": "k", "availability_threshold_secs": 0}"#),
            Err(LockError::Config(_))
        ));
        assert!(matches!(DeviceConfig::from_json_str("{}"), Err(LockError::Json(_))));
    }

    #[test]
    fn test_builder_and_debug() {
        let config = DeviceConfig::new("blob", "secret-app-key")
            .with_mac_address("AA:BB")
            .with_ack_timeout_secs(15);
        assert_eq!(config.mac(), Some("AA:BB"));
        assert_eq!(config.ack_timeout(), Some(Duration::seconds(15)));
        assert!(!format!("{config:?}").contains("secret-app-key"));
    }
}
