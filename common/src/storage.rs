use serde::{Deserialize, Serialize};

use crate::{
    config::{DeviceConfig, DEFAULT_HUMIDITY_CRITICAL, DEFAULT_HUMIDITY_WARNING},
    error::StoreError,
    hal::{KeyValueStore, WifiCredentials},
    schedule::ScheduleHours,
};

pub const NS_DEVICE_CONFIG: &str = "device-config";
pub const NS_NETWORK: &str = "network";

/// Thresholds and schedule are one record so a failed write can never
/// leave a mix of old and new values behind.
pub const KEY_DEVICE_CONFIG: &str = "config";
pub const KEY_WIFI: &str = "wifi";

#[derive(Debug, Serialize, Deserialize)]
struct StoredConfig {
    #[serde(default = "default_critical")]
    h_crit: f32,
    #[serde(default = "default_warning")]
    h_warn: f32,
    #[serde(default = "ScheduleHours::empty")]
    schedules: ScheduleHours,
}

fn default_critical() -> f32 {
    DEFAULT_HUMIDITY_CRITICAL
}

fn default_warning() -> f32 {
    DEFAULT_HUMIDITY_WARNING
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCredentials {
    ssid: String,
    #[serde(default)]
    pass: String,
}

pub fn load_device_config(store: &dyn KeyValueStore) -> Result<DeviceConfig, StoreError> {
    let Some(stored) = load_record::<StoredConfig>(store, NS_DEVICE_CONFIG, KEY_DEVICE_CONFIG)?
    else {
        return Ok(DeviceConfig::default());
    };
    let schedule = if stored.schedules.is_empty() {
        ScheduleHours::default()
    } else {
        stored.schedules
    };
    Ok(DeviceConfig {
        humidity_critical: stored.h_crit,
        humidity_warning: stored.h_warn,
        schedule,
    })
}

pub fn save_device_config(
    store: &mut dyn KeyValueStore,
    config: &DeviceConfig,
) -> Result<(), StoreError> {
    let record = StoredConfig {
        h_crit: config.humidity_critical,
        h_warn: config.humidity_warning,
        schedules: config.schedule,
    };
    save_record(store, NS_DEVICE_CONFIG, KEY_DEVICE_CONFIG, &record)
}

pub fn load_credentials(store: &dyn KeyValueStore) -> Result<Option<WifiCredentials>, StoreError> {
    Ok(load_record::<StoredCredentials>(store, NS_NETWORK, KEY_WIFI)?
        .map(|stored| WifiCredentials {
            ssid: stored.ssid,
            pass: stored.pass,
        }))
}

pub fn save_credentials(
    store: &mut dyn KeyValueStore,
    credentials: &WifiCredentials,
) -> Result<(), StoreError> {
    let record = StoredCredentials {
        ssid: credentials.ssid.clone(),
        pass: credentials.pass.clone(),
    };
    save_record(store, NS_NETWORK, KEY_WIFI, &record)
}

fn load_record<T>(
    store: &dyn KeyValueStore,
    namespace: &str,
    key: &str,
) -> Result<Option<T>, StoreError>
where
    T: for<'de> Deserialize<'de>,
{
    match store.get(namespace, key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| StoreError::Corrupt {
                key: key.to_string(),
                reason: err.to_string(),
            }),
        None => Ok(None),
    }
}

fn save_record<T: Serialize>(
    store: &mut dyn KeyValueStore,
    namespace: &str,
    key: &str,
    record: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(record).map_err(|err| StoreError::Corrupt {
        key: key.to_string(),
        reason: err.to_string(),
    })?;
    store.set(namespace, key, &raw)
}
