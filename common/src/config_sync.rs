//! Remote configuration updates: parse, merge, persist, echo.

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    config::DeviceConfig,
    error::ConfigError,
    hal::KeyValueStore,
    outbox::Outbox,
    schedule::ScheduleHours,
    storage,
    topics::TOPIC_CONFIG_GET,
    types::NotificationKind,
};

#[derive(Debug, Default, Deserialize)]
struct ConfigUpdate {
    #[serde(default)]
    h_crit: Option<f32>,
    #[serde(default)]
    h_warn: Option<f32>,
    #[serde(default)]
    schedules: Option<Vec<Value>>,
}

/// Retained echo of the live configuration.
pub fn publish_config(config: &DeviceConfig, out: &mut Outbox) {
    out.publish(TOPIC_CONFIG_GET, &config.payload(), true);
}

/// Merges a partial update into `config`. On any failure `config` and the
/// persisted copy are left as they were and a local error alert is queued.
pub fn apply_update(
    config: &mut DeviceConfig,
    payload: &[u8],
    store: &mut dyn KeyValueStore,
    out: &mut Outbox,
) -> Result<(), ConfigError> {
    let result = merge(config, payload).and_then(|merged| {
        storage::save_device_config(store, &merged)?;
        Ok(merged)
    });

    match result {
        Ok(merged) => {
            *config = merged;
            info!(
                "config updated: crit={} warn={} schedule={:?}",
                config.humidity_critical,
                config.humidity_warning,
                config.schedule.as_slice()
            );
            publish_config(config, out);
            Ok(())
        }
        Err(err) => {
            warn!("config update rejected: {err}");
            out.alert(
                NotificationKind::Error,
                format!("Config update rejected: {err}"),
            );
            Err(err)
        }
    }
}

fn merge(current: &DeviceConfig, payload: &[u8]) -> Result<DeviceConfig, ConfigError> {
    let update: ConfigUpdate =
        serde_json::from_slice(payload).map_err(|err| ConfigError::Malformed(err.to_string()))?;

    let mut merged = *current;
    if let Some(critical) = update.h_crit {
        merged.humidity_critical = check_threshold(critical)?;
    }
    if let Some(warning) = update.h_warn {
        merged.humidity_warning = check_threshold(warning)?;
    }
    if merged.humidity_critical >= merged.humidity_warning {
        return Err(ConfigError::InconsistentThresholds {
            critical: merged.humidity_critical,
            warning: merged.humidity_warning,
        });
    }

    if let Some(entries) = update.schedules {
        let before = entries.len();
        merged.schedule = ScheduleHours::from_hours(entries.iter().filter_map(Value::as_i64));
        if merged.schedule.len() < before {
            warn!(
                "schedule update kept {} of {before} entries",
                merged.schedule.len()
            );
        }
    }

    Ok(merged)
}

fn check_threshold(value: f32) -> Result<f32, ConfigError> {
    if (0.0..=100.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::ThresholdOutOfRange(value))
    }
}
