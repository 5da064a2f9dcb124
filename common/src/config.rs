use serde::{Deserialize, Serialize};

use crate::schedule::ScheduleHours;

pub const DEFAULT_HUMIDITY_CRITICAL: f32 = 80.0;
pub const DEFAULT_HUMIDITY_WARNING: f32 = 85.0;

/// Remotely configurable control parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceConfig {
    pub humidity_critical: f32,
    pub humidity_warning: f32,
    pub schedule: ScheduleHours,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            humidity_critical: DEFAULT_HUMIDITY_CRITICAL,
            humidity_warning: DEFAULT_HUMIDITY_WARNING,
            schedule: ScheduleHours::default(),
        }
    }
}

impl DeviceConfig {
    pub fn payload(&self) -> ConfigPayload {
        ConfigPayload {
            h_crit: self.humidity_critical,
            h_warn: self.humidity_warning,
            schedules: self.schedule,
        }
    }
}

/// Retained config echo published on the config-get topic.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigPayload {
    pub h_crit: f32,
    pub h_warn: f32,
    pub schedules: ScheduleHours,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub http_timeout_ms: u64,
    pub chunk_size: usize,
    pub chunks_per_tick: usize,
    pub progress_step_percent: u8,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 5_000,
            http_timeout_ms: 30_000,
            chunk_size: 1_024,
            chunks_per_tick: 8,
            progress_step_percent: 10,
        }
    }
}

/// Minimum spacing between accepted emails, per alert category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailIntervals {
    pub firmware_ms: u64,
    pub critical_ms: u64,
    pub warning_ms: u64,
    pub normal_ms: u64,
}

impl Default for EmailIntervals {
    fn default() -> Self {
        Self {
            firmware_ms: 21_600_000,
            critical_ms: 300_000,
            warning_ms: 900_000,
            normal_ms: 900_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub actuator_duration_ms: u64,
    pub control_interval_ms: u64,
    pub link_signal_interval_ms: u64,
    pub probe_interval_ms: u64,
    pub broker_retry_interval_ms: u64,
    pub broker_connect_timeout_ms: u64,
    pub publish_attempts: u32,
    pub publish_retry_delay_ms: u64,
    pub max_inbound_payload_bytes: usize,
    pub inbound_queue_capacity: usize,
    pub wifi_connect_attempts: u32,
    pub wifi_attempt_timeout_ms: u64,
    pub ota: OtaConfig,
    pub email: EmailIntervals,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            actuator_duration_ms: 30_000,
            control_interval_ms: 5_000,
            link_signal_interval_ms: 60_000,
            probe_interval_ms: 1_800_000,
            broker_retry_interval_ms: 5_000,
            broker_connect_timeout_ms: 15_000,
            publish_attempts: 3,
            publish_retry_delay_ms: 500,
            max_inbound_payload_bytes: 512,
            inbound_queue_capacity: 16,
            wifi_connect_attempts: 5,
            wifi_attempt_timeout_ms: 10_000,
            ota: OtaConfig::default(),
            email: EmailIntervals::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub client_id_prefix: String,
    pub email_endpoint: String,
    pub email_key: String,
    #[serde(default)]
    pub probe_url: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            client_id_prefix: "jamur-iot-".to_string(),
            email_endpoint: String::new(),
            email_key: String::new(),
            probe_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub controller: ControllerConfig,
    pub network: NetworkConfig,
    pub timezone: String,
    #[serde(default)]
    pub location: Location,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            network: NetworkConfig::default(),
            timezone: "Asia/Jakarta".to_string(),
            location: Location::default(),
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        self.actuator_duration_ms = self.actuator_duration_ms.clamp(1_000, 600_000);
        self.control_interval_ms = self.control_interval_ms.max(500);
        self.broker_retry_interval_ms = self.broker_retry_interval_ms.max(1_000);
        self.broker_connect_timeout_ms = self
            .broker_connect_timeout_ms
            .max(self.broker_retry_interval_ms);
        self.publish_attempts = self.publish_attempts.clamp(1, 10);
        self.publish_retry_delay_ms = self.publish_retry_delay_ms.min(2_000);
        self.inbound_queue_capacity = self.inbound_queue_capacity.max(1);
        self.wifi_connect_attempts = self.wifi_connect_attempts.max(1);
        self.ota.max_attempts = self.ota.max_attempts.max(1);
        self.ota.chunk_size = self.ota.chunk_size.clamp(256, 16_384);
        self.ota.chunks_per_tick = self.ota.chunks_per_tick.max(1);
        self.ota.progress_step_percent = self.ota.progress_step_percent.clamp(1, 100);
    }
}

/// MQTT client id: prefix plus the last six hex digits of the MAC.
pub fn client_id_from_hardware_id(prefix: &str, hardware_id: &str) -> String {
    let compact: String = hardware_id
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_ascii_uppercase();
    let suffix = compact.get(6..).unwrap_or(compact.as_str());
    format!("{prefix}{suffix}")
}
