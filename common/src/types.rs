use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Booting,
    ApMode,
    Connecting,
    NormalOperation,
    MenuInfo,
    Updating,
}

impl AppState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Booting => "BOOTING",
            Self::ApMode => "AP_MODE",
            Self::Connecting => "CONNECTING",
            Self::NormalOperation => "NORMAL_OPERATION",
            Self::MenuInfo => "MENU_INFO",
            Self::Updating => "UPDATING",
        }
    }
}

/// Humidity severity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityLevel {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Pumping,
    Idle,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Pumping => "pumping",
            Self::Idle => "idle",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub state: DeviceStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryPayload {
    pub temperature: f32,
    pub humidity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountdownPayload {
    pub countdown: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkSignalPayload {
    pub rssi: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FirmwareVersionPayload<'a> {
    pub version: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareStatus {
    Updating,
    Updated,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FirmwareStatusPayload<'a> {
    pub status: FirmwareStatus,
    pub version: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OtaStage {
    Downloading,
    Installing,
    Finished,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtaProgressPayload {
    pub stage: OtaStage,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Body of the system update command topic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdateCommand {
    pub command: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

pub const FIRMWARE_UPDATE_COMMAND: &str = "FIRMWARE_UPDATE";

/// Out-of-band advertisement of a newer firmware build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PendingFirmwareInfo {
    pub version: String,
    #[serde(default)]
    pub release_notes: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub ping_ms: u32,
    pub download_mbps: f32,
    pub upload_mbps: f32,
    pub lat: f64,
    pub lon: f64,
}

/// JSON body posted to the remote email trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
}

impl EmailPayload {
    pub fn alert(kind: &'static str, message: &str, humidity: f32, temperature: f32) -> Self {
        Self {
            kind,
            message: message.to_string(),
            humidity: Some(humidity),
            temperature: Some(temperature),
            version: None,
            release_notes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_omits_missing_readings() {
        let notification = Notification {
            kind: NotificationKind::Error,
            message: "Firmware update failed.".to_string(),
            humidity: None,
            temperature: None,
        };

        let body = serde_json::to_string(&notification).unwrap();
        assert_eq!(body, r#"{"type":"error","message":"Firmware update failed."}"#);
    }

    #[test]
    fn advertisement_tolerates_missing_optional_fields() {
        let info: PendingFirmwareInfo = serde_json::from_str(r#"{"version":"v25.0"}"#).unwrap();
        assert_eq!(info.version, "v25.0");
        assert!(info.release_notes.is_empty());
        assert!(info.url.is_empty());
    }
}
