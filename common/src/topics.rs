pub const TOPIC_TELEMETRY: &str = "jamur/telemetry";
pub const TOPIC_STATUS: &str = "jamur/status";
pub const TOPIC_NOTIFICATIONS: &str = "jamur/notifications";
pub const TOPIC_LINK_SIGNAL: &str = "jamur/wifi_signal";
pub const TOPIC_CONFIG_GET: &str = "jamur/config/get";
pub const TOPIC_PUMP_COUNTDOWN: &str = "jamur/pump/countdown";
pub const TOPIC_PROBE_RESULT: &str = "jamur/network/probe";

pub const TOPIC_FIRMWARE_CURRENT: &str = "jamur/firmware/current";
pub const TOPIC_FIRMWARE_PROGRESS: &str = "jamur/firmware/update";

pub const TOPIC_CMD_PUMP: &str = "jamur/control/pump";
pub const TOPIC_CMD_CONFIG_SET: &str = "jamur/config/set";
pub const TOPIC_CMD_SYSTEM_UPDATE: &str = "jamur/system/update";
pub const TOPIC_FIRMWARE_ADVERT: &str = "jamur/firmware/new_available";

/// Topics (re)subscribed after every successful broker connection.
pub const SUBSCRIBED_TOPICS: [&str; 4] = [
    TOPIC_CMD_PUMP,
    TOPIC_CMD_CONFIG_SET,
    TOPIC_CMD_SYSTEM_UPDATE,
    TOPIC_FIRMWARE_ADVERT,
];
