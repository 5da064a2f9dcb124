//! Collaborator seams between the control core and the platform.
//!
//! Every method here is expected to return promptly. Nothing in the core
//! waits on these except [`Clock::pause`], which callers bound explicitly.

use chrono::{DateTime, FixedOffset};

use crate::{
    error::{FlashError, HttpError, LinkError, StoreError},
    types::{EmailPayload, ProbeResult},
};

pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin. Never goes backwards.
    fn now_ms(&self) -> u64;

    /// Wall-clock local time, `None` until the time source has synced.
    fn local_time(&self) -> Option<DateTime<FixedOffset>>;

    /// Bounded wait used between publish retries.
    fn pause(&self, ms: u64);
}

/// Physical actuator output (pump relay).
pub trait Relay: Send {
    fn set_active(&mut self, active: bool);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub humidity: f32,
    pub temperature: f32,
}

impl SensorSample {
    pub fn is_valid(&self) -> bool {
        self.humidity.is_finite() && self.temperature.is_finite()
    }
}

pub trait Sensor: Send {
    /// Returns NaN fields when the driver could not produce a reading.
    fn read(&mut self) -> SensorSample;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub pass: String,
}

impl WifiCredentials {
    pub fn is_usable(&self) -> bool {
        !self.ssid.trim().is_empty()
    }
}

/// Station/AP radio control.
pub trait Network: Send {
    fn begin_association(&mut self, credentials: &WifiCredentials) -> Result<(), LinkError>;
    fn disconnect(&mut self);
    fn is_associated(&self) -> bool;
    fn rssi(&self) -> Option<i32>;
    fn start_access_point(&mut self) -> Result<(), LinkError>;
    /// Stable hardware identifier (MAC address, colon separated).
    fn hardware_id(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub last_will: LastWill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected(String),
    Message { topic: String, payload: Vec<u8> },
}

/// Publish-subscribe transport. `connect` only starts an attempt; the
/// outcome arrives later through [`BrokerLink::poll`].
pub trait BrokerLink: Send {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), LinkError>;
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), LinkError>;
    fn subscribe(&mut self, topic: &str) -> Result<(), LinkError>;
    fn poll(&mut self) -> Option<LinkEvent>;
}

/// Remote email trigger endpoint.
pub trait EmailTransport: Send {
    /// Returns the HTTP status of the POST, or 202 when delivery was handed
    /// off to a background sender.
    fn send(&mut self, payload: &EmailPayload) -> Result<u16, HttpError>;
}

pub trait FirmwareDownload: Send {
    fn status(&self) -> u16;
    fn content_length(&self) -> Option<u64>;
    /// `Ok(0)` means the body ended.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError>;
}

pub trait FirmwareSource: Send {
    fn open(&mut self, url: &str, timeout_ms: u64)
        -> Result<Box<dyn FirmwareDownload>, HttpError>;
}

/// Inactive image slot writer.
pub trait FlashWriter: Send {
    fn free_space(&self) -> u64;
    fn begin(&mut self, size: u64) -> Result<(), FlashError>;
    fn write(&mut self, chunk: &[u8]) -> Result<usize, FlashError>;
    fn abort(&mut self);
    /// `Ok(true)` once the image is structurally complete and bootable.
    fn finish(&mut self) -> Result<bool, FlashError>;
}

/// Persisted key-value storage. Each call opens, operates and closes.
pub trait KeyValueStore: Send {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    ShortPress,
    LongPress,
    BackPress,
}

pub trait Inputs: Send {
    fn poll_event(&mut self) -> Option<InputEvent>;
    /// Whether the "enter setup" input is held right now.
    fn setup_held(&mut self) -> bool;
}

/// Local configuration portal served while in access-point mode.
pub trait Portal: Send {
    fn start(&mut self) -> Result<(), LinkError>;
    fn restart_requested(&mut self) -> bool;
}

/// Link quality measurement. The measurement itself runs elsewhere;
/// `start` only requests one.
pub trait ConnectivityProbe: Send {
    fn start(&mut self);
    /// A measurement finished since the last call.
    fn poll_result(&mut self) -> Option<ProbeResult>;
}

pub trait System: Send {
    fn restart(&mut self);
}
