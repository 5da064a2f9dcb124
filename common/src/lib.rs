pub mod actuator;
pub mod app;
pub mod commands;
pub mod config;
pub mod config_sync;
pub mod control;
pub mod error;
pub mod hal;
pub mod notify;
pub mod ota;
pub mod outbox;
pub mod rate_limit;
pub mod schedule;
pub mod session;
pub mod storage;
pub mod topics;
pub mod types;

#[cfg(test)]
mod testing;

/// Version string of the running image.
pub const FIRMWARE_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

pub use actuator::{ActuatorController, ActuatorState};
pub use app::{Device, Peripherals, TickOutcome};
pub use config::{ControllerConfig, DeviceConfig, NetworkConfig, RuntimeConfig};
pub use control::EnvironmentalControlEngine;
pub use notify::NotificationDispatcher;
pub use ota::OtaUpdateManager;
pub use rate_limit::{AlertCategory, EmailRateLimiter};
pub use schedule::ScheduleHours;
pub use session::MessagingSession;
pub use topics::*;
pub use types::{AppState, SeverityLevel};
