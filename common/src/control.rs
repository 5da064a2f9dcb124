use tracing::{debug, info};

use crate::{
    actuator::{ActuatorController, REASON_AUTO_CRITICAL, REASON_SCHEDULED},
    config::DeviceConfig,
    hal::SensorSample,
    outbox::Outbox,
    rate_limit::AlertCategory,
    topics::TOPIC_TELEMETRY,
    types::{EmailPayload, NotificationKind, SeverityLevel, TelemetryPayload},
};

pub const EMAIL_KIND_CRITICAL: &str = "critical_alert";
pub const EMAIL_KIND_WARNING: &str = "warning";
pub const EMAIL_KIND_INFO: &str = "info";

/// Outcome of one control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Evaluated,
    /// The reading was not a number; nothing was decided this cycle.
    Discarded,
}

#[derive(Debug, Clone)]
pub struct EnvironmentalControlEngine {
    interval_ms: u64,
    level: SeverityLevel,
    last_cycle_ms: Option<u64>,
    last_scheduled_hour: Option<u8>,
    last_sample: Option<SensorSample>,
}

impl EnvironmentalControlEngine {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            level: SeverityLevel::Normal,
            last_cycle_ms: None,
            last_scheduled_hour: None,
            last_sample: None,
        }
    }

    pub fn level(&self) -> SeverityLevel {
        self.level
    }

    /// Most recent valid reading, if any.
    pub fn last_sample(&self) -> Option<SensorSample> {
        self.last_sample
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_cycle_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        }
    }

    pub fn evaluate(
        &mut self,
        sample: SensorSample,
        local_hour: Option<u8>,
        config: &DeviceConfig,
        actuator: &mut ActuatorController,
        now_ms: u64,
        out: &mut Outbox,
    ) -> CycleOutcome {
        self.last_cycle_ms = Some(now_ms);

        if !sample.is_valid() {
            debug!("discarding control cycle: sensor returned no reading");
            return CycleOutcome::Discarded;
        }
        self.last_sample = Some(sample);

        out.publish(
            TOPIC_TELEMETRY,
            &TelemetryPayload {
                temperature: sample.temperature,
                humidity: sample.humidity,
            },
            false,
        );

        self.evaluate_thresholds(sample, config, actuator, now_ms, out);
        if let Some(hour) = local_hour {
            self.evaluate_schedule(hour, sample, config, actuator, now_ms, out);
        }
        CycleOutcome::Evaluated
    }

    fn evaluate_thresholds(
        &mut self,
        sample: SensorSample,
        config: &DeviceConfig,
        actuator: &mut ActuatorController,
        now_ms: u64,
        out: &mut Outbox,
    ) {
        let humidity = sample.humidity;

        if humidity < config.humidity_critical {
            actuator.turn_on(REASON_AUTO_CRITICAL, now_ms, Some(sample), out);
            if self.level != SeverityLevel::Critical {
                let message = format!("Humidity critical ({humidity:.1}%)! Pump activated.");
                self.transition(
                    SeverityLevel::Critical,
                    NotificationKind::Warning,
                    AlertCategory::Critical,
                    EMAIL_KIND_CRITICAL,
                    message,
                    sample,
                    out,
                );
            }
        } else if humidity < config.humidity_warning {
            if self.level != SeverityLevel::Warning {
                let message = format!("Humidity low ({humidity:.1}%), approaching critical.");
                self.transition(
                    SeverityLevel::Warning,
                    NotificationKind::Warning,
                    AlertCategory::Warning,
                    EMAIL_KIND_WARNING,
                    message,
                    sample,
                    out,
                );
            }
        } else if self.level != SeverityLevel::Normal {
            self.transition(
                SeverityLevel::Normal,
                NotificationKind::Info,
                AlertCategory::Normal,
                EMAIL_KIND_INFO,
                "Humidity back to normal.".to_string(),
                sample,
                out,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn transition(
        &mut self,
        level: SeverityLevel,
        kind: NotificationKind,
        category: AlertCategory,
        email_kind: &'static str,
        message: String,
        sample: SensorSample,
        out: &mut Outbox,
    ) {
        info!("humidity level {:?} -> {level:?}", self.level);
        self.level = level;
        out.email(
            category,
            EmailPayload::alert(email_kind, &message, sample.humidity, sample.temperature),
        );
        out.alert_with_sample(kind, message, Some(sample));
    }

    fn evaluate_schedule(
        &mut self,
        hour: u8,
        sample: SensorSample,
        config: &DeviceConfig,
        actuator: &mut ActuatorController,
        now_ms: u64,
        out: &mut Outbox,
    ) {
        if self.last_scheduled_hour == Some(hour) {
            return;
        }

        for entry in config.schedule.matching(hour) {
            if sample.humidity >= config.humidity_critical {
                actuator.turn_on(REASON_SCHEDULED, now_ms, Some(sample), out);
                out.alert_with_sample(
                    NotificationKind::Info,
                    "Scheduled watering executed.",
                    Some(sample),
                );
            } else {
                out.alert_with_sample(
                    NotificationKind::Info,
                    format!(
                        "Scheduled watering at {entry}:00 skipped, humidity critical ({:.1}%).",
                        sample.humidity
                    ),
                    Some(sample),
                );
            }
        }
        self.last_scheduled_hour = Some(hour);
    }
}
