use tracing::info;

use crate::{
    hal::{Relay, SensorSample},
    outbox::Outbox,
    topics::{TOPIC_PUMP_COUNTDOWN, TOPIC_STATUS},
    types::{CountdownPayload, DeviceStatus, NotificationKind, StatusPayload},
};

pub const REASON_AUTO_CRITICAL: &str = "auto_critical";
pub const REASON_SCHEDULED: &str = "scheduled";
pub const REASON_MANUAL_MQTT: &str = "manual_mqtt";
pub const REASON_MANUAL_BUTTON: &str = "manual_button";

const COUNTDOWN_REFRESH_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuatorState {
    pub is_on: bool,
    pub stop_deadline_ms: u64,
    pub countdown_seconds: u64,
}

/// Owns the pump relay and its auto-off deadline.
pub struct ActuatorController {
    relay: Box<dyn Relay>,
    duration_ms: u64,
    state: ActuatorState,
    last_countdown_publish_ms: u64,
}

impl ActuatorController {
    pub fn new(mut relay: Box<dyn Relay>, duration_ms: u64) -> Self {
        relay.set_active(false);
        Self {
            relay,
            duration_ms,
            state: ActuatorState::default(),
            last_countdown_publish_ms: 0,
        }
    }

    pub fn state(&self) -> ActuatorState {
        self.state
    }

    pub fn is_on(&self) -> bool {
        self.state.is_on
    }

    pub fn turn_on(
        &mut self,
        reason: &str,
        now_ms: u64,
        sample: Option<SensorSample>,
        out: &mut Outbox,
    ) -> bool {
        if self.state.is_on {
            return false;
        }

        self.relay.set_active(true);
        self.state = ActuatorState {
            is_on: true,
            stop_deadline_ms: now_ms.saturating_add(self.duration_ms),
            countdown_seconds: 0,
        };
        info!("pump on ({reason}) for {} ms", self.duration_ms);

        out.publish(
            TOPIC_STATUS,
            &StatusPayload {
                state: DeviceStatus::Pumping,
            },
            true,
        );
        out.alert_with_sample(
            NotificationKind::Info,
            format!("Pump turned ON ({reason})."),
            sample,
        );
        self.publish_countdown(now_ms, out);
        true
    }

    pub fn turn_off(&mut self, now_ms: u64, sample: Option<SensorSample>, out: &mut Outbox) -> bool {
        if !self.state.is_on {
            return false;
        }

        self.relay.set_active(false);
        self.state = ActuatorState::default();
        info!("pump off");

        out.publish(
            TOPIC_STATUS,
            &StatusPayload {
                state: DeviceStatus::Idle,
            },
            true,
        );
        out.publish(TOPIC_PUMP_COUNTDOWN, &CountdownPayload { countdown: 0 }, true);
        self.last_countdown_publish_ms = now_ms;
        out.alert_with_sample(NotificationKind::Info, "Pump turned OFF.", sample);
        true
    }

    /// Safety cutoff and countdown refresh; runs every tick in every state.
    pub fn tick(&mut self, now_ms: u64, sample: Option<SensorSample>, out: &mut Outbox) {
        if !self.state.is_on {
            return;
        }

        if now_ms >= self.state.stop_deadline_ms {
            self.turn_off(now_ms, sample, out);
            return;
        }

        let remaining = self.remaining_seconds(now_ms);
        if remaining != self.state.countdown_seconds
            || now_ms.saturating_sub(self.last_countdown_publish_ms) >= COUNTDOWN_REFRESH_MS
        {
            self.publish_countdown(now_ms, out);
        }
    }

    fn publish_countdown(&mut self, now_ms: u64, out: &mut Outbox) {
        let remaining = self.remaining_seconds(now_ms);
        self.state.countdown_seconds = remaining;
        self.last_countdown_publish_ms = now_ms;
        out.publish(
            TOPIC_PUMP_COUNTDOWN,
            &CountdownPayload {
                countdown: remaining,
            },
            true,
        );
    }

    fn remaining_seconds(&self, now_ms: u64) -> u64 {
        self.state
            .stop_deadline_ms
            .saturating_sub(now_ms)
            .div_ceil(1_000)
    }
}
