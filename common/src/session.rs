//! Broker connection lifecycle: time-gated reconnects, resubscription,
//! bounded publish retries and a bounded inbound queue.

use std::{collections::VecDeque, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    commands::{self, Command},
    config::{client_id_from_hardware_id, ControllerConfig, NetworkConfig},
    hal::{BrokerLink, Clock, ConnectOptions, LastWill, LinkEvent},
    notify::Publish,
    topics::{SUBSCRIBED_TOPICS, TOPIC_STATUS},
    types::DeviceStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Online status published and subscriptions issued; retained state
    /// should be republished by the owner.
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub retry_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub publish_attempts: u32,
    pub publish_retry_delay_ms: u64,
    pub max_payload_bytes: usize,
    pub queue_capacity: usize,
}

impl From<&ControllerConfig> for SessionSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            retry_interval_ms: config.broker_retry_interval_ms,
            connect_timeout_ms: config.broker_connect_timeout_ms,
            publish_attempts: config.publish_attempts,
            publish_retry_delay_ms: config.publish_retry_delay_ms,
            max_payload_bytes: config.max_inbound_payload_bytes,
            queue_capacity: config.inbound_queue_capacity,
        }
    }
}

fn status_body(state: DeviceStatus) -> String {
    format!(r#"{{"state":"{}"}}"#, state.as_str())
}

/// Connection options with the retained offline status as last will.
pub fn connect_options(network: &NetworkConfig, hardware_id: &str) -> ConnectOptions {
    let non_empty = |value: &str| (!value.is_empty()).then(|| value.to_string());
    ConnectOptions {
        host: network.mqtt_host.clone(),
        port: network.mqtt_port,
        client_id: client_id_from_hardware_id(&network.client_id_prefix, hardware_id),
        username: non_empty(&network.mqtt_user),
        password: non_empty(&network.mqtt_pass),
        last_will: LastWill {
            topic: TOPIC_STATUS.to_string(),
            payload: status_body(DeviceStatus::Offline),
            retain: true,
        },
    }
}

pub struct MessagingSession {
    link: Box<dyn BrokerLink>,
    clock: Arc<dyn Clock>,
    options: ConnectOptions,
    settings: SessionSettings,
    state: SessionState,
    last_attempt_ms: Option<u64>,
    connect_attempts: u32,
    inbound: VecDeque<(String, Vec<u8>)>,
}

impl MessagingSession {
    pub fn new(
        link: Box<dyn BrokerLink>,
        clock: Arc<dyn Clock>,
        options: ConnectOptions,
        settings: SessionSettings,
    ) -> Self {
        Self {
            link,
            clock,
            options,
            settings,
            state: SessionState::Disconnected,
            last_attempt_ms: None,
            connect_attempts: 0,
            inbound: VecDeque::with_capacity(settings.queue_capacity),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Drains link events and, when due, starts a reconnect attempt.
    pub fn service(&mut self) -> Option<SessionEvent> {
        let mut event = None;

        while let Some(link_event) = self.link.poll() {
            match link_event {
                LinkEvent::Connected => {
                    if self.state != SessionState::Connected {
                        self.state = SessionState::Connected;
                        self.on_connected();
                        event = Some(SessionEvent::Connected);
                    }
                }
                LinkEvent::Disconnected(reason) => {
                    if self.state == SessionState::Connected {
                        warn!("broker connection lost: {reason}");
                        event = Some(SessionEvent::Disconnected);
                    } else {
                        warn!("broker connect attempt failed: {reason}");
                    }
                    self.state = SessionState::Disconnected;
                }
                LinkEvent::Message { topic, payload } => self.enqueue(topic, payload),
            }
        }

        let now_ms = self.clock.now_ms();
        if self.state == SessionState::Connecting {
            let started = self.last_attempt_ms.unwrap_or(now_ms);
            if now_ms.saturating_sub(started) >= self.settings.connect_timeout_ms {
                warn!("broker connect attempt timed out");
                self.state = SessionState::Disconnected;
            }
        }
        if self.state == SessionState::Disconnected && self.reconnect_due(now_ms) {
            self.attempt(now_ms);
        }

        event
    }

    /// Next routable inbound command; malformed messages are logged and skipped.
    pub fn next_command(&mut self) -> Option<Command> {
        while let Some((topic, payload)) = self.inbound.pop_front() {
            match commands::route(&topic, &payload) {
                Ok(command) => return Some(command),
                Err(err) => warn!("ignoring message on {topic}: {err}"),
            }
        }
        None
    }

    pub fn discard_inbound(&mut self) -> usize {
        let dropped = self.inbound.len();
        self.inbound.clear();
        dropped
    }

    fn reconnect_due(&self, now_ms: u64) -> bool {
        match self.last_attempt_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.settings.retry_interval_ms,
        }
    }

    fn attempt(&mut self, now_ms: u64) {
        self.last_attempt_ms = Some(now_ms);
        self.connect_attempts += 1;
        info!(
            "connecting to broker {}:{} as {} (attempt {})",
            self.options.host, self.options.port, self.options.client_id, self.connect_attempts
        );
        match self.link.connect(&self.options) {
            Ok(()) => self.state = SessionState::Connecting,
            Err(err) => {
                warn!("broker connect failed: {err}");
                self.state = SessionState::Disconnected;
            }
        }
    }

    fn on_connected(&mut self) {
        info!("broker connected");
        self.publish_with_retry(TOPIC_STATUS, &status_body(DeviceStatus::Online), true);
        for topic in SUBSCRIBED_TOPICS {
            if let Err(err) = self.link.subscribe(topic) {
                warn!("subscribe to {topic} failed: {err}");
            }
        }
    }

    fn enqueue(&mut self, topic: String, payload: Vec<u8>) {
        if payload.len() > self.settings.max_payload_bytes {
            warn!(
                "dropping {} byte message on {topic}: over {} byte limit",
                payload.len(),
                self.settings.max_payload_bytes
            );
            return;
        }
        if self.inbound.len() >= self.settings.queue_capacity {
            warn!("inbound queue full, dropping message on {topic}");
            return;
        }
        self.inbound.push_back((topic, payload));
    }
}

impl Publish for MessagingSession {
    fn publish_with_retry(&mut self, topic: &str, payload: &str, retain: bool) -> bool {
        if self.state != SessionState::Connected {
            debug!("not connected, skipping publish to {topic}");
            return false;
        }

        let attempts = self.settings.publish_attempts.max(1);
        for attempt in 1..=attempts {
            match self.link.publish(topic, payload.as_bytes(), retain) {
                Ok(()) => return true,
                Err(err) => {
                    warn!("publish to {topic} failed (attempt {attempt}/{attempts}): {err}");
                    if attempt < attempts {
                        self.clock.pause(self.settings.publish_retry_delay_ms);
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::{ManualClock, RecordingLink},
        topics::{TOPIC_CMD_CONFIG_SET, TOPIC_CMD_PUMP},
    };
    use pretty_assertions::assert_eq;

    fn session(link: &RecordingLink, clock: &Arc<ManualClock>) -> MessagingSession {
        let config = ControllerConfig::default();
        MessagingSession::new(
            Box::new(link.clone()),
            clock.clone(),
            connect_options(&NetworkConfig::default(), "24:6f:28:ab:cd:ef"),
            SessionSettings::from(&config),
        )
    }

    fn connected(link: &RecordingLink, clock: &Arc<ManualClock>) -> MessagingSession {
        let mut session = session(link, clock);
        session.service();
        assert_eq!(session.service(), Some(SessionEvent::Connected));
        session
    }

    #[test]
    fn reconnects_at_fixed_interval_then_subscribes_once() {
        let link = RecordingLink::default();
        link.script_connects([false, false, false, true]);
        let clock = ManualClock::new();
        let mut session = session(&link, &clock);

        let mut attempt_times = Vec::new();
        let mut connected_events = 0;
        for now in (0..=30_000).step_by(250) {
            clock.set(now);
            let before = link.connects().len();
            if session.service() == Some(SessionEvent::Connected) {
                connected_events += 1;
            }
            if link.connects().len() > before {
                attempt_times.push(now);
            }
        }

        assert_eq!(attempt_times, vec![0, 5_000, 10_000, 15_000]);
        assert_eq!(connected_events, 1);
        assert!(session.is_connected());
        assert_eq!(link.subscriptions(), SUBSCRIBED_TOPICS.to_vec());
        assert_eq!(
            link.publishes(),
            vec![(
                TOPIC_STATUS.to_string(),
                r#"{"state":"online"}"#.to_string(),
                true
            )]
        );
    }

    #[test]
    fn connect_options_carry_offline_last_will() {
        let options = connect_options(&NetworkConfig::default(), "24:6f:28:ab:cd:ef");
        assert_eq!(options.client_id, "jamur-iot-ABCDEF");
        assert_eq!(options.username, None);
        assert_eq!(options.last_will.topic, TOPIC_STATUS);
        assert_eq!(options.last_will.payload, r#"{"state":"offline"}"#);
        assert!(options.last_will.retain);
    }

    #[test]
    fn hung_attempt_times_out_and_retries() {
        let link = RecordingLink::default();
        link.hang_next_connect();
        let clock = ManualClock::new();
        let mut session = session(&link, &clock);

        session.service();
        assert_eq!(session.state(), SessionState::Connecting);

        clock.set(14_999);
        session.service();
        assert_eq!(session.state(), SessionState::Connecting);

        clock.set(15_000);
        session.service();
        assert_eq!(link.connects().len(), 2);
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn lost_connection_resubscribes_after_reconnect() {
        let link = RecordingLink::default();
        let clock = ManualClock::new();
        let mut session = connected(&link, &clock);

        clock.set(60_000);
        link.drop_connection();
        assert_eq!(session.service(), Some(SessionEvent::Disconnected));
        assert_eq!(session.service(), Some(SessionEvent::Connected));
        assert_eq!(link.subscriptions().len(), 2 * SUBSCRIBED_TOPICS.len());
    }

    #[test]
    fn publish_fails_fast_while_disconnected() {
        let link = RecordingLink::default();
        link.hang_next_connect();
        let clock = ManualClock::new();
        let mut session = session(&link, &clock);
        session.service();

        assert!(!session.publish_with_retry(TOPIC_STATUS, "{}", false));
        assert!(link.publishes().is_empty());
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn publish_retries_with_fixed_delay() {
        let link = RecordingLink::default();
        let clock = ManualClock::new();
        let mut session = connected(&link, &clock);
        link.clear_publishes();

        link.fail_next_publishes(2);
        assert!(session.publish_with_retry(TOPIC_STATUS, "{}", false));
        assert_eq!(clock.now_ms(), 1_000);

        link.fail_next_publishes(3);
        assert!(!session.publish_with_retry(TOPIC_STATUS, "{}", false));
        assert_eq!(clock.now_ms(), 2_000);
        assert_eq!(link.publishes().len(), 1);
    }

    #[test]
    fn inbound_is_bounded_and_filtered() {
        let link = RecordingLink::default();
        let clock = ManualClock::new();
        let mut session = connected(&link, &clock);

        link.inbound(TOPIC_CMD_PUMP, &[b'x'; 600]);
        link.inbound(TOPIC_CMD_PUMP, b"BANANA");
        link.inbound(TOPIC_CMD_PUMP, b"ON");
        for _ in 0..20 {
            link.inbound(TOPIC_CMD_CONFIG_SET, b"{}");
        }
        session.service();

        assert_eq!(session.next_command(), Some(Command::ActuatorOn));
        let mut remaining = 0;
        while session.next_command().is_some() {
            remaining += 1;
        }
        assert_eq!(remaining, 14);
    }
}
