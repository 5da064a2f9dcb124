//! Top-level device context and mode driver.
//!
//! [`Device`] owns every component and collaborator. The host calls
//! [`Device::tick`] in a loop; each tick runs exactly one state handler,
//! then the actuator safety check, then flushes queued publishes, alerts
//! and emails.

use std::sync::Arc;

use chrono::Timelike;
use tracing::{debug, error, info, warn};

use crate::{
    actuator::{ActuatorController, ActuatorState, REASON_MANUAL_BUTTON, REASON_MANUAL_MQTT},
    commands::Command,
    config::{ControllerConfig, DeviceConfig, NetworkConfig},
    config_sync,
    control::EnvironmentalControlEngine,
    hal::{
        BrokerLink, Clock, ConnectivityProbe, EmailTransport, FirmwareSource, FlashWriter,
        InputEvent, Inputs, KeyValueStore, Network, Portal, Relay, Sensor, System,
        WifiCredentials,
    },
    notify::{NotificationDispatcher, Publish},
    ota::{OtaPoll, OtaUpdateManager},
    outbox::{Outbound, Outbox},
    session::{self, MessagingSession, SessionEvent, SessionSettings, SessionState},
    storage,
    topics::{TOPIC_FIRMWARE_CURRENT, TOPIC_LINK_SIGNAL, TOPIC_PROBE_RESULT},
    types::{AppState, FirmwareVersionPayload, LinkSignalPayload},
    FIRMWARE_VERSION,
};

/// Platform collaborators handed to a fresh [`Device`] at boot.
pub struct Peripherals {
    pub clock: Arc<dyn Clock>,
    pub sensor: Box<dyn Sensor>,
    pub relay: Box<dyn Relay>,
    pub network: Box<dyn Network>,
    pub link: Box<dyn BrokerLink>,
    pub store: Box<dyn KeyValueStore>,
    pub email: Box<dyn EmailTransport>,
    pub firmware: Box<dyn FirmwareSource>,
    pub flash: Box<dyn FlashWriter>,
    pub inputs: Box<dyn Inputs>,
    pub portal: Box<dyn Portal>,
    pub probe: Option<Box<dyn ConnectivityProbe>>,
    pub system: Box<dyn System>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// The device asked to be restarted; build a new `Device` to boot again.
    Restart,
}

#[derive(Debug, Default)]
struct Association {
    attempts: u32,
    started_ms: Option<u64>,
}

pub struct Device {
    clock: Arc<dyn Clock>,
    sensor: Box<dyn Sensor>,
    network: Box<dyn Network>,
    store: Box<dyn KeyValueStore>,
    firmware: Box<dyn FirmwareSource>,
    flash: Box<dyn FlashWriter>,
    inputs: Box<dyn Inputs>,
    portal: Box<dyn Portal>,
    probe: Option<Box<dyn ConnectivityProbe>>,
    system: Box<dyn System>,

    settings: ControllerConfig,
    state: AppState,
    config: DeviceConfig,
    credentials: Option<WifiCredentials>,
    association: Association,
    access_point_up: bool,

    actuator: ActuatorController,
    engine: EnvironmentalControlEngine,
    dispatcher: NotificationDispatcher,
    session: MessagingSession,
    ota: OtaUpdateManager,
    outbox: Outbox,

    last_link_signal_ms: Option<u64>,
    next_probe_ms: Option<u64>,
}

impl Device {
    pub fn new(
        peripherals: Peripherals,
        mut settings: ControllerConfig,
        network: &NetworkConfig,
    ) -> Self {
        settings.sanitize();
        let Peripherals {
            clock,
            sensor,
            relay,
            network: radio,
            link,
            store,
            email,
            firmware,
            flash,
            inputs,
            portal,
            probe,
            system,
        } = peripherals;

        let options = session::connect_options(network, &radio.hardware_id());
        let session = MessagingSession::new(
            link,
            clock.clone(),
            options,
            SessionSettings::from(&settings),
        );

        Self {
            actuator: ActuatorController::new(relay, settings.actuator_duration_ms),
            engine: EnvironmentalControlEngine::new(settings.control_interval_ms),
            dispatcher: NotificationDispatcher::new(email, &settings.email, FIRMWARE_VERSION),
            ota: OtaUpdateManager::new(settings.ota.clone(), FIRMWARE_VERSION),
            session,
            outbox: Outbox::new(),
            clock,
            sensor,
            network: radio,
            store,
            firmware,
            flash,
            inputs,
            portal,
            probe,
            system,
            settings,
            state: AppState::Booting,
            config: DeviceConfig::default(),
            credentials: None,
            association: Association::default(),
            access_point_up: false,
            last_link_signal_ms: None,
            next_probe_ms: None,
        }
    }

    pub fn state(&self) -> AppState {
        self.state
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn actuator_state(&self) -> ActuatorState {
        self.actuator.state()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn tick(&mut self) -> TickOutcome {
        self.enforce_cutoff();
        let now_ms = self.clock.now_ms();

        let outcome = match self.state {
            AppState::Booting => self.boot(),
            AppState::Connecting => self.associate(now_ms),
            AppState::ApMode => self.serve_portal(),
            AppState::NormalOperation | AppState::MenuInfo => self.operate(now_ms),
            AppState::Updating => self.update(now_ms),
        };

        self.enforce_cutoff();

        if outcome == TickOutcome::Restart {
            self.actuator
                .turn_off(self.clock.now_ms(), None, &mut self.outbox);
        }
        self.flush();

        if outcome == TickOutcome::Restart {
            info!("restarting from {}", self.state.as_str());
            self.system.restart();
        }
        outcome
    }

    /// Auto-stop check against the current clock. Called between every
    /// collaborator step that may take time, not only once per tick.
    fn enforce_cutoff(&mut self) {
        let now_ms = self.clock.now_ms();
        self.actuator
            .tick(now_ms, self.engine.last_sample(), &mut self.outbox);
    }

    fn enter(&mut self, next: AppState) {
        if self.state != next {
            info!("state {} -> {}", self.state.as_str(), next.as_str());
            self.state = next;
        }
    }

    fn boot(&mut self) -> TickOutcome {
        info!("booting firmware {FIRMWARE_VERSION}");
        self.config = storage::load_device_config(self.store.as_ref()).unwrap_or_else(|err| {
            warn!("failed to load device config, using defaults: {err}");
            DeviceConfig::default()
        });

        let setup_held = self.inputs.setup_held();
        self.credentials = match storage::load_credentials(self.store.as_ref()) {
            Ok(credentials) => credentials.filter(WifiCredentials::is_usable),
            Err(err) => {
                warn!("failed to load network credentials: {err}");
                None
            }
        };

        if setup_held {
            info!("setup input held at boot");
            self.enter(AppState::ApMode);
        } else if self.credentials.is_some() {
            self.enter(AppState::Connecting);
        } else {
            info!("no usable network credentials stored");
            self.enter(AppState::ApMode);
        }
        TickOutcome::Continue
    }

    fn associate(&mut self, now_ms: u64) -> TickOutcome {
        if self.network.is_associated() && self.clock.local_time().is_some() {
            info!("network associated and time synced");
            self.enter(AppState::NormalOperation);
            return TickOutcome::Continue;
        }

        let due = self.association.started_ms.map_or(true, |started| {
            now_ms.saturating_sub(started) >= self.settings.wifi_attempt_timeout_ms
        });
        if !due {
            return TickOutcome::Continue;
        }

        if self.association.attempts >= self.settings.wifi_connect_attempts {
            warn!(
                "network association failed after {} attempts, starting setup portal",
                self.association.attempts
            );
            self.network.disconnect();
            self.enter(AppState::ApMode);
            return TickOutcome::Continue;
        }

        let Some(credentials) = self.credentials.as_ref() else {
            self.enter(AppState::ApMode);
            return TickOutcome::Continue;
        };
        self.association.attempts += 1;
        self.association.started_ms = Some(now_ms);
        info!(
            "associating with {} (attempt {}/{})",
            credentials.ssid, self.association.attempts, self.settings.wifi_connect_attempts
        );
        if let Err(err) = self.network.begin_association(credentials) {
            warn!("association attempt failed: {err}");
        }
        TickOutcome::Continue
    }

    fn serve_portal(&mut self) -> TickOutcome {
        if !self.access_point_up {
            if let Err(err) = self.network.start_access_point() {
                error!("access point failed to start, restarting: {err}");
                return TickOutcome::Restart;
            }
            if let Err(err) = self.portal.start() {
                error!("setup portal failed to start, restarting: {err}");
                return TickOutcome::Restart;
            }
            self.access_point_up = true;
            info!("setup portal running");
        }

        if self.portal.restart_requested() {
            info!("setup portal requested restart");
            return TickOutcome::Restart;
        }
        TickOutcome::Continue
    }

    fn operate(&mut self, now_ms: u64) -> TickOutcome {
        self.service_session(now_ms);

        while let Some(event) = self.inputs.poll_event() {
            self.handle_input(event, now_ms);
        }

        while let Some(command) = self.session.next_command() {
            self.handle_command(command, now_ms);
            if self.state == AppState::Updating {
                let dropped = self.session.discard_inbound();
                if dropped > 0 {
                    debug!("dropped {dropped} queued commands for update");
                }
                return TickOutcome::Continue;
            }
        }

        if self.engine.is_due(now_ms) {
            let sample = self.sensor.read();
            let hour = self
                .clock
                .local_time()
                .and_then(|time| u8::try_from(time.hour()).ok());
            self.engine.evaluate(
                sample,
                hour,
                &self.config,
                &mut self.actuator,
                now_ms,
                &mut self.outbox,
            );
        }

        self.enforce_cutoff();
        if self.session.is_connected() {
            self.publish_link_signal(now_ms);
            self.run_probe(now_ms);
            self.enforce_cutoff();
        }
        self.dispatcher
            .check_for_firmware_update(self.clock.now_ms());
        TickOutcome::Continue
    }

    fn update(&mut self, now_ms: u64) -> TickOutcome {
        self.service_session(now_ms);
        let ignored = self.session.discard_inbound();
        if ignored > 0 {
            debug!("ignoring {ignored} inbound messages during update");
        }

        // The download blocks on the network; hold it until the pump is off.
        self.enforce_cutoff();
        if self.actuator.is_on() {
            return TickOutcome::Continue;
        }

        match self.ota.poll(
            self.clock.now_ms(),
            self.firmware.as_mut(),
            self.flash.as_mut(),
            &mut self.outbox,
        ) {
            OtaPoll::Restart => TickOutcome::Restart,
            OtaPoll::Failed | OtaPoll::Idle => {
                self.enter(AppState::NormalOperation);
                TickOutcome::Continue
            }
            OtaPoll::InProgress => TickOutcome::Continue,
        }
    }

    fn service_session(&mut self, now_ms: u64) {
        if self.session.service() == Some(SessionEvent::Connected) {
            config_sync::publish_config(&self.config, &mut self.outbox);
            self.outbox.publish(
                TOPIC_FIRMWARE_CURRENT,
                &FirmwareVersionPayload {
                    version: FIRMWARE_VERSION,
                },
                true,
            );
            self.next_probe_ms = Some(now_ms);
        }
    }

    fn handle_input(&mut self, event: InputEvent, now_ms: u64) {
        match (event, self.state) {
            (InputEvent::ShortPress, AppState::NormalOperation) => self.enter(AppState::MenuInfo),
            (InputEvent::BackPress, AppState::MenuInfo) => self.enter(AppState::NormalOperation),
            (InputEvent::LongPress, _) => {
                self.actuator.turn_on(
                    REASON_MANUAL_BUTTON,
                    now_ms,
                    self.engine.last_sample(),
                    &mut self.outbox,
                );
            }
            _ => {}
        }
    }

    fn handle_command(&mut self, command: Command, now_ms: u64) {
        match command {
            Command::ActuatorOn => {
                self.actuator.turn_on(
                    REASON_MANUAL_MQTT,
                    now_ms,
                    self.engine.last_sample(),
                    &mut self.outbox,
                );
            }
            Command::ConfigUpdate(payload) => {
                // Failures are reported through a local alert.
                let _ = config_sync::apply_update(
                    &mut self.config,
                    &payload,
                    self.store.as_mut(),
                    &mut self.outbox,
                );
            }
            Command::FirmwareUpdate { url, sha256 } => {
                match self.ota.begin(&url, sha256, now_ms, &mut self.outbox) {
                    Ok(()) => self.enter(AppState::Updating),
                    Err(err) => warn!("firmware update refused: {err}"),
                }
            }
            Command::FirmwareAdvertised(info) => {
                info!("firmware {} advertised", info.version);
                self.dispatcher.set_pending_firmware(info);
            }
        }
    }

    fn publish_link_signal(&mut self, now_ms: u64) {
        let due = self.last_link_signal_ms.map_or(true, |last| {
            now_ms.saturating_sub(last) >= self.settings.link_signal_interval_ms
        });
        if !due {
            return;
        }
        self.last_link_signal_ms = Some(now_ms);
        if let Some(rssi) = self.network.rssi() {
            self.outbox
                .publish(TOPIC_LINK_SIGNAL, &LinkSignalPayload { rssi }, true);
        }
    }

    fn run_probe(&mut self, now_ms: u64) {
        let Some(probe) = self.probe.as_mut() else {
            return;
        };
        if self.next_probe_ms.is_some_and(|next| now_ms >= next) {
            self.next_probe_ms = Some(now_ms.saturating_add(self.settings.probe_interval_ms));
            debug!("starting connectivity probe");
            probe.start();
        }
        if let Some(result) = probe.poll_result() {
            self.outbox.publish(TOPIC_PROBE_RESULT, &result, true);
        }
    }

    fn flush(&mut self) {
        for item in self.outbox.take() {
            match item {
                Outbound::Publish {
                    topic,
                    payload,
                    retain,
                } => {
                    if !self.session.publish_with_retry(topic, &payload, retain) {
                        debug!("publish to {topic} dropped");
                    }
                }
                Outbound::Alert(notification) => {
                    self.dispatcher
                        .notify_local(&mut self.session, &notification);
                }
                Outbound::Email { category, payload } => {
                    self.dispatcher.notify_remote_email(
                        category,
                        &payload,
                        self.clock.now_ms(),
                    );
                }
            }
            self.enforce_cutoff();
        }
    }
}
