use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::Receiver,
        Arc, Mutex, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use irrigation_common::{
    hal::{Clock, ConnectivityProbe, InputEvent},
    Device, Peripherals, RuntimeConfig, TickOutcome, FIRMWARE_VERSION,
};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::{
    http::{BackgroundProbe, HttpEmailTransport, HttpFirmwareSource, HttpProbe, QueuedEmailTransport},
    link::RumqttLink,
    portal::{HostPortal, PortalServer},
    sim::{ConsoleInputs, GrowRoom, HostSystem, SimNetwork},
    store::{self, FileFlash, JsonFileStore, IMAGE_SLOT_BYTES},
};

const TICK_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_PORTAL_PORT: u16 = 8080;
const DEFAULT_HARDWARE_ID: &str = "24:6f:28:ab:cd:ef";

struct HostClock {
    timezone: Tz,
}

impl Clock for HostClock {
    fn now_ms(&self) -> u64 {
        monotonic_ms()
    }

    fn local_time(&self) -> Option<chrono::DateTime<chrono::FixedOffset>> {
        let local = Utc::now().with_timezone(&self.timezone);
        Some(local.with_timezone(&local.offset().fix()))
    }

    fn pause(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Everything that outlives a single device incarnation.
struct Board {
    runtime: RuntimeConfig,
    data_dir: PathBuf,
    handle: Handle,
    clock: Arc<HostClock>,
    store: JsonFileStore,
    portal: Arc<PortalServer>,
    room: GrowRoom,
    inputs: Arc<Mutex<Receiver<InputEvent>>>,
    hardware_id: String,
    setup_hold: bool,
}

impl Board {
    fn peripherals(&self, first_boot: bool) -> Peripherals {
        let network = &self.runtime.network;
        let probe = network.probe_url.as_deref().map(|url| {
            Box::new(BackgroundProbe::new(
                self.handle.clone(),
                HttpProbe::new(url, self.runtime.location),
            )) as Box<dyn ConnectivityProbe>
        });

        Peripherals {
            clock: self.clock.clone(),
            sensor: Box::new(self.room.sensor()),
            relay: Box::new(self.room.relay()),
            network: Box::new(SimNetwork::new(self.hardware_id.clone())),
            link: Box::new(RumqttLink::new(self.handle.clone())),
            store: Box::new(self.store.clone()),
            email: Box::new(QueuedEmailTransport::spawn(
                &self.handle,
                HttpEmailTransport::new(&network.email_endpoint, &network.email_key),
            )),
            firmware: Box::new(HttpFirmwareSource),
            flash: Box::new(FileFlash::new(&self.data_dir, IMAGE_SLOT_BYTES)),
            inputs: Box::new(ConsoleInputs::new(
                self.inputs.clone(),
                first_boot && self.setup_hold,
            )),
            portal: Box::new(HostPortal(self.portal.clone())),
            probe,
            system: Box::new(HostSystem),
        }
    }

    fn drive(&self, shutdown: &AtomicBool) {
        let mut first_boot = true;
        while !shutdown.load(Ordering::SeqCst) {
            let mut device = Device::new(
                self.peripherals(first_boot),
                self.runtime.controller.clone(),
                &self.runtime.network,
            );
            first_boot = false;
            info!("device booted, firmware {FIRMWARE_VERSION}");

            loop {
                if shutdown.load(Ordering::SeqCst) {
                    return;
                }
                match device.tick() {
                    TickOutcome::Continue => std::thread::sleep(TICK_INTERVAL),
                    TickOutcome::Restart => break,
                }
            }
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = store::data_dir();
    let mut runtime = store::load_runtime_config(&data_dir).unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime);
    runtime.controller.sanitize();

    let timezone: Tz = runtime
        .timezone
        .parse()
        .map_err(|err| anyhow::anyhow!("unknown timezone `{}`: {err}", runtime.timezone))?;

    let portal_port = std::env::var("PORTAL_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORTAL_PORT);
    let setup_hold = std::env::var("DEVICE_SETUP_HOLD")
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let handle = Handle::current();
    let store = JsonFileStore::new(&data_dir);
    let board = Board {
        portal: PortalServer::new(handle.clone(), portal_port, store.clone()),
        clock: Arc::new(HostClock { timezone }),
        room: GrowRoom::new(88.0, 26.5),
        inputs: ConsoleInputs::spawn(),
        hardware_id: std::env::var("DEVICE_MAC")
            .unwrap_or_else(|_| DEFAULT_HARDWARE_ID.to_string()),
        runtime,
        data_dir,
        handle,
        store,
        setup_hold,
    };

    info!(
        "controller starting (data dir {}, broker {}:{})",
        board.data_dir.display(),
        board.runtime.network.mqtt_host,
        board.runtime.network.mqtt_port
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let driver = {
        let shutdown = shutdown.clone();
        tokio::task::spawn_blocking(move || board.drive(&shutdown))
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    shutdown.store(true, Ordering::SeqCst);
    driver.await.context("device loop panicked")?;
    Ok(())
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    let network = &mut runtime.network;
    if let Ok(host) = std::env::var("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Ok(endpoint) = std::env::var("EMAIL_ENDPOINT") {
        network.email_endpoint = endpoint;
    }
    if let Ok(key) = std::env::var("EMAIL_KEY") {
        network.email_key = key;
    }
    if let Ok(url) = std::env::var("PROBE_URL") {
        network.probe_url = Some(url).filter(|url| !url.trim().is_empty());
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
