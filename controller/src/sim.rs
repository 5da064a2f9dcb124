//! Simulated peripherals for running the controller on a workstation.
//!
//! The grow room is a single humidity/temperature model: it slowly dries
//! out, and the misting pump pushes humidity back up while it runs.

use std::{
    io::BufRead,
    sync::{mpsc, Arc, Mutex},
    time::Instant,
};

use irrigation_common::{
    error::LinkError,
    hal::{InputEvent, Inputs, Network, Relay, Sensor, SensorSample, System, WifiCredentials},
};
use tracing::{info, warn};

const DRYING_PER_SECOND: f32 = 0.05;
const MISTING_PER_SECOND: f32 = 0.6;
const MAX_HUMIDITY: f32 = 98.0;

#[derive(Debug)]
struct Room {
    humidity: f32,
    temperature: f32,
    pump_on: bool,
    updated: Instant,
}

impl Room {
    fn advance(&mut self) {
        let elapsed = self.updated.elapsed().as_secs_f32();
        self.updated = Instant::now();
        let rate = if self.pump_on {
            MISTING_PER_SECOND
        } else {
            -DRYING_PER_SECOND
        };
        self.humidity = (self.humidity + rate * elapsed).clamp(0.0, MAX_HUMIDITY);
    }
}

#[derive(Clone)]
pub struct GrowRoom(Arc<Mutex<Room>>);

impl GrowRoom {
    pub fn new(humidity: f32, temperature: f32) -> Self {
        Self(Arc::new(Mutex::new(Room {
            humidity,
            temperature,
            pump_on: false,
            updated: Instant::now(),
        })))
    }

    pub fn sensor(&self) -> SimSensor {
        SimSensor(self.clone())
    }

    pub fn relay(&self) -> SimRelay {
        SimRelay(self.clone())
    }
}

pub struct SimSensor(GrowRoom);

impl Sensor for SimSensor {
    fn read(&mut self) -> SensorSample {
        match (self.0).0.lock() {
            Ok(mut room) => {
                room.advance();
                SensorSample {
                    humidity: room.humidity,
                    temperature: room.temperature,
                }
            }
            Err(_) => SensorSample {
                humidity: f32::NAN,
                temperature: f32::NAN,
            },
        }
    }
}

pub struct SimRelay(GrowRoom);

impl Relay for SimRelay {
    fn set_active(&mut self, active: bool) {
        if let Ok(mut room) = (self.0).0.lock() {
            room.advance();
            room.pump_on = active;
        }
        info!("relay {}", if active { "energized" } else { "released" });
    }
}

/// Station radio stand-in: association succeeds on the first attempt for
/// any non-empty SSID.
pub struct SimNetwork {
    hardware_id: String,
    associated: bool,
}

impl SimNetwork {
    pub fn new(hardware_id: String) -> Self {
        Self {
            hardware_id,
            associated: false,
        }
    }
}

impl Network for SimNetwork {
    fn begin_association(&mut self, credentials: &WifiCredentials) -> Result<(), LinkError> {
        info!("associating with `{}`", credentials.ssid);
        self.associated = credentials.is_usable();
        Ok(())
    }

    fn disconnect(&mut self) {
        self.associated = false;
    }

    fn is_associated(&self) -> bool {
        self.associated
    }

    fn rssi(&self) -> Option<i32> {
        self.associated.then_some(-58)
    }

    fn start_access_point(&mut self) -> Result<(), LinkError> {
        info!("access point up");
        Ok(())
    }

    fn hardware_id(&self) -> String {
        self.hardware_id.clone()
    }
}

/// Button events typed on stdin: `s` short press, `l` long press, `b` back.
pub struct ConsoleInputs {
    events: Arc<Mutex<mpsc::Receiver<InputEvent>>>,
    setup_held: bool,
}

impl ConsoleInputs {
    pub fn spawn() -> Arc<Mutex<mpsc::Receiver<InputEvent>>> {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let event = match line.trim() {
                    "s" => InputEvent::ShortPress,
                    "l" => InputEvent::LongPress,
                    "b" => InputEvent::BackPress,
                    "" => continue,
                    other => {
                        warn!("unknown console input `{other}` (use s, l or b)");
                        continue;
                    }
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        Arc::new(Mutex::new(rx))
    }

    pub fn new(events: Arc<Mutex<mpsc::Receiver<InputEvent>>>, setup_held: bool) -> Self {
        Self { events, setup_held }
    }
}

impl Inputs for ConsoleInputs {
    fn poll_event(&mut self) -> Option<InputEvent> {
        self.events.lock().ok()?.try_recv().ok()
    }

    fn setup_held(&mut self) -> bool {
        self.setup_held
    }
}

#[derive(Default)]
pub struct HostSystem;

impl System for HostSystem {
    fn restart(&mut self) {
        info!("device restart requested, rebooting controller");
    }
}
