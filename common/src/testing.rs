//! Deterministic collaborators for unit tests. Each fake is a cheap handle
//! over shared state so a test can keep a clone after handing one to the core.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::{
    error::{FlashError, HttpError, LinkError, StoreError},
    hal::{
        BrokerLink, Clock, ConnectOptions, ConnectivityProbe, EmailTransport, FirmwareDownload,
        FirmwareSource, FlashWriter, InputEvent, Inputs, KeyValueStore, LinkEvent, Network,
        Portal, Relay, SensorSample, Sensor, System, WifiCredentials,
    },
    types::{EmailPayload, ProbeResult},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
    local: Mutex<Option<DateTime<FixedOffset>>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set_local_hour(&self, hour: u32) {
        let offset = FixedOffset::east_opt(7 * 3_600).unwrap();
        let local = NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
            .and_local_timezone(offset)
            .single()
            .unwrap();
        *lock(&self.local) = Some(local);
    }

    pub fn clear_local_time(&self) {
        *lock(&self.local) = None;
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn local_time(&self) -> Option<DateTime<FixedOffset>> {
        *lock(&self.local)
    }

    fn pause(&self, ms: u64) {
        self.advance(ms);
    }
}

/// Makes a fake take `ms` of manual-clock time whenever it is called.
#[derive(Debug, Clone, Default)]
pub struct Stall(Arc<Mutex<Option<(Arc<ManualClock>, u64)>>>);

impl Stall {
    pub fn set(&self, clock: Arc<ManualClock>, ms: u64) {
        *lock(&self.0) = Some((clock, ms));
    }

    fn apply(&self) {
        if let Some((clock, ms)) = lock(&self.0).as_ref() {
            clock.advance(*ms);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingRelay {
    transitions: Arc<Mutex<Vec<bool>>>,
    clock: Arc<Mutex<Option<Arc<ManualClock>>>>,
    released_at: Arc<Mutex<Vec<u64>>>,
}

impl RecordingRelay {
    pub fn transitions(&self) -> Vec<bool> {
        lock(&self.transitions).clone()
    }

    /// Records the clock reading of every release from now on.
    pub fn stamp_with(&self, clock: Arc<ManualClock>) {
        *lock(&self.clock) = Some(clock);
    }

    pub fn released_at(&self) -> Vec<u64> {
        lock(&self.released_at).clone()
    }

    pub fn is_active(&self) -> bool {
        lock(&self.transitions).last().copied().unwrap_or(false)
    }
}

impl Relay for RecordingRelay {
    fn set_active(&mut self, active: bool) {
        lock(&self.transitions).push(active);
        if !active {
            if let Some(clock) = lock(&self.clock).as_ref() {
                lock(&self.released_at).push(clock.now_ms());
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedSensor {
    sample: Arc<Mutex<SensorSample>>,
}

impl ScriptedSensor {
    pub fn new(humidity: f32, temperature: f32) -> Self {
        Self {
            sample: Arc::new(Mutex::new(SensorSample {
                humidity,
                temperature,
            })),
        }
    }

    pub fn set_humidity(&self, humidity: f32) {
        lock(&self.sample).humidity = humidity;
    }
}

impl Sensor for ScriptedSensor {
    fn read(&mut self) -> SensorSample {
        *lock(&self.sample)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<(String, String), String>,
    fail_writes: bool,
    writes: usize,
    fail_on_write: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    /// Refuses only the `nth` write from now on (1-based).
    pub fn fail_nth_write(&self, nth: usize) {
        let mut state = lock(&self.state);
        state.fail_on_write = Some(state.writes + nth);
    }

    pub fn entry(&self, namespace: &str, key: &str) -> Option<String> {
        lock(&self.state)
            .entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entry(namespace, key))
    }

    fn set(&mut self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        state.writes += 1;
        if state.fail_writes || state.fail_on_write == Some(state.writes) {
            return Err(StoreError::Unavailable("write refused".to_string()));
        }
        state
            .entries
            .insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LinkState {
    connects: Vec<ConnectOptions>,
    connect_outcomes: VecDeque<Option<bool>>,
    publishes: Vec<(String, String, bool)>,
    subscriptions: Vec<String>,
    events: VecDeque<LinkEvent>,
    failing_publishes: u32,
}

/// Broker link whose connect outcomes are scripted; unscripted connects succeed.
#[derive(Debug, Clone, Default)]
pub struct RecordingLink {
    state: Arc<Mutex<LinkState>>,
}

impl RecordingLink {
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = bool>) {
        lock(&self.state)
            .connect_outcomes
            .extend(outcomes.into_iter().map(Some));
    }

    /// The next connect attempt never reports an outcome.
    pub fn hang_next_connect(&self) {
        lock(&self.state).connect_outcomes.push_back(None);
    }

    pub fn fail_next_publishes(&self, count: u32) {
        lock(&self.state).failing_publishes = count;
    }

    pub fn inbound(&self, topic: &str, payload: &[u8]) {
        lock(&self.state).events.push_back(LinkEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    pub fn drop_connection(&self) {
        lock(&self.state)
            .events
            .push_back(LinkEvent::Disconnected("connection reset".to_string()));
    }

    pub fn connects(&self) -> Vec<ConnectOptions> {
        lock(&self.state).connects.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.state).subscriptions.clone()
    }

    pub fn publishes(&self) -> Vec<(String, String, bool)> {
        lock(&self.state).publishes.clone()
    }

    pub fn publishes_to(&self, topic: &str) -> Vec<String> {
        lock(&self.state)
            .publishes
            .iter()
            .filter(|(published, _, _)| published == topic)
            .map(|(_, payload, _)| payload.clone())
            .collect()
    }

    pub fn clear_publishes(&self) {
        lock(&self.state).publishes.clear();
    }
}

impl BrokerLink for RecordingLink {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        state.connects.push(options.clone());
        match state.connect_outcomes.pop_front().unwrap_or(Some(true)) {
            Some(true) => state.events.push_back(LinkEvent::Connected),
            Some(false) => state
                .events
                .push_back(LinkEvent::Disconnected("connection refused".to_string())),
            None => {}
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(LinkError::Transport("queue full".to_string()));
        }
        state.publishes.push((
            topic.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
            retain,
        ));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), LinkError> {
        lock(&self.state).subscriptions.push(topic.to_string());
        Ok(())
    }

    fn poll(&mut self) -> Option<LinkEvent> {
        lock(&self.state).events.pop_front()
    }
}

#[derive(Debug, Clone)]
pub struct RecordingEmail {
    sent: Arc<Mutex<Vec<EmailPayload>>>,
    status: Arc<Mutex<u16>>,
    stall: Stall,
}

impl Default for RecordingEmail {
    fn default() -> Self {
        Self {
            sent: Arc::default(),
            status: Arc::new(Mutex::new(200)),
            stall: Stall::default(),
        }
    }
}

impl RecordingEmail {
    pub fn respond_with(&self, status: u16) {
        *lock(&self.status) = status;
    }

    pub fn sent(&self) -> Vec<EmailPayload> {
        lock(&self.sent).clone()
    }

    pub fn stall(&self, clock: Arc<ManualClock>, ms: u64) {
        self.stall.set(clock, ms);
    }
}

impl EmailTransport for RecordingEmail {
    fn send(&mut self, payload: &EmailPayload) -> Result<u16, HttpError> {
        self.stall.apply();
        lock(&self.sent).push(payload.clone());
        Ok(*lock(&self.status))
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedDownload {
    status: u16,
    content_length: Option<u64>,
    body: Vec<u8>,
    position: usize,
    ends_at: Option<usize>,
    fails_at: Option<usize>,
}

impl ScriptedDownload {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_length: Some(body.len() as u64),
            body,
            position: 0,
            ends_at: None,
            fails_at: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_length(mut self, content_length: Option<u64>) -> Self {
        self.content_length = content_length;
        self
    }

    /// Body ends early after `at` bytes.
    pub fn truncated(mut self, at: usize) -> Self {
        self.ends_at = Some(at);
        self
    }

    /// Reads fail once `at` bytes have been delivered.
    pub fn failing_at(mut self, at: usize) -> Self {
        self.fails_at = Some(at);
        self
    }
}

impl FirmwareDownload for ScriptedDownload {
    fn status(&self) -> u16 {
        self.status
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        if self.fails_at.is_some_and(|at| self.position >= at) {
            return Err(HttpError::Transport("connection reset".to_string()));
        }
        let mut end = self.body.len();
        if let Some(at) = self.ends_at {
            end = end.min(at);
        }
        if let Some(at) = self.fails_at {
            end = end.min(at);
        }
        let available = end.saturating_sub(self.position);
        let count = available.min(buf.len());
        buf[..count].copy_from_slice(&self.body[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedFirmwareSource {
    responses: Arc<Mutex<VecDeque<Result<ScriptedDownload, HttpError>>>>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFirmwareSource {
    pub fn respond(&self, response: Result<ScriptedDownload, HttpError>) {
        lock(&self.responses).push_back(response);
    }

    pub fn opened(&self) -> Vec<String> {
        lock(&self.opened).clone()
    }
}

impl FirmwareSource for ScriptedFirmwareSource {
    fn open(
        &mut self,
        url: &str,
        _timeout_ms: u64,
    ) -> Result<Box<dyn FirmwareDownload>, HttpError> {
        lock(&self.opened).push(url.to_string());
        match lock(&self.responses).pop_front() {
            Some(Ok(download)) => Ok(Box::new(download)),
            Some(Err(err)) => Err(err),
            None => Err(HttpError::Timeout),
        }
    }
}

#[derive(Debug)]
struct FlashState {
    free_space: u64,
    data: Vec<u8>,
    expected: Option<u64>,
    aborts: u32,
    finished: bool,
    begin_error: Option<FlashError>,
    finish_ok: bool,
}

#[derive(Debug, Clone)]
pub struct MemoryFlash {
    state: Arc<Mutex<FlashState>>,
}

impl MemoryFlash {
    pub fn new(free_space: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(FlashState {
                free_space,
                data: Vec::new(),
                expected: None,
                aborts: 0,
                finished: false,
                begin_error: None,
                finish_ok: true,
            })),
        }
    }

    pub fn fail_begin(&self, err: FlashError) {
        lock(&self.state).begin_error = Some(err);
    }

    pub fn finish_incomplete(&self) {
        lock(&self.state).finish_ok = false;
    }

    pub fn aborts(&self) -> u32 {
        lock(&self.state).aborts
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.state).finished
    }

    pub fn data(&self) -> Vec<u8> {
        lock(&self.state).data.clone()
    }
}

impl FlashWriter for MemoryFlash {
    fn free_space(&self) -> u64 {
        lock(&self.state).free_space
    }

    fn begin(&mut self, size: u64) -> Result<(), FlashError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.begin_error.clone() {
            return Err(err);
        }
        state.data.clear();
        state.expected = Some(size);
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<usize, FlashError> {
        let mut state = lock(&self.state);
        if state.expected.is_none() {
            return Err(FlashError::Write("not started".to_string()));
        }
        state.data.extend_from_slice(chunk);
        Ok(chunk.len())
    }

    fn abort(&mut self) {
        let mut state = lock(&self.state);
        state.aborts += 1;
        state.expected = None;
        state.data.clear();
    }

    fn finish(&mut self) -> Result<bool, FlashError> {
        let mut state = lock(&self.state);
        let complete = state.finish_ok && state.expected == Some(state.data.len() as u64);
        state.finished = complete;
        Ok(complete)
    }
}

#[derive(Debug, Default)]
struct NetworkState {
    attempts: u32,
    succeed_on_attempt: Option<u32>,
    associated: bool,
    rssi: Option<i32>,
    ap_started: bool,
    ap_fails: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl FakeNetwork {
    /// Association succeeds on the `attempt`-th call (1-based).
    pub fn associate_on_attempt(&self, attempt: u32) {
        lock(&self.state).succeed_on_attempt = Some(attempt);
    }

    pub fn set_rssi(&self, rssi: Option<i32>) {
        lock(&self.state).rssi = rssi;
    }

    pub fn fail_access_point(&self) {
        lock(&self.state).ap_fails = true;
    }

    pub fn attempts(&self) -> u32 {
        lock(&self.state).attempts
    }

    pub fn ap_started(&self) -> bool {
        lock(&self.state).ap_started
    }
}

impl Network for FakeNetwork {
    fn begin_association(&mut self, _credentials: &WifiCredentials) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        state.attempts += 1;
        state.associated = state
            .succeed_on_attempt
            .is_some_and(|attempt| state.attempts >= attempt);
        Ok(())
    }

    fn disconnect(&mut self) {
        lock(&self.state).associated = false;
    }

    fn is_associated(&self) -> bool {
        lock(&self.state).associated
    }

    fn rssi(&self) -> Option<i32> {
        let state = lock(&self.state);
        state.rssi.filter(|_| state.associated)
    }

    fn start_access_point(&mut self) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        if state.ap_fails {
            return Err(LinkError::Rejected("radio busy".to_string()));
        }
        state.ap_started = true;
        Ok(())
    }

    fn hardware_id(&self) -> String {
        "24:6f:28:ab:cd:ef".to_string()
    }
}

#[derive(Debug, Default)]
struct InputState {
    events: VecDeque<InputEvent>,
    setup_held: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeInputs {
    state: Arc<Mutex<InputState>>,
}

impl FakeInputs {
    pub fn press(&self, event: InputEvent) {
        lock(&self.state).events.push_back(event);
    }

    pub fn hold_setup(&self, held: bool) {
        lock(&self.state).setup_held = held;
    }
}

impl Inputs for FakeInputs {
    fn poll_event(&mut self) -> Option<InputEvent> {
        lock(&self.state).events.pop_front()
    }

    fn setup_held(&mut self) -> bool {
        lock(&self.state).setup_held
    }
}

#[derive(Debug, Default)]
struct PortalState {
    started: bool,
    fails: bool,
    restart: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakePortal {
    state: Arc<Mutex<PortalState>>,
}

impl FakePortal {
    pub fn request_restart(&self) {
        lock(&self.state).restart = true;
    }

    pub fn fail_start(&self) {
        lock(&self.state).fails = true;
    }

    pub fn started(&self) -> bool {
        lock(&self.state).started
    }
}

impl Portal for FakePortal {
    fn start(&mut self) -> Result<(), LinkError> {
        let mut state = lock(&self.state);
        if state.fails {
            return Err(LinkError::Rejected("port in use".to_string()));
        }
        state.started = true;
        Ok(())
    }

    fn restart_requested(&mut self) -> bool {
        std::mem::take(&mut lock(&self.state).restart)
    }
}

/// Completes each measurement within the `start` call.
#[derive(Debug, Clone, Default)]
pub struct FakeProbe {
    calls: Arc<Mutex<u32>>,
    ready: Arc<Mutex<Option<ProbeResult>>>,
    stall: Stall,
}

impl FakeProbe {
    pub fn calls(&self) -> u32 {
        *lock(&self.calls)
    }

    pub fn stall(&self, clock: Arc<ManualClock>, ms: u64) {
        self.stall.set(clock, ms);
    }
}

impl ConnectivityProbe for FakeProbe {
    fn start(&mut self) {
        *lock(&self.calls) += 1;
        self.stall.apply();
        *lock(&self.ready) = Some(ProbeResult {
            ping_ms: 42,
            download_mbps: 12.5,
            upload_mbps: 4.0,
            lat: -6.2,
            lon: 106.8,
        });
    }

    fn poll_result(&mut self) -> Option<ProbeResult> {
        lock(&self.ready).take()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeSystem {
    restarts: Arc<Mutex<u32>>,
}

impl FakeSystem {
    pub fn restarts(&self) -> u32 {
        *lock(&self.restarts)
    }
}

impl System for FakeSystem {
    fn restart(&mut self) {
        *lock(&self.restarts) += 1;
    }
}
