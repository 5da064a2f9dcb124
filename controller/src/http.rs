use std::{
    io::Read,
    sync::Arc,
    time::{Duration, Instant},
};

use irrigation_common::{
    config::Location,
    error::HttpError,
    hal::{ConnectivityProbe, EmailTransport, FirmwareDownload, FirmwareSource},
    types::{EmailPayload, ProbeResult},
};
use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
};
use tracing::{debug, warn};

const USER_AGENT: &str = concat!("irrigation-controller/", env!("CARGO_PKG_VERSION"));
const EMAIL_FUNCTION_PATH: &str = "/functions/v1/send-email-notification";
const EMAIL_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(20);
const PROBE_UPLOAD_BYTES: usize = 64 * 1024;
/// Longest a single firmware body read may block the control loop.
const MAX_READ_STALL: Duration = Duration::from_secs(5);

fn transport_error(err: ureq::Transport) -> HttpError {
    if err.kind() == ureq::ErrorKind::Io && err.to_string().contains("timed out") {
        HttpError::Timeout
    } else {
        HttpError::Transport(err.to_string())
    }
}

/// Posts alert emails to the hosted notification function.
#[derive(Clone)]
pub struct HttpEmailTransport {
    agent: ureq::Agent,
    url: String,
    key: String,
}

impl HttpEmailTransport {
    pub fn new(endpoint: &str, key: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(EMAIL_TIMEOUT)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            url: format!("{}{EMAIL_FUNCTION_PATH}", endpoint.trim_end_matches('/')),
            key: key.to_string(),
        }
    }

    fn ensure_configured(&self) -> Result<(), HttpError> {
        if self.url.starts_with(EMAIL_FUNCTION_PATH) {
            return Err(HttpError::Transport("email endpoint not configured".to_string()));
        }
        Ok(())
    }
}

impl EmailTransport for HttpEmailTransport {
    fn send(&mut self, payload: &EmailPayload) -> Result<u16, HttpError> {
        self.ensure_configured()?;
        let body =
            serde_json::to_string(payload).map_err(|err| HttpError::Transport(err.to_string()))?;
        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {}", self.key))
            .send_string(&body);

        match response {
            Ok(resp) => Ok(resp.status()),
            Err(ureq::Error::Status(code, resp)) => {
                debug!(
                    "email endpoint answered {code}: {}",
                    resp.into_string().unwrap_or_default()
                );
                Ok(code)
            }
            Err(ureq::Error::Transport(err)) => Err(transport_error(err)),
        }
    }
}

/// Queues emails for a worker task that performs the POST, so a slow
/// endpoint never holds up the control loop. Delivery results are logged
/// by the worker; `send` reports 202 once the email is queued.
pub struct QueuedEmailTransport {
    transport: HttpEmailTransport,
    queue: mpsc::UnboundedSender<EmailPayload>,
}

impl QueuedEmailTransport {
    pub fn spawn(runtime: &Handle, transport: HttpEmailTransport) -> Self {
        let (queue, mut pending) = mpsc::unbounded_channel::<EmailPayload>();
        let worker = transport.clone();
        runtime.spawn(async move {
            while let Some(payload) = pending.recv().await {
                let mut sender = worker.clone();
                let kind = payload.kind;
                match tokio::task::spawn_blocking(move || sender.send(&payload)).await {
                    Ok(Ok(status)) if (200..300).contains(&status) => {
                        debug!("{kind} email delivered ({status})");
                    }
                    Ok(Ok(status)) => warn!("{kind} email rejected with HTTP {status}"),
                    Ok(Err(err)) => warn!("{kind} email failed: {err}"),
                    Err(err) => warn!("{kind} email worker panicked: {err}"),
                }
            }
        });
        Self { transport, queue }
    }
}

impl EmailTransport for QueuedEmailTransport {
    fn send(&mut self, payload: &EmailPayload) -> Result<u16, HttpError> {
        self.transport.ensure_configured()?;
        self.queue
            .send(payload.clone())
            .map_err(|_| HttpError::Transport("email worker stopped".to_string()))?;
        Ok(202)
    }
}

struct HttpDownload {
    status: u16,
    content_length: Option<u64>,
    body: Box<dyn Read + Send + Sync + 'static>,
}

impl FirmwareDownload for HttpDownload {
    fn status(&self) -> u16 {
        self.status
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        self.body.read(buf).map_err(|err| {
            if err.kind() == std::io::ErrorKind::TimedOut {
                HttpError::Timeout
            } else {
                HttpError::Transport(err.to_string())
            }
        })
    }
}

#[derive(Default)]
pub struct HttpFirmwareSource;

impl FirmwareSource for HttpFirmwareSource {
    fn open(
        &mut self,
        url: &str,
        timeout_ms: u64,
    ) -> Result<Box<dyn FirmwareDownload>, HttpError> {
        let timeout = Duration::from_millis(timeout_ms);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout.min(MAX_READ_STALL))
            .timeout_read(timeout.min(MAX_READ_STALL))
            .user_agent(USER_AGENT)
            .build();

        match agent.get(url).call() {
            Ok(resp) => {
                let content_length = resp
                    .header("Content-Length")
                    .and_then(|value| value.trim().parse::<u64>().ok());
                Ok(Box::new(HttpDownload {
                    status: resp.status(),
                    content_length,
                    body: resp.into_reader(),
                }))
            }
            Err(ureq::Error::Status(code, _)) => Err(HttpError::Status(code)),
            Err(ureq::Error::Transport(err)) => Err(transport_error(err)),
        }
    }
}

/// Rough link quality measurement against a single HTTP endpoint: a GET
/// for latency and downlink, a fixed-size POST for uplink.
pub struct HttpProbe {
    agent: ureq::Agent,
    url: String,
    location: Location,
}

impl HttpProbe {
    pub fn new(url: &str, location: Location) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(PROBE_TIMEOUT)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            url: url.to_string(),
            location,
        }
    }

    fn try_measure(&self) -> Result<ProbeResult, String> {
        let started = Instant::now();
        let response = self.agent.get(&self.url).call().map_err(|err| err.to_string())?;
        let ping = started.elapsed();

        let mut received = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut received)
            .map_err(|err| err.to_string())?;
        let download_elapsed = started.elapsed().saturating_sub(ping);

        let upload = vec![0u8; PROBE_UPLOAD_BYTES];
        let upload_started = Instant::now();
        self.agent
            .post(&self.url)
            .set("Content-Type", "application/octet-stream")
            .send_bytes(&upload)
            .map_err(|err| err.to_string())?;
        let upload_elapsed = upload_started.elapsed();

        Ok(ProbeResult {
            ping_ms: u32::try_from(ping.as_millis()).unwrap_or(u32::MAX),
            download_mbps: megabits_per_second(received.len(), download_elapsed),
            upload_mbps: megabits_per_second(upload.len(), upload_elapsed),
            lat: self.location.lat,
            lon: self.location.lon,
        })
    }

    /// Blocks for the whole measurement.
    pub fn measure(&self) -> Option<ProbeResult> {
        match self.try_measure() {
            Ok(result) => Some(result),
            Err(err) => {
                warn!("connectivity probe against {} failed: {err}", self.url);
                None
            }
        }
    }
}

/// Runs [`HttpProbe`] measurements on the blocking pool. At most one is in
/// flight; its result is handed over on a later tick.
pub struct BackgroundProbe {
    runtime: Handle,
    probe: Arc<HttpProbe>,
    in_flight: Option<oneshot::Receiver<Option<ProbeResult>>>,
}

impl BackgroundProbe {
    pub fn new(runtime: Handle, probe: HttpProbe) -> Self {
        Self {
            runtime,
            probe: Arc::new(probe),
            in_flight: None,
        }
    }
}

impl ConnectivityProbe for BackgroundProbe {
    fn start(&mut self) {
        if self.in_flight.is_some() {
            debug!("connectivity probe still running, skipping this round");
            return;
        }
        let (done, result) = oneshot::channel();
        let probe = self.probe.clone();
        self.runtime.spawn_blocking(move || {
            let _ = done.send(probe.measure());
        });
        self.in_flight = Some(result);
    }

    fn poll_result(&mut self) -> Option<ProbeResult> {
        let result = self.in_flight.as_mut()?.try_recv();
        match result {
            Ok(measured) => {
                self.in_flight = None;
                measured
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.in_flight = None;
                None
            }
        }
    }
}

fn megabits_per_second(bytes: usize, elapsed: Duration) -> f32 {
    let seconds = elapsed.as_secs_f32().max(0.001);
    (bytes as f32 * 8.0) / seconds / 1_000_000.0
}
