//! Tick-driven firmware download and install.
//!
//! Each [`OtaUpdateManager::poll`] moves at most `chunks_per_tick` chunks
//! from the HTTP body into the flash writer, so the caller keeps servicing
//! the actuator cutoff between calls. Failed attempts are retried after a
//! fixed delay until the attempt budget is spent.

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{
    config::OtaConfig,
    error::{FlashError, HttpError, OtaError},
    hal::{FirmwareDownload, FirmwareSource, FlashWriter},
    outbox::Outbox,
    topics::{TOPIC_FIRMWARE_CURRENT, TOPIC_FIRMWARE_PROGRESS},
    types::{FirmwareStatus, FirmwareStatusPayload, NotificationKind, OtaProgressPayload, OtaStage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaPoll {
    Idle,
    InProgress,
    /// Image installed; the device must restart into it.
    Restart,
    /// Retry budget spent or a permanent error; the update is dropped.
    Failed,
}

/// Observable state of the active update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaSession {
    pub content_length: u64,
    pub bytes_written: u64,
    pub retry_count: u32,
    pub stage: OtaStage,
}

struct Transfer {
    download: Box<dyn FirmwareDownload>,
    content_length: u64,
    written: u64,
    hasher: Sha256,
    reported_percent: u8,
}

struct Job {
    url: String,
    sha256: Option<String>,
    attempts: u32,
    next_attempt_ms: u64,
    stage: OtaStage,
    transfer: Option<Transfer>,
}

enum Step {
    More,
    Complete,
}

pub struct OtaUpdateManager {
    settings: OtaConfig,
    running_version: String,
    buffer: Vec<u8>,
    job: Option<Job>,
}

impl OtaUpdateManager {
    pub fn new(settings: OtaConfig, running_version: impl Into<String>) -> Self {
        Self {
            settings,
            running_version: running_version.into(),
            buffer: Vec::new(),
            job: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.job.is_some()
    }

    pub fn session(&self) -> Option<OtaSession> {
        self.job.as_ref().map(|job| OtaSession {
            content_length: job.transfer.as_ref().map_or(0, |t| t.content_length),
            bytes_written: job.transfer.as_ref().map_or(0, |t| t.written),
            retry_count: job.attempts.saturating_sub(1),
            stage: job.stage,
        })
    }

    pub fn begin(
        &mut self,
        url: &str,
        sha256: Option<String>,
        now_ms: u64,
        out: &mut Outbox,
    ) -> Result<(), OtaError> {
        if self.job.is_some() {
            return Err(OtaError::Busy);
        }
        let url = url.trim();
        if url.is_empty() {
            return Err(OtaError::EmptyUrl);
        }

        info!("firmware update accepted from {url}");
        self.job = Some(Job {
            url: url.to_string(),
            sha256,
            attempts: 0,
            next_attempt_ms: now_ms,
            stage: OtaStage::Downloading,
            transfer: None,
        });
        self.publish_status(FirmwareStatus::Updating, out);
        publish_progress(out, OtaStage::Downloading, 0, None);
        Ok(())
    }

    pub fn poll(
        &mut self,
        now_ms: u64,
        source: &mut dyn FirmwareSource,
        flash: &mut dyn FlashWriter,
        out: &mut Outbox,
    ) -> OtaPoll {
        let Some(job) = self.job.as_mut() else {
            return OtaPoll::Idle;
        };

        if job.transfer.is_none() {
            if now_ms < job.next_attempt_ms {
                return OtaPoll::InProgress;
            }
            job.attempts += 1;
            job.stage = OtaStage::Downloading;
            info!(
                "firmware download attempt {}/{}",
                job.attempts, self.settings.max_attempts
            );
            match open(job, &self.settings, source, flash) {
                Ok(transfer) => job.transfer = Some(transfer),
                Err(err) => return self.attempt_failed(err, now_ms, out),
            }
        }

        let step = stream(job, &self.settings, &mut self.buffer, flash, out);
        let result = match step {
            Ok(Step::More) => return OtaPoll::InProgress,
            Ok(Step::Complete) => finalize(job, flash, out),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                info!("firmware image installed, restarting");
                self.job = None;
                publish_progress(out, OtaStage::Finished, 100, None);
                self.publish_status(FirmwareStatus::Updated, out);
                out.alert(NotificationKind::Info, "Firmware updated successfully.");
                OtaPoll::Restart
            }
            Err(err) => {
                flash.abort();
                self.attempt_failed(err, now_ms, out)
            }
        }
    }

    fn attempt_failed(&mut self, err: OtaError, now_ms: u64, out: &mut Outbox) -> OtaPoll {
        let Some(job) = self.job.as_mut() else {
            return OtaPoll::Idle;
        };
        job.transfer = None;

        if err.is_permanent() || job.attempts >= self.settings.max_attempts {
            warn!("firmware update failed after {} attempt(s): {err}", job.attempts);
            self.job = None;
            publish_progress(out, OtaStage::Error, 0, Some(err.to_string()));
            self.publish_status(FirmwareStatus::Failed, out);
            out.alert(NotificationKind::Error, "Firmware update failed.");
            return OtaPoll::Failed;
        }

        warn!(
            "firmware attempt {}/{} failed: {err}",
            job.attempts, self.settings.max_attempts
        );
        job.next_attempt_ms = now_ms.saturating_add(self.settings.retry_delay_ms);
        publish_progress(
            out,
            OtaStage::Downloading,
            0,
            Some(format!(
                "attempt {}/{} failed: {err}",
                job.attempts, self.settings.max_attempts
            )),
        );
        OtaPoll::InProgress
    }

    fn publish_status(&self, status: FirmwareStatus, out: &mut Outbox) {
        out.publish(
            TOPIC_FIRMWARE_CURRENT,
            &FirmwareStatusPayload {
                status,
                version: &self.running_version,
            },
            true,
        );
    }
}

fn publish_progress(out: &mut Outbox, stage: OtaStage, progress: u8, message: Option<String>) {
    out.publish(
        TOPIC_FIRMWARE_PROGRESS,
        &OtaProgressPayload {
            stage,
            progress,
            message,
        },
        true,
    );
}

fn open(
    job: &Job,
    settings: &OtaConfig,
    source: &mut dyn FirmwareSource,
    flash: &mut dyn FlashWriter,
) -> Result<Transfer, OtaError> {
    let download = source.open(&job.url, settings.http_timeout_ms)?;

    let status = download.status();
    if !(200..300).contains(&status) {
        return Err(HttpError::Status(status).into());
    }

    let content_length = download
        .content_length()
        .filter(|length| *length > 0)
        .ok_or(OtaError::UnknownLength)?;

    let available = flash.free_space();
    if available < content_length {
        return Err(OtaError::InsufficientSpace {
            needed: content_length,
            available,
        });
    }
    flash.begin(content_length)?;

    Ok(Transfer {
        download,
        content_length,
        written: 0,
        hasher: Sha256::new(),
        reported_percent: 0,
    })
}

fn stream(
    job: &mut Job,
    settings: &OtaConfig,
    buffer: &mut Vec<u8>,
    flash: &mut dyn FlashWriter,
    out: &mut Outbox,
) -> Result<Step, OtaError> {
    let Some(transfer) = job.transfer.as_mut() else {
        return Ok(Step::More);
    };
    buffer.resize(settings.chunk_size.max(1), 0);

    for _ in 0..settings.chunks_per_tick {
        let remaining = transfer.content_length - transfer.written;
        if remaining == 0 {
            break;
        }
        let want = buffer.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let read = transfer.download.read(&mut buffer[..want])?;
        if read == 0 {
            return Err(OtaError::SizeMismatch {
                written: transfer.written,
                expected: transfer.content_length,
            });
        }

        let chunk = &buffer[..read];
        let stored = flash.write(chunk)?;
        if stored != read {
            return Err(FlashError::Write(format!("short write: {stored} of {read} bytes")).into());
        }
        transfer.hasher.update(chunk);
        transfer.written += read as u64;

        let percent = (transfer.written.saturating_mul(100) / transfer.content_length).min(100) as u8;
        let step = settings.progress_step_percent.max(1);
        let bucket = percent / step * step;
        if bucket > transfer.reported_percent {
            transfer.reported_percent = bucket;
            publish_progress(out, OtaStage::Downloading, bucket, None);
        }
    }

    if transfer.written == transfer.content_length {
        Ok(Step::Complete)
    } else {
        Ok(Step::More)
    }
}

fn finalize(job: &mut Job, flash: &mut dyn FlashWriter, out: &mut Outbox) -> Result<(), OtaError> {
    let Some(transfer) = job.transfer.take() else {
        return Err(OtaError::Unfinished);
    };
    job.stage = OtaStage::Installing;
    publish_progress(out, OtaStage::Installing, 100, None);

    let digest = transfer.hasher.finalize();
    let mut digest_hex = String::with_capacity(64);
    for byte in digest {
        use core::fmt::Write as _;
        let _ = write!(&mut digest_hex, "{byte:02x}");
    }

    if let Some(expected) = job.sha256.as_deref() {
        if expected != digest_hex {
            return Err(OtaError::DigestMismatch {
                expected: expected.to_string(),
                actual: digest_hex,
            });
        }
    }

    if flash.finish()? {
        job.stage = OtaStage::Finished;
        info!(
            "firmware image complete: {} bytes, sha256 {digest_hex}",
            transfer.written
        );
        Ok(())
    } else {
        Err(OtaError::Unfinished)
    }
}
