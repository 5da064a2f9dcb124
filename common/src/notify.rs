use tracing::{debug, info, warn};

use crate::{
    config::EmailIntervals,
    hal::EmailTransport,
    rate_limit::{AlertCategory, EmailRateLimiter},
    topics::TOPIC_NOTIFICATIONS,
    types::{EmailPayload, Notification, PendingFirmwareInfo},
};

pub const EMAIL_KIND_FIRMWARE: &str = "firmware_update";

/// Best-effort publisher used for local alerts.
pub trait Publish {
    fn publish_with_retry(&mut self, topic: &str, payload: &str, retain: bool) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailOutcome {
    Sent(u16),
    Rejected(u16),
    Suppressed,
    Failed,
}

pub struct NotificationDispatcher {
    transport: Box<dyn EmailTransport>,
    limiter: EmailRateLimiter,
    running_version: String,
    pending_firmware: Option<PendingFirmwareInfo>,
}

impl NotificationDispatcher {
    pub fn new(
        transport: Box<dyn EmailTransport>,
        intervals: &EmailIntervals,
        running_version: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            limiter: EmailRateLimiter::new(intervals),
            running_version: running_version.into(),
            pending_firmware: None,
        }
    }

    pub fn notify_local(&mut self, sink: &mut dyn Publish, notification: &Notification) -> bool {
        let payload = match serde_json::to_string(notification) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to encode notification: {err}");
                return false;
            }
        };
        let delivered = sink.publish_with_retry(TOPIC_NOTIFICATIONS, &payload, false);
        if !delivered {
            warn!("notification not delivered: {}", notification.message);
        }
        delivered
    }

    pub fn notify_remote_email(
        &mut self,
        category: AlertCategory,
        payload: &EmailPayload,
        now_ms: u64,
    ) -> EmailOutcome {
        if !self.limiter.try_acquire(category, now_ms) {
            debug!(
                "{} email suppressed, {} ms until next allowed",
                category.as_str(),
                self.limiter.remaining_ms(category, now_ms)
            );
            return EmailOutcome::Suppressed;
        }

        match self.transport.send(payload) {
            Ok(status) if (200..300).contains(&status) => {
                info!("{} email sent ({status})", category.as_str());
                EmailOutcome::Sent(status)
            }
            Ok(status) => {
                warn!("{} email rejected with HTTP {status}", category.as_str());
                EmailOutcome::Rejected(status)
            }
            Err(err) => {
                warn!("{} email failed: {err}", category.as_str());
                EmailOutcome::Failed
            }
        }
    }

    pub fn set_pending_firmware(&mut self, info: PendingFirmwareInfo) {
        self.pending_firmware = Some(info);
    }

    pub fn pending_firmware(&self) -> Option<&PendingFirmwareInfo> {
        self.pending_firmware.as_ref()
    }

    /// Fire-once: the pending advertisement is cleared whether or not it emailed.
    pub fn check_for_firmware_update(&mut self, now_ms: u64) -> Option<EmailOutcome> {
        let info = self.pending_firmware.take()?;
        if info.version.is_empty() || info.version == self.running_version {
            debug!("ignoring firmware advertisement for {:?}", info.version);
            return None;
        }

        let payload = EmailPayload {
            kind: EMAIL_KIND_FIRMWARE,
            message: format!(
                "Firmware {} is available (running {}).",
                info.version, self.running_version
            ),
            humidity: None,
            temperature: None,
            version: Some(info.version),
            release_notes: Some(info.release_notes),
        };
        Some(self.notify_remote_email(AlertCategory::Firmware, &payload, now_ms))
    }
}
