use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("broker link is not connected")]
    NotConnected,
    #[error("broker rejected request: {0}")]
    Rejected(String),
    #[error("broker transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored value for `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlashError {
    #[error("not enough memory to begin flash write ({0} bytes)")]
    NoMemory(u64),
    #[error("flash write failed: {0}")]
    Write(String),
    #[error("flash finalize failed: {0}")]
    Finalize(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("malformed config payload: {0}")]
    Malformed(String),
    #[error("humidity threshold {0} is outside 0-100%")]
    ThresholdOutOfRange(f32),
    #[error("critical threshold {critical} must be below warning threshold {warning}")]
    InconsistentThresholds { critical: f32, warning: f32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtaError {
    #[error("an update is already in progress")]
    Busy,
    #[error("update url is empty")]
    EmptyUrl,
    #[error("not enough flash space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },
    #[error(transparent)]
    Flash(#[from] FlashError),
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("declared content length is unusable")]
    UnknownLength,
    #[error("size mismatch: wrote {written} of {expected} bytes")]
    SizeMismatch { written: u64, expected: u64 },
    #[error("sha256 mismatch (expected {expected}, got {actual})")]
    DigestMismatch { expected: String, actual: String },
    #[error("flash writer reports image unfinished")]
    Unfinished,
}

impl OtaError {
    /// Resource exhaustion cannot be fixed by retrying the download.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::InsufficientSpace { .. } | Self::Flash(FlashError::NoMemory(_))
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("no handler for topic `{0}`")]
    UnknownTopic(String),
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("unrecognised command token `{0}`")]
    UnknownToken(String),
    #[error("unsupported system command `{0}`")]
    UnsupportedCommand(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
}
