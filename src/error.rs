use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;

/// Failure classification shared by session start, sync and media playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transient connectivity loss
    NetworkUnavailable,
    /// Credentials rejected by the server
    AuthExpired,
    /// Item, track or file no longer exists server-side
    ContentNotFound,
    /// Local playback cannot decode the stream
    FormatUnsupported,
    /// Adaptive-stream failure (malformed or unplayable manifest)
    StreamManifestError,
    /// Generic media element failure
    PlaybackError,
    Unknown,
}

/// How the UI should surface an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// Recoverable indicator, the operation may be retried
    Transient,
    /// Route to the login flow
    ReLogin,
    /// Dismissible message that does not block the rest of the UI
    Dismissible,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkUnavailable
                | ErrorKind::StreamManifestError
                | ErrorKind::PlaybackError
        )
    }

    pub fn requires_login(self) -> bool {
        self == ErrorKind::AuthExpired
    }

    pub fn presentation(self) -> Presentation {
        if self.requires_login() {
            Presentation::ReLogin
        } else if self.is_retryable() {
            Presentation::Transient
        } else {
            Presentation::Dismissible
        }
    }

    /// Classify an HTTP status returned by the media server
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => ErrorKind::AuthExpired,
            404 | 410 => ErrorKind::ContentNotFound,
            415 => ErrorKind::FormatUnsupported,
            408 | 429 | 502 | 503 | 504 => ErrorKind::NetworkUnavailable,
            _ => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NetworkUnavailable => "network unavailable",
            ErrorKind::AuthExpired => "authentication expired",
            ErrorKind::ContentNotFound => "content not found",
            ErrorKind::FormatUnsupported => "format unsupported",
            ErrorKind::StreamManifestError => "stream manifest error",
            ErrorKind::PlaybackError => "playback error",
            ErrorKind::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}

/// Typed error surfaced by the playback core
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct PlayerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PlayerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn from_status(status: StatusCode, context: &str) -> Self {
        Self::new(
            ErrorKind::from_status(status),
            format!("{} returned HTTP {}", context, status),
        )
    }
}

impl From<reqwest::Error> for PlayerError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() || e.is_connect() {
            ErrorKind::NetworkUnavailable
        } else if let Some(status) = e.status() {
            ErrorKind::from_status(status)
        } else if e.is_request() {
            ErrorKind::NetworkUnavailable
        } else {
            ErrorKind::Unknown
        };
        PlayerError::new(kind, e.to_string())
    }
}

impl From<serde_json::Error> for PlayerError {
    fn from(e: serde_json::Error) -> Self {
        PlayerError::new(ErrorKind::Unknown, format!("Malformed payload: {}", e))
    }
}
