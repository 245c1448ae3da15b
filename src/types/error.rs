//! Error types for the wallet transport core

use std::fmt;

/// Why a push-channel closure is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalCloseKind {
    /// Credential rejected or expired
    Auth,
    /// Protocol violation reported by either side
    Protocol,
    /// Server could not decode a frame
    Payload,
    /// Connection dropped without a close handshake
    Abnormal,
    /// Configured as fatal but not one of the well-known codes
    Other,
}

impl FatalCloseKind {
    /// Classify a close code that the policy already decided is fatal
    pub fn from_code(code: u16) -> Self {
        match code {
            1008 | 4001 | 4003 => Self::Auth,
            1002 => Self::Protocol,
            1003 | 1007 | 1009 => Self::Payload,
            1006 => Self::Abnormal,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for FatalCloseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auth => "auth",
            Self::Protocol => "protocol",
            Self::Payload => "payload",
            Self::Abnormal => "abnormal",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Main error type for pipeline, channel, and storage operations
///
/// `Clone` so a single connection attempt can hand the same result to every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Push channel closed ({kind}, code {code}): {reason}")]
    ChannelFatal {
        code: u16,
        kind: FatalCloseKind,
        reason: String,
    },

    #[error("Push channel interrupted: {0}")]
    ChannelTransient(String),

    #[error("Push channel is not running")]
    ChannelClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl TransportError {
    /// Whether a retry loop may try the operation again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::ChannelTransient(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    /// Whether the failure means the current credential is unusable
    pub fn is_auth(&self) -> bool {
        match self {
            Self::Auth(_) => true,
            Self::ChannelFatal { kind, .. } => *kind == FatalCloseKind::Auth,
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Serialization(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
