use std::io;
use std::path::PathBuf;

use serde::Serialize;
use streamer_crypto::{CipherError, KeyError};
use thiserror::Error;

use crate::types::TransferId;

/// Rejected at `start_transfer`; the transfer is never registered.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid encryption settings: {0}")]
    Encryption(#[from] KeyError),

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported URL scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),

    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    #[error("local file path is empty")]
    EmptyPath,

    #[error("transfer id {0} is already registered")]
    DuplicateId(TransferId),

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Failure inside [`crate::StreamPump::run`].
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("source read failed: {0}")]
    SourceFailed(#[source] io::Error),

    #[error("sink write failed: {0}")]
    SinkFailed(#[source] io::Error),

    #[error("cipher failed: {0}")]
    Cipher(#[from] CipherError),

    #[error("cancelled")]
    Cancelled,
}

/// Terminal failure of a running transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("cannot read {}: {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("destination {} is unavailable: {source}", .path.display())]
    DestinationUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Pump(#[from] PumpError),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server answered {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            TransferError::Cancelled | TransferError::Pump(PumpError::Cancelled)
        )
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            TransferError::FileNotFound(_) => ErrorCode::FileNotFound,
            TransferError::SourceUnreadable { .. } => ErrorCode::SourceFailed,
            TransferError::DestinationUnavailable { .. } => ErrorCode::DestinationUnavailable,
            TransferError::Pump(PumpError::SourceFailed(_)) => ErrorCode::SourceFailed,
            TransferError::Pump(PumpError::SinkFailed(_)) => ErrorCode::SinkFailed,
            TransferError::Pump(PumpError::Cipher(_)) => ErrorCode::Cipher,
            TransferError::Pump(PumpError::Cancelled) | TransferError::Cancelled => {
                ErrorCode::Cancelled
            }
            TransferError::Network(_) => ErrorCode::Network,
            TransferError::HttpStatus { .. } => ErrorCode::HttpStatus,
        }
    }
}

/// Stable classification carried by error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "ERR_FILE_NOT_FOUND")]
    FileNotFound,
    #[serde(rename = "ERR_DESTINATION_UNAVAILABLE")]
    DestinationUnavailable,
    #[serde(rename = "ERR_SOURCE_FAILED")]
    SourceFailed,
    #[serde(rename = "ERR_SINK_FAILED")]
    SinkFailed,
    #[serde(rename = "ERR_CIPHER")]
    Cipher,
    #[serde(rename = "ERR_NETWORK")]
    Network,
    #[serde(rename = "ERR_HTTP_STATUS")]
    HttpStatus,
    #[serde(rename = "ERR_CANCELLED")]
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "ERR_FILE_NOT_FOUND",
            ErrorCode::DestinationUnavailable => "ERR_DESTINATION_UNAVAILABLE",
            ErrorCode::SourceFailed => "ERR_SOURCE_FAILED",
            ErrorCode::SinkFailed => "ERR_SINK_FAILED",
            ErrorCode::Cipher => "ERR_CIPHER",
            ErrorCode::Network => "ERR_NETWORK",
            ErrorCode::HttpStatus => "ERR_HTTP_STATUS",
            ErrorCode::Cancelled => "ERR_CANCELLED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
