use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use streamer_crypto::{CipherDirection, EncryptionSpec};
use uuid::Uuid;

/// Opaque transfer identifier, caller-supplied or a generated UUID v4.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TransferId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TransferId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upload,
    Download,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }

    /// HTTP method used when the caller does not name one.
    pub fn default_method(self) -> reqwest::Method {
        match self {
            Direction::Upload => reqwest::Method::POST,
            Direction::Download => reqwest::Method::GET,
        }
    }

    /// Uploads encrypt on the way out, downloads decrypt on the way in.
    pub fn cipher_direction(self) -> CipherDirection {
        match self {
            Direction::Upload => CipherDirection::Encrypt,
            Direction::Download => CipherDirection::Decrypt,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a transfer. `Completed`, `Failed` and `Cancelled` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Queued,
    Active,
    Completed,
    #[serde(rename = "error")]
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Queued => "queued",
            TransferStatus::Active => "active",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "error",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to start one transfer. Never mutated once handed over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOptions {
    pub url: String,
    /// Local file: the upload source or the download destination. A leading
    /// `file://` is accepted.
    pub path: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub encryption: Option<EncryptionSpec>,
    #[serde(default)]
    pub custom_transfer_id: Option<String>,
}

impl TransferOptions {
    pub fn new(url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            method: None,
            headers: HashMap::new(),
            encryption: None,
            custom_transfer_id: None,
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn encryption(mut self, spec: EncryptionSpec) -> Self {
        self.encryption = Some(spec);
        self
    }

    pub fn transfer_id(mut self, id: impl Into<String>) -> Self {
        self.custom_transfer_id = Some(id.into());
        self
    }
}

/// Registry view of one transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub direction: Direction,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure message for `error` records.
    pub error: Option<String>,
}

impl TransferRecord {
    pub fn new(id: TransferId, direction: Direction) -> Self {
        Self {
            id,
            direction,
            status: TransferStatus::Queued,
            bytes_transferred: 0,
            total_bytes: 0,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }
}

/// Local file metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub exists: bool,
    pub size: u64,
    pub name: String,
    pub extension: String,
    pub mime_type: String,
}
