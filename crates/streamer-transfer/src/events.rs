//! Transfer events and the sinks that receive them.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::ErrorCode;
use crate::types::{Direction, TransferId};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferEvent {
    Progress(ProgressEvent),
    Complete(CompleteEvent),
    Cancelled(CancelledEvent),
    Error(ErrorEvent),
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub transfer_id: TransferId,
    pub direction: Direction,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub percent: f64,
    /// Bytes per second since the transfer became active.
    pub speed: f64,
    pub estimated_time_remaining_secs: Option<f64>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteEvent {
    pub transfer_id: TransferId,
    pub direction: Direction,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub details: CompletionDetails,
}

/// Direction-specific part of a completion event.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CompletionDetails {
    Upload {
        response_code: u16,
        response_body: String,
        response_headers: HashMap<String, String>,
    },
    Download {
        file_path: String,
        mime_type: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelledEvent {
    pub transfer_id: TransferId,
    pub direction: Direction,
    pub bytes_transferred: u64,
    /// 0 when the transfer ended before its size was known.
    pub total_bytes: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub transfer_id: TransferId,
    pub direction: Direction,
    pub code: ErrorCode,
    pub message: String,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl TransferEvent {
    pub fn transfer_id(&self) -> &TransferId {
        match self {
            TransferEvent::Progress(e) => &e.transfer_id,
            TransferEvent::Complete(e) => &e.transfer_id,
            TransferEvent::Cancelled(e) => &e.transfer_id,
            TransferEvent::Error(e) => &e.transfer_id,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            TransferEvent::Progress(e) => e.direction,
            TransferEvent::Complete(e) => e.direction,
            TransferEvent::Cancelled(e) => e.direction,
            TransferEvent::Error(e) => e.direction,
        }
    }

    /// Name a host bridge would emit this event under.
    pub fn event_name(&self) -> &'static str {
        match (self, self.direction()) {
            (TransferEvent::Progress(_), Direction::Upload) => "upload-progress",
            (TransferEvent::Progress(_), Direction::Download) => "download-progress",
            (TransferEvent::Complete(_), Direction::Upload) => "upload-complete",
            (TransferEvent::Complete(_), Direction::Download) => "download-complete",
            (TransferEvent::Cancelled(_), Direction::Upload) => "upload-cancelled",
            (TransferEvent::Cancelled(_), Direction::Download) => "download-cancelled",
            (TransferEvent::Error(_), _) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferEvent::Progress(_))
    }
}

/// Receives transfer events. Called from transfer tasks, so implementations
/// must not block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TransferEvent);
}

/// Sink that writes events to `tracing`.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: TransferEvent) {
        let name = event.event_name();
        match &event {
            TransferEvent::Progress(p) => {
                tracing::debug!(
                    transfer_id = %p.transfer_id,
                    event = name,
                    bytes = p.bytes_transferred,
                    total = p.total_bytes,
                    "{:.1}% at {:.0} B/s",
                    p.percent,
                    p.speed,
                );
            }
            TransferEvent::Complete(c) => {
                tracing::info!(
                    transfer_id = %c.transfer_id,
                    event = name,
                    bytes = c.bytes_transferred,
                    duration_ms = c.duration_ms,
                    "transfer complete",
                );
            }
            TransferEvent::Cancelled(c) => {
                tracing::info!(
                    transfer_id = %c.transfer_id,
                    event = name,
                    bytes = c.bytes_transferred,
                    "transfer cancelled: {}",
                    c.reason,
                );
            }
            TransferEvent::Error(e) => {
                tracing::warn!(
                    transfer_id = %e.transfer_id,
                    event = name,
                    code = %e.code,
                    "transfer failed: {}",
                    e.message,
                );
            }
        }
    }
}

/// Sink that discards all events.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TransferEvent) {}
}

/// Forwards events into an unbounded tokio channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: TransferEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}
