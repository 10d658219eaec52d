/// Streamer Transfer: encrypted, cancellable HTTP file streaming.
///
/// Moves files between local disk and an HTTP endpoint without loading them
/// into memory:
/// - `StreamPump` drives fixed-size chunks from source to sink through an
///   optional AES-CTR / AES-GCM `ChunkCipher`
/// - `TransferTask` binds one pump run to one request/response and owns the
///   queued -> active -> completed | error | cancelled lifecycle
/// - `TransferRegistry` tracks every transfer by id for status queries and
///   cancellation
/// - `ProgressTracker` turns byte counts into percent, speed and ETA
/// - `Streamer` is the public entry point; events go to an `EventSink`

pub mod config;
pub mod error;
pub mod events;
pub mod files;
pub mod progress;
pub mod pump;
pub mod registry;
pub mod service;
mod task;
pub mod types;

// Re-export key types for convenience.
pub use config::{DEFAULT_CHUNK_SIZE, ProgressPolicy, StreamerConfig};
pub use error::{ConfigError, ErrorCode, PumpError, TransferError};
pub use events::{
    CancelledEvent, ChannelSink, CompleteEvent, CompletionDetails, ErrorEvent, EventSink,
    NullSink, ProgressEvent, TracingSink, TransferEvent,
};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use pump::StreamPump;
pub use registry::TransferRegistry;
pub use service::Streamer;
pub use streamer_crypto::{CipherMode, EncryptionSpec, KeyEncoding};
pub use types::{Direction, FileInfo, TransferId, TransferOptions, TransferRecord, TransferStatus};
