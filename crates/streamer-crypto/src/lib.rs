/// Streamer Crypto Library
///
/// Incremental AES transforms for streamed file transfers:
/// - AES-CTR (128/256) with a big-endian 128-bit counter block. Output is
///   independent of how the stream is split into chunks.
/// - AES-GCM (128/256) over the whole payload. The payload is buffered until
///   `finalize`, so peak memory is O(payload size).
///
/// Key and nonce material always comes from the caller through
/// [`EncryptionSpec`]. Nothing in this crate generates a nonce.

pub mod encrypt;
pub mod error;
pub mod keys;

pub use encrypt::{CTR_NONCE_SIZE, ChunkCipher, CipherDirection, GCM_NONCE_SIZE, GCM_TAG_SIZE};
pub use error::{CipherError, KeyError};
pub use keys::{CipherMode, EncryptionSpec, KeyEncoding, KeyMaterial, generate_key};
