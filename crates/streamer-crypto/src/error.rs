use thiserror::Error;

use crate::keys::{CipherMode, KeyEncoding};

/// Problems with caller-supplied key or nonce material. Always raised before
/// any byte of the transfer is read.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("encryption is enabled but no key was supplied")]
    MissingKey,

    #[error("encryption is enabled but no nonce was supplied")]
    MissingNonce,

    #[error("{field} is not valid {encoding}: {reason}")]
    Decode {
        field: &'static str,
        encoding: KeyEncoding,
        reason: String,
    },

    #[error("key must be 16 or 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("{mode} nonce must be {expected} bytes, got {actual}")]
    InvalidNonceLength {
        mode: CipherMode,
        expected: usize,
        actual: usize,
    },
}

/// Failures while transforming stream data.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("authentication tag mismatch, ciphertext rejected")]
    AuthenticationFailed,

    #[error("ciphertext is {0} bytes, shorter than the authentication tag")]
    Truncated(usize),

    #[error("authenticated encryption failed")]
    EncryptFailed,
}
