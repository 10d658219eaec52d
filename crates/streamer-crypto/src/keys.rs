use std::fmt;

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::encrypt::{CTR_NONCE_SIZE, GCM_NONCE_SIZE};
use crate::error::KeyError;

/// Block cipher mode applied to a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherMode {
    /// AES-CTR. Streams chunk by chunk, no integrity tag.
    #[default]
    Ctr,
    /// AES-GCM over the whole payload with a trailing 16-byte tag.
    Gcm,
}

impl CipherMode {
    /// Nonce length this mode expects, in bytes.
    pub fn nonce_len(self) -> usize {
        match self {
            CipherMode::Ctr => CTR_NONCE_SIZE,
            CipherMode::Gcm => GCM_NONCE_SIZE,
        }
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherMode::Ctr => f.write_str("AES-CTR"),
            CipherMode::Gcm => f.write_str("AES-GCM"),
        }
    }
}

/// Transport encoding of key and nonce strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyEncoding {
    #[default]
    Base64,
    Hex,
}

impl KeyEncoding {
    pub fn encode(self, bytes: &[u8]) -> String {
        match self {
            KeyEncoding::Base64 => BASE64.encode(bytes),
            KeyEncoding::Hex => hex::encode(bytes),
        }
    }

    /// Decode `value`, reporting failures against `field` ("key" or "nonce").
    pub fn decode(self, field: &'static str, value: &str) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let value = value.trim();
        let decoded = match self {
            KeyEncoding::Base64 => BASE64.decode(value).map_err(|e| e.to_string()),
            KeyEncoding::Hex => hex::decode(value).map_err(|e| e.to_string()),
        };
        decoded.map(Zeroizing::new).map_err(|reason| KeyError::Decode {
            field,
            encoding: self,
            reason,
        })
    }
}

impl fmt::Display for KeyEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyEncoding::Base64 => f.write_str("base64"),
            KeyEncoding::Hex => f.write_str("hex"),
        }
    }
}

/// Encryption options for one transfer, as handed over by the caller.
///
/// Key and nonce travel as encoded strings and are only turned into bytes by
/// [`EncryptionSpec::key_material`].
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct EncryptionSpec {
    pub enabled: bool,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub mode: CipherMode,
    #[serde(default)]
    pub encoding: KeyEncoding,
}

impl EncryptionSpec {
    /// Encryption enabled with the given encoded key and nonce.
    pub fn new(key: impl Into<String>, nonce: impl Into<String>, mode: CipherMode) -> Self {
        Self {
            enabled: true,
            key: Some(key.into()),
            nonce: Some(nonce.into()),
            mode,
            encoding: KeyEncoding::default(),
        }
    }

    pub fn with_encoding(mut self, encoding: KeyEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Decode and validate the key and nonce.
    ///
    /// Returns `Ok(None)` when encryption is disabled. A missing nonce is an
    /// error; no substitute is ever generated.
    pub fn key_material(&self) -> Result<Option<KeyMaterial>, KeyError> {
        if !self.enabled {
            return Ok(None);
        }

        let key = self
            .key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(KeyError::MissingKey)?;
        let nonce = self
            .nonce
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or(KeyError::MissingNonce)?;

        let key = self.encoding.decode("key", key)?;
        let nonce = self.encoding.decode("nonce", nonce)?;
        KeyMaterial::from_bytes(self.mode, key, nonce).map(Some)
    }
}

// Never print key or nonce material.
impl fmt::Debug for EncryptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionSpec")
            .field("enabled", &self.enabled)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("nonce", &self.nonce.as_ref().map(|_| "<redacted>"))
            .field("mode", &self.mode)
            .field("encoding", &self.encoding)
            .finish()
    }
}

/// Validated key and nonce bytes for one cipher instance.
///
/// Not `Clone`: building a [`crate::ChunkCipher`] consumes it, so one decoded
/// spec can never drive two encryptions. Bytes are wiped on drop.
pub struct KeyMaterial {
    mode: CipherMode,
    key: Zeroizing<Vec<u8>>,
    nonce: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    pub fn from_bytes(
        mode: CipherMode,
        key: Zeroizing<Vec<u8>>,
        nonce: Zeroizing<Vec<u8>>,
    ) -> Result<Self, KeyError> {
        if key.len() != 16 && key.len() != 32 {
            return Err(KeyError::InvalidKeyLength(key.len()));
        }
        if nonce.len() != mode.nonce_len() {
            return Err(KeyError::InvalidNonceLength {
                mode,
                expected: mode.nonce_len(),
                actual: nonce.len(),
            });
        }
        Ok(Self { mode, key, nonce })
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    pub(crate) fn key(&self) -> &[u8] {
        &self.key
    }

    pub(crate) fn nonce(&self) -> &[u8] {
        &self.nonce
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("mode", &self.mode)
            .field("key_len", &self.key.len())
            .finish_non_exhaustive()
    }
}

/// Generate a random AES key of `len` bytes (16 or 32) from the OS RNG.
pub fn generate_key(len: usize) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    if len != 16 && len != 32 {
        return Err(KeyError::InvalidKeyLength(len));
    }
    let mut key = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(&mut key);
    Ok(key)
}
