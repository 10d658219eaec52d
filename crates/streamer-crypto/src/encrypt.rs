use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use ctr::cipher::{KeyIvInit, StreamCipher};
use zeroize::Zeroizing;

use crate::error::{CipherError, KeyError};
use crate::keys::{CipherMode, KeyMaterial};

pub const CTR_NONCE_SIZE: usize = 16;
pub const GCM_NONCE_SIZE: usize = 12;
pub const GCM_TAG_SIZE: usize = 16;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherDirection {
    Encrypt,
    Decrypt,
}

enum Gcm {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

enum Engine {
    Ctr128(Aes128Ctr),
    Ctr256(Aes256Ctr),
    Gcm {
        cipher: Gcm,
        nonce: [u8; GCM_NONCE_SIZE],
        buffer: Zeroizing<Vec<u8>>,
    },
}

/// Incremental cipher for one direction of one transfer.
///
/// CTR output always has the input's length and does not depend on chunk
/// boundaries. GCM accumulates everything passed to [`ChunkCipher::update`]
/// and produces its output from [`ChunkCipher::finalize`]: ciphertext plus
/// tag when encrypting, verified plaintext when decrypting.
pub struct ChunkCipher {
    direction: CipherDirection,
    engine: Engine,
}

impl ChunkCipher {
    /// Build a cipher from validated key material. The material is consumed.
    pub fn new(direction: CipherDirection, material: KeyMaterial) -> Result<Self, KeyError> {
        let key = material.key();
        let nonce = material.nonce();
        let bad_len = || KeyError::InvalidKeyLength(key.len());

        let engine = match (material.mode(), key.len()) {
            (CipherMode::Ctr, 16) => {
                Engine::Ctr128(Aes128Ctr::new_from_slices(key, nonce).map_err(|_| bad_len())?)
            }
            (CipherMode::Ctr, 32) => {
                Engine::Ctr256(Aes256Ctr::new_from_slices(key, nonce).map_err(|_| bad_len())?)
            }
            (CipherMode::Gcm, len) => {
                let cipher = match len {
                    16 => Gcm::Aes128(Aes128Gcm::new_from_slice(key).map_err(|_| bad_len())?),
                    32 => Gcm::Aes256(Aes256Gcm::new_from_slice(key).map_err(|_| bad_len())?),
                    _ => return Err(bad_len()),
                };
                let nonce: [u8; GCM_NONCE_SIZE] =
                    nonce.try_into().map_err(|_| KeyError::InvalidNonceLength {
                        mode: CipherMode::Gcm,
                        expected: GCM_NONCE_SIZE,
                        actual: nonce.len(),
                    })?;
                Engine::Gcm {
                    cipher,
                    nonce,
                    buffer: Zeroizing::new(Vec::new()),
                }
            }
            (CipherMode::Ctr, _) => return Err(bad_len()),
        };

        Ok(Self { direction, engine })
    }

    pub fn direction(&self) -> CipherDirection {
        self.direction
    }

    pub fn mode(&self) -> CipherMode {
        match self.engine {
            Engine::Ctr128(_) | Engine::Ctr256(_) => CipherMode::Ctr,
            Engine::Gcm { .. } => CipherMode::Gcm,
        }
    }

    /// Transform one chunk. GCM returns an empty vec and keeps the bytes.
    pub fn update(&mut self, chunk: &[u8]) -> Result<Vec<u8>, CipherError> {
        match &mut self.engine {
            Engine::Ctr128(c) => {
                let mut out = chunk.to_vec();
                c.apply_keystream(&mut out);
                Ok(out)
            }
            Engine::Ctr256(c) => {
                let mut out = chunk.to_vec();
                c.apply_keystream(&mut out);
                Ok(out)
            }
            Engine::Gcm { buffer, .. } => {
                buffer.extend_from_slice(chunk);
                Ok(Vec::new())
            }
        }
    }

    /// Finish the stream and return any trailing bytes.
    ///
    /// Empty for CTR. For GCM decryption the tag is checked before a single
    /// plaintext byte is released.
    pub fn finalize(self) -> Result<Vec<u8>, CipherError> {
        let Engine::Gcm {
            cipher,
            nonce,
            mut buffer,
        } = self.engine
        else {
            return Ok(Vec::new());
        };

        let nonce = Nonce::from_slice(&nonce);
        match self.direction {
            CipherDirection::Encrypt => {
                let sealed = match &cipher {
                    Gcm::Aes128(c) => c.encrypt_in_place(nonce, b"", &mut *buffer),
                    Gcm::Aes256(c) => c.encrypt_in_place(nonce, b"", &mut *buffer),
                };
                sealed.map_err(|_| CipherError::EncryptFailed)?;
            }
            CipherDirection::Decrypt => {
                if buffer.len() < GCM_TAG_SIZE {
                    return Err(CipherError::Truncated(buffer.len()));
                }
                let opened = match &cipher {
                    Gcm::Aes128(c) => c.decrypt_in_place(nonce, b"", &mut *buffer),
                    Gcm::Aes256(c) => c.decrypt_in_place(nonce, b"", &mut *buffer),
                };
                opened.map_err(|_| CipherError::AuthenticationFailed)?;
            }
        }

        Ok(std::mem::take(&mut *buffer))
    }

    /// Number of bytes this cipher emits for `input_len` bytes of input.
    pub fn output_len(&self, input_len: u64) -> u64 {
        match (&self.engine, self.direction) {
            (Engine::Gcm { .. }, CipherDirection::Encrypt) => input_len + GCM_TAG_SIZE as u64,
            (Engine::Gcm { .. }, CipherDirection::Decrypt) => {
                input_len.saturating_sub(GCM_TAG_SIZE as u64)
            }
            _ => input_len,
        }
    }
}

impl std::fmt::Debug for ChunkCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCipher")
            .field("direction", &self.direction)
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{EncryptionSpec, KeyEncoding};
    use proptest::prelude::*;

    fn material(mode: CipherMode, key: &[u8], nonce: &[u8]) -> KeyMaterial {
        KeyMaterial::from_bytes(mode, Zeroizing::new(key.to_vec()), Zeroizing::new(nonce.to_vec()))
            .unwrap()
    }

    fn cipher(
        direction: CipherDirection,
        mode: CipherMode,
        key: &[u8],
        nonce: &[u8],
    ) -> ChunkCipher {
        ChunkCipher::new(direction, material(mode, key, nonce)).unwrap()
    }

    fn seal(mode: CipherMode, key: &[u8], nonce: &[u8], data: &[u8], chunk: usize) -> Vec<u8> {
        run(cipher(CipherDirection::Encrypt, mode, key, nonce), data, chunk).unwrap()
    }

    fn open(
        mode: CipherMode,
        key: &[u8],
        nonce: &[u8],
        data: &[u8],
        chunk: usize,
    ) -> Result<Vec<u8>, CipherError> {
        run(cipher(CipherDirection::Decrypt, mode, key, nonce), data, chunk)
    }

    /// Run `data` through a fresh cipher in `chunk`-sized pieces.
    fn run(mut c: ChunkCipher, data: &[u8], chunk: usize) -> Result<Vec<u8>, CipherError> {
        let mut out = Vec::new();
        for piece in data.chunks(chunk.max(1)) {
            out.extend(c.update(piece)?);
        }
        out.extend(c.finalize()?);
        Ok(out)
    }

    #[test]
    fn ctr_matches_nist_vector() {
        // NIST SP 800-38A F.5.1, CTR-AES128.Encrypt, first block.
        let key = hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let iv = hex::decode("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff").unwrap();
        let plaintext = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        let expected = hex::decode("874d6191b620e3261bef6864990db6ce").unwrap();

        let c = cipher(CipherDirection::Encrypt, CipherMode::Ctr, &key, &iv);
        assert_eq!(run(c, &plaintext, 5).unwrap(), expected);
    }

    #[test]
    fn ctr_update_preserves_length() {
        let mut c = cipher(CipherDirection::Encrypt, CipherMode::Ctr, &[1u8; 32], &[2u8; 16]);
        for len in [0usize, 1, 15, 16, 17, 100] {
            assert_eq!(c.update(&vec![0u8; len]).unwrap().len(), len);
        }
        assert!(c.finalize().unwrap().is_empty());
    }

    #[test]
    fn gcm_roundtrip_appends_tag() {
        let key = [0x42u8; 32];
        let nonce = [0x24u8; 12];
        let plaintext = b"streamed through an authenticated cipher";

        let enc = cipher(CipherDirection::Encrypt, CipherMode::Gcm, &key, &nonce);
        assert_eq!(enc.output_len(plaintext.len() as u64), plaintext.len() as u64 + 16);
        let sealed = run(enc, plaintext, 7).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + GCM_TAG_SIZE);

        let dec = cipher(CipherDirection::Decrypt, CipherMode::Gcm, &key, &nonce);
        assert_eq!(run(dec, &sealed, 11).unwrap(), plaintext);
    }

    #[test]
    fn gcm_update_withholds_output() {
        let mut c = cipher(CipherDirection::Decrypt, CipherMode::Gcm, &[0u8; 16], &[0u8; 12]);
        assert!(c.update(&[1, 2, 3]).unwrap().is_empty());
    }

    #[test]
    fn gcm_wrong_key_fails() {
        let nonce = [5u8; 12];
        let enc = cipher(CipherDirection::Encrypt, CipherMode::Gcm, &[1u8; 32], &nonce);
        let sealed = run(enc, b"secret", 16).unwrap();

        let dec = cipher(CipherDirection::Decrypt, CipherMode::Gcm, &[2u8; 32], &nonce);
        assert!(matches!(run(dec, &sealed, 16), Err(CipherError::AuthenticationFailed)));
    }

    #[test]
    fn gcm_truncated_input_fails() {
        let dec = cipher(CipherDirection::Decrypt, CipherMode::Gcm, &[1u8; 32], &[1u8; 12]);
        assert!(matches!(run(dec, &[0u8; 10], 4), Err(CipherError::Truncated(10))));
    }

    #[test]
    fn gcm_empty_payload_roundtrip() {
        let enc = cipher(CipherDirection::Encrypt, CipherMode::Gcm, &[9u8; 16], &[3u8; 12]);
        let sealed = run(enc, b"", 16).unwrap();
        assert_eq!(sealed.len(), GCM_TAG_SIZE);

        let dec = cipher(CipherDirection::Decrypt, CipherMode::Gcm, &[9u8; 16], &[3u8; 12]);
        assert!(run(dec, &sealed, 16).unwrap().is_empty());
    }

    #[test]
    fn spec_builds_cipher() {
        let spec = EncryptionSpec::new(
            KeyEncoding::Base64.encode(&[1u8; 32]),
            KeyEncoding::Base64.encode(&[2u8; 16]),
            CipherMode::Ctr,
        );
        let material = spec.key_material().unwrap().unwrap();
        let c = ChunkCipher::new(CipherDirection::Encrypt, material).unwrap();
        assert_eq!(c.mode(), CipherMode::Ctr);
        assert_eq!(c.direction(), CipherDirection::Encrypt);
    }

    #[test]
    fn block_cipher_key_schedules_wipe_on_drop() {
        fn assert_wiped_on_drop<T: zeroize::ZeroizeOnDrop>() {}
        assert_wiped_on_drop::<aes::Aes128>();
        assert_wiped_on_drop::<aes::Aes256>();
    }

    proptest! {
        #[test]
        fn ctr_output_is_chunk_size_independent(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            c1 in 1usize..300,
            c2 in 1usize..300,
            wide_key in any::<bool>(),
        ) {
            let key = if wide_key { vec![0x11u8; 32] } else { vec![0x11u8; 16] };
            let nonce = [0xFEu8; 16];
            let a = seal(CipherMode::Ctr, &key, &nonce, &data, c1);
            let b = seal(CipherMode::Ctr, &key, &nonce, &data, c2);
            let whole = seal(CipherMode::Ctr, &key, &nonce, &data, data.len());
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(&a, &whole);
        }

        #[test]
        fn ctr_roundtrip(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            key in proptest::collection::vec(any::<u8>(), 32),
            nonce in proptest::collection::vec(any::<u8>(), 16),
            chunk in 1usize..512,
        ) {
            let sealed = seal(CipherMode::Ctr, &key, &nonce, &data, chunk);
            let opened = open(CipherMode::Ctr, &key, &nonce, &sealed, chunk + 3).unwrap();
            prop_assert_eq!(opened, data);
        }

        #[test]
        fn gcm_detects_any_flipped_byte(
            data in proptest::collection::vec(any::<u8>(), 1..256),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let key = [0x33u8; 32];
            let nonce = [0x44u8; 12];
            let mut sealed = seal(CipherMode::Gcm, &key, &nonce, &data, 64);
            let i = index.index(sealed.len());
            sealed[i] ^= 1 << bit;

            let result = open(CipherMode::Gcm, &key, &nonce, &sealed, 64);
            prop_assert!(matches!(result, Err(CipherError::AuthenticationFailed)));
        }
    }
}
