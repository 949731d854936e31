//! Chunked authenticated symmetric encryption.
//!
//! Every value deaddrop stores, locally or on public infrastructure, passes
//! through the cipher in this module. Input is partitioned into fixed-size
//! chunks and each chunk is sealed independently with XSalsa20-Poly1305
//! (SecretBox semantics): the output for a chunk is the literal concatenation
//! `nonce(24) || ciphertext || tag(16)`, so every chunk carries 40 bytes of
//! overhead.
//!
//! Replay of a ciphertext under the same key succeeds structurally; freshness
//! is enforced at the rendezvous layer, not here.

use crate::crypto::KEY_LENGTH;
use crate::error::{DeaddropError, Result};
use crypto_secretbox::{
    aead::{Aead, KeyInit},
    Key, Nonce, XSalsa20Poly1305,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default size of a plaintext chunk in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 16000;

/// Length in bytes of a SecretBox nonce.
pub const NONCE_LENGTH: usize = 24;

/// Length in bytes of a Poly1305 authentication tag.
const TAG_LENGTH: usize = 16;

/// Per-chunk ciphertext overhead: nonce plus authentication tag.
pub const CHUNK_OVERHEAD: usize = NONCE_LENGTH + TAG_LENGTH;

/// Nonce generation policy for a cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoncePolicy {
    /// 24 bytes straight from the CSPRNG.
    #[default]
    Random,
    /// First 4 bytes are the current Unix seconds (u32 little-endian), the
    /// remaining 20 bytes come from the CSPRNG. Prefixing time series data
    /// steps around the (unlikely) birthday collision on pure random nonces
    /// for long-lived keys.
    TimeSeries,
}

/// Cipher type enumeration, stable across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CipherKind {
    /// XSalsa20-Poly1305 SecretBox.
    SecretBox,
}

impl From<CipherKind> for u8 {
    fn from(kind: CipherKind) -> Self {
        match kind {
            CipherKind::SecretBox => 0,
        }
    }
}

impl TryFrom<u8> for CipherKind {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(CipherKind::SecretBox),
            other => Err(format!("unknown cipher type {other}")),
        }
    }
}

/// Cipher settings shared with a peer during handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerCipher {
    #[serde(rename = "type")]
    pub kind: CipherKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

/// Cipher settings persisted in local configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherConfig {
    pub kind: CipherKind,
    pub chunk_size: usize,
}

/// The SecretBox chunked cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretBoxCipher {
    pub nonce: NoncePolicy,
    pub chunk_size: usize,
}

impl SecretBoxCipher {
    /// Creates a cipher with an explicit nonce policy and chunk size.
    pub fn new(nonce: NoncePolicy, chunk_size: usize) -> Self {
        Self { nonce, chunk_size }
    }

    /// Random-nonce cipher with the default chunk size.
    pub fn random() -> Self {
        Self::new(NoncePolicy::Random, DEFAULT_CHUNK_SIZE)
    }

    /// Time-series-nonce cipher with the default chunk size.
    pub fn time_series() -> Self {
        Self::new(NoncePolicy::TimeSeries, DEFAULT_CHUNK_SIZE)
    }

    /// Encrypts `data` under `key`, sealing each chunk with a fresh nonce.
    pub fn encrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if key.len() != KEY_LENGTH {
            return Err(DeaddropError::BadKeyLength);
        }
        if self.chunk_size == 0 {
            return Err(DeaddropError::config("chunk size must be greater than zero"));
        }

        let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
        let chunks = data.len().div_ceil(self.chunk_size);
        let mut encrypted = Vec::with_capacity(data.len() + chunks * CHUNK_OVERHEAD);

        for chunk in data.chunks(self.chunk_size) {
            let nonce = self.gen_nonce();
            let sealed = cipher
                .encrypt(Nonce::from_slice(&nonce), chunk)
                .map_err(|_| DeaddropError::crypto("chunk encryption failed"))?;
            encrypted.extend_from_slice(&nonce);
            encrypted.extend_from_slice(&sealed);
        }
        Ok(encrypted)
    }

    /// Decrypts `data` under `key`.
    ///
    /// Input is partitioned into chunks of `chunk_size + 40` bytes (the last
    /// may be shorter); any authentication failure fails the whole operation.
    pub fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if key.len() != KEY_LENGTH {
            return Err(DeaddropError::BadKeyLength);
        }
        if self.chunk_size == 0 {
            return Err(DeaddropError::config("chunk size must be greater than zero"));
        }

        let cipher = XSalsa20Poly1305::new(Key::from_slice(key));
        let mut decrypted = Vec::with_capacity(data.len());

        for chunk in data.chunks(self.chunk_size + CHUNK_OVERHEAD) {
            if chunk.len() < CHUNK_OVERHEAD {
                return Err(DeaddropError::DecryptAuthFailed);
            }
            let (nonce, sealed) = chunk.split_at(NONCE_LENGTH);
            let plain = cipher
                .decrypt(Nonce::from_slice(nonce), sealed)
                .map_err(|_| DeaddropError::DecryptAuthFailed)?;
            decrypted.extend_from_slice(&plain);
        }
        Ok(decrypted)
    }

    /// Generates a nonce according to the configured policy.
    fn gen_nonce(&self) -> [u8; NONCE_LENGTH] {
        let mut nonce = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce);
        if self.nonce == NoncePolicy::TimeSeries {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or_default();
            nonce[..4].copy_from_slice(&secs.to_le_bytes());
        }
        nonce
    }
}

/// A configured cipher, dispatching to its variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    SecretBox(SecretBoxCipher),
}

impl Cipher {
    /// The default publishing cipher: random nonces, default chunk size.
    pub fn default_cipher() -> Self {
        Cipher::SecretBox(SecretBoxCipher::random())
    }

    /// The session-storage cipher: time-series nonces, default chunk size.
    pub fn time_series() -> Self {
        Cipher::SecretBox(SecretBoxCipher::time_series())
    }

    /// Rebuilds a cipher from settings shared by a peer.
    pub fn from_peer(config: &PeerCipher) -> Result<Self> {
        match config.kind {
            CipherKind::SecretBox => Ok(Cipher::SecretBox(SecretBoxCipher::new(
                NoncePolicy::Random,
                config.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            ))),
        }
    }

    /// Rebuilds a cipher from locally persisted settings.
    pub fn from_config(config: &CipherConfig) -> Result<Self> {
        match config.kind {
            CipherKind::SecretBox => Ok(Cipher::SecretBox(SecretBoxCipher::new(
                NoncePolicy::Random,
                config.chunk_size,
            ))),
        }
    }

    /// Returns the cipher variant tag.
    pub fn kind(&self) -> CipherKind {
        match self {
            Cipher::SecretBox(_) => CipherKind::SecretBox,
        }
    }

    pub fn encrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        match self {
            Cipher::SecretBox(c) => c.encrypt(data, key),
        }
    }

    pub fn decrypt(&self, data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        match self {
            Cipher::SecretBox(c) => c.decrypt(data, key),
        }
    }

    /// Settings shared with a peer during handshake.
    pub fn share(&self) -> Result<PeerCipher> {
        Ok(PeerCipher {
            kind: self.kind(),
            chunk_size: Some(DEFAULT_CHUNK_SIZE),
        })
    }

    /// Settings persisted in local configuration.
    pub fn export(&self) -> Result<CipherConfig> {
        Ok(CipherConfig {
            kind: self.kind(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }
}
