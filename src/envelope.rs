//! Signed rendezvous envelopes.
//!
//! A rendezvous endpoint serves exactly one value: the latest envelope
//! published by its owner. The envelope binds the advertised bytes to a
//! timestamp under an ed25519 signature, and carries the public key so a
//! reader can both verify the signature and check that the key hashes to the
//! endpoint's multihash.
//!
//! Wire format is JSON with base64 fields:
//!
//! ```json
//! {"message": "...", "timestamp": 1234, "signature": "...", "public_key": "..."}
//! ```

use crate::error::{DeaddropError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix time in nanoseconds.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

/// A signed rendezvous payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
    /// Advertised bytes, base64 encoded.
    message: String,
    /// Unix nanoseconds at sealing time.
    pub timestamp: i64,
    /// Ed25519 signature over `message || timestamp`, base64 encoded.
    signature: String,
    /// Ed25519 public key of the sealer, base64 encoded.
    public_key: String,
}

impl SignedEnvelope {
    /// Seals `message` at `timestamp` under `signing_key`.
    pub fn seal(message: &[u8], timestamp: i64, signing_key: &SigningKey) -> Self {
        let signature = signing_key.sign(&signing_input(message, timestamp));
        Self {
            message: BASE64.encode(message),
            timestamp,
            signature: BASE64.encode(signature.to_bytes()),
            public_key: BASE64.encode(signing_key.verifying_key().as_bytes()),
        }
    }

    /// Parses an envelope from its JSON wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(DeaddropError::serialization)
    }

    /// Renders the envelope to its JSON wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(DeaddropError::serialization)
    }

    /// Verifies the signature over the message and timestamp.
    pub fn verify(&self) -> Result<()> {
        let key = VerifyingKey::from_bytes(&self.public_key_bytes()?)
            .map_err(|_| DeaddropError::SignatureInvalid)?;
        let sig_bytes = BASE64
            .decode(&self.signature)
            .map_err(|_| DeaddropError::SignatureInvalid)?;
        let sig_bytes: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| DeaddropError::SignatureInvalid)?;
        let signature = Signature::from_bytes(&sig_bytes);
        let message = self.message_bytes()?;
        key.verify(&signing_input(&message, self.timestamp), &signature)
            .map_err(|_| DeaddropError::SignatureInvalid)
    }

    /// The advertised bytes.
    pub fn message_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.message)
            .map_err(|_| DeaddropError::invalid_input("envelope message is not valid base64"))
    }

    /// The sealer's public key bytes.
    pub fn public_key_bytes(&self) -> Result<[u8; 32]> {
        let bytes = BASE64
            .decode(&self.public_key)
            .map_err(|_| DeaddropError::invalid_input("envelope public key is not valid base64"))?;
        bytes
            .try_into()
            .map_err(|_| DeaddropError::invalid_input("envelope public key must be 32 bytes"))
    }
}

/// Bytes covered by the envelope signature.
fn signing_input(message: &[u8], timestamp: i64) -> Vec<u8> {
    let mut input = Vec::with_capacity(message.len() + 8);
    input.extend_from_slice(message);
    input.extend_from_slice(&timestamp.to_le_bytes());
    input
}
