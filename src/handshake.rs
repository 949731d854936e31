//! Handshake negotiators and pepper derivation.
//!
//! The interactive handshake exchange happens outside this crate; what enters
//! here is its outcome: one **negotiator** per participant, carrying an
//! alias, 96 bytes of entropy, and the strategy the participant will publish
//! with. Chat creation sorts negotiators canonically by entropy and binds
//! them together with a chat-wide **pepper**: all peers holding the same set
//! derive the same pepper, and with it, the same lookup tables.

use crate::crypto::lookup::{ENTROPY_LENGTH, PEPPER_LENGTH};
use crate::crypto::gen_rand_bytes;
use crate::error::{DeaddropError, Result};
use crate::strategy::{PeerStrategy, Strategy};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};

/// A handshake participant's published position.
#[derive(Debug)]
pub struct Negotiator {
    pub alias: String,
    pub entropy: [u8; ENTROPY_LENGTH],
    pub strategy: Strategy,
}

/// Shareable form of a [`Negotiator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiatorConfig {
    #[serde(default)]
    pub alias: String,
    /// 96 bytes, base64 encoded.
    pub entropy: String,
    #[serde(flatten)]
    pub strategy: PeerStrategy,
}

impl Negotiator {
    /// A fresh local position: random entropy and a default strategy.
    pub fn new_default(alias: impl Into<String>) -> Result<Self> {
        let mut entropy = [0u8; ENTROPY_LENGTH];
        entropy.copy_from_slice(&gen_rand_bytes(ENTROPY_LENGTH));
        Ok(Self {
            alias: alias.into(),
            entropy,
            strategy: Strategy::new_default()?,
        })
    }

    /// The JSON-shareable form of this position.
    pub fn share(&self) -> Result<NegotiatorConfig> {
        Ok(NegotiatorConfig {
            alias: self.alias.clone(),
            entropy: BASE64.encode(self.entropy),
            strategy: self.strategy.share()?,
        })
    }

    /// Renders the shareable form as JSON bytes.
    pub fn share_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.share()?).map_err(DeaddropError::serialization)
    }

    /// Rebuilds a peer's position from its shared JSON bytes.
    pub fn from_shared(bytes: &[u8]) -> Result<Self> {
        let config: NegotiatorConfig =
            serde_json::from_slice(bytes).map_err(DeaddropError::serialization)?;
        let entropy_bytes = BASE64
            .decode(&config.entropy)
            .map_err(|_| DeaddropError::invalid_input("negotiator entropy is not valid base64"))?;
        let entropy: [u8; ENTROPY_LENGTH] = entropy_bytes
            .try_into()
            .map_err(|_| DeaddropError::invalid_input("negotiator entropy must be 96 bytes"))?;
        Ok(Self {
            alias: config.alias,
            entropy,
            strategy: Strategy::from_peer(config.strategy)?,
        })
    }
}

/// Sorts negotiators into their canonical order (lexicographic on entropy).
pub fn sort_negotiators(mut negotiators: Vec<Negotiator>) -> Vec<Negotiator> {
    negotiators.sort_by(|a, b| a.entropy.cmp(&b.entropy));
    negotiators
}

/// Derives the chat-wide pepper from all negotiators' entropies.
///
/// Entropies are concatenated in canonical (sorted) order, so every peer
/// holding the same set arrives at the same 64 bytes regardless of the order
/// positions were exchanged in.
pub fn generate_pepper(negotiators: &[Negotiator]) -> [u8; PEPPER_LENGTH] {
    let mut entropies: Vec<&[u8; ENTROPY_LENGTH]> =
        negotiators.iter().map(|n| &n.entropy).collect();
    entropies.sort();

    let mut hasher = Blake2b512::new();
    for entropy in entropies {
        hasher.update(entropy);
    }
    hasher.finalize().into()
}
