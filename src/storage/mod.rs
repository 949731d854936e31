//! Uniform storage backends.
//!
//! Every place deaddrop reads or writes (the private local database, the
//! public blob network, the signed-pointer rendezvous service, and the
//! in-process loopback) is modelled as a tagged [`Storage`] variant with one
//! surface: get, set, delete, list, close, share, export. `set` returns the
//! effective key the backend assigned, which for content-addressed backends is
//! the content hash.
//!
//! Backends that talk to multiple nodes route each operation through the
//! consensus rules in [`consensus`].

pub mod blob;
pub mod consensus;
pub mod local;
pub mod memory;
pub mod rendezvous;

pub use blob::{BlobStore, MAX_BLOB_READ};
pub use local::{LocalStore, GLOBAL_CONFIG_KEY};
pub use memory::MemoryStore;
pub use rendezvous::RendezvousStore;

use crate::error::{DeaddropError, Result};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Storage engine enumeration, stable across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Private local key-value store.
    Local,
    /// Signed-pointer rendezvous service.
    Hashmap,
    /// Content-addressed blob network.
    Ipfs,
    /// Process-local loopback store.
    Memory,
}

/// How results from multiple configured nodes are reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ConsensusRule {
    /// The first non-error response wins.
    #[default]
    FirstSuccess,
    /// At least two matching successful responses required.
    RedundantPair,
    /// A simple majority of matching successes required.
    Majority,
    /// All nodes must succeed with matching payloads.
    Unanimous,
}

impl ConsensusRule {
    /// Stable rule name, used in error reporting.
    pub fn name(&self) -> &'static str {
        match self {
            ConsensusRule::FirstSuccess => "first-success",
            ConsensusRule::RedundantPair => "redundant-pair consensus",
            ConsensusRule::Majority => "majority consensus",
            ConsensusRule::Unanimous => "unanimous consensus",
        }
    }
}

impl From<ConsensusRule> for u8 {
    fn from(rule: ConsensusRule) -> Self {
        match rule {
            ConsensusRule::FirstSuccess => 0,
            ConsensusRule::RedundantPair => 1,
            ConsensusRule::Majority => 2,
            ConsensusRule::Unanimous => 3,
        }
    }
}

impl TryFrom<u8> for ConsensusRule {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ConsensusRule::FirstSuccess),
            1 => Ok(ConsensusRule::RedundantPair),
            2 => Ok(ConsensusRule::Majority),
            3 => Ok(ConsensusRule::Unanimous),
            other => Err(format!("unknown consensus rule {other}")),
        }
    }
}

/// A backend endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub url: String,
    /// Extra HTTP headers sent with every request to this node.
    #[serde(default)]
    pub header: HashMap<String, String>,
    /// Per-node settings; `query_type = "api"` selects API mode for blob
    /// nodes, anything else means gateway mode.
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

impl Node {
    /// Creates a node with just a URL.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Signature algorithm enumeration for rendezvous identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SignatureKind {
    Ed25519,
}

impl From<SignatureKind> for u8 {
    fn from(kind: SignatureKind) -> Self {
        match kind {
            SignatureKind::Ed25519 => 0,
        }
    }
}

impl TryFrom<u8> for SignatureKind {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(SignatureKind::Ed25519),
            other => Err(format!("unknown signature type {other}")),
        }
    }
}

/// A signing identity used for rendezvous writes. Never shared with peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerConfig {
    pub kind: SignatureKind,
    /// Ed25519 seed bytes.
    pub private_key: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl SignerConfig {
    /// Generates a fresh ed25519 signing identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            kind: SignatureKind::Ed25519,
            private_key: signing_key.to_bytes().to_vec(),
            public_key: signing_key.verifying_key().as_bytes().to_vec(),
        }
    }

    /// Reconstructs the signing key from the stored seed.
    pub fn signing_key(&self) -> Result<SigningKey> {
        let seed: [u8; 32] = self
            .private_key
            .as_slice()
            .try_into()
            .map_err(|_| DeaddropError::config("signing key seed must be 32 bytes"))?;
        Ok(SigningKey::from_bytes(&seed))
    }
}

/// Aggregate settings shared with a peer during handshake.
///
/// Only read-side settings travel: a peer learns where to fetch from, never
/// how to write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStorage {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read_nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub write_nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "is_default_rule")]
    pub read_rule: ConsensusRule,
    #[serde(default, skip_serializing_if = "is_default_rule")]
    pub write_rule: ConsensusRule,
}

fn is_default_rule(rule: &ConsensusRule) -> bool {
    *rule == ConsensusRule::FirstSuccess
}

/// Full settings persisted in local configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub kind: Option<StorageKind>,
    pub read_nodes: Vec<Node>,
    pub write_nodes: Vec<Node>,
    pub read_rule: ConsensusRule,
    pub write_rule: ConsensusRule,
    pub signers: Vec<SignerConfig>,
    /// Rendezvous freshness high-water mark (Unix nanoseconds).
    pub latest: i64,
    /// Loopback attachment name.
    pub name: Option<String>,
}

/// A configured storage backend, dispatching to its variant.
#[derive(Debug)]
pub enum Storage {
    Local(LocalStore),
    Blob(BlobStore),
    Rendezvous(RendezvousStore),
    Memory(MemoryStore),
}

impl Storage {
    /// Rebuilds a backend from settings shared by a peer.
    pub fn from_peer(config: PeerStorage) -> Result<Self> {
        match config.kind {
            StorageKind::Ipfs => Ok(Storage::Blob(BlobStore::new(
                config.read_nodes,
                config.write_nodes,
                config.read_rule,
                config.write_rule,
            )?)),
            StorageKind::Hashmap => Ok(Storage::Rendezvous(RendezvousStore::new(
                config.read_nodes,
                config.write_nodes,
                Vec::new(),
                config.read_rule,
                config.write_rule,
                0,
            )?)),
            StorageKind::Local | StorageKind::Memory => Err(DeaddropError::invalid_input(
                "invalid storage engine type for peer config",
            )),
        }
    }

    /// Rebuilds a backend from locally persisted settings.
    pub fn from_config(config: StorageConfig) -> Result<Self> {
        match config.kind {
            Some(StorageKind::Ipfs) => Ok(Storage::Blob(BlobStore::new(
                config.read_nodes,
                config.write_nodes,
                config.read_rule,
                config.write_rule,
            )?)),
            Some(StorageKind::Hashmap) => Ok(Storage::Rendezvous(RendezvousStore::new(
                config.read_nodes,
                config.write_nodes,
                config.signers,
                config.read_rule,
                config.write_rule,
                config.latest,
            )?)),
            Some(StorageKind::Memory) => {
                let name = config
                    .name
                    .ok_or_else(|| DeaddropError::config("memory storage requires a name"))?;
                Ok(Storage::Memory(MemoryStore::attach(&name)))
            }
            Some(StorageKind::Local) | None => {
                Err(DeaddropError::invalid_input("invalid storage engine type"))
            }
        }
    }

    /// Returns the backend variant tag.
    pub fn kind(&self) -> StorageKind {
        match self {
            Storage::Local(_) => StorageKind::Local,
            Storage::Blob(_) => StorageKind::Ipfs,
            Storage::Rendezvous(_) => StorageKind::Hashmap,
            Storage::Memory(_) => StorageKind::Memory,
        }
    }

    pub async fn get(&mut self, key: &str) -> Result<Vec<u8>> {
        match self {
            Storage::Local(s) => s.get(key),
            Storage::Blob(s) => s.get(key).await,
            Storage::Rendezvous(s) => s.get(key).await,
            Storage::Memory(s) => s.get(key),
        }
    }

    pub async fn set(&mut self, key: &str, value: &[u8]) -> Result<String> {
        match self {
            Storage::Local(s) => s.set(key, value),
            Storage::Blob(s) => s.set(key, value).await,
            Storage::Rendezvous(s) => s.set(key, value).await,
            Storage::Memory(s) => s.set(key, value),
        }
    }

    pub async fn delete(&mut self, key: &str) -> Result<()> {
        match self {
            Storage::Local(s) => s.delete(key),
            Storage::Blob(s) => s.delete(key),
            Storage::Rendezvous(s) => s.delete(key),
            Storage::Memory(s) => s.delete(key),
        }
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        match self {
            Storage::Local(s) => s.list(prefix),
            Storage::Blob(s) => s.list(prefix),
            Storage::Rendezvous(s) => s.list(prefix),
            Storage::Memory(s) => s.list(prefix),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match self {
            Storage::Local(s) => s.close(),
            Storage::Blob(_) | Storage::Rendezvous(_) | Storage::Memory(_) => Ok(()),
        }
    }

    /// Settings shared with a peer during handshake.
    pub fn share(&self) -> Result<PeerStorage> {
        match self {
            Storage::Local(s) => s.share(),
            Storage::Blob(s) => s.share(),
            Storage::Rendezvous(s) => s.share(),
            Storage::Memory(s) => s.share(),
        }
    }

    /// Settings persisted in local configuration.
    pub fn export(&self) -> Result<StorageConfig> {
        match self {
            Storage::Local(s) => s.export(),
            Storage::Blob(s) => s.export(),
            Storage::Rendezvous(s) => s.export(),
            Storage::Memory(s) => s.export(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consensus_rule_wire_values() {
        assert_eq!(u8::from(ConsensusRule::FirstSuccess), 0);
        assert_eq!(u8::from(ConsensusRule::Unanimous), 3);
        assert_eq!(
            ConsensusRule::try_from(2u8).unwrap(),
            ConsensusRule::Majority
        );
        assert!(ConsensusRule::try_from(9u8).is_err());
    }

    #[test]
    fn test_storage_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(StorageKind::Hashmap).unwrap(),
            serde_json::json!("hashmap")
        );
        assert_eq!(
            serde_json::to_value(StorageKind::Ipfs).unwrap(),
            serde_json::json!("ipfs")
        );
    }

    #[test]
    fn test_signer_round_trip() {
        let signer = SignerConfig::generate();
        let key = signer.signing_key().unwrap();
        assert_eq!(
            key.verifying_key().as_bytes().as_slice(),
            signer.public_key.as_slice()
        );
    }

    #[test]
    fn test_from_peer_rejects_private_engines() {
        let config = PeerStorage {
            kind: StorageKind::Local,
            read_nodes: vec![],
            write_nodes: vec![],
            read_rule: ConsensusRule::FirstSuccess,
            write_rule: ConsensusRule::FirstSuccess,
        };
        assert!(Storage::from_peer(config).is_err());
    }

    #[test]
    fn test_peer_storage_json_shape() {
        let config = PeerStorage {
            kind: StorageKind::Ipfs,
            read_nodes: vec![Node::with_url("https://ipfs.example.com")],
            write_nodes: vec![],
            read_rule: ConsensusRule::FirstSuccess,
            write_rule: ConsensusRule::FirstSuccess,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["type"], "ipfs");
        assert_eq!(json["read_nodes"][0]["url"], "https://ipfs.example.com");
        assert!(json.get("write_nodes").is_none());
        assert!(json.get("read_rule").is_none());
    }
}
