//! Publishing strategies.
//!
//! A strategy is the triple a peer uses to publish: the rendezvous backend
//! its pointers go to, the blob backend its message bodies go to, and the
//! cipher sealing both. Exactly one of each per peer within a chat.
//!
//! A strategy has two serialized forms: the **peer config** (JSON, read-side
//! only) transmitted during handshake so others can follow the peer, and the
//! **local config** persisted inside chat state so the strategy can be
//! rebuilt across restarts.

use crate::crypto::{Cipher, CipherConfig, PeerCipher};
use crate::error::{DeaddropError, Result};
use crate::storage::{
    BlobStore, ConsensusRule, Node, PeerStorage, RendezvousStore, Storage, StorageConfig,
};
use serde::{Deserialize, Serialize};

/// Default blob network endpoint.
pub const DEFAULT_BLOB_URL: &str = "https://ipfs.infura.io:5001/";

/// The (rendezvous, blob store, cipher) triple a peer publishes with.
#[derive(Debug)]
pub struct Strategy {
    pub rendezvous: Storage,
    pub storage: Storage,
    pub cipher: Cipher,
}

/// Strategy settings shared with a peer during handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStrategy {
    pub rendezvous: PeerStorage,
    pub storage: PeerStorage,
    pub cipher: PeerCipher,
}

/// Strategy settings persisted in local configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub rendezvous: StorageConfig,
    pub storage: StorageConfig,
    pub cipher: CipherConfig,
}

impl Strategy {
    /// A default publishing strategy: a fresh rendezvous identity against the
    /// default pointer service, the default blob gateway in API mode, and the
    /// default cipher.
    pub fn new_default() -> Result<Self> {
        let mut blob_node = Node::with_url(DEFAULT_BLOB_URL);
        blob_node
            .settings
            .insert("query_type".to_string(), "api".to_string());
        Ok(Self {
            rendezvous: Storage::Rendezvous(RendezvousStore::new_default()?),
            storage: Storage::Blob(BlobStore::new(
                Vec::new(),
                vec![blob_node],
                ConsensusRule::default(),
                ConsensusRule::default(),
            )?),
            cipher: Cipher::default_cipher(),
        })
    }

    /// Settings shared with a peer during handshake.
    pub fn share(&self) -> Result<PeerStrategy> {
        Ok(PeerStrategy {
            rendezvous: self.rendezvous.share()?,
            storage: self.storage.share()?,
            cipher: self.cipher.share()?,
        })
    }

    /// Renders the shareable settings as JSON bytes.
    pub fn share_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.share()?).map_err(DeaddropError::serialization)
    }

    /// Settings persisted in local configuration.
    pub fn export(&self) -> Result<StrategyConfig> {
        Ok(StrategyConfig {
            rendezvous: self.rendezvous.export()?,
            storage: self.storage.export()?,
            cipher: self.cipher.export()?,
        })
    }

    /// Rebuilds a strategy from settings shared by a peer.
    pub fn from_peer(config: PeerStrategy) -> Result<Self> {
        Ok(Self {
            rendezvous: Storage::from_peer(config.rendezvous)?,
            storage: Storage::from_peer(config.storage)?,
            cipher: Cipher::from_peer(&config.cipher)?,
        })
    }

    /// Rebuilds a strategy from locally persisted settings.
    pub fn from_config(config: StrategyConfig) -> Result<Self> {
        Ok(Self {
            rendezvous: Storage::from_config(config.rendezvous)?,
            storage: Storage::from_config(config.storage)?,
            cipher: Cipher::from_config(&config.cipher)?,
        })
    }
}
