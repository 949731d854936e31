//! Chat state and the causal message log.
//!
//! A chat is a roster of peers (each with its own publishing strategy), the
//! local peer's identity within that roster, and the hash of the last message
//! this side sent, which becomes the causal parent of the next send. The log maps
//! `"{timestamp}-{content_hash}"` keys to entries, so plain lexicographic key
//! order is the canonical reading order.
//!
//! Parent/last-sent relationships are plain content-hash strings, never
//! structural references.

use crate::error::{DeaddropError, Result};
use crate::strategy::{Strategy, StrategyConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Maximum message payload accepted for a send, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 250_000;

/// Default chat message TTL in seconds (7 days).
pub const CHAT_TTL_DEFAULT: i64 = 604_800;

/// Length in bytes of the random material behind chat and peer ids.
pub const CHAT_ID_LENGTH: usize = 12;

/// The plaintext message payload stored on the blob network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatData {
    /// Hash of the sender's previous message; empty for a root message.
    #[serde(default)]
    pub parent: String,
    /// Unix nanoseconds at send time.
    #[serde(default)]
    pub timestamp: i64,
    /// Content hashes of attached media.
    #[serde(default)]
    pub media: Vec<String>,
    /// The message text.
    #[serde(default)]
    pub message: String,
    /// Time to live in seconds.
    #[serde(default)]
    pub ttl: i64,
}

/// One entry in a chat log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLogEntry {
    /// Content hash of the message blob.
    #[serde(default)]
    pub id: String,
    /// Peer id of the sender.
    #[serde(default)]
    pub sender: String,
    /// Sender-reported timestamp (Unix nanoseconds).
    #[serde(default)]
    pub sent: i64,
    /// Local receipt timestamp, when the sender's is unavailable.
    #[serde(default)]
    pub received: i64,
    /// Time to live in seconds.
    #[serde(default)]
    pub ttl: i64,
    pub data: ChatData,
}

/// The local log of chat messages, keyed by `"{timestamp}-{content_hash}"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLog {
    entries: BTreeMap<String, ChatLogEntry>,
}

impl ChatLog {
    /// Adds an entry under its timestamp-and-hash key.
    ///
    /// One of `sent` or `received` must be set; `sent` wins when both are.
    pub fn add_entry(&mut self, entry: ChatLogEntry) -> Result<()> {
        if entry.sent == 0 && entry.received == 0 {
            return Err(DeaddropError::invalid_input("no valid timestamp found"));
        }
        let timestamp = if entry.sent != 0 {
            entry.sent
        } else {
            entry.received
        };
        let key = format!("{}-{}", timestamp, entry.id);
        self.entries.insert(key, entry);
        Ok(())
    }

    /// Whether `hash` already appears in any entry key.
    pub fn hash_in_log(&self, hash: &str) -> bool {
        !hash.is_empty() && self.entries.keys().any(|key| key.contains(hash))
    }

    /// Entries in ascending key order.
    pub fn sorted(&self) -> Vec<ChatLogEntry> {
        self.entries.values().cloned().collect()
    }

    /// The sorted entries rendered as JSON.
    pub fn sorted_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.sorted()).map_err(DeaddropError::serialization)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-chat settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    /// Maximum TTL in seconds; non-positive means the default applies.
    pub max_ttl: i64,
}

/// A peer within a chat.
#[derive(Debug)]
pub struct ChatPeer {
    pub id: String,
    pub alias: String,
    pub strategy: Strategy,
}

/// Storage-safe form of a [`ChatPeer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPeerConfig {
    pub id: String,
    pub alias: String,
    pub strategy: StrategyConfig,
}

impl ChatPeer {
    /// Storage-safe form of this peer.
    pub fn config(&self) -> Result<ChatPeerConfig> {
        Ok(ChatPeerConfig {
            id: self.id.clone(),
            alias: self.alias.clone(),
            strategy: self.strategy.export()?,
        })
    }

    /// Rebuilds a peer from its storage-safe form.
    pub fn from_config(config: ChatPeerConfig) -> Result<Self> {
        Ok(Self {
            id: config.id,
            alias: config.alias,
            strategy: Strategy::from_config(config.strategy)?,
        })
    }
}

/// Per-chat state: roster, own identity, causal cursor, settings.
#[derive(Debug, Default)]
pub struct Chat {
    pub id: String,
    /// This side's peer id; always present in `peers`.
    pub peer_id: String,
    /// Hash of the last message this side sent.
    pub last_sent: String,
    pub peers: HashMap<String, ChatPeer>,
    pub settings: ChatSettings,
}

/// Storage-safe form of a [`Chat`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub id: String,
    pub peer_id: String,
    pub last_sent: String,
    pub peers: HashMap<String, ChatPeerConfig>,
    pub settings: ChatSettings,
}

impl Chat {
    /// The effective message TTL for this chat.
    pub fn ttl(&self) -> i64 {
        if self.settings.max_ttl <= 0 {
            CHAT_TTL_DEFAULT
        } else {
            self.settings.max_ttl
        }
    }

    /// Storage-safe form of this chat.
    pub fn config(&self) -> Result<ChatConfig> {
        let mut peers = HashMap::new();
        for peer in self.peers.values() {
            peers.insert(peer.id.clone(), peer.config()?);
        }
        Ok(ChatConfig {
            id: self.id.clone(),
            peer_id: self.peer_id.clone(),
            last_sent: self.last_sent.clone(),
            peers,
            settings: self.settings,
        })
    }

    /// Rebuilds a chat from its storage-safe form.
    pub fn from_config(config: ChatConfig) -> Result<Self> {
        let mut peers = HashMap::new();
        for peer_config in config.peers.into_values() {
            let peer = ChatPeer::from_config(peer_config)?;
            peers.insert(peer.id.clone(), peer);
        }
        Ok(Self {
            id: config.id,
            peer_id: config.peer_id,
            last_sent: config.last_sent,
            peers,
            settings: config.settings,
        })
    }
}

/// Extracts the unique chat ids belonging to `profile_id` from a list of
/// storage key paths of the form `chats/{chat_id}/{profile_id}/...`.
pub fn unique_chat_ids_from_paths(paths: &[String], profile_id: &str) -> Vec<String> {
    let mut ids = BTreeSet::new();
    for path in paths {
        if !path.contains(profile_id) {
            continue;
        }
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() > 1 {
            ids.insert(segments[1].to_string());
        }
    }
    ids.into_iter().collect()
}
