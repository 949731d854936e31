//! Process-local loopback storage.
//!
//! A shared in-memory store keyed by name. Within one process, every
//! `MemoryStore::attach("x")` handle sees the same contents, which makes this
//! backend a loopback stand-in for the public infrastructure: writes with an
//! empty key are content-addressed (like the blob network) and also advertise
//! the value in a latest-value slot (like a rendezvous endpoint), so one named
//! store can play either role offline.
//!
//! Contents never leave the process: the configuration is exportable (so chat
//! state can be persisted and rebuilt) but never shareable with a peer.

use crate::crypto::multihash;
use crate::error::{DeaddropError, Result};
use crate::storage::{PeerStorage, StorageConfig, StorageKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tracing::trace;

type Shared = Arc<RwLock<Contents>>;

#[derive(Debug, Default)]
struct Contents {
    blobs: HashMap<String, Vec<u8>>,
    latest: Option<Vec<u8>>,
}

fn registry() -> &'static Mutex<HashMap<String, Shared>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Shared>>> = OnceLock::new();
    REGISTRY.get_or_init(Mutex::default)
}

/// A handle onto a named in-process store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    name: String,
    contents: Shared,
}

impl MemoryStore {
    /// Attaches to the store named `name`, creating it if needed.
    pub fn attach(name: &str) -> Self {
        let mut registry = registry().lock().unwrap_or_else(|e| e.into_inner());
        let contents = registry.entry(name.to_string()).or_default().clone();
        Self {
            name: name.to_string(),
            contents,
        }
    }

    /// Returns the latest advertised value (empty key) or the blob at `key`.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        let contents = self.read()?;
        if key.is_empty() {
            return contents
                .latest
                .clone()
                .ok_or_else(|| DeaddropError::storage("no value published"));
        }
        contents
            .blobs
            .get(key)
            .cloned()
            .ok_or_else(|| DeaddropError::storage(format!("key not found: {key}")))
    }

    /// Stores `value`.
    ///
    /// With an empty key the value is stored under its content multihash and
    /// advertised as the latest value; the hash is returned. With an explicit
    /// key the value is stored there and the key is returned.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<String> {
        let mut contents = self.write()?;
        let effective = if key.is_empty() {
            let hash = multihash::multihash(value);
            contents.blobs.insert(hash.clone(), value.to_vec());
            contents.latest = Some(value.to_vec());
            hash
        } else {
            contents.blobs.insert(key.to_string(), value.to_vec());
            key.to_string()
        };
        trace!(name = %self.name, key = %effective, bytes = value.len(), "memory set");
        Ok(effective)
    }

    /// Removes `key`; an empty key clears the latest-value slot.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut contents = self.write()?;
        if key.is_empty() {
            contents.latest = None;
        } else {
            contents.blobs.remove(key);
        }
        Ok(())
    }

    /// Returns all keys starting with `prefix`, in ascending order.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let contents = self.read()?;
        let mut keys: Vec<String> = contents
            .blobs
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Loopback contents never leave the process.
    pub fn share(&self) -> Result<PeerStorage> {
        Err(DeaddropError::NotShareable)
    }

    /// Settings persisted in local configuration: the attachment name.
    pub fn export(&self) -> Result<StorageConfig> {
        Ok(StorageConfig {
            kind: Some(StorageKind::Memory),
            name: Some(self.name.clone()),
            ..StorageConfig::default()
        })
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Contents>> {
        self.contents
            .read()
            .map_err(|_| DeaddropError::storage("memory store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Contents>> {
        self.contents
            .write()
            .map_err(|_| DeaddropError::storage("memory store lock poisoned"))
    }
}
