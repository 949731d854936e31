//! Private local key-value storage.
//!
//! The session's own persistence: profiles, chat configs, lookup tables and
//! chat logs all land here (already encrypted by the session layer). Backed by
//! RocksDB, whose key ordering gives the ascending prefix scans the key layout
//! relies on.
//!
//! This store is private by definition: sharing or exporting its
//! configuration is refused.

use crate::config::GlobalConfig;
use crate::error::{DeaddropError, Result};
use crate::storage::{PeerStorage, StorageConfig};
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Key under which the global configuration blob lives.
pub const GLOBAL_CONFIG_KEY: &str = "global-config";

/// Default database file path.
pub const DEFAULT_FILE_PATH: &str = "deaddrop.db";

/// RocksDB-backed private storage.
pub struct LocalStore {
    db: DB,
    path: PathBuf,
}

impl LocalStore {
    /// Opens (creating if necessary) the store at `path`.
    ///
    /// On first open, seeds [`GLOBAL_CONFIG_KEY`] with `config`.
    pub fn open(path: impl AsRef<Path>, config: &GlobalConfig) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_open_files(128);
        opts.set_keep_log_file_num(2);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path.as_ref())
            .map_err(|e| DeaddropError::storage(format!("failed to open local store: {e}")))?;
        info!(path = %path.as_ref().display(), "opened local store");

        let store = Self {
            db,
            path: path.as_ref().to_path_buf(),
        };
        if store.get_opt(GLOBAL_CONFIG_KEY)?.is_none() {
            debug!("seeding global configuration");
            store.put_raw(GLOBAL_CONFIG_KEY, &config.to_json()?)?;
        }
        Ok(store)
    }

    /// Returns the value at `key`, or an error if absent.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.get_opt(key)?
            .ok_or_else(|| DeaddropError::storage(format!("key not found: {key}")))
    }

    /// Returns the value at `key`, if present.
    pub fn get_opt(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .db
            .get(key.as_bytes())
            .map_err(|e| DeaddropError::storage(format!("failed to read: {e}")))?;
        trace!(key, found = value.is_some(), "local get");
        Ok(value)
    }

    /// Stores `value` at `key`, treating create and update the same.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<String> {
        self.put_raw(key, value)?;
        Ok(key.to_string())
    }

    fn put_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        trace!(key, value_bytes = value.len(), "local set");
        self.db
            .put(key.as_bytes(), value)
            .map_err(|e| DeaddropError::storage(format!("failed to write: {e}")))
    }

    /// Deletes `key` if it exists.
    pub fn delete(&self, key: &str) -> Result<()> {
        trace!(key, "local delete");
        self.db
            .delete(key.as_bytes())
            .map_err(|e| DeaddropError::storage(format!("failed to delete: {e}")))
    }

    /// Returns all keys starting with `prefix`, in ascending order.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let iter = self.db.iterator(IteratorMode::From(
            prefix.as_bytes(),
            Direction::Forward,
        ));
        for item in iter {
            let (key, _) =
                item.map_err(|e| DeaddropError::storage(format!("iterator error: {e}")))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        trace!(prefix, count = keys.len(), "local list");
        Ok(keys)
    }

    /// Flushes outstanding writes.
    pub fn close(&mut self) -> Result<()> {
        debug!(path = %self.path.display(), "closing local store");
        self.db
            .flush()
            .map_err(|e| DeaddropError::storage(format!("failed to flush: {e}")))
    }

    /// Private storage never shares its configuration.
    pub fn share(&self) -> Result<PeerStorage> {
        Err(DeaddropError::NotShareable)
    }

    /// Private storage never exports its configuration.
    pub fn export(&self) -> Result<StorageConfig> {
        Err(DeaddropError::NotShareable)
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (LocalStore, TempDir) {
        let temp = TempDir::new().expect("temp dir");
        let store =
            LocalStore::open(temp.path().join("db"), &GlobalConfig::default()).expect("open");
        (store, temp)
    }

    #[test]
    fn test_set_get_delete() {
        let (store, _temp) = open_store();
        store.set("alpha", b"one").unwrap();
        assert_eq!(store.get("alpha").unwrap(), b"one");
        store.set("alpha", b"two").unwrap();
        assert_eq!(store.get("alpha").unwrap(), b"two");
        store.delete("alpha").unwrap();
        assert!(store.get("alpha").is_err());
    }

    #[test]
    fn test_get_missing_key_errors() {
        let (store, _temp) = open_store();
        assert!(store.get("absent").is_err());
        assert!(store.get_opt("absent").unwrap().is_none());
    }

    #[test]
    fn test_list_is_prefix_filtered_and_ascending() {
        let (store, _temp) = open_store();
        store.set("chats/b/x", b"").unwrap();
        store.set("chats/a/x", b"").unwrap();
        store.set("chats/a/y", b"").unwrap();
        store.set("profiles/p", b"").unwrap();

        let keys = store.list("chats/").unwrap();
        assert_eq!(keys, vec!["chats/a/x", "chats/a/y", "chats/b/x"]);
        assert_eq!(store.list("nothing/").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_global_config_seeded_once() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("db");
        {
            let store = LocalStore::open(&path, &GlobalConfig::default()).unwrap();
            let seeded = GlobalConfig::from_json(&store.get(GLOBAL_CONFIG_KEY).unwrap()).unwrap();
            assert_eq!(seeded, GlobalConfig::default());
            // Simulate a later settings change.
            let mut changed = seeded;
            changed.failed_login_attempts = 3;
            store
                .set(GLOBAL_CONFIG_KEY, &changed.to_json().unwrap())
                .unwrap();
        }
        // Reopen must not clobber the stored value.
        let store = LocalStore::open(&path, &GlobalConfig::default()).unwrap();
        let kept = GlobalConfig::from_json(&store.get(GLOBAL_CONFIG_KEY).unwrap()).unwrap();
        assert_eq!(kept.failed_login_attempts, 3);
    }

    #[test]
    fn test_share_and_export_refused() {
        let (store, _temp) = open_store();
        assert!(matches!(store.share(), Err(DeaddropError::NotShareable)));
        assert!(matches!(store.export(), Err(DeaddropError::NotShareable)));
    }
}
