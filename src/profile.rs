//! Profile identities.
//!
//! A profile is a local identity: an opaque id, an alias, and a 32-byte
//! master key derived from the password with the profile id as salt. The
//! persisted record holds only the id and alias, encrypted under the master
//! key; the key itself is never stored. Login re-derives candidate keys and
//! lets authenticated decryption decide which profile (if any) matches.

use crate::crypto::{derive_key, gen_rand_hex_id, KEY_LENGTH};
use crate::error::{DeaddropError, Result};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Storage prefix for profile records.
pub const PROFILE_KEY_PREFIX: &str = "profiles/";

/// Length in bytes of the random material behind a profile id.
pub const PROFILE_ID_LENGTH: usize = 12;

/// A logged-in identity. The master key is wiped on drop.
#[derive(Debug)]
pub struct Profile {
    pub id: String,
    pub alias: String,
    pub key: [u8; KEY_LENGTH],
}

impl Drop for Profile {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// The persisted (encrypted) portion of a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: String,
    pub alias: String,
}

impl Profile {
    /// Creates a fresh profile for `password`.
    pub fn create(password: &str, alias: &str) -> Result<Self> {
        let id = gen_rand_hex_id(PROFILE_ID_LENGTH);
        let key = derive_master_key(password, &id)?;
        Ok(Self {
            id,
            alias: alias.to_string(),
            key,
        })
    }

    /// Reassembles a profile from its decrypted record and derived key.
    pub fn from_record(record: ProfileRecord, key: [u8; KEY_LENGTH]) -> Self {
        Self {
            id: record.id,
            alias: record.alias,
            key,
        }
    }

    /// The persisted portion of this profile.
    pub fn record(&self) -> ProfileRecord {
        ProfileRecord {
            id: self.id.clone(),
            alias: self.alias.clone(),
        }
    }

    /// The storage key this profile's record lives under.
    pub fn storage_key(&self) -> String {
        format!("{PROFILE_KEY_PREFIX}{}", self.id)
    }
}

/// Derives the master key for `password` and a profile id.
pub fn derive_master_key(password: &str, profile_id: &str) -> Result<[u8; KEY_LENGTH]> {
    derive_key(password.as_bytes(), profile_id.as_bytes())
}

/// Extracts the profile id from a storage key path.
pub fn id_from_path(path: &str) -> Result<&str> {
    let id = path
        .strip_prefix(PROFILE_KEY_PREFIX)
        .unwrap_or(path)
        .rsplit('/')
        .next()
        .unwrap_or_default();
    if id.is_empty() {
        return Err(DeaddropError::invalid_input(format!(
            "no profile id in path: {path}"
        )));
    }
    Ok(id)
}
