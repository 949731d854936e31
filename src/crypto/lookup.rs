//! One-time lookup tables.
//!
//! A lookup table is the bridge between rendezvous pointers and message
//! blobs: a finite map of one-time `tag → key` pairs derived per chat, per
//! peer. The sender consumes entries to label and encrypt what it publishes;
//! every other peer derives the same table from the shared pepper and the
//! sender's entropy, and consumes the matching entries on retrieval.
//!
//! Entries are popped on use and never reissued. Exhaustion is terminal for
//! that (chat, peer) pairing.

use crate::crypto::{derive_stream, CipherKind, KEY_LENGTH};
use crate::error::{DeaddropError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Length in bytes of a lookup tag before base64 encoding.
pub const TAG_LENGTH: usize = 24;

/// Default entry count for newly derived tables.
pub const DEFAULT_COUNT: usize = 10000;

/// Length in bytes of a pepper.
pub const PEPPER_LENGTH: usize = 64;

/// Length in bytes of a peer's handshake entropy.
pub const ENTROPY_LENGTH: usize = 96;

/// A finite map of one-time (tag → key) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LookupTable {
    entries: BTreeMap<String, Vec<u8>>,
}

impl LookupTable {
    /// Derives a table from a chat-wide pepper and one peer's entropy.
    ///
    /// The entropy is split into three 32-byte slices `e1, e2, e3`; two
    /// Argon2id streams then yield the tags (24 bytes each, from `pepper`
    /// keyed by `e2`) and the keys (from `e1` keyed by `e3`). Entries are
    /// taken from slots `1..count`: the zeroth slot is intentionally unused,
    /// and a `count`-entry request yields `count - 1` usable pairs. Peers
    /// deriving from the same inputs depend on that exact iteration, so it is
    /// part of the wire contract.
    pub fn generate(
        pepper: &[u8; PEPPER_LENGTH],
        entropy: &[u8; ENTROPY_LENGTH],
        kind: CipherKind,
        count: usize,
    ) -> Result<Self> {
        if count < 1 {
            return Err(DeaddropError::invalid_input(
                "count must be greater than or equal to 1",
            ));
        }
        let key_length = match kind {
            CipherKind::SecretBox => KEY_LENGTH,
        };

        let (e1, rest) = entropy.split_at(32);
        let (e2, e3) = rest.split_at(32);

        let mut tag_stream = vec![0u8; count * TAG_LENGTH];
        derive_stream(pepper, e2, &mut tag_stream)?;
        let mut key_stream = vec![0u8; count * key_length];
        derive_stream(e1, e3, &mut key_stream)?;

        let mut entries = BTreeMap::new();
        for i in 1..count {
            let tag = BASE64.encode(&tag_stream[(i - 1) * TAG_LENGTH..i * TAG_LENGTH]);
            let key = key_stream[(i - 1) * key_length..i * key_length].to_vec();
            entries.insert(tag, key);
        }
        Ok(Self { entries })
    }

    /// Removes and returns the key for `tag`, if present.
    pub fn pop_by_tag(&mut self, tag: &str) -> Option<Vec<u8>> {
        self.entries.remove(tag)
    }

    /// Returns the key for `tag` without consuming it.
    pub fn get(&self, tag: &str) -> Option<&[u8]> {
        self.entries.get(tag).map(Vec::as_slice)
    }

    /// Removes and returns a uniformly random entry.
    pub fn pop_random(&mut self) -> Result<(String, Vec<u8>)> {
        if self.entries.is_empty() {
            return Err(DeaddropError::LookupExhausted);
        }
        let index = OsRng.gen_range(0..self.entries.len());
        let tag = self
            .entries
            .keys()
            .nth(index)
            .cloned()
            .ok_or(DeaddropError::LookupExhausted)?;
        let key = self
            .entries
            .remove(&tag)
            .ok_or(DeaddropError::LookupExhausted)?;
        Ok((tag, key))
    }

    /// Number of remaining entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is exhausted.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_inputs() -> ([u8; PEPPER_LENGTH], [u8; ENTROPY_LENGTH]) {
        let mut pepper = [0u8; PEPPER_LENGTH];
        let mut entropy = [0u8; ENTROPY_LENGTH];
        for (i, b) in pepper.iter_mut().enumerate() {
            *b = i as u8;
        }
        for (i, b) in entropy.iter_mut().enumerate() {
            *b = (255 - i) as u8;
        }
        (pepper, entropy)
    }

    #[test]
    fn test_generate_skips_zeroth_slot() {
        let (pepper, entropy) = test_inputs();
        let table = LookupTable::generate(&pepper, &entropy, CipherKind::SecretBox, 10).unwrap();
        assert_eq!(table.len(), 9);
    }

    #[test]
    fn test_generate_full_scale_tags_unique() {
        let (pepper, entropy) = test_inputs();
        let table =
            LookupTable::generate(&pepper, &entropy, CipherKind::SecretBox, DEFAULT_COUNT).unwrap();
        // The map deduplicates, so a full count proves every tag is distinct.
        assert_eq!(table.len(), DEFAULT_COUNT - 1);
    }

    #[test]
    fn test_generate_is_deterministic() {
        let (pepper, entropy) = test_inputs();
        let a = LookupTable::generate(&pepper, &entropy, CipherKind::SecretBox, 32).unwrap();
        let b = LookupTable::generate(&pepper, &entropy, CipherKind::SecretBox, 32).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_generate_varies_with_entropy() {
        let (pepper, entropy) = test_inputs();
        let mut other = entropy;
        other[0] ^= 0xff;
        let a = LookupTable::generate(&pepper, &entropy, CipherKind::SecretBox, 32).unwrap();
        let b = LookupTable::generate(&pepper, &other, CipherKind::SecretBox, 32).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_zero_count_rejected() {
        let (pepper, entropy) = test_inputs();
        assert!(LookupTable::generate(&pepper, &entropy, CipherKind::SecretBox, 0).is_err());
    }

    #[test]
    fn test_count_one_yields_empty_table() {
        let (pepper, entropy) = test_inputs();
        let mut table = LookupTable::generate(&pepper, &entropy, CipherKind::SecretBox, 1).unwrap();
        assert!(table.is_empty());
        assert!(matches!(
            table.pop_random(),
            Err(DeaddropError::LookupExhausted)
        ));
    }

    #[test]
    fn test_pop_by_tag_consumes() {
        let (pepper, entropy) = test_inputs();
        let mut table =
            LookupTable::generate(&pepper, &entropy, CipherKind::SecretBox, 16).unwrap();
        let (tag, key) = table.pop_random().unwrap();
        assert_eq!(key.len(), KEY_LENGTH);
        assert!(table.pop_by_tag(&tag).is_none());

        let remaining: Vec<String> = table.entries.keys().cloned().collect();
        let target = &remaining[0];
        assert!(table.pop_by_tag(target).is_some());
        assert!(table.pop_by_tag(target).is_none());
    }

    #[test]
    fn test_pop_random_drains_to_exhaustion() {
        let (pepper, entropy) = test_inputs();
        let mut table = LookupTable::generate(&pepper, &entropy, CipherKind::SecretBox, 8).unwrap();
        let mut seen = std::collections::HashSet::new();
        while let Ok((tag, _)) = table.pop_random() {
            assert!(seen.insert(tag), "tag reissued");
        }
        assert!(table.is_empty());
        assert_eq!(seen.len(), 7);
        assert!(matches!(
            table.pop_random(),
            Err(DeaddropError::LookupExhausted)
        ));
    }

    #[test]
    fn test_get_is_non_destructive() {
        let (pepper, entropy) = test_inputs();
        let table = LookupTable::generate(&pepper, &entropy, CipherKind::SecretBox, 8).unwrap();
        let tag = table.entries.keys().next().cloned().unwrap();
        assert!(table.get(&tag).is_some());
        assert!(table.get(&tag).is_some());
        assert_eq!(table.len(), 7);
    }

    #[test]
    fn test_serde_round_trip() {
        let (pepper, entropy) = test_inputs();
        let table = LookupTable::generate(&pepper, &entropy, CipherKind::SecretBox, 8).unwrap();
        let bytes = bincode::serialize(&table).unwrap();
        let restored: LookupTable = bincode::deserialize(&bytes).unwrap();
        assert_eq!(table, restored);
    }
}
