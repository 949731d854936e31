//! Cryptographic primitives for deaddrop.
//!
//! Everything the protocol stores or advertises is protected by the building
//! blocks in this module:
//!
//! - **XSalsa20-Poly1305** chunked authenticated encryption for all stored
//!   values ([`cipher`])
//! - **Argon2id** for password keys and one-time lookup streams
//! - **BLAKE2b-256** base58 multihashes as content addresses ([`multihash`])
//! - the one-time (tag → key) lookup table bridging rendezvous pointers and
//!   message blobs ([`lookup`])

pub mod cipher;
pub mod lookup;
pub mod multihash;

pub use cipher::{Cipher, CipherConfig, CipherKind, NoncePolicy, PeerCipher, SecretBoxCipher};
pub use lookup::LookupTable;

use crate::error::{DeaddropError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};

/// Length in bytes of a symmetric cipher key.
pub const KEY_LENGTH: usize = 32;

/// Argon2id time cost for all protocol derivations.
const ARGON2_TIME_COST: u32 = 1;

/// Argon2id memory cost in KiB (64 MiB).
const ARGON2_MEMORY_KIB: u32 = 64 * 1024;

/// Argon2id degree of parallelism.
const ARGON2_LANES: u32 = 4;

/// Returns `len` bytes of CSPRNG data.
pub fn gen_rand_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Returns a random identifier of `len` bytes, hex encoded.
pub fn gen_rand_hex_id(len: usize) -> String {
    hex::encode(gen_rand_bytes(len))
}

/// Derives `out.len()` bytes from `password` and `salt` using Argon2id with
/// the protocol's fixed parameters (t=1, m=64 MiB, p=4).
///
/// The parameters are part of the wire contract: two peers feeding the same
/// inputs must produce bit-identical streams.
pub fn derive_stream(password: &[u8], salt: &[u8], out: &mut [u8]) -> Result<()> {
    let params = Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_TIME_COST,
        ARGON2_LANES,
        Some(out.len()),
    )
    .map_err(DeaddropError::crypto)?;
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password, salt, out)
        .map_err(DeaddropError::crypto)
}

/// Derives a 32-byte symmetric key from a password and salt.
pub fn derive_key(password: &[u8], salt: &[u8]) -> Result<[u8; KEY_LENGTH]> {
    let mut key = [0u8; KEY_LENGTH];
    derive_stream(password, salt, &mut key)?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_is_deterministic() {
        let key1 = derive_key(b"password", b"0123456789abcdef").unwrap();
        let key2 = derive_key(b"password", b"0123456789abcdef").unwrap();
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_derive_key_varies_with_salt() {
        let key1 = derive_key(b"password", b"0123456789abcdef").unwrap();
        let key2 = derive_key(b"password", b"fedcba9876543210").unwrap();
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_derive_stream_length() {
        let mut out = [0u8; 96];
        derive_stream(b"password", b"0123456789abcdef", &mut out).unwrap();
        assert!(out.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_gen_rand_bytes() {
        let a = gen_rand_bytes(32);
        let b = gen_rand_bytes(32);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_gen_rand_hex_id_length() {
        let id = gen_rand_hex_id(12);
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
