//! BLAKE2b-256 multihash codec.
//!
//! Content addresses on the rendezvous channel are canonical base58-encoded
//! multihashes: a varint code (`0xB220`, BLAKE2b-256) and varint digest length
//! (32) followed by the digest itself. A rendezvous endpoint's URL path must
//! end in the multihash of its signing public key.

use blake2::{digest::consts::U32, Blake2b, Digest};

/// Multihash code for BLAKE2b-256.
const BLAKE2B_256_CODE: u64 = 0xB220;

/// Digest length in bytes for BLAKE2b-256.
const BLAKE2B_256_LENGTH: usize = 32;

type Blake2b256 = Blake2b<U32>;

/// Computes the base58 BLAKE2b-256 multihash of `data`.
pub fn multihash(data: &[u8]) -> String {
    let digest = Blake2b256::digest(data);
    let mut bytes = Vec::with_capacity(4 + BLAKE2B_256_LENGTH);
    write_uvarint(&mut bytes, BLAKE2B_256_CODE);
    write_uvarint(&mut bytes, BLAKE2B_256_LENGTH as u64);
    bytes.extend_from_slice(&digest);
    bs58::encode(bytes).into_string()
}

/// Returns whether `hash` parses as a multihash this protocol supports.
///
/// Only BLAKE2b-256 with a full 32-byte digest is accepted.
pub fn is_supported(hash: &str) -> bool {
    let Ok(bytes) = bs58::decode(hash).into_vec() else {
        return false;
    };
    let Some((code, rest)) = read_uvarint(&bytes) else {
        return false;
    };
    let Some((length, digest)) = read_uvarint(rest) else {
        return false;
    };
    code == BLAKE2B_256_CODE
        && length as usize == BLAKE2B_256_LENGTH
        && digest.len() == BLAKE2B_256_LENGTH
}

/// Appends `value` to `out` as an unsigned LEB128 varint.
fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Reads an unsigned LEB128 varint from the front of `bytes`.
fn read_uvarint(bytes: &[u8]) -> Option<(u64, &[u8])> {
    let mut value = 0u64;
    for (i, &byte) in bytes.iter().enumerate() {
        if i >= 10 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, &bytes[i + 1..]));
        }
    }
    None
}
