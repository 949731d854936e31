//! Error types for deaddrop operations.

use thiserror::Error;

/// Result type alias for deaddrop operations.
pub type Result<T> = std::result::Result<T, DeaddropError>;

/// Main error type for deaddrop operations.
///
/// Protocol-stable failure kinds are typed unit variants so callers can match
/// on them; operational failures carry a message.
#[derive(Error, Debug)]
pub enum DeaddropError {
    /// Cipher key is not exactly 32 bytes.
    #[error("invalid key length")]
    BadKeyLength,

    /// Authentication failed while decrypting a chunk.
    #[error("decrypt failed")]
    DecryptAuthFailed,

    /// No stored profile decrypted under the supplied password.
    #[error("invalid password")]
    InvalidPassword,

    /// The local store holds no profiles at all.
    #[error("no profile found")]
    NoProfileFound,

    /// A rendezvous payload is timestamped too far into the future.
    #[error("invalid future timestamp")]
    FutureTimestamp,

    /// A rendezvous payload is not newer than the stored high-water mark.
    #[error("stale timestamp")]
    StaleTimestamp,

    /// An envelope signature did not verify.
    #[error("signature verification failed")]
    SignatureInvalid,

    /// An envelope public key does not hash to the endpoint's multihash.
    #[error("payload and endpoint hash mismatch")]
    HashMismatch,

    /// Every configured node failed the operation.
    #[error("no nodes available")]
    NoNodesAvailable,

    /// A configured feature has no implementation yet.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// The one-time lookup table has no entries left.
    #[error("lookup table exhausted")]
    LookupExhausted,

    /// A lookup tag resolved to no key.
    #[error("no key")]
    NoKey,

    /// Message exceeds the maximum size accepted by the protocol.
    #[error("message size {size} exceeds max size of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// This storage backend does not support shared or exported configs.
    #[error("this storage does not support shared configs")]
    NotShareable,

    /// Storage backend errors.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Cryptographic operation errors.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Configuration errors.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid input or arguments.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Network transport errors.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeaddropError {
    /// Creates a new storage error.
    pub fn storage<T: ToString>(msg: T) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Creates a new serialization error.
    pub fn serialization<T: ToString>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Creates a new cryptographic error.
    pub fn crypto<T: ToString>(msg: T) -> Self {
        Self::Crypto(msg.to_string())
    }

    /// Creates a new configuration error.
    pub fn config<T: ToString>(msg: T) -> Self {
        Self::Config(msg.to_string())
    }

    /// Creates a new invalid input error.
    pub fn invalid_input<T: ToString>(msg: T) -> Self {
        Self::InvalidInput(msg.to_string())
    }
}
