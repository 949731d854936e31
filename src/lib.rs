//! # deaddrop
//!
//! A peer-to-peer, end-to-end-encrypted chat engine that uses public,
//! *untrusted* infrastructure: a content-addressed blob network for message
//! bodies and a signed-pointer rendezvous service as the meeting point. No
//! server holds conversation state. Peers exchange setup material once, derive
//! a large shared table of one-time cryptographic lookups, and thereafter
//! publish and retrieve messages anonymously by consuming entries from that
//! table.
//!
//! ## Architecture
//!
//! - [`crypto::cipher`]: chunked authenticated encryption (XSalsa20-Poly1305)
//!   used for every stored value
//! - [`crypto::multihash`]: BLAKE2b-256 base58 content addresses
//! - [`crypto::lookup`]: the per-chat, per-peer one-time (tag → key) table
//! - [`storage`]: uniform backends (local RocksDB, blob network, signed
//!   rendezvous, in-process loopback) and consensus rules across nodes
//! - [`envelope`]: the ed25519-signed rendezvous payload
//! - [`strategy`]: the (rendezvous, blob store, cipher) triple a peer
//!   publishes with
//! - [`chat`] / [`handshake`]: chat state, causal log, pepper derivation
//! - [`session`]: the authenticated boundary orchestrating everything under a
//!   password-derived profile key
//!
//! ## Example
//!
//! ```rust,no_run
//! use deaddrop::session::{Session, SessionOptions};
//!
//! # async fn run() -> deaddrop::Result<()> {
//! let opts = SessionOptions::with_path("deaddrop.db");
//! Session::create_profile("hunter2", "mallory", &opts)?;
//! let mut session = Session::open("hunter2", &opts)?;
//! for chat_id in session.list_chats().await? {
//!     let log = session.retrieve_messages(&chat_id).await?;
//!     println!("{}", String::from_utf8_lossy(&log));
//! }
//! session.close()?;
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod handshake;
pub mod profile;
pub mod session;
pub mod storage;
pub mod strategy;

pub use error::{DeaddropError, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
