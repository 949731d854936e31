//! Signed-pointer rendezvous storage.
//!
//! A rendezvous endpoint is a public URL whose path ends in the multihash of
//! the signing identity that owns it. The owner publishes signed envelopes
//! there; anyone may read, but a payload is only accepted when:
//!
//! 1. the endpoint's URL tail is a supported multihash,
//! 2. the envelope signature verifies,
//! 3. the envelope's public key hashes to exactly that URL tail, and
//! 4. the timestamp is inside the freshness window: not further ahead of
//!    wall-clock than 5 s, and strictly newer than the last accepted
//!    timestamp.
//!
//! The high-water mark advances only after a payload is accepted, giving the
//! pointer channel its no-replay property. Transport and parse failures fall
//! through to the next configured node; verification failures are terminal.

use crate::crypto::multihash;
use crate::envelope::{now_ns, SignedEnvelope};
use crate::error::{DeaddropError, Result};
use crate::storage::{
    ConsensusRule, Node, PeerStorage, SignerConfig, StorageConfig, StorageKind,
};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, trace, warn};
use url::Url;

/// Default rendezvous service endpoint.
pub const DEFAULT_RENDEZVOUS_URL: &str = "https://prototype.hashmap.sh";

/// How far ahead of wall-clock a payload timestamp may sit (5 s).
const FRESHNESS_WINDOW_NS: i64 = 5_000_000_000;

/// Network timeout applied to every rendezvous request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Signed-pointer rendezvous backend.
#[derive(Debug, Clone)]
pub struct RendezvousStore {
    pub read_nodes: Vec<Node>,
    pub write_nodes: Vec<Node>,
    pub signers: Vec<SignerConfig>,
    pub read_rule: ConsensusRule,
    pub write_rule: ConsensusRule,
    /// Monotonic freshness high-water mark (Unix nanoseconds).
    pub latest: i64,
    client: Client,
}

impl RendezvousStore {
    /// Creates a rendezvous backend over the given nodes and identities.
    pub fn new(
        read_nodes: Vec<Node>,
        write_nodes: Vec<Node>,
        signers: Vec<SignerConfig>,
        read_rule: ConsensusRule,
        write_rule: ConsensusRule,
        latest: i64,
    ) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            read_nodes,
            write_nodes,
            signers,
            read_rule,
            write_rule,
            latest,
            client,
        })
    }

    /// A rendezvous writer with a fresh signing identity against the default
    /// service.
    pub fn new_default() -> Result<Self> {
        Self::new(
            Vec::new(),
            vec![Node::with_url(DEFAULT_RENDEZVOUS_URL)],
            vec![SignerConfig::generate()],
            ConsensusRule::default(),
            ConsensusRule::default(),
            0,
        )
    }

    /// Fetches and verifies the current payload, returning its message bytes.
    pub async fn get(&mut self, _key: &str) -> Result<Vec<u8>> {
        if self.read_nodes.is_empty() {
            return Err(DeaddropError::config("no read nodes configured"));
        }
        match self.read_rule {
            ConsensusRule::FirstSuccess => self.get_first_success().await,
            other => Err(DeaddropError::NotImplemented(other.name())),
        }
    }

    async fn get_first_success(&mut self) -> Result<Vec<u8>> {
        let nodes = self.read_nodes.clone();
        for node in &nodes {
            let url = Url::parse(&node.url).map_err(|_| {
                DeaddropError::invalid_input(format!("invalid url for: {}", node.url))
            })?;
            let url_hash = hash_from_path(url.path()).to_string();
            if !multihash::is_supported(&url_hash) {
                return Err(DeaddropError::config(format!(
                    "invalid rendezvous endpoint for: {}",
                    node.url
                )));
            }

            let mut request = self.client.get(url);
            for (name, value) in &node.header {
                request = request.header(name.as_str(), value.as_str());
            }
            let body = match request.send().await {
                Ok(response) => match response.bytes().await {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(url = %node.url, error = %err, "rendezvous body read failed");
                        continue;
                    }
                },
                Err(err) => {
                    warn!(url = %node.url, error = %err, "rendezvous request failed");
                    continue;
                }
            };
            let envelope = match SignedEnvelope::from_bytes(&body) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(url = %node.url, error = %err, "rendezvous payload unparsable");
                    continue;
                }
            };

            return self.accept(&url_hash, &envelope, now_ns());
        }
        Err(DeaddropError::NoNodesAvailable)
    }

    /// Verifies an envelope against the endpoint identity and the freshness
    /// window, advancing the high-water mark only on acceptance.
    pub fn accept(
        &mut self,
        url_hash: &str,
        envelope: &SignedEnvelope,
        now: i64,
    ) -> Result<Vec<u8>> {
        envelope.verify()?;
        let public_key = envelope.public_key_bytes()?;
        if url_hash != multihash::multihash(&public_key) {
            return Err(DeaddropError::HashMismatch);
        }
        self.update_latest(envelope.timestamp, now)?;
        envelope.message_bytes()
    }

    /// Enforces the freshness window over a payload timestamp.
    fn update_latest(&mut self, timestamp: i64, now: i64) -> Result<()> {
        if timestamp > now + FRESHNESS_WINDOW_NS {
            return Err(DeaddropError::FutureTimestamp);
        }
        if timestamp <= self.latest {
            return Err(DeaddropError::StaleTimestamp);
        }
        trace!(from = self.latest, to = timestamp, "advancing high-water mark");
        self.latest = timestamp;
        Ok(())
    }

    /// Seals `value` into a signed envelope and publishes it.
    ///
    /// Returns `key` unchanged: the endpoint address is fixed by identity.
    pub async fn set(&mut self, key: &str, value: &[u8]) -> Result<String> {
        if self.write_nodes.is_empty() {
            return Err(DeaddropError::config("no write nodes configured"));
        }
        let signer = self
            .signers
            .first()
            .ok_or_else(|| DeaddropError::config("no signing identity configured"))?;
        let envelope = SignedEnvelope::seal(value, now_ns(), &signer.signing_key()?);
        let payload = envelope.to_bytes()?;

        match self.write_rule {
            ConsensusRule::FirstSuccess => {
                for node in &self.write_nodes {
                    let mut request = self
                        .client
                        .post(&node.url)
                        .header("Content-Type", "application/json");
                    for (name, value) in &node.header {
                        request = request.header(name.as_str(), value.as_str());
                    }
                    match request.body(payload.clone()).send().await {
                        Ok(response) if response.status().as_u16() < 400 => {
                            debug!(url = %node.url, "pointer published");
                            return Ok(key.to_string());
                        }
                        Ok(response) => {
                            warn!(url = %node.url, status = %response.status(), "pointer write refused");
                        }
                        Err(err) => {
                            warn!(url = %node.url, error = %err, "pointer write failed");
                        }
                    }
                }
                Err(DeaddropError::NoNodesAvailable)
            }
            other => Err(DeaddropError::NotImplemented(other.name())),
        }
    }

    /// Pointer services retain history; deletion is a no-op.
    pub fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    /// Pointer services hold a single value; there is nothing to list.
    pub fn list(&self, _prefix: &str) -> Result<Vec<String>> {
        Err(DeaddropError::NotImplemented("rendezvous list"))
    }

    /// Settings shared with a peer: read endpoints are derived from every
    /// write node crossed with every signing identity's multihash.
    pub fn share(&self) -> Result<PeerStorage> {
        Ok(PeerStorage {
            kind: StorageKind::Hashmap,
            read_nodes: self.read_nodes_from_write_nodes()?,
            write_nodes: Vec::new(),
            read_rule: self.write_rule,
            write_rule: ConsensusRule::default(),
        })
    }

    /// Settings persisted in local configuration.
    pub fn export(&self) -> Result<StorageConfig> {
        Ok(StorageConfig {
            kind: Some(StorageKind::Hashmap),
            read_nodes: self.read_nodes.clone(),
            write_nodes: self.write_nodes.clone(),
            read_rule: self.read_rule,
            write_rule: self.write_rule,
            signers: self.signers.clone(),
            latest: self.latest,
            name: None,
        })
    }

    fn read_nodes_from_write_nodes(&self) -> Result<Vec<Node>> {
        let endpoints: Vec<String> = self
            .signers
            .iter()
            .map(|signer| multihash::multihash(&signer.public_key))
            .collect();
        let mut read_nodes = Vec::new();
        for write_node in &self.write_nodes {
            for endpoint in &endpoints {
                let mut url = Url::parse(&write_node.url).map_err(|_| {
                    DeaddropError::invalid_input(format!("invalid url for: {}", write_node.url))
                })?;
                url.set_path(endpoint);
                read_nodes.push(Node::with_url(url.to_string()));
            }
        }
        Ok(read_nodes)
    }
}

/// Returns the final path segment, which for a rendezvous endpoint is the
/// identity multihash.
fn hash_from_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[index + 1..],
        None => path,
    }
}
