//! Content-addressed blob network storage.
//!
//! Message bodies live on an IPFS-style blob network: a write returns the
//! content hash the server assigned, and anyone holding the hash can fetch
//! the bytes. Two endpoint flavours exist, selected per node with
//! `settings["query_type"]`:
//!
//! - **API mode** (`"api"`): POST `api/v0/add` as multipart, hash in the JSON
//!   `Hash` field; GET `api/v0/cat?arg={hash}`.
//! - **Gateway mode** (default): POST `ipfs/`, hash in the `Ipfs-Hash`
//!   response header; GET `ipfs/{hash}`.
//!
//! Reads are capped at [`MAX_BLOB_READ`] bytes and silently truncated beyond
//! that. Delete and list are no-ops: blob networks retain what they retain.

use crate::error::{DeaddropError, Result};
use crate::storage::{consensus, ConsensusRule, Node, PeerStorage, StorageConfig, StorageKind};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

/// Maximum number of bytes returned from a single blob read (~3 MB).
pub const MAX_BLOB_READ: usize = 3_000_000;

/// Network timeout applied to every blob request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Blob network storage backend.
#[derive(Debug, Clone)]
pub struct BlobStore {
    pub read_nodes: Vec<Node>,
    pub write_nodes: Vec<Node>,
    pub read_rule: ConsensusRule,
    pub write_rule: ConsensusRule,
    client: Client,
}

impl BlobStore {
    /// Creates a blob backend over the given nodes.
    pub fn new(
        read_nodes: Vec<Node>,
        write_nodes: Vec<Node>,
        read_rule: ConsensusRule,
        write_rule: ConsensusRule,
    ) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            read_nodes,
            write_nodes,
            read_rule,
            write_rule,
            client,
        })
    }

    /// Fetches the blob at `hash`, truncated to [`MAX_BLOB_READ`] bytes.
    pub async fn get(&self, hash: &str) -> Result<Vec<u8>> {
        if self.read_nodes.is_empty() {
            return Err(DeaddropError::config("no read nodes configured"));
        }
        let nodes = self.read_nodes.clone();
        consensus::run(self.read_rule, &nodes, |node| {
            let client = self.client.clone();
            let hash = hash.to_string();
            async move { get_from_node(&client, &node, &hash).await }
        })
        .await
    }

    /// Publishes `value` and returns the server-reported content hash.
    ///
    /// The `key` argument is ignored: the network itself assigns the address.
    pub async fn set(&self, _key: &str, value: &[u8]) -> Result<String> {
        if self.write_nodes.is_empty() {
            return Err(DeaddropError::config("no write nodes configured"));
        }
        let nodes = self.write_nodes.clone();
        consensus::run(self.write_rule, &nodes, |node| {
            let client = self.client.clone();
            let body = value.to_vec();
            async move { post_to_node(&client, &node, body).await }
        })
        .await
    }

    /// Blob networks do not support deletion.
    pub fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    /// Blob networks do not support listing.
    pub fn list(&self, _prefix: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Settings shared with a peer: our write endpoints become their read
    /// endpoints.
    pub fn share(&self) -> Result<PeerStorage> {
        Ok(PeerStorage {
            kind: StorageKind::Ipfs,
            read_nodes: self.write_nodes.clone(),
            write_nodes: Vec::new(),
            read_rule: self.write_rule,
            write_rule: ConsensusRule::default(),
        })
    }

    /// Settings persisted in local configuration.
    pub fn export(&self) -> Result<StorageConfig> {
        Ok(StorageConfig {
            kind: Some(StorageKind::Ipfs),
            read_nodes: self.read_nodes.clone(),
            write_nodes: self.write_nodes.clone(),
            read_rule: self.read_rule,
            write_rule: self.write_rule,
            ..StorageConfig::default()
        })
    }
}

/// Fetches a blob from one node, honouring its query mode and headers.
async fn get_from_node(client: &Client, node: &Node, hash: &str) -> Result<Vec<u8>> {
    let url = read_url(node, hash)?;
    trace!(%url, "blob get");

    let mut request = client.get(url);
    for (name, value) in &node.header {
        request = request.header(name.as_str(), value.as_str());
    }
    let mut response = request.send().await?.error_for_status()?;

    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() >= MAX_BLOB_READ {
            body.extend_from_slice(&chunk[..MAX_BLOB_READ - body.len()]);
            debug!(hash, "blob read truncated at cap");
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Publishes a blob to one node and extracts the reported hash.
async fn post_to_node(client: &Client, node: &Node, body: Vec<u8>) -> Result<String> {
    let url = write_url(node)?;
    trace!(%url, bytes = body.len(), "blob set");

    let mut request = client.post(url);
    for (name, value) in &node.header {
        request = request.header(name.as_str(), value.as_str());
    }

    if query_type(node) == "api" {
        let part = Part::bytes(body).file_name("file");
        let form = Form::new().part("file", part);
        let response = request.multipart(form).send().await?.error_for_status()?;
        let output: HashMap<String, String> = response.json().await?;
        output
            .get("Hash")
            .cloned()
            .ok_or_else(|| DeaddropError::storage("blob response missing Hash field"))
    } else {
        let response = request.body(body).send().await?.error_for_status()?;
        response
            .headers()
            .get("Ipfs-Hash")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| DeaddropError::storage("blob response missing Ipfs-Hash header"))
    }
}

fn query_type(node: &Node) -> &str {
    node.settings
        .get("query_type")
        .map(String::as_str)
        .unwrap_or_default()
}

/// Joins two URL path fragments without doubling or dropping slashes.
fn append_to_path(base: &str, add: &str) -> String {
    if add.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        add.trim_start_matches('/')
    )
}

/// Builds the read URL for one node.
fn read_url(node: &Node, hash: &str) -> Result<Url> {
    let mut url = Url::parse(&node.url)
        .map_err(|_| DeaddropError::invalid_input(format!("invalid url for: {}", node.url)))?;
    if query_type(node) == "api" {
        let path = append_to_path(url.path(), "api/v0/cat");
        url.set_path(&path);
        url.query_pairs_mut().append_pair("arg", hash);
    } else {
        let path = append_to_path(url.path(), &format!("ipfs/{hash}"));
        url.set_path(&path);
    }
    Ok(url)
}

/// Builds the write URL for one node.
fn write_url(node: &Node) -> Result<Url> {
    let mut url = Url::parse(&node.url)
        .map_err(|_| DeaddropError::invalid_input(format!("invalid url for: {}", node.url)))?;
    let endpoint = if query_type(node) == "api" {
        "api/v0/add"
    } else {
        "ipfs/"
    };
    let path = append_to_path(url.path(), endpoint);
    url.set_path(&path);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_node(url: &str) -> Node {
        let mut node = Node::with_url(url);
        node.settings
            .insert("query_type".to_string(), "api".to_string());
        node
    }

    #[test]
    fn test_append_to_path() {
        assert_eq!(append_to_path("/", "ipfs/"), "/ipfs/");
        assert_eq!(append_to_path("/base/", "/add"), "/base/add");
        assert_eq!(append_to_path("/base", "add"), "/base/add");
        assert_eq!(append_to_path("/base", ""), "/base");
    }

    #[test]
    fn test_read_url_api_mode() {
        let node = api_node("https://ipfs.example.com:5001/");
        let url = read_url(&node, "QmHash").unwrap();
        assert_eq!(url.path(), "/api/v0/cat");
        assert_eq!(url.query(), Some("arg=QmHash"));
    }

    #[test]
    fn test_read_url_gateway_mode() {
        let node = Node::with_url("https://gateway.example.com");
        let url = read_url(&node, "QmHash").unwrap();
        assert_eq!(url.path(), "/ipfs/QmHash");
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_write_url_modes() {
        assert_eq!(
            write_url(&api_node("https://ipfs.example.com:5001"))
                .unwrap()
                .path(),
            "/api/v0/add"
        );
        assert_eq!(
            write_url(&Node::with_url("https://gateway.example.com"))
                .unwrap()
                .path(),
            "/ipfs/"
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        let node = Node::with_url("not a url");
        assert!(read_url(&node, "h").is_err());
        assert!(write_url(&node).is_err());
    }

    #[test]
    fn test_share_maps_write_to_read() {
        let store = BlobStore::new(
            vec![Node::with_url("https://read.example.com")],
            vec![api_node("https://write.example.com")],
            ConsensusRule::FirstSuccess,
            ConsensusRule::FirstSuccess,
        )
        .unwrap();
        let shared = store.share().unwrap();
        assert_eq!(shared.kind, StorageKind::Ipfs);
        assert_eq!(shared.read_nodes.len(), 1);
        assert_eq!(shared.read_nodes[0].url, "https://write.example.com");
        assert!(shared.write_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_get_without_read_nodes() {
        let store = BlobStore::new(
            vec![],
            vec![],
            ConsensusRule::FirstSuccess,
            ConsensusRule::FirstSuccess,
        )
        .unwrap();
        assert!(store.get("QmHash").await.is_err());
        assert!(store.set("", b"payload").await.is_err());
    }

    #[tokio::test]
    async fn test_unimplemented_read_rule_surfaces() {
        let store = BlobStore::new(
            vec![Node::with_url("https://read.example.com")],
            vec![],
            ConsensusRule::Majority,
            ConsensusRule::FirstSuccess,
        )
        .unwrap();
        assert!(matches!(
            store.get("QmHash").await,
            Err(DeaddropError::NotImplemented(_))
        ));
    }
}
