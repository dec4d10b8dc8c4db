//! Storage node client
//!
//! Fans a sealed transaction out to every node and rebuilds the response
//! payload from whichever shards come back first. Node requests run as
//! detached tasks; each one sends its reply over a channel to the caller,
//! which is the only writer of the session's `QuorumReconstructor`.

use async_trait::async_trait;
use reqwest::Client;
use shardrelay_core::erasure::ShardGeometry;
use shardrelay_core::error::{Result, ShardRelayError};
use shardrelay_core::kdf::Src;
use shardrelay_core::reconstruct::{InsertOutcome, QuorumReconstructor};
use shardrelay_protocol::packet::ShardPacket;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics;

/// Error types for a single node request
#[derive(Debug, thiserror::Error)]
pub enum NodeClientError {
    #[error("Node {0} is not configured")]
    UnknownNode(usize),

    #[error("Node {node} returned HTTP {status}")]
    Status { node: usize, status: u16 },

    #[error("Node {0} timed out")]
    Timeout(usize),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl NodeClientError {
    fn outcome(&self) -> &'static str {
        match self {
            NodeClientError::Timeout(_) => "timeout",
            _ => "failed",
        }
    }
}

/// Configuration for the node client
#[derive(Debug, Clone)]
pub struct NodeClientConfig {
    /// Overall timeout of one node request
    pub request_timeout: Duration,

    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for NodeClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(300), // 5 minutes
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// How node packets reach the nodes
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// POST `body` to the `route` endpoint of zero-based node `node`
    async fn post(&self, node: usize, route: &str, body: Vec<u8>) -> std::result::Result<Vec<u8>, NodeClientError>;

    fn node_count(&self) -> usize;
}

/// HTTP transport to a static list of node base URLs
pub struct HttpNodeTransport {
    client: Client,
    endpoints: Vec<String>,
}

impl HttpNodeTransport {
    pub fn new(endpoints: Vec<String>, config: &NodeClientConfig) -> std::result::Result<Self, NodeClientError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, endpoints })
    }
}

#[async_trait]
impl NodeTransport for HttpNodeTransport {
    async fn post(&self, node: usize, route: &str, body: Vec<u8>) -> std::result::Result<Vec<u8>, NodeClientError> {
        let endpoint = self
            .endpoints
            .get(node)
            .ok_or(NodeClientError::UnknownNode(node))?;
        let url = format!("{}/{}", endpoint, route);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NodeClientError::Status {
                node,
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    fn node_count(&self) -> usize {
        self.endpoints.len()
    }
}

/// Result of one node request, as seen by the accumulator
enum NodeReply {
    Packet(Vec<u8>),
    Failed(NodeClientError),
}

/// Client for fanning transactions out to storage nodes
pub struct NodeClient {
    transport: Arc<dyn NodeTransport>,
    config: NodeClientConfig,
}

impl NodeClient {
    pub fn new(transport: Arc<dyn NodeTransport>, config: NodeClientConfig) -> Self {
        Self { transport, config }
    }

    /// HTTP client for `endpoints`, one per node
    pub fn http(endpoints: Vec<String>, config: NodeClientConfig) -> std::result::Result<Self, NodeClientError> {
        let transport = HttpNodeTransport::new(endpoints, &config)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn node_count(&self) -> usize {
        self.transport.node_count()
    }

    /// Split `shards` into one packet per node, each carrying its contiguous
    /// range of `shards_per_node` shards
    pub fn partition(&self, session_id: Uuid, shards: &[Vec<u8>], src: &Src, hmac: &[u8]) -> Result<Vec<ShardPacket>> {
        let shard_length = shards.first().map_or(0, Vec::len);
        if shards.iter().any(|s| s.len() != shard_length) {
            return Err(ShardRelayError::MalformedEnvelope(
                "shards differ in length".to_string(),
            ));
        }
        let geometry = ShardGeometry::for_shards(shards.len(), shard_length, self.node_count())?;

        let packets = (0..geometry.node_count())
            .map(|node| {
                let range = geometry.shards_for_node(node);
                ShardPacket {
                    session_id,
                    geometry,
                    src: *src,
                    hmac: hmac.to_vec(),
                    shard_indices: range.clone().collect(),
                    shard_bytes: shards[range].to_vec(),
                }
            })
            .collect();
        Ok(packets)
    }

    /// Post a transaction to every node and reconstruct the response payload.
    ///
    /// Returns `None` on any failure; see [`NodeClient::try_post_transaction`]
    /// for the reason.
    pub async fn post_transaction(&self, shards: &[Vec<u8>], src: &Src, hmac: &[u8], route: &str) -> Option<Vec<u8>> {
        match self.try_post_transaction(shards, src, hmac, route).await {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(src = %src, route = route, error = %e, "transaction fan-out failed");
                None
            }
        }
    }

    /// Like [`NodeClient::post_transaction`] but reports why it failed.
    ///
    /// Node transport failures and timeouts only cost that node's shards. A
    /// response that does not parse, or that disagrees with the session,
    /// fails the transaction. Returns as soon as quorum is reached; requests
    /// still in flight are abandoned and their replies discarded.
    pub async fn try_post_transaction(&self, shards: &[Vec<u8>], src: &Src, hmac: &[u8], route: &str) -> Result<Vec<u8>> {
        let session_id = Uuid::new_v4();
        let packets = self.partition(session_id, shards, src, hmac)?;
        let node_count = packets.len();
        let started = Instant::now();

        let (tx, mut rx) = mpsc::channel(node_count);
        for (node, packet) in packets.iter().enumerate() {
            let body = packet.encode()?;
            let transport = self.transport.clone();
            let tx = tx.clone();
            let route = route.to_string();
            let timeout = self.config.request_timeout;

            tokio::spawn(async move {
                let reply = match tokio::time::timeout(timeout, transport.post(node, &route, body)).await {
                    Ok(Ok(bytes)) => NodeReply::Packet(bytes),
                    Ok(Err(e)) => NodeReply::Failed(e),
                    Err(_) => NodeReply::Failed(NodeClientError::Timeout(node)),
                };
                // receiver is gone once quorum was reached
                let _ = tx.send((node, reply)).await;
            });
        }
        drop(tx);

        debug!(session = %session_id, src = %src, nodes = node_count, route = route, "fan-out started");

        let mut reconstructor: Option<QuorumReconstructor> = None;
        while let Some((node, reply)) = rx.recv().await {
            let bytes = match reply {
                NodeReply::Packet(bytes) => bytes,
                NodeReply::Failed(e) => {
                    metrics::record_node_request(e.outcome());
                    warn!(session = %session_id, node = node, error = %e, "node contributed no shards");
                    continue;
                }
            };

            let expected = reconstructor.as_ref().map(|r| *r.geometry());
            let packet = match self.accept_packet(session_id, src, node, &bytes, expected) {
                Ok(packet) => packet,
                Err(e) => {
                    metrics::record_node_request("malformed");
                    return Err(e);
                }
            };
            metrics::record_node_request("ok");

            let accumulator = match reconstructor {
                Some(ref mut r) => r,
                None => reconstructor.insert(QuorumReconstructor::new(packet.geometry)?),
            };

            let mut inserted = 0;
            for (index, shard) in packet.into_shards() {
                if accumulator.insert(index, shard)? == InsertOutcome::Inserted {
                    inserted += 1;
                }
            }
            debug!(session = %session_id, node = node, inserted = inserted, received = accumulator.received(), "node shards accepted");

            if accumulator.is_reconstructable() {
                let payload = accumulator.reconstruct()?;
                info!(
                    session = %session_id,
                    src = %src,
                    bytes = payload.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "transaction reconstructed"
                );
                return Ok(payload);
            }
        }

        let (available, required) = reconstructor
            .as_ref()
            .map_or((0, 1), |r| (r.received(), r.geometry().data));
        Err(ShardRelayError::InsufficientShards { available, required })
    }

    /// Decode a node reply and check it belongs to this session and node.
    /// `expected` is the geometry of the first accepted reply, if any.
    fn accept_packet(
        &self,
        session_id: Uuid,
        src: &Src,
        node: usize,
        bytes: &[u8],
        expected: Option<ShardGeometry>,
    ) -> Result<ShardPacket> {
        let packet = ShardPacket::decode(bytes)?;

        if packet.session_id != session_id {
            return Err(ShardRelayError::MalformedEnvelope(format!(
                "node {} answered for session {}",
                node, packet.session_id
            )));
        }
        if packet.src != *src {
            return Err(ShardRelayError::MalformedEnvelope(format!(
                "node {} answered for SRC {}",
                node, packet.src
            )));
        }
        if packet.geometry.node_count() != self.node_count() {
            return Err(ShardRelayError::MalformedEnvelope(format!(
                "node {} geometry spans {} nodes",
                node,
                packet.geometry.node_count()
            )));
        }

        if let Some(expected) = expected.filter(|g| *g != packet.geometry) {
            return Err(ShardRelayError::MalformedEnvelope(format!(
                "node {} geometry {} disagrees with {}",
                node, packet.geometry, expected
            )));
        }

        let owned = packet.geometry.shards_for_node(node);
        if let Some(index) = packet.shard_indices.iter().find(|&&i| !owned.contains(&i)) {
            return Err(ShardRelayError::MalformedEnvelope(format!(
                "node {} returned shard {} outside its range",
                node, index
            )));
        }
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport(usize);

    #[async_trait]
    impl NodeTransport for NullTransport {
        async fn post(&self, node: usize, _route: &str, _body: Vec<u8>) -> std::result::Result<Vec<u8>, NodeClientError> {
            Err(NodeClientError::Transport(format!("node {} offline", node)))
        }

        fn node_count(&self) -> usize {
            self.0
        }
    }

    fn client(nodes: usize) -> NodeClient {
        NodeClient::new(Arc::new(NullTransport(nodes)), NodeClientConfig::default())
    }

    #[test]
    fn test_default_config() {
        let config = NodeClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_partition_contiguous_ranges() {
        let shards: Vec<Vec<u8>> = (0..6u8).map(|i| vec![i; 20]).collect();
        let src = Src::from_bytes([1; 8]);
        let packets = client(3).partition(Uuid::new_v4(), &shards, &src, &[9; 32]).unwrap();

        assert_eq!(packets.len(), 3);
        assert_eq!(packets[1].shard_indices, vec![2, 3]);
        assert_eq!(packets[1].shard_bytes, vec![vec![2; 20], vec![3; 20]]);
        assert_eq!(packets[2].geometry.shards_per_node, 2);
        assert!(packets.iter().all(|p| p.session_id == packets[0].session_id));
    }

    #[test]
    fn test_partition_rejects_uneven_shards() {
        let src = Src::from_bytes([1; 8]);
        let uneven = vec![vec![0; 20]; 4];
        assert!(client(3).partition(Uuid::new_v4(), &uneven, &src, &[]).is_err());

        let ragged = vec![vec![0; 20], vec![0; 21], vec![0; 20]];
        assert!(client(3).partition(Uuid::new_v4(), &ragged, &src, &[]).is_err());
    }

    #[tokio::test]
    async fn test_all_nodes_down() {
        let shards = vec![vec![0; 20]; 3];
        let src = Src::from_bytes([1; 8]);
        let client = client(3);
        assert!(matches!(
            client.try_post_transaction(&shards, &src, &[0; 32], "login").await,
            Err(ShardRelayError::InsufficientShards { available: 0, .. })
        ));
        assert!(client.post_transaction(&shards, &src, &[0; 32], "login").await.is_none());
    }
}
