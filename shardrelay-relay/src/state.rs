//! Application state
//!
//! The relay either runs the session protocol itself (local mode) or hands
//! the sealed shards to the backend nodes and returns what they rebuild
//! (forward mode).

use shardrelay_core::error::{Result, ShardRelayError};
use shardrelay_core::kdf::Src;
use shardrelay_protocol::message::TransactionKind;
use shardrelay_protocol::transaction::InboundTransaction;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::keystore::DeviceKeyStore;
use crate::metrics;
use crate::node_client::NodeClient;
use crate::session::SessionProtocol;

/// Where transactions are processed
enum RelayMode {
    Local(SessionProtocol),
    Forward(NodeClient),
}

/// Shared state for all handlers
#[derive(Clone)]
pub struct RelayState {
    mode: Arc<RelayMode>,
    node_count: usize,
}

impl RelayState {
    /// Relay running the session protocol in-process
    pub fn local(protocol: SessionProtocol) -> Self {
        let node_count = protocol.node_count();
        Self {
            mode: Arc::new(RelayMode::Local(protocol)),
            node_count,
        }
    }

    /// Relay forwarding to backend nodes
    pub fn forward(client: NodeClient) -> Self {
        let node_count = client.node_count();
        Self {
            mode: Arc::new(RelayMode::Forward(client)),
            node_count,
        }
    }

    /// Build the state described by `config`, provisioning the owner in local mode
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let node_count = config.session.node_count;

        if config.is_forwarding() {
            let client = NodeClient::http(config.nodes.endpoints.clone(), config.nodes.node_client_config())
                .map_err(|e| ShardRelayError::Configuration(e.to_string()))?;
            info!(nodes = node_count, "relay forwarding to backend nodes");
            return Ok(Self::forward(client));
        }

        if config.session.owner_secret.is_empty() {
            return Err(ShardRelayError::Configuration(
                "owner_secret is not configured".to_string(),
            ));
        }
        let protocol = SessionProtocol::new(Arc::new(DeviceKeyStore::new()), node_count)?;
        let owner = protocol.bootstrap_owner(config.session.owner_secret.as_bytes())?;
        info!(nodes = node_count, owner = %owner, "relay running session protocol locally");
        Ok(Self::local(protocol))
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Process one transaction envelope and return the response bytes
    pub async fn handle(&self, kind: TransactionKind, envelope: &[u8]) -> Result<Vec<u8>> {
        let started = Instant::now();

        let result = match self.mode.as_ref() {
            RelayMode::Local(protocol) => protocol.handle(kind, envelope),
            RelayMode::Forward(client) => forward(client, kind, envelope).await,
        };

        let outcome = match &result {
            Ok(_) => "accepted",
            Err(e) => {
                warn!(kind = %kind, error = %e, "transaction rejected");
                e.kind()
            }
        };
        metrics::record_transaction(kind.as_str(), outcome);
        metrics::record_transaction_latency(kind.as_str(), started.elapsed().as_secs_f64());
        result
    }
}

async fn forward(client: &NodeClient, kind: TransactionKind, envelope: &[u8]) -> Result<Vec<u8>> {
    let inbound = InboundTransaction::decode(envelope)?;
    let src: Src = *inbound.src();
    inbound.sealed_geometry(client.node_count())?;

    client
        .try_post_transaction(inbound.sealed_shards(), &src, inbound.hmac(), kind.route())
        .await
}
