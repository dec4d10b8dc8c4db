//! ShardRelay relay
//!
//! Server half of the session protocol, the node fan-out client and the
//! HTTP boundary in front of them.

pub mod api;
pub mod config;
pub mod keystore;
pub mod metrics;
pub mod node_client;
pub mod session;
pub mod state;

pub use config::{ConfigError, RelayConfig};
pub use keystore::{DeviceKeyState, DeviceKeyStore, Registration};
pub use node_client::{HttpNodeTransport, NodeClient, NodeClientConfig, NodeClientError, NodeTransport};
pub use session::SessionProtocol;
pub use state::RelayState;
