//! ShardRelay wire protocol
//!
//! CBOR envelopes exchanged between devices, the relay and backend nodes,
//! the closed set of session requests and responses, and the device half
//! of the Register/Login/Rekey/Invite protocol.

pub mod cbor;
pub mod device;
pub mod envelope;
pub mod message;
pub mod packet;
pub mod transaction;

pub use device::DeviceSession;
pub use envelope::{ShardEnvelope, TransactionEnvelope};
pub use message::{Request, Response, TransactionKind};
pub use packet::ShardPacket;
pub use transaction::{seal_transaction, InboundTransaction};
