//! relay-rpc: protocol client engine shared by the analysis and debug
//! channels.
//!
//! Content-Length framing over a subprocess's standard streams, the two
//! envelope shapes (JSON-RPC and the sequence-numbered debug protocol),
//! pending-request correlation, the initialization state machine and the
//! capability map.

pub mod capabilities;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod transport;
pub mod wire;

pub use capabilities::CapabilityMap;
pub use client::{ClientOptions, ProtocolClient, SessionState};
pub use dispatcher::{Dispatcher, EventHandler};
pub use error::{ErrorPayload, RpcError};
pub use wire::{DapWire, Inbound, JsonRpcWire, WireFormat};
