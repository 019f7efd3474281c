//! Gatelink - reconnecting duplex WebSocket transport.
//!
//! Keeps a single text-frame connection to a remote gateway open on behalf
//! of a protocol engine: outbound payloads are pulled from the engine and
//! sent, inbound frames are handed back in wire order, and transient network
//! loss is healed by an unbounded, backed-off reconnect loop.
//!
//! # Architecture
//!
//! - **Transport** - blocking facade (`open`, `run`, `update`, `stop`)
//! - **Pump** - writer and reader threads driving async loops
//! - **Coordinator** - single-flight reconnect with backoff
//! - **Connection** - one session behind the `Connector` seams
//!
//! # Modules
//!
//! - [`transport`] - the facade
//! - [`connection`] - connection handle and backend traits
//! - [`ws`] - `tokio-tungstenite` backend
//! - [`config`] - configuration loading and overrides

// Library modules
pub mod backoff;
pub mod config;
pub mod connection;
pub mod constants;
pub mod engine;
pub mod error;
pub mod inbound;
pub mod subscription;
pub mod transport;
pub mod ws;

mod link;
mod pump;
mod reconnect;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use backoff::BackoffPolicy;
pub use config::{Delivery, Stage, TransportConfig};
pub use connection::{CloseReason, Closed, Connection, ConnectionState, TargetAddress};
pub use engine::Engine;
pub use error::{CloseError, ConnectError, ReceiveError, SendError};
pub use reconnect::ReconnectState;
pub use subscription::{LinkEvent, Subscription};
pub use transport::Transport;
