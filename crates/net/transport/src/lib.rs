//! TCP transport for strand.
//!
//! [`Network`] accepts and dials TCP connections, runs one I/O task per
//! connection and reports everything that happens through the channels in
//! [`NetworkEvents`]. Owners never touch sockets directly; they hold cheap
//! [`Connection`] handles that queue outbound frames.

mod config;
mod connection;
mod error;
mod events;
mod network;

pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_EVENT_QUEUE_SIZE, DEFAULT_LISTEN_ADDR,
    DEFAULT_OUTBOUND_QUEUE_SIZE, TransportConfig,
};
pub use connection::{Connection, ConnectionId, Direction};
pub use error::TransportError;
pub use events::{ConnectionError, ConnectionMessage, NetworkEvents, SendError};
pub use network::Network;
