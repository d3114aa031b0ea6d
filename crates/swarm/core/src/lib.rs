//! Peer-to-peer swarm core.
//!
//! A [`Swarm`] owns a TCP [`Network`](strand_net_transport::Network), the
//! set of known peers and their sessions, and the table of requests still
//! waiting for a response. Applications drive it through a cloneable
//! [`SwarmHandle`]:
//!
//! - `connect_to` / `add_peer` / `disconnect_from` manage peers
//! - `send_message` delivers an encrypted request, handshaking on demand,
//!   and resolves with the response body
//! - inbound requests are routed by protocol id through the [`Demuxer`] and
//!   answered with `respond`

mod config;
mod demux;
mod error;
mod handle;
mod link;
mod metrics;
mod pending;
mod swarm;

pub use config::*;
pub use demux::{Demuxer, FnHandler, InboundRequest, ProtocolHandler, handler_fn};
pub use error::{DemuxError, HandlerError, SwarmError};
pub use handle::{SendMessageRequest, SwarmHandle, SwarmStats};
pub use link::PeerState;
pub use pending::Callback;
pub use swarm::Swarm;

pub use strand_swarm_handshake::{HandshakeProtocol, PROTOCOL_VERSION, SignedHandshake};
pub use strand_swarm_peer::{Keypair, LocalNode, Multiaddr, PeerId};
