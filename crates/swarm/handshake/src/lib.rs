//! Session establishment between strand peers.
//!
//! The swarm talks to a [`HandshakeProtocol`] whenever it needs a session
//! with a peer that has none, and hands it every envelope that arrives with
//! an empty payload. The protocol answers with a [`HandshakeOutcome`]; the
//! swarm alone decides which connection and remote node the resulting
//! session is attached to.
//!
//! A responder only hands out a session once the initiator has proven it
//! is live on the connection, so a recorded initiation cannot be replayed
//! to displace an existing session.
//!
//! [`SignedHandshake`] is the default implementation: an ephemeral X25519
//! exchange authenticated by each side's long-term identity key.

mod error;
mod signed;

pub use error::HandshakeError;
pub use signed::{PROTOCOL_VERSION, SignedHandshake};

use std::net::SocketAddr;

use libp2p::{Multiaddr, PeerId};
use strand_net_proto::{HandshakeData, SessionId};
use strand_swarm_peer::{RemoteNode, Session};

/// Result of feeding one handshake message to the protocol.
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// We answered an initiation; `reply` must be sent back on the same
    /// connection. No session exists until the initiator confirms.
    Accepted {
        peer_id: PeerId,
        session_id: SessionId,
        reply: HandshakeData,
    },
    /// Our own initiation was answered; `confirm` must be sent back on the
    /// same connection before any data.
    Established {
        peer_id: PeerId,
        address: Multiaddr,
        session: Session,
        confirm: HandshakeData,
    },
    /// An initiation we accepted was confirmed by its sender.
    Confirmed {
        peer_id: PeerId,
        /// Address the initiator can be dialed on.
        address: Multiaddr,
        session: Session,
    },
}

impl HandshakeOutcome {
    pub fn peer_id(&self) -> PeerId {
        match self {
            Self::Accepted { peer_id, .. }
            | Self::Established { peer_id, .. }
            | Self::Confirmed { peer_id, .. } => *peer_id,
        }
    }
}

/// Handshake collaborator driven by the swarm event loop.
///
/// Implementations are called from the loop only and must not block.
#[auto_impl::auto_impl(&mut, Box)]
pub trait HandshakeProtocol: Send {
    /// Produces the opening message for a session with `remote`.
    fn initiate(&mut self, remote: &RemoteNode) -> Result<HandshakeData, HandshakeError>;

    /// Processes a handshake message received from `observed`.
    fn on_message(
        &mut self,
        data: HandshakeData,
        observed: SocketAddr,
    ) -> Result<HandshakeOutcome, HandshakeError>;

    /// Forgets any in-progress initiation towards `peer_id`.
    fn abandon(&mut self, peer_id: &PeerId);

    /// Forgets an accepted initiation that will never be confirmed.
    fn cancel(&mut self, session_id: &SessionId);
}
