//! Remote peers as seen from the local node.

use std::net::SocketAddr;

use libp2p::{Multiaddr, PeerId};
use strand_net_transport::ConnectionId;

use crate::{RemoteNodeError, Session, dial_target, parse_address};

/// A peer we have talked to, or intend to.
///
/// The identity outlives any individual session: a dropped connection
/// clears the session, but the node stays known so a later send can
/// re-handshake with it.
#[derive(Debug)]
pub struct RemoteNode {
    peer_id: PeerId,
    address: Multiaddr,
    socket_addr: SocketAddr,
    session: Option<Session>,
    connection: Option<ConnectionId>,
}

impl RemoteNode {
    /// Creates a node from a multiaddr or `ip:port` string.
    pub fn new(peer_id: PeerId, address: &str) -> Result<Self, RemoteNodeError> {
        Self::from_multiaddr(peer_id, parse_address(address)?)
    }

    pub fn from_multiaddr(peer_id: PeerId, address: Multiaddr) -> Result<Self, RemoteNodeError> {
        let socket_addr = dial_target(&peer_id, &address)?;
        Ok(Self {
            peer_id,
            address,
            socket_addr,
            session: None,
            connection: None,
        })
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn address(&self) -> &Multiaddr {
        &self.address
    }

    /// Socket address used when dialing this node.
    pub fn socket_addr(&self) -> SocketAddr {
        self.socket_addr
    }

    /// Replaces the dial address, e.g. after the peer advertised a new one.
    pub fn set_address(&mut self, address: Multiaddr) -> Result<(), RemoteNodeError> {
        self.socket_addr = dial_target(&self.peer_id, &address)?;
        self.address = address;
        Ok(())
    }

    /// True only for an authenticated session.
    pub fn has_session(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_authenticated)
    }

    /// Runs `f` with the current session if it is authenticated.
    pub fn get_session<R>(&self, f: impl FnOnce(&Session) -> R) -> Option<R> {
        self.session
            .as_ref()
            .filter(|session| session.is_authenticated())
            .map(f)
    }

    /// Connection the current session is bound to.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    /// Binds a session (and the connection carrying it) to this node,
    /// replacing any previous one.
    pub fn attach_session(&mut self, session: Session, connection: ConnectionId) {
        self.session = Some(session);
        self.connection = Some(connection);
    }

    /// Drops the session and returns the connection it was bound to.
    pub fn clear_session(&mut self) -> Option<ConnectionId> {
        self.session = None;
        self.connection.take()
    }
}
