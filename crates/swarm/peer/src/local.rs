//! The local node's identity.

use std::net::SocketAddr;

use libp2p::identity::{Keypair, PublicKey, SigningError};
use libp2p::{Multiaddr, PeerId};

use crate::socket_to_multiaddr;

/// Long-term identity of this node plus the address it accepts connections on.
#[derive(Debug, Clone)]
pub struct LocalNode {
    keypair: Keypair,
    peer_id: PeerId,
    listen_address: Multiaddr,
}

impl LocalNode {
    pub fn new(keypair: Keypair, listen_addr: SocketAddr) -> Self {
        Self {
            peer_id: keypair.public().to_peer_id(),
            keypair,
            listen_address: socket_to_multiaddr(listen_addr),
        }
    }

    /// Creates a node with a fresh ed25519 identity.
    pub fn generate(listen_addr: SocketAddr) -> Self {
        Self::new(Keypair::generate_ed25519(), listen_addr)
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public()
    }

    pub fn listen_address(&self) -> &Multiaddr {
        &self.listen_address
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        self.keypair.sign(message)
    }
}
