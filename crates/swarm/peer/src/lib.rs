//! Identity and session model for strand peers.
//!
//! - [`LocalNode`] - our own long-term identity and listen address
//! - [`RemoteNode`] - a known peer, its dial address and at most one session
//! - [`Session`] - symmetric key material agreed during a handshake

mod address;
mod error;
mod local;
mod remote;
mod session;

pub use address::{dial_target, parse_address, socket_to_multiaddr};
pub use error::{RemoteNodeError, SessionError};
pub use local::LocalNode;
pub use remote::RemoteNode;
pub use session::{NONCE_LEN, SESSION_KEY_LEN, Session, SessionKey};

pub use libp2p::{Multiaddr, PeerId, identity::Keypair};
pub use strand_net_proto::SessionId;
