//! Error types for peer and session operations.

use libp2p::{Multiaddr, PeerId};

/// Errors from [`RemoteNode`](crate::RemoteNode) construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteNodeError {
    #[error("failed to parse address {address:?}: {reason}")]
    Malformed { address: String, reason: String },
    #[error("unsupported address component {0}")]
    UnsupportedProtocol(String),
    #[error("address {0} has no ip and tcp port")]
    NotDialable(Multiaddr),
    #[error("address names peer {found}, expected {expected}")]
    PeerIdMismatch { expected: PeerId, found: PeerId },
}

/// Errors from [`Session`](crate::Session) use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session is not authenticated")]
    NotAuthenticated,
    #[error("ciphertext shorter than nonce")]
    Truncated,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}
