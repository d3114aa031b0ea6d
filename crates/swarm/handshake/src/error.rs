use libp2p::PeerId;
use strand_net_proto::SessionId;
use strand_swarm_peer::RemoteNodeError;

/// Reasons a handshake message is refused.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("protocol version mismatch: ours {ours}, theirs {theirs}")]
    VersionMismatch { ours: &'static str, theirs: String },

    #[error("invalid signature from {0}")]
    InvalidSignature(PeerId),

    #[error("failed to sign handshake: {0}")]
    Signing(String),

    #[error("no handshake in progress for session {0}")]
    UnknownSession(SessionId),

    #[error("session {0} is already being negotiated")]
    DuplicateSession(SessionId),

    #[error("expected peer {expected}, got {found}")]
    PeerMismatch { expected: PeerId, found: PeerId },

    #[error("refusing handshake with ourselves")]
    SelfConnection,

    #[error("ephemeral key produced a degenerate shared secret")]
    WeakKey,

    #[error("invalid address: {0}")]
    Address(#[from] RemoteNodeError),
}
