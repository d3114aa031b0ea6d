//! Error types surfaced to swarm callers.

use libp2p::PeerId;

/// Failure of a connect, send or respond request.
///
/// Every variant is scoped to the single request that received it; none of
/// them stop the swarm.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwarmError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("cannot connect to the local node")]
    SelfConnection,

    #[error("peer {0} unreachable: {1}")]
    Unreachable(PeerId, String),

    #[error("handshake with {0} failed: {1}")]
    HandshakeFailed(PeerId, String),

    #[error("request id {0} is already pending")]
    DuplicateRequestId(String),

    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    #[error("no session with {0}")]
    NotConnected(PeerId),

    #[error("request timed out")]
    Timeout,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("peer {0} was disconnected")]
    Disconnected(PeerId),

    #[error("swarm is shutting down")]
    Shutdown,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Failure to register or route a protocol message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DemuxError {
    #[error("protocol {0} already has a handler")]
    AlreadyRegistered(String),

    #[error("no handler for protocol {0}")]
    UnknownProtocol(String),

    #[error("handler for {protocol} rejected message: {source}")]
    Handler {
        protocol: String,
        source: HandlerError,
    },
}

/// Reported by a [`ProtocolHandler`](crate::ProtocolHandler) that could not
/// take a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("handler queue is full")]
    Busy,
    #[error("handler is gone")]
    Closed,
}
