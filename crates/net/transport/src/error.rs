use std::time::Duration;

use strand_net_codec::CodecError;

use crate::ConnectionId;

/// Errors produced by the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("outbound queue full on {0}")]
    QueueFull(ConnectionId),

    #[error("{0} is closed")]
    ConnectionClosed(ConnectionId),
}
