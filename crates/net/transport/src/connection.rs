//! Connection handles and the per-connection I/O task.

use std::net::SocketAddr;

use asynchronous_codec::Framed;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use strand_net_codec::{CodecError, FrameCodec};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::TransportError;
use crate::events::{ConnectionError, ConnectionMessage, EventSenders, SendError};

/// Process-unique identifier of one physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("conn-{_0}")]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

/// Which side opened the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn is_outbound(&self) -> bool {
        matches!(self, Self::Outbound)
    }
}

/// Handle to a live connection.
///
/// Cloning is cheap; every clone refers to the same socket. Dropping all
/// handles closes the connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    direction: Direction,
    outbound: mpsc::Sender<Bytes>,
    close: CancellationToken,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Queues one frame for writing. Never waits.
    pub fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.close.is_cancelled() {
            return Err(TransportError::ConnectionClosed(self.id));
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull(self.id),
            TrySendError::Closed(_) => TransportError::ConnectionClosed(self.id),
        })
    }

    /// Asks the I/O task to flush queued frames and shut the socket down.
    pub fn close(&self) {
        self.close.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled() || self.outbound.is_closed()
    }
}

pub(crate) struct ConnectionTask {
    id: ConnectionId,
    remote_addr: SocketAddr,
    stream: TcpStream,
    outbound: mpsc::Receiver<Bytes>,
    close: CancellationToken,
    codec: FrameCodec,
    events: EventSenders,
}

impl ConnectionTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        direction: Direction,
        stream: TcpStream,
        close: CancellationToken,
        codec: FrameCodec,
        queue_size: usize,
        events: EventSenders,
    ) -> (Connection, Self) {
        let (tx, rx) = mpsc::channel(queue_size);
        let handle = Connection {
            id,
            remote_addr,
            direction,
            outbound: tx,
            close: close.clone(),
        };
        let task = Self {
            id,
            remote_addr,
            stream,
            outbound: rx,
            close,
            codec,
            events,
        };
        (handle, task)
    }

    pub(crate) async fn run(self) {
        let Self {
            id,
            remote_addr,
            stream,
            mut outbound,
            close,
            codec,
            events,
        } = self;

        let mut framed = Framed::new(stream.compat(), codec);

        loop {
            tokio::select! {
                biased;

                _ = close.cancelled() => {
                    while let Ok(frame) = outbound.try_recv() {
                        if framed.send(frame).await.is_err() {
                            break;
                        }
                    }
                    debug!(connection_id = %id, %remote_addr, "Closing connection");
                    break;
                }

                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        debug!(connection_id = %id, "All connection handles dropped");
                        break;
                    };
                    trace!(connection_id = %id, len = frame.len(), "Writing frame");
                    if let Err(error) = framed.send(frame).await {
                        let _ = events
                            .send_errors
                            .send(SendError {
                                connection_id: id,
                                error: error.into(),
                            })
                            .await;
                        break;
                    }
                }

                incoming = framed.next() => match incoming {
                    Some(Ok(bytes)) => {
                        trace!(connection_id = %id, len = bytes.len(), "Read frame");
                        let message = ConnectionMessage { connection_id: id, bytes };
                        if events.incoming_messages.send(message).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        let error = match error {
                            CodecError::Io(io) => TransportError::Io(io),
                            other => TransportError::Codec(other),
                        };
                        let _ = events
                            .connection_errors
                            .send(ConnectionError {
                                connection_id: id,
                                remote_addr,
                                error,
                            })
                            .await;
                        break;
                    }
                    None => {
                        debug!(connection_id = %id, %remote_addr, "Connection closed by remote");
                        break;
                    }
                },
            }
        }

        let _ = framed.close().await;
        close.cancel();
        let _ = events.closed_connections.send(id).await;
    }
}
