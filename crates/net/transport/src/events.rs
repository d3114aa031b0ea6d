//! Event channels from the network to its owner.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{Connection, ConnectionId, TransportError};

/// A whole frame received on a connection.
#[derive(Debug, Clone)]
pub struct ConnectionMessage {
    pub connection_id: ConnectionId,
    pub bytes: Bytes,
}

/// A failed dial, or a read failure on an established connection.
#[derive(Debug)]
pub struct ConnectionError {
    pub connection_id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub error: TransportError,
}

/// A write failure on an established connection.
#[derive(Debug)]
pub struct SendError {
    pub connection_id: ConnectionId,
    pub error: TransportError,
}

/// Receiving halves of the network's event channels.
///
/// For every connection that is reported on `new_connections`, exactly one
/// id is later reported on `closed_connections`, after all of that
/// connection's messages and errors have been queued. A dial that never
/// connects is reported only on `connection_errors`.
#[derive(Debug)]
pub struct NetworkEvents {
    pub new_connections: mpsc::Receiver<Connection>,
    pub incoming_messages: mpsc::Receiver<ConnectionMessage>,
    pub connection_errors: mpsc::Receiver<ConnectionError>,
    pub send_errors: mpsc::Receiver<SendError>,
    pub closed_connections: mpsc::Receiver<ConnectionId>,
}

#[derive(Debug, Clone)]
pub(crate) struct EventSenders {
    pub(crate) new_connections: mpsc::Sender<Connection>,
    pub(crate) incoming_messages: mpsc::Sender<ConnectionMessage>,
    pub(crate) connection_errors: mpsc::Sender<ConnectionError>,
    pub(crate) send_errors: mpsc::Sender<SendError>,
    pub(crate) closed_connections: mpsc::Sender<ConnectionId>,
}

pub(crate) fn channels(capacity: usize) -> (EventSenders, NetworkEvents) {
    let (new_tx, new_rx) = mpsc::channel(capacity);
    let (msg_tx, msg_rx) = mpsc::channel(capacity);
    let (err_tx, err_rx) = mpsc::channel(capacity);
    let (send_err_tx, send_err_rx) = mpsc::channel(capacity);
    let (closed_tx, closed_rx) = mpsc::channel(capacity);

    (
        EventSenders {
            new_connections: new_tx,
            incoming_messages: msg_tx,
            connection_errors: err_tx,
            send_errors: send_err_tx,
            closed_connections: closed_tx,
        },
        NetworkEvents {
            new_connections: new_rx,
            incoming_messages: msg_rx,
            connection_errors: err_rx,
            send_errors: send_err_rx,
            closed_connections: closed_rx,
        },
    )
}
