//! Cloneable front end of a running swarm.

use std::sync::Arc;

use bytes::Bytes;
use libp2p::PeerId;
use strand_swarm_peer::LocalNode;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::pending::Callback;
use crate::{Demuxer, PeerState, SwarmConfig, SwarmError};

type Reply<T> = oneshot::Sender<Result<T, SwarmError>>;

#[derive(Debug)]
pub(crate) struct ConnectRequest {
    pub(crate) peer_id: PeerId,
    pub(crate) address: String,
    /// False only records the peer without dialing it.
    pub(crate) dial: bool,
    pub(crate) reply: Reply<()>,
}

#[derive(Debug)]
pub(crate) struct DisconnectRequest {
    pub(crate) peer_id: PeerId,
    pub(crate) reply: Reply<()>,
}

/// A request to deliver `payload` to a peer and wait for its response.
#[derive(Debug)]
pub struct SendMessageRequest {
    pub peer_id: PeerId,
    pub protocol: String,
    pub request_id: String,
    pub payload: Bytes,
    /// Receives the response body or the reason the request failed.
    pub callback: Option<Callback>,
}

#[derive(Debug)]
pub(crate) struct RespondRequest {
    pub(crate) peer_id: PeerId,
    pub(crate) protocol: String,
    pub(crate) request_id: String,
    pub(crate) body: Bytes,
    pub(crate) reply: Reply<()>,
}

#[derive(Debug)]
pub(crate) enum Query {
    Stats(oneshot::Sender<SwarmStats>),
    PeerState(PeerId, oneshot::Sender<PeerState>),
}

/// Sizes of the swarm's tables at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwarmStats {
    pub known_peers: usize,
    pub authenticated_peers: usize,
    pub connections: usize,
    /// Connections carrying an authenticated session.
    pub bound_connections: usize,
    pub pending_requests: usize,
    pub connecting_peers: usize,
}

#[derive(Debug)]
pub(crate) struct Commands {
    pub(crate) connect: mpsc::Receiver<ConnectRequest>,
    pub(crate) disconnect: mpsc::Receiver<DisconnectRequest>,
    pub(crate) send: mpsc::Receiver<SendMessageRequest>,
    pub(crate) respond: mpsc::Receiver<RespondRequest>,
    pub(crate) query: mpsc::Receiver<Query>,
}

/// Handle used by applications to drive a [`Swarm`](crate::Swarm).
///
/// Every method enqueues a command for the event loop; once the loop has
/// stopped they all fail with [`SwarmError::Shutdown`].
#[derive(Debug, Clone)]
pub struct SwarmHandle {
    local: Arc<LocalNode>,
    demuxer: Demuxer,
    connect: mpsc::Sender<ConnectRequest>,
    disconnect: mpsc::Sender<DisconnectRequest>,
    send: mpsc::Sender<SendMessageRequest>,
    respond: mpsc::Sender<RespondRequest>,
    query: mpsc::Sender<Query>,
    shutdown: CancellationToken,
}

impl SwarmHandle {
    pub(crate) fn new(
        local: Arc<LocalNode>,
        demuxer: Demuxer,
        config: &SwarmConfig,
        shutdown: CancellationToken,
    ) -> (Self, Commands) {
        // Tokio channels need room for at least one message.
        let (connect_tx, connect_rx) = mpsc::channel(config.connect_queue_size.max(1));
        let (disconnect_tx, disconnect_rx) = mpsc::channel(config.disconnect_queue_size.max(1));
        let (send_tx, send_rx) = mpsc::channel(config.send_queue_size.max(1));
        let (respond_tx, respond_rx) = mpsc::channel(config.respond_queue_size.max(1));
        let (query_tx, query_rx) = mpsc::channel(config.query_queue_size.max(1));

        let handle = Self {
            local,
            demuxer,
            connect: connect_tx,
            disconnect: disconnect_tx,
            send: send_tx,
            respond: respond_tx,
            query: query_tx,
            shutdown,
        };
        let commands = Commands {
            connect: connect_rx,
            disconnect: disconnect_rx,
            send: send_rx,
            respond: respond_rx,
            query: query_rx,
        };
        (handle, commands)
    }

    pub fn local_node(&self) -> &LocalNode {
        &self.local
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local.peer_id()
    }

    /// Protocol handler table consulted for inbound requests.
    pub fn demuxer(&self) -> &Demuxer {
        &self.demuxer
    }

    /// Resolves once an authenticated session with `peer_id` exists.
    ///
    /// `address` is a multiaddr or `ip:port`. Calls made while a connection
    /// to the same peer is already in progress wait for that attempt.
    pub async fn connect_to(&self, peer_id: PeerId, address: impl Into<String>) -> Result<(), SwarmError> {
        self.connect_request(peer_id, address.into(), true).await
    }

    /// Records `peer_id` as reachable at `address` without dialing it. The
    /// first message sent to it establishes the session.
    pub async fn add_peer(&self, peer_id: PeerId, address: impl Into<String>) -> Result<(), SwarmError> {
        self.connect_request(peer_id, address.into(), false).await
    }

    async fn connect_request(&self, peer_id: PeerId, address: String, dial: bool) -> Result<(), SwarmError> {
        let (reply, rx) = oneshot::channel();
        let request = ConnectRequest {
            peer_id,
            address,
            dial,
            reply,
        };
        self.connect.send(request).await.map_err(|_| SwarmError::Shutdown)?;
        rx.await.map_err(|_| SwarmError::Shutdown)?
    }

    /// Drops the session with `peer_id`, failing anything still waiting on
    /// it with [`SwarmError::Disconnected`].
    pub async fn disconnect_from(&self, peer_id: PeerId) -> Result<(), SwarmError> {
        let (reply, rx) = oneshot::channel();
        self.disconnect
            .send(DisconnectRequest { peer_id, reply })
            .await
            .map_err(|_| SwarmError::Shutdown)?;
        rx.await.map_err(|_| SwarmError::Shutdown)?
    }

    /// Sends a request and waits for the matching response body.
    pub async fn send_message(
        &self,
        peer_id: PeerId,
        protocol: impl Into<String>,
        request_id: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<Bytes, SwarmError> {
        let (callback, rx) = oneshot::channel();
        self.submit(SendMessageRequest {
            peer_id,
            protocol: protocol.into(),
            request_id: request_id.into(),
            payload: payload.into(),
            callback: Some(callback),
        })
        .await?;
        rx.await.map_err(|_| SwarmError::Shutdown)?
    }

    /// Enqueues a send request; waits only for room in the send queue.
    pub async fn submit(&self, request: SendMessageRequest) -> Result<(), SwarmError> {
        self.send.send(request).await.map_err(|_| SwarmError::Shutdown)
    }

    /// Answers an inbound request over the peer's current session.
    pub async fn respond(
        &self,
        peer_id: PeerId,
        protocol: impl Into<String>,
        request_id: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Result<(), SwarmError> {
        let (reply, rx) = oneshot::channel();
        self.respond
            .send(RespondRequest {
                peer_id,
                protocol: protocol.into(),
                request_id: request_id.into(),
                body: body.into(),
                reply,
            })
            .await
            .map_err(|_| SwarmError::Shutdown)?;
        rx.await.map_err(|_| SwarmError::Shutdown)?
    }

    pub async fn stats(&self) -> Result<SwarmStats, SwarmError> {
        let (tx, rx) = oneshot::channel();
        self.query.send(Query::Stats(tx)).await.map_err(|_| SwarmError::Shutdown)?;
        rx.await.map_err(|_| SwarmError::Shutdown)
    }

    pub async fn peer_state(&self, peer_id: PeerId) -> Result<PeerState, SwarmError> {
        let (tx, rx) = oneshot::channel();
        self.query
            .send(Query::PeerState(peer_id, tx))
            .await
            .map_err(|_| SwarmError::Shutdown)?;
        rx.await.map_err(|_| SwarmError::Shutdown)
    }

    /// Stops the event loop. Pending work fails with
    /// [`SwarmError::Shutdown`]. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
