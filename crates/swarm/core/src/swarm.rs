//! The swarm event loop.
//!
//! One task owns every table (known peers, live connections, the
//! connection to peer index and pending requests) and mutates them only in
//! response to a single event at a time. The sweep tick is polled first so
//! timeouts fire under any load. Network events come next, in the order new
//! connection, message, error, closed, so a connection's messages are
//! always seen after it was announced and before it is forgotten. Commands
//! come last.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use bytes::Bytes;
use libp2p::identity::Keypair;
use libp2p::{Multiaddr, PeerId};
use strand_net_proto::{
    DataEnvelope, Envelope, HandshakeData, HandshakeKind, MessageKind, ProtoMessage,
    ProtocolMessage, SessionId,
};
use strand_net_transport::{
    Connection, ConnectionError, ConnectionId, ConnectionMessage, Network, NetworkEvents,
    SendError, TransportError,
};
use strand_swarm_handshake::{HandshakeOutcome, HandshakeProtocol, SignedHandshake};
use strand_swarm_peer::{LocalNode, RemoteNode, Session, parse_address};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::handle::{Commands, ConnectRequest, DisconnectRequest, Query, RespondRequest};
use crate::link::{Connecting, PeerLink};
use crate::metrics::SwarmMetrics;
use crate::pending::{Delivery, PendingRequest, PendingRequests};
use crate::{
    Demuxer, InboundRequest, PeerState, SendMessageRequest, SwarmConfig, SwarmError, SwarmHandle,
    SwarmStats,
};

/// Owner of all peer, connection and request state.
///
/// Created together with a [`SwarmHandle`]; does nothing until
/// [`run`](Self::run) is polled.
pub struct Swarm {
    config: SwarmConfig,
    local: Arc<LocalNode>,
    network: Network,
    events: NetworkEvents,
    handshake: Box<dyn HandshakeProtocol>,
    demuxer: Demuxer,

    peers: HashMap<PeerId, RemoteNode>,
    connections: HashMap<ConnectionId, Connection>,
    peer_by_connection: HashMap<ConnectionId, PeerId>,
    pending: PendingRequests,

    links: HashMap<PeerId, PeerLink>,
    /// Outbound connections whose handshake has not completed, and the
    /// peer they were dialed for.
    dial_targets: HashMap<ConnectionId, PeerId>,
    /// Connections without a session, and when they appeared.
    unbound_since: HashMap<ConnectionId, Instant>,
    /// Inbound connections whose initiation we answered, waiting for the
    /// initiator to confirm that session.
    confirming: HashMap<ConnectionId, SessionId>,

    commands: Commands,
    shutdown: CancellationToken,
    metrics: SwarmMetrics,
}

impl Swarm {
    /// Binds the listener and builds a swarm using [`SignedHandshake`].
    pub async fn bind(
        config: SwarmConfig,
        keypair: Keypair,
    ) -> Result<(Self, SwarmHandle), SwarmError> {
        let (network, events) = Network::bind(config.transport.clone())
            .await
            .map_err(|e| SwarmError::Transport(e.to_string()))?;
        let local = Arc::new(LocalNode::new(keypair, network.local_addr()));
        let handshake = Box::new(SignedHandshake::new(local.clone()));
        Ok(Self::new(config, local, network, events, handshake))
    }

    /// Binds and runs a swarm on the current runtime.
    pub async fn spawn(
        config: SwarmConfig,
        keypair: Keypair,
    ) -> Result<(SwarmHandle, JoinHandle<()>), SwarmError> {
        let (swarm, handle) = Self::bind(config, keypair).await?;
        Ok((handle, tokio::spawn(swarm.run())))
    }

    pub fn new(
        config: SwarmConfig,
        local: Arc<LocalNode>,
        network: Network,
        events: NetworkEvents,
        handshake: Box<dyn HandshakeProtocol>,
    ) -> (Self, SwarmHandle) {
        let demuxer = Demuxer::new();
        let shutdown = CancellationToken::new();
        let (handle, commands) =
            SwarmHandle::new(local.clone(), demuxer.clone(), &config, shutdown.clone());

        let swarm = Self {
            config,
            local,
            network,
            events,
            handshake,
            demuxer,
            peers: HashMap::new(),
            connections: HashMap::new(),
            peer_by_connection: HashMap::new(),
            pending: PendingRequests::default(),
            links: HashMap::new(),
            dial_targets: HashMap::new(),
            unbound_since: HashMap::new(),
            confirming: HashMap::new(),
            commands,
            shutdown,
            metrics: SwarmMetrics::default(),
        };
        (swarm, handle)
    }

    /// Runs the event loop until [`SwarmHandle::shutdown`] is called.
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            peer_id = %self.local.peer_id(),
            listen_addr = %self.network.local_addr(),
            "Swarm started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                _ = sweep.tick() => self.sweep(),

                Some(connection) = self.events.new_connections.recv() => {
                    self.on_new_connection(connection);
                }
                Some(message) = self.events.incoming_messages.recv() => {
                    self.on_message(message);
                }
                Some(error) = self.events.connection_errors.recv() => {
                    self.on_connection_error(error);
                }
                Some(error) = self.events.send_errors.recv() => {
                    self.on_send_error(error);
                }
                Some(id) = self.events.closed_connections.recv() => {
                    self.release_connection(id, "connection closed", true);
                }

                Some(request) = self.commands.connect.recv() => self.on_connect(request),
                Some(request) = self.commands.disconnect.recv() => self.on_disconnect(request),
                Some(request) = self.commands.send.recv() => self.on_send(request),
                Some(request) = self.commands.respond.recv() => self.on_respond(request),
                Some(query) = self.commands.query.recv() => self.on_query(query),
            }

            self.metrics.record_tables(
                self.connections.len(),
                self.peer_by_connection.len(),
                self.pending.len(),
            );
        }

        self.drain();
    }

    // --- network events ---

    fn on_new_connection(&mut self, connection: Connection) {
        let id = connection.id();
        let outbound = connection.direction().is_outbound();
        trace!(
            connection_id = %id,
            remote_addr = %connection.remote_addr(),
            outbound,
            "New connection"
        );

        self.connections.insert(id, connection);
        self.unbound_since.insert(id, Instant::now());

        match self.dial_targets.get(&id).copied() {
            Some(peer_id) => self.initiate_handshake(peer_id, id),
            // A dial that was abandoned while in progress.
            None if outbound => self.release_connection(id, "dial abandoned", false),
            None => {}
        }
    }

    fn on_message(&mut self, message: ConnectionMessage) {
        let ConnectionMessage {
            connection_id,
            bytes,
        } = message;
        if !self.connections.contains_key(&connection_id) {
            trace!(%connection_id, "Message on released connection");
            return;
        }

        match Envelope::decode_from_bytes(&bytes) {
            Ok(Envelope::Handshake(data)) => self.on_handshake(connection_id, data),
            Ok(Envelope::Data(data)) => self.on_data(connection_id, data),
            Err(error) => {
                self.protocol_violation(connection_id, &format!("malformed envelope: {error}"));
            }
        }
    }

    fn on_connection_error(&mut self, error: ConnectionError) {
        debug!(
            connection_id = %error.connection_id,
            remote_addr = %error.remote_addr,
            error = %error.error,
            "Connection error"
        );
        match error.error {
            // The remote sent a frame we refuse to read.
            TransportError::Codec(codec) => {
                self.protocol_violation(error.connection_id, &format!("bad frame: {codec}"));
            }
            other => self.release_connection(error.connection_id, &other.to_string(), true),
        }
    }

    fn on_send_error(&mut self, error: SendError) {
        debug!(connection_id = %error.connection_id, error = %error.error, "Send error");
        self.release_connection(error.connection_id, &error.error.to_string(), true);
    }

    // --- handshake ---

    fn initiate_handshake(&mut self, peer_id: PeerId, connection_id: ConnectionId) {
        let Some(remote) = self.peers.get(&peer_id) else {
            self.release_connection(connection_id, "peer forgotten", false);
            return;
        };

        match self.handshake.initiate(remote) {
            Ok(data) => {
                if let Err(error) = self.write(connection_id, Envelope::from(data)) {
                    debug!(%peer_id, %connection_id, %error, "Failed to send handshake");
                }
            }
            Err(error) => {
                self.metrics.handshakes_failed.increment(1);
                self.release_connection(connection_id, &error.to_string(), false);
            }
        }
    }

    fn on_handshake(&mut self, connection_id: ConnectionId, data: HandshakeData) {
        if self.peer_by_connection.contains_key(&connection_id) {
            self.protocol_violation(connection_id, "handshake on an established session");
            return;
        }
        if data.kind == HandshakeKind::Init && self.confirming.contains_key(&connection_id) {
            self.protocol_violation(connection_id, "second initiation on a connection");
            return;
        }
        let Some((observed, outbound)) = self
            .connections
            .get(&connection_id)
            .map(|c| (c.remote_addr(), c.direction().is_outbound()))
        else {
            return;
        };
        let expected = self.dial_targets.get(&connection_id).copied();

        match self.handshake.on_message(data, observed) {
            Ok(HandshakeOutcome::Accepted {
                peer_id,
                session_id,
                reply,
            }) => {
                self.confirming.insert(connection_id, session_id);
                if outbound {
                    self.protocol_violation(connection_id, "initiation on a dialed connection");
                    return;
                }
                if let Err(error) = self.write(connection_id, Envelope::from(reply)) {
                    debug!(%peer_id, %connection_id, %error, "Failed to answer handshake");
                }
            }
            Ok(HandshakeOutcome::Established {
                peer_id,
                address,
                session,
                confirm,
            }) => {
                if expected != Some(peer_id) {
                    self.protocol_violation(connection_id, "handshake from unexpected peer");
                    return;
                }
                if let Err(error) = self.write(connection_id, Envelope::from(confirm)) {
                    debug!(%peer_id, %connection_id, %error, "Failed to confirm handshake");
                    return;
                }
                self.dial_targets.remove(&connection_id);
                self.bind_session(peer_id, connection_id, session, address);
            }
            Ok(HandshakeOutcome::Confirmed {
                peer_id,
                address,
                session,
            }) => {
                if self.confirming.get(&connection_id) != Some(&session.id()) {
                    self.protocol_violation(connection_id, "confirmation for another connection");
                    return;
                }
                self.confirming.remove(&connection_id);
                self.bind_session(peer_id, connection_id, session, address);
            }
            Err(error) => {
                warn!(%connection_id, %observed, %error, "Handshake failed");
                self.metrics.handshakes_failed.increment(1);
                self.release_connection(connection_id, &error.to_string(), false);
            }
        }
    }

    /// Attaches a freshly authenticated session to `peer_id`.
    ///
    /// When the peer already has a session on another connection only one
    /// survives: the one opened by the peer with the lower id, or the newer
    /// one if both were opened by the same side. Both ends apply the same
    /// rule and so settle on the same connection.
    fn bind_session(
        &mut self,
        peer_id: PeerId,
        connection_id: ConnectionId,
        session: Session,
        address: Multiaddr,
    ) {
        self.unbound_since.remove(&connection_id);

        let known = match self.peers.entry(peer_id) {
            Entry::Occupied(entry) => {
                if let Err(error) = entry.into_mut().set_address(address) {
                    debug!(%peer_id, %error, "Keeping previous address");
                }
                Ok(())
            }
            Entry::Vacant(entry) => RemoteNode::from_multiaddr(peer_id, address).map(|remote| {
                entry.insert(remote);
            }),
        };
        if let Err(error) = known {
            self.protocol_violation(connection_id, &error.to_string());
            return;
        }

        let existing = self
            .peers
            .get(&peer_id)
            .filter(|remote| remote.has_session())
            .and_then(RemoteNode::connection)
            .filter(|old| *old != connection_id);

        if let Some(old) = existing {
            if !self.supersedes(peer_id, connection_id, old) {
                debug!(
                    %peer_id,
                    kept = %old,
                    dropped = %connection_id,
                    "Dropping duplicate connection"
                );
                self.release_connection(connection_id, "duplicate connection", false);
                self.complete_link(peer_id);
                return;
            }

            debug!(%peer_id, kept = %connection_id, dropped = %old, "Replacing connection");
            self.peer_by_connection.remove(&old);
            for request_id in self.pending.in_flight_on(old) {
                if let Some(request) = self.pending.get_mut(&request_id) {
                    request.delivery = Delivery::Queued;
                }
            }
            self.release_connection(old, "superseded", false);
        }

        let Some(remote) = self.peers.get_mut(&peer_id) else {
            return;
        };
        let session_id = session.id();
        remote.attach_session(session, connection_id);
        self.peer_by_connection.insert(connection_id, peer_id);
        self.metrics.handshakes_completed.increment(1);
        info!(
            %peer_id,
            %connection_id,
            %session_id,
            address = %remote.address(),
            "Session established"
        );

        self.complete_link(peer_id);
    }

    /// Whether `new` should replace `old` as the connection to `peer_id`.
    fn supersedes(&self, peer_id: PeerId, new: ConnectionId, old: ConnectionId) -> bool {
        let local = self.local.peer_id();
        let preferred = local.min(peer_id);
        let initiator = |id: &ConnectionId| {
            self.connections.get(id).map(|c| {
                if c.direction().is_outbound() {
                    local
                } else {
                    peer_id
                }
            })
        };

        match (initiator(&new), initiator(&old)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(new), Some(old)) => new == preferred || old != preferred,
        }
    }

    // --- data ---

    fn on_data(&mut self, connection_id: ConnectionId, data: DataEnvelope) {
        let Some(peer_id) = self.peer_by_connection.get(&connection_id).copied() else {
            self.protocol_violation(connection_id, "data before handshake");
            return;
        };
        let opened = self
            .peers
            .get(&peer_id)
            .filter(|remote| remote.connection() == Some(connection_id))
            .and_then(|remote| remote.get_session(|session| open(session, &data)));

        let message = match opened {
            Some(Ok(message)) => message,
            Some(Err(reason)) => {
                self.protocol_violation(connection_id, &reason);
                return;
            }
            None => {
                self.protocol_violation(connection_id, "no session on connection");
                return;
            }
        };
        self.metrics.messages_received.increment(1);

        match message.kind {
            MessageKind::Response => self.on_response(peer_id, message),
            MessageKind::Request => {
                let request = InboundRequest {
                    peer_id,
                    protocol: message.protocol,
                    request_id: message.request_id,
                    session_id: message.session_id,
                    body: message.body,
                };
                if let Err(error) = self.demuxer.route_incoming_message(request) {
                    warn!(%peer_id, %error, "Dropping inbound request");
                    self.metrics.unroutable_messages.increment(1);
                }
            }
        }
    }

    fn on_response(&mut self, peer_id: PeerId, message: ProtocolMessage) {
        let solicited = self
            .pending
            .get(&message.request_id)
            .is_some_and(|r| r.peer_id == peer_id && r.protocol == message.protocol);

        if solicited {
            trace!(%peer_id, request_id = %message.request_id, "Request answered");
            self.pending.retire(&message.request_id, Ok(message.body));
        } else {
            debug!(%peer_id, request_id = %message.request_id, "Dropping unsolicited response");
            self.metrics.unroutable_messages.increment(1);
        }
    }

    /// Sends a pending request over the peer's session, or starts
    /// establishing one and leaves the request queued.
    fn transmit(&mut self, request_id: &str) {
        let Some(request) = self.pending.get(request_id) else {
            return;
        };
        let peer_id = request.peer_id;
        let protocol = request.protocol.clone();
        let payload = request.payload.clone();

        let (connection_id, frame) =
            match self.seal(peer_id, MessageKind::Request, &protocol, request_id, payload) {
                Ok(sealed) => sealed,
                Err(SwarmError::NotConnected(_)) => {
                    self.ensure_link(peer_id);
                    return;
                }
                Err(error) => {
                    self.pending.retire(request_id, Err(error));
                    return;
                }
            };

        match self.connections.get(&connection_id).map(|c| c.send(frame)) {
            // A closed connection is reported shortly; the request is
            // re-queued from there.
            Some(Ok(())) | Some(Err(TransportError::ConnectionClosed(_))) => {
                self.pending.mark_in_flight(request_id, connection_id);
                self.metrics.messages_sent.increment(1);
                trace!(%peer_id, %connection_id, %request_id, "Request sent");
            }
            Some(Err(error)) => {
                self.pending
                    .retire(request_id, Err(SwarmError::SendFailed(error.to_string())));
            }
            None => {
                self.pending.retire(
                    request_id,
                    Err(SwarmError::SendFailed(format!("{connection_id} is gone"))),
                );
            }
        }
    }

    fn flush_queued(&mut self, peer_id: PeerId) {
        for request_id in self.pending.queued_for(&peer_id) {
            self.transmit(&request_id);
        }
    }

    /// Encrypts a protocol message for the peer's current session.
    fn seal(
        &self,
        peer_id: PeerId,
        kind: MessageKind,
        protocol: &str,
        request_id: &str,
        body: Bytes,
    ) -> Result<(ConnectionId, Bytes), SwarmError> {
        let remote = self
            .peers
            .get(&peer_id)
            .ok_or(SwarmError::UnknownPeer(peer_id))?;
        let connection_id = remote
            .connection()
            .ok_or(SwarmError::NotConnected(peer_id))?;
        let frame = remote
            .get_session(|session| seal(session, kind, protocol, request_id, body))
            .ok_or(SwarmError::NotConnected(peer_id))??;
        Ok((connection_id, frame))
    }

    fn write(&self, connection_id: ConnectionId, envelope: Envelope) -> Result<(), SwarmError> {
        let connection = self
            .connections
            .get(&connection_id)
            .ok_or_else(|| SwarmError::SendFailed(format!("{connection_id} is gone")))?;
        let frame = envelope
            .encode_to_bytes()
            .map_err(|e| SwarmError::SendFailed(e.to_string()))?;
        connection
            .send(frame)
            .map_err(|e| SwarmError::SendFailed(e.to_string()))
    }

    // --- links ---

    /// Starts connecting to `peer_id` unless an attempt is already running.
    fn ensure_link(&mut self, peer_id: PeerId) {
        if matches!(self.links.get(&peer_id), Some(PeerLink::Connecting(_))) {
            return;
        }
        let Some(addr) = self.peers.get(&peer_id).map(RemoteNode::socket_addr) else {
            return;
        };

        let connection_id = self.network.dial(addr);
        debug!(%peer_id, %addr, %connection_id, "Connecting");
        self.dial_targets.insert(connection_id, peer_id);
        self.links.insert(
            peer_id,
            PeerLink::Connecting(Connecting::new(
                connection_id,
                Instant::now() + self.config.handshake_timeout,
            )),
        );
    }

    fn redial(&mut self, peer_id: PeerId) {
        let Some(addr) = self.peers.get(&peer_id).map(RemoteNode::socket_addr) else {
            self.fail_link(peer_id, SwarmError::UnknownPeer(peer_id));
            return;
        };
        let Some(PeerLink::Connecting(link)) = self.links.get_mut(&peer_id) else {
            return;
        };

        let connection_id = self.network.dial(addr);
        link.connection = Some(connection_id);
        link.attempts += 1;
        link.retry_at = None;
        link.deadline = Instant::now() + self.config.handshake_timeout;
        debug!(%peer_id, %addr, %connection_id, attempt = link.attempts, "Redialing");
        self.dial_targets.insert(connection_id, peer_id);
    }

    /// Settles a connect attempt after its connection went away.
    fn dial_lost(
        &mut self,
        peer_id: PeerId,
        connection_id: ConnectionId,
        reason: &str,
        retry: bool,
    ) {
        let Some(PeerLink::Connecting(link)) = self.links.get_mut(&peer_id) else {
            return;
        };
        if link.connection != Some(connection_id) {
            return;
        }
        link.connection = None;
        link.last_error = Some(reason.to_owned());
        self.handshake.abandon(&peer_id);

        if self.peers.get(&peer_id).is_some_and(RemoteNode::has_session) {
            self.complete_link(peer_id);
        } else if retry && link.attempts < self.config.max_dial_attempts {
            link.retry_at = Some(Instant::now() + self.config.dial_backoff);
            debug!(%peer_id, attempt = link.attempts, %reason, "Connect attempt failed, retrying");
        } else if retry {
            self.fail_link(peer_id, SwarmError::Unreachable(peer_id, reason.to_owned()));
        } else {
            self.fail_link(peer_id, SwarmError::HandshakeFailed(peer_id, reason.to_owned()));
        }
    }

    fn complete_link(&mut self, peer_id: PeerId) {
        if let Some(PeerLink::Connecting(link)) = self.links.remove(&peer_id) {
            link.settle(Ok(()));
        }
        self.flush_queued(peer_id);
    }

    /// Gives up connecting to `peer_id`, failing its waiters and every
    /// request still queued for it.
    fn fail_link(&mut self, peer_id: PeerId, error: SwarmError) {
        if let Some(PeerLink::Connecting(link)) = self.links.insert(peer_id, PeerLink::Failed) {
            if let Some(connection_id) = link.connection {
                self.dial_targets.remove(&connection_id);
                self.release_connection(connection_id, "connect abandoned", false);
            }
            self.handshake.abandon(&peer_id);
            link.settle(Err(error.clone()));
        }
        warn!(%peer_id, %error, "Connect failed");

        for request_id in self.pending.queued_for(&peer_id) {
            self.pending.retire(&request_id, Err(error.clone()));
        }
    }

    // --- connection teardown ---

    /// Forgets `connection_id` everywhere and closes it.
    ///
    /// With `retry`, the connect attempt it carried may be repeated and its
    /// in-flight requests re-sent up to the configured limits; otherwise
    /// both fail right away. Calling this for an already released id does
    /// nothing.
    fn release_connection(&mut self, connection_id: ConnectionId, reason: &str, retry: bool) {
        if let Some(connection) = self.connections.remove(&connection_id) {
            connection.close();
        }
        self.unbound_since.remove(&connection_id);
        if let Some(session_id) = self.confirming.remove(&connection_id) {
            self.handshake.cancel(&session_id);
        }

        if let Some(peer_id) = self.dial_targets.remove(&connection_id) {
            self.dial_lost(peer_id, connection_id, reason, retry);
        }

        let Some(peer_id) = self.peer_by_connection.remove(&connection_id) else {
            return;
        };
        if let Some(remote) = self.peers.get_mut(&peer_id) {
            if remote.connection() == Some(connection_id) {
                remote.clear_session();
                debug!(%peer_id, %connection_id, %reason, "Session lost");
            }
        }

        let mut requeued = false;
        for request_id in self.pending.in_flight_on(connection_id) {
            let Some(request) = self.pending.get_mut(&request_id) else {
                continue;
            };
            if retry && request.retries < self.config.max_send_retries {
                request.retries += 1;
                request.delivery = Delivery::Queued;
                requeued = true;
            } else {
                self.pending
                    .retire(&request_id, Err(SwarmError::SendFailed(reason.to_owned())));
            }
        }

        if requeued {
            if self.peers.get(&peer_id).is_some_and(RemoteNode::has_session) {
                self.flush_queued(peer_id);
            } else {
                self.ensure_link(peer_id);
            }
        }
    }

    fn protocol_violation(&mut self, connection_id: ConnectionId, reason: &str) {
        warn!(
            %connection_id,
            peer_id = ?self.peer_by_connection.get(&connection_id),
            %reason,
            "Protocol violation, closing connection"
        );
        self.metrics.protocol_violations.increment(1);
        self.release_connection(connection_id, reason, false);
    }

    // --- commands ---

    fn on_connect(&mut self, request: ConnectRequest) {
        let ConnectRequest {
            peer_id,
            address,
            dial,
            reply,
        } = request;

        if peer_id == self.local.peer_id() {
            let _ = reply.send(Err(SwarmError::SelfConnection));
            return;
        }
        let address = match parse_address(&address) {
            Ok(address) => address,
            Err(error) => {
                let _ = reply.send(Err(SwarmError::InvalidAddress(error.to_string())));
                return;
            }
        };

        let known = match self.peers.entry(peer_id) {
            Entry::Occupied(entry) => {
                let remote = entry.into_mut();
                if remote.has_session() {
                    Ok(())
                } else {
                    remote.set_address(address)
                }
            }
            Entry::Vacant(entry) => RemoteNode::from_multiaddr(peer_id, address).map(|remote| {
                entry.insert(remote);
            }),
        };
        if let Err(error) = known {
            let _ = reply.send(Err(SwarmError::InvalidAddress(error.to_string())));
            return;
        }

        if !dial || self.peers.get(&peer_id).is_some_and(RemoteNode::has_session) {
            let _ = reply.send(Ok(()));
            return;
        }

        self.ensure_link(peer_id);
        match self.links.get_mut(&peer_id) {
            Some(PeerLink::Connecting(link)) => link.waiters.push(reply),
            _ => {
                let _ = reply.send(Err(SwarmError::UnknownPeer(peer_id)));
            }
        }
    }

    fn on_disconnect(&mut self, request: DisconnectRequest) {
        let DisconnectRequest { peer_id, reply } = request;
        let error = SwarmError::Disconnected(peer_id);

        if let Some(PeerLink::Connecting(link)) = self.links.remove(&peer_id) {
            link.settle(Err(error.clone()));
        }
        self.handshake.abandon(&peer_id);

        let dials: Vec<_> = self
            .dial_targets
            .iter()
            .filter(|(_, target)| **target == peer_id)
            .map(|(id, _)| *id)
            .collect();
        for connection_id in dials {
            self.dial_targets.remove(&connection_id);
            self.release_connection(connection_id, "disconnected", false);
        }

        for request_id in self.pending.for_peer(&peer_id) {
            self.pending.retire(&request_id, Err(error.clone()));
        }

        if let Some(connection_id) = self.peers.get(&peer_id).and_then(RemoteNode::connection) {
            self.release_connection(connection_id, "disconnected", false);
            info!(%peer_id, %connection_id, "Disconnected");
        }
        let _ = reply.send(Ok(()));
    }

    fn on_send(&mut self, request: SendMessageRequest) {
        let SendMessageRequest {
            peer_id,
            protocol,
            request_id,
            payload,
            callback,
        } = request;

        let rejection = if protocol.is_empty() || request_id.is_empty() {
            Some(SwarmError::SendFailed("protocol and request id must be set".to_owned()))
        } else if !self.peers.contains_key(&peer_id) {
            Some(SwarmError::UnknownPeer(peer_id))
        } else {
            None
        };
        if let Some(error) = rejection {
            if let Some(callback) = callback {
                let _ = callback.send(Err(error));
            }
            return;
        }

        let deadline = Instant::now() + self.config.request_timeout;
        let pending = PendingRequest::new(peer_id, protocol, payload, deadline, callback);
        if let Err(rejected) = self.pending.insert(request_id.clone(), pending) {
            debug!(%peer_id, %request_id, "Rejecting duplicate request id");
            rejected.resolve(Err(SwarmError::DuplicateRequestId(request_id)));
            return;
        }

        self.transmit(&request_id);
    }

    fn on_respond(&mut self, request: RespondRequest) {
        let RespondRequest {
            peer_id,
            protocol,
            request_id,
            body,
            reply,
        } = request;

        let result = self
            .seal(peer_id, MessageKind::Response, &protocol, &request_id, body)
            .and_then(|(connection_id, frame)| {
                let connection = self
                    .connections
                    .get(&connection_id)
                    .ok_or(SwarmError::NotConnected(peer_id))?;
                connection
                    .send(frame)
                    .map_err(|e| SwarmError::SendFailed(e.to_string()))
            });

        match &result {
            Ok(()) => self.metrics.messages_sent.increment(1),
            Err(error) => debug!(%peer_id, %request_id, %error, "Failed to respond"),
        }
        let _ = reply.send(result);
    }

    fn on_query(&self, query: Query) {
        match query {
            Query::Stats(tx) => {
                let _ = tx.send(self.stats());
            }
            Query::PeerState(peer_id, tx) => {
                let _ = tx.send(self.peer_state(&peer_id));
            }
        }
    }

    fn stats(&self) -> SwarmStats {
        SwarmStats {
            known_peers: self.peers.len(),
            authenticated_peers: self.peers.values().filter(|r| r.has_session()).count(),
            connections: self.connections.len(),
            bound_connections: self.peer_by_connection.len(),
            pending_requests: self.pending.len(),
            connecting_peers: self
                .links
                .values()
                .filter(|link| matches!(link, PeerLink::Connecting(_)))
                .count(),
        }
    }

    fn peer_state(&self, peer_id: &PeerId) -> PeerState {
        let Some(remote) = self.peers.get(peer_id) else {
            return PeerState::Unknown;
        };
        if remote.has_session() {
            return PeerState::Authenticated;
        }
        match self.links.get(peer_id) {
            Some(PeerLink::Connecting(_)) => PeerState::Connecting,
            Some(PeerLink::Failed) => PeerState::Failed,
            None => PeerState::Idle,
        }
    }

    // --- timers ---

    fn sweep(&mut self) {
        let now = Instant::now();

        for request_id in self.pending.expired(now) {
            if self.pending.retire(&request_id, Err(SwarmError::Timeout)) {
                debug!(%request_id, "Request timed out");
                self.metrics.requests_timed_out.increment(1);
            }
        }

        let mut redial = Vec::new();
        let mut overdue = Vec::new();
        for (peer_id, link) in &self.links {
            let PeerLink::Connecting(link) = link else {
                continue;
            };
            match link.connection {
                Some(connection_id) if link.deadline <= now => overdue.push(connection_id),
                None if link.retry_at.is_some_and(|at| at <= now) => redial.push(*peer_id),
                _ => {}
            }
        }
        for connection_id in overdue {
            self.release_connection(connection_id, "handshake timed out", true);
        }
        for peer_id in redial {
            self.redial(peer_id);
        }

        let stale: Vec<_> = self
            .unbound_since
            .iter()
            .filter(|(_, since)| now.duration_since(**since) >= self.config.handshake_timeout)
            .map(|(id, _)| *id)
            .collect();
        for connection_id in stale {
            debug!(%connection_id, "Closing connection without session");
            self.release_connection(connection_id, "handshake timed out", true);
        }
    }

    // --- shutdown ---

    fn drain(&mut self) {
        info!(peer_id = %self.local.peer_id(), "Swarm shutting down");
        self.shutdown.cancel();

        for (_, link) in self.links.drain() {
            if let PeerLink::Connecting(link) = link {
                link.settle(Err(SwarmError::Shutdown));
            }
        }
        self.pending.drain(SwarmError::Shutdown);

        for (_, connection) in self.connections.drain() {
            connection.close();
        }
        for remote in self.peers.values_mut() {
            remote.clear_session();
        }
        self.peer_by_connection.clear();
        self.dial_targets.clear();
        self.unbound_since.clear();
        self.confirming.clear();
        self.network.shutdown();

        let commands = &mut self.commands;
        commands.connect.close();
        while let Ok(request) = commands.connect.try_recv() {
            let _ = request.reply.send(Err(SwarmError::Shutdown));
        }
        commands.disconnect.close();
        while let Ok(request) = commands.disconnect.try_recv() {
            let _ = request.reply.send(Err(SwarmError::Shutdown));
        }
        commands.send.close();
        while let Ok(request) = commands.send.try_recv() {
            if let Some(callback) = request.callback {
                let _ = callback.send(Err(SwarmError::Shutdown));
            }
        }
        commands.respond.close();
        while let Ok(request) = commands.respond.try_recv() {
            let _ = request.reply.send(Err(SwarmError::Shutdown));
        }
        commands.query.close();
        self.metrics.record_tables(0, 0, 0);
    }
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("peer_id", &self.local.peer_id())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn seal(
    session: &Session,
    kind: MessageKind,
    protocol: &str,
    request_id: &str,
    body: Bytes,
) -> Result<Bytes, SwarmError> {
    let message = ProtocolMessage {
        protocol: protocol.to_owned(),
        request_id: request_id.to_owned(),
        session_id: session.id(),
        body,
        kind,
    };
    let plaintext = message
        .encode_to_bytes()
        .map_err(|e| SwarmError::SendFailed(e.to_string()))?;
    let ciphertext = session
        .encrypt(&plaintext)
        .map_err(|e| SwarmError::SendFailed(e.to_string()))?;
    Envelope::data(session.id(), ciphertext)
        .encode_to_bytes()
        .map_err(|e| SwarmError::SendFailed(e.to_string()))
}

fn open(session: &Session, envelope: &DataEnvelope) -> Result<ProtocolMessage, String> {
    if envelope.session_id != session.id() {
        return Err(format!("unknown session {}", envelope.session_id));
    }
    let plaintext = session
        .decrypt(&envelope.payload)
        .map_err(|e| e.to_string())?;
    let message = ProtocolMessage::decode_from_bytes(&plaintext).map_err(|e| e.to_string())?;
    if message.session_id != session.id() {
        return Err("inner session id mismatch".to_owned());
    }
    Ok(message)
}
