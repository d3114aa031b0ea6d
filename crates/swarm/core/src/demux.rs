//! Routing of inbound requests to per-protocol handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use libp2p::PeerId;
use parking_lot::RwLock;
use strand_net_proto::SessionId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use crate::{DemuxError, HandlerError};

/// A decrypted request addressed to a local protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub peer_id: PeerId,
    pub protocol: String,
    pub request_id: String,
    pub session_id: SessionId,
    pub body: Bytes,
}

/// Consumer of inbound requests for one protocol.
///
/// Called on the swarm event loop. Implementations must hand the request
/// off without blocking; a handler that needs to reply does so later via
/// [`SwarmHandle::respond`](crate::SwarmHandle::respond).
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait ProtocolHandler: Send + Sync {
    fn handle(&self, request: InboundRequest) -> Result<(), HandlerError>;
}

impl ProtocolHandler for mpsc::Sender<InboundRequest> {
    fn handle(&self, request: InboundRequest) -> Result<(), HandlerError> {
        self.try_send(request).map_err(|e| match e {
            TrySendError::Full(_) => HandlerError::Busy,
            TrySendError::Closed(_) => HandlerError::Closed,
        })
    }
}

impl ProtocolHandler for mpsc::UnboundedSender<InboundRequest> {
    fn handle(&self, request: InboundRequest) -> Result<(), HandlerError> {
        self.send(request).map_err(|_| HandlerError::Closed)
    }
}

/// Handler backed by a plain closure. See [`handler_fn`].
pub struct FnHandler<F>(F);

impl<F> ProtocolHandler for FnHandler<F>
where
    F: Fn(InboundRequest) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, request: InboundRequest) -> Result<(), HandlerError> {
        (self.0)(request)
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler(..)")
    }
}

pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(InboundRequest) -> Result<(), HandlerError> + Send + Sync,
{
    FnHandler(f)
}

/// Protocol id to handler table.
///
/// Cloning shares the table. Registration may happen from any task while
/// the swarm is running; routing never holds the lock while a handler runs.
#[derive(Clone, Default)]
pub struct Demuxer {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn ProtocolHandler>>>>,
}

impl Demuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_protocol_handler(
        &self,
        protocol: impl Into<String>,
        handler: impl ProtocolHandler + 'static,
    ) -> Result<(), DemuxError> {
        let protocol = protocol.into();
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&protocol) {
            return Err(DemuxError::AlreadyRegistered(protocol));
        }
        debug!(%protocol, "Registered protocol handler");
        handlers.insert(protocol, Arc::new(handler));
        Ok(())
    }

    /// Removes the handler for `protocol`, returning whether one existed.
    pub fn deregister_protocol_handler(&self, protocol: &str) -> bool {
        let removed = self.handlers.write().remove(protocol).is_some();
        if removed {
            debug!(%protocol, "Deregistered protocol handler");
        }
        removed
    }

    pub fn has_handler(&self, protocol: &str) -> bool {
        self.handlers.read().contains_key(protocol)
    }

    /// Registered protocol ids, sorted.
    pub fn protocols(&self) -> Vec<String> {
        let mut protocols: Vec<_> = self.handlers.read().keys().cloned().collect();
        protocols.sort();
        protocols
    }

    pub fn route_incoming_message(&self, request: InboundRequest) -> Result<(), DemuxError> {
        let handler = self.handlers.read().get(&request.protocol).cloned();
        let Some(handler) = handler else {
            return Err(DemuxError::UnknownProtocol(request.protocol));
        };

        let protocol = request.protocol.clone();
        trace!(%protocol, request_id = %request.request_id, peer_id = %request.peer_id, "Routing request");
        handler
            .handle(request)
            .map_err(|source| DemuxError::Handler { protocol, source })
    }
}

impl fmt::Debug for Demuxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demuxer")
            .field("protocols", &self.protocols())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(protocol: &str) -> InboundRequest {
        InboundRequest {
            peer_id: PeerId::random(),
            protocol: protocol.to_owned(),
            request_id: "r1".to_owned(),
            session_id: SessionId::random(),
            body: Bytes::from_static(b"hi"),
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let demux = Demuxer::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        demux.register_protocol_handler("/a/1", tx.clone()).unwrap();
        assert_matches!(
            demux.register_protocol_handler("/a/1", tx),
            Err(DemuxError::AlreadyRegistered(p)) if p == "/a/1"
        );
    }

    #[test]
    fn test_routes_by_protocol() {
        let demux = Demuxer::new();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        demux.register_protocol_handler("/a/1", a_tx).unwrap();
        demux.register_protocol_handler("/b/1", b_tx).unwrap();

        demux.route_incoming_message(request("/b/1")).unwrap();

        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_recv().unwrap().protocol, "/b/1");
        assert_eq!(demux.protocols(), vec!["/a/1", "/b/1"]);
    }

    #[test]
    fn test_unknown_protocol() {
        let demux = Demuxer::new();
        assert_matches!(
            demux.route_incoming_message(request("/nope/1")),
            Err(DemuxError::UnknownProtocol(p)) if p == "/nope/1"
        );
    }

    #[test]
    fn test_full_handler_reports_busy() {
        let demux = Demuxer::new();
        let (tx, _rx) = mpsc::channel(1);
        demux.register_protocol_handler("/a/1", tx).unwrap();
        demux.route_incoming_message(request("/a/1")).unwrap();
        assert_matches!(
            demux.route_incoming_message(request("/a/1")),
            Err(DemuxError::Handler { source: HandlerError::Busy, .. })
        );
    }

    #[test]
    fn test_deregister_then_reregister() {
        let demux = Demuxer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        demux
            .register_protocol_handler(
                "/a/1",
                handler_fn(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();
        demux.route_incoming_message(request("/a/1")).unwrap();

        assert!(demux.deregister_protocol_handler("/a/1"));
        assert!(!demux.deregister_protocol_handler("/a/1"));
        assert!(!demux.has_handler("/a/1"));
        assert!(demux.route_incoming_message(request("/a/1")).is_err());

        let (tx, _rx) = mpsc::unbounded_channel();
        demux.register_protocol_handler("/a/1", tx).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_register_while_routing() {
        let demux = Demuxer::new();
        let inner = demux.clone();
        demux
            .register_protocol_handler(
                "/a/1",
                handler_fn(move |_| {
                    let (tx, _rx) = mpsc::unbounded_channel();
                    let _ = inner.register_protocol_handler("/late/1", tx);
                    Ok(())
                }),
            )
            .unwrap();

        demux.route_incoming_message(request("/a/1")).unwrap();
        assert!(demux.has_handler("/late/1"));
    }
}
