//! Swarm metrics

use metrics::{Counter, Gauge};

#[derive(Clone, Debug)]
pub(crate) struct SwarmMetrics {
    /// Encrypted messages written to a connection
    pub(crate) messages_sent: Counter,
    /// Encrypted messages accepted from a connection
    pub(crate) messages_received: Counter,
    /// Connections closed for breaking the wire protocol
    pub(crate) protocol_violations: Counter,
    pub(crate) handshakes_completed: Counter,
    pub(crate) handshakes_failed: Counter,
    pub(crate) requests_timed_out: Counter,
    /// Requests or responses nobody could take
    pub(crate) unroutable_messages: Counter,
    pub(crate) connections: Gauge,
    pub(crate) authenticated_peers: Gauge,
    pub(crate) pending_requests: Gauge,
}

impl Default for SwarmMetrics {
    fn default() -> Self {
        Self {
            messages_sent: metrics::counter!("swarm.messages_sent_total"),
            messages_received: metrics::counter!("swarm.messages_received_total"),
            protocol_violations: metrics::counter!("swarm.protocol_violations_total"),
            handshakes_completed: metrics::counter!("swarm.handshakes_completed_total"),
            handshakes_failed: metrics::counter!("swarm.handshakes_failed_total"),
            requests_timed_out: metrics::counter!("swarm.requests_timed_out_total"),
            unroutable_messages: metrics::counter!("swarm.unroutable_messages_total"),
            connections: metrics::gauge!("swarm.connections"),
            authenticated_peers: metrics::gauge!("swarm.authenticated_peers"),
            pending_requests: metrics::gauge!("swarm.pending_requests"),
        }
    }
}

impl SwarmMetrics {
    pub(crate) fn record_tables(&self, connections: usize, authenticated: usize, pending: usize) {
        self.connections.set(connections as f64);
        self.authenticated_peers.set(authenticated as f64);
        self.pending_requests.set(pending as f64);
    }
}
