//! Per-peer connection establishment state.

use strand_net_transport::ConnectionId;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::SwarmError;

pub(crate) type ConnectWaiter = oneshot::Sender<Result<(), SwarmError>>;

/// An in-progress dial plus handshake towards one peer.
///
/// At most one exists per peer, so concurrent `connect_to` calls share a
/// single attempt and are all answered when it settles.
#[derive(Debug)]
pub(crate) struct Connecting {
    /// Current dial, absent while waiting out the backoff.
    pub(crate) connection: Option<ConnectionId>,
    pub(crate) attempts: u32,
    /// When the current attempt is given up.
    pub(crate) deadline: Instant,
    /// When the next dial is due, if one is scheduled.
    pub(crate) retry_at: Option<Instant>,
    pub(crate) last_error: Option<String>,
    pub(crate) waiters: Vec<ConnectWaiter>,
}

impl Connecting {
    pub(crate) fn new(connection: ConnectionId, deadline: Instant) -> Self {
        Self {
            connection: Some(connection),
            attempts: 1,
            deadline,
            retry_at: None,
            last_error: None,
            waiters: Vec::new(),
        }
    }

    pub(crate) fn settle(self, result: Result<(), SwarmError>) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

#[derive(Debug)]
pub(crate) enum PeerLink {
    Connecting(Connecting),
    /// The last attempt failed; kept for [`PeerState::Failed`].
    Failed,
}

/// Connectivity of a peer as seen from the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PeerState {
    /// Never added.
    Unknown,
    /// Known, without a session and not connecting.
    Idle,
    Connecting,
    Authenticated,
    /// The last connection attempt failed.
    Failed,
}
