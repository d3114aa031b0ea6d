//! Listener, dialer and connection task supervision.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use strand_net_codec::FrameCodec;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::ConnectionTask;
use crate::events::{self, ConnectionError, EventSenders, NetworkEvents};
use crate::{ConnectionId, Direction, TransportConfig, TransportError};

/// Pause after a failed `accept` so a persistent error cannot spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Owner of the TCP listener and all connection tasks.
///
/// Cloning yields another handle to the same network.
#[derive(Debug, Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

#[derive(Debug)]
struct NetworkInner {
    config: TransportConfig,
    local_addr: SocketAddr,
    next_connection_id: AtomicU64,
    events: EventSenders,
    shutdown: CancellationToken,
}

impl Network {
    /// Binds the listener and starts accepting connections.
    pub async fn bind(config: TransportConfig) -> Result<(Self, NetworkEvents), TransportError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let (events, receivers) = events::channels(config.event_queue_size);

        let network = Self {
            inner: Arc::new(NetworkInner {
                config,
                local_addr,
                next_connection_id: AtomicU64::new(1),
                events,
                shutdown: CancellationToken::new(),
            }),
        };

        tokio::spawn(network.clone().accept_loop(listener));
        info!(%local_addr, "Listening for connections");

        Ok((network, receivers))
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Starts dialing `addr` and returns the id the connection will carry.
    ///
    /// The outcome arrives later: either a new connection with this id, or a
    /// connection error with this id if the dial fails.
    pub fn dial(&self, addr: SocketAddr) -> ConnectionId {
        let id = self.next_connection_id();
        let network = self.clone();
        tokio::spawn(async move { network.dial_task(id, addr).await });
        id
    }

    /// Stops accepting, and closes every connection.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn dial_task(self, id: ConnectionId, addr: SocketAddr) {
        let timeout = self.inner.config.connect_timeout;
        debug!(connection_id = %id, %addr, "Dialing");

        let result = tokio::select! {
            _ = self.inner.shutdown.cancelled() => return,
            result = tokio::time::timeout(timeout, TcpStream::connect(addr)) => result,
        };

        let error = match result {
            Ok(Ok(stream)) => {
                self.start_connection(id, addr, stream, Direction::Outbound)
                    .await;
                return;
            }
            Ok(Err(error)) => TransportError::Io(error),
            Err(_) => TransportError::ConnectTimeout(timeout),
        };

        debug!(connection_id = %id, %addr, %error, "Dial failed");
        let _ = self
            .inner
            .events
            .connection_errors
            .send(ConnectionError {
                connection_id: id,
                remote_addr: addr,
                error,
            })
            .await;
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, remote_addr)) => {
                    let id = self.next_connection_id();
                    debug!(connection_id = %id, %remote_addr, "Accepted connection");
                    self.start_connection(id, remote_addr, stream, Direction::Inbound)
                        .await;
                }
                Err(error) => {
                    warn!(%error, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
        debug!(local_addr = %self.inner.local_addr, "Listener stopped");
    }

    async fn start_connection(
        &self,
        id: ConnectionId,
        remote_addr: SocketAddr,
        stream: TcpStream,
        direction: Direction,
    ) {
        if let Err(error) = stream.set_nodelay(true) {
            debug!(connection_id = %id, %error, "Failed to set TCP_NODELAY");
        }

        let config = &self.inner.config;
        let (connection, task) = ConnectionTask::new(
            id,
            remote_addr,
            direction,
            stream,
            self.inner.shutdown.child_token(),
            FrameCodec::new(config.max_frame_size),
            config.outbound_queue_size,
            self.inner.events.clone(),
        );

        // The new-connection event is queued before the task can produce
        // any message or closed event for this id.
        if self.inner.events.new_connections.send(connection).await.is_err() {
            debug!(connection_id = %id, "Network owner gone, dropping connection");
            return;
        }
        tokio::spawn(task.run());
    }
}
