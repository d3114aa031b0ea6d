use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use strand_net_codec::DEFAULT_MAX_FRAME_SIZE;

pub const DEFAULT_LISTEN_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 7513);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_OUTBOUND_QUEUE_SIZE: usize = 64;
pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 256;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Address the listener binds to. Port 0 picks a free port.
    pub listen_addr: SocketAddr,
    /// Largest frame body accepted or sent.
    pub max_frame_size: usize,
    /// How long an outbound dial may take before it is reported as failed.
    pub connect_timeout: Duration,
    /// Frames that may be queued on one connection before `send` reports back-pressure.
    pub outbound_queue_size: usize,
    /// Capacity of each network event channel.
    pub event_queue_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            outbound_queue_size: DEFAULT_OUTBOUND_QUEUE_SIZE,
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_outbound_queue_size(mut self, size: usize) -> Self {
        self.outbound_queue_size = size.max(1);
        self
    }

    pub fn with_event_queue_size(mut self, size: usize) -> Self {
        self.event_queue_size = size.max(1);
        self
    }
}
