//! Swarm configuration.

use std::time::Duration;

use strand_net_transport::TransportConfig;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_DIAL_ATTEMPTS: u32 = 3;
pub const DEFAULT_DIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_SEND_RETRIES: u32 = 1;

pub const DEFAULT_CONNECT_QUEUE_SIZE: usize = 10;
pub const DEFAULT_DISCONNECT_QUEUE_SIZE: usize = 10;
pub const DEFAULT_SEND_QUEUE_SIZE: usize = 20;
pub const DEFAULT_RESPOND_QUEUE_SIZE: usize = 64;
pub const DEFAULT_QUERY_QUEUE_SIZE: usize = 16;

/// Swarm configuration.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub transport: TransportConfig,
    /// How long a sent request waits for its response.
    pub request_timeout: Duration,
    /// How long one dial plus handshake attempt may take.
    pub handshake_timeout: Duration,
    /// Period of the timeout/retry sweep.
    pub sweep_interval: Duration,
    /// Dial attempts per connect before the peer is reported unreachable.
    pub max_dial_attempts: u32,
    /// Pause between dial attempts.
    pub dial_backoff: Duration,
    /// Times an in-flight request is re-sent after its connection is lost.
    pub max_send_retries: u32,
    pub connect_queue_size: usize,
    pub disconnect_queue_size: usize,
    pub send_queue_size: usize,
    pub respond_queue_size: usize,
    pub query_queue_size: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_dial_attempts: DEFAULT_MAX_DIAL_ATTEMPTS,
            dial_backoff: DEFAULT_DIAL_BACKOFF,
            max_send_retries: DEFAULT_MAX_SEND_RETRIES,
            connect_queue_size: DEFAULT_CONNECT_QUEUE_SIZE,
            disconnect_queue_size: DEFAULT_DISCONNECT_QUEUE_SIZE,
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
            respond_queue_size: DEFAULT_RESPOND_QUEUE_SIZE,
            query_queue_size: DEFAULT_QUERY_QUEUE_SIZE,
        }
    }
}

impl SwarmConfig {
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_dial_attempts(mut self, attempts: u32) -> Self {
        self.max_dial_attempts = attempts.max(1);
        self
    }

    pub fn with_dial_backoff(mut self, backoff: Duration) -> Self {
        self.dial_backoff = backoff;
        self
    }

    pub fn with_max_send_retries(mut self, retries: u32) -> Self {
        self.max_send_retries = retries;
        self
    }

    /// Sets the capacity of the send queue. Zero is bumped to one.
    pub fn with_send_queue_size(mut self, size: usize) -> Self {
        self.send_queue_size = size.max(1);
        self
    }
}
