//! Connection and pool configuration.

use std::time::Duration;

use super::{message::MAX_PAYLOAD_SIZE, network::Network};

/// What the listen loop does with a frame whose checksum does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumPolicy {
    /// Log the mismatch and dispatch the frame anyway.
    #[default]
    Tolerate,
    /// Log the mismatch and drop the frame. The connection stays open.
    Discard,
}

/// Per-peer connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Dial timeout.
    pub connect_timeout: Duration,
    /// Deadline for the whole version/verack exchange.
    pub handshake_timeout: Duration,
    /// Interval between heartbeat pings.
    pub ping_interval: Duration,
    /// Port to dial instead of the network default.
    pub port: Option<u16>,
    /// Handling of frames with a bad checksum after the handshake.
    pub checksum_policy: ChecksumPolicy,
    /// Largest payload a peer may announce.
    pub max_payload_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(5),
            port: None,
            checksum_policy: ChecksumPolicy::Tolerate,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_checksum_policy(mut self, policy: ChecksumPolicy) -> Self {
        self.checksum_policy = policy;
        self
    }

    /// The port dialed for peers on `network`.
    pub fn port_for(&self, network: Network) -> u16 {
        self.port.unwrap_or_else(|| network.default_port())
    }
}

/// Peer pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Network the pool connects to.
    pub network: Network,
    /// Number of live connections the pool keeps.
    pub node_count: usize,
    /// Failed connection attempts allowed per fill cycle.
    pub max_connection_attempts: usize,
    /// Pause after a failed fill cycle.
    pub retry_delay: Duration,
    /// Pause between health checks of a full pool.
    pub maintenance_interval: Duration,
    /// Configuration for every connection the pool opens.
    pub connection: ConnectionConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            network: Network::MainNet,
            node_count: 8,
            max_connection_attempts: 10,
            retry_delay: Duration::from_secs(5),
            maintenance_interval: Duration::from_secs(5),
            connection: ConnectionConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn new(node_count: usize, network: Network) -> Self {
        Self {
            network,
            node_count,
            ..Self::default()
        }
    }

    pub fn with_max_connection_attempts(mut self, attempts: usize) -> Self {
        self.max_connection_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }
}
