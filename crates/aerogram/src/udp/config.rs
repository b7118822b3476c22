//! Configuration and operation types for datagram sockets.

use std::sync::Arc;

use tokio::runtime::Handle;

/// Default maximum datagram size accepted by a receive operation, in bytes.
///
/// Datagrams longer than the configured maximum are truncated by the OS and
/// delivered without the tail.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 9216;

/// Client-chosen identifier carried by queued operations.
///
/// Tags are opaque to the engine; they come back unchanged in completion and
/// failure signals so callers can match results to requests.
pub type Tag = i64;

/// Configuration for a datagram socket.
#[derive(Clone, Debug)]
pub struct UdpSocketConfig {
    /// Allow IPv4 traffic.
    pub ipv4_enabled: bool,
    /// Allow IPv6 traffic.
    pub ipv6_enabled: bool,
    /// Largest datagram accepted by a receive operation, in bytes.
    pub max_receive_buffer_size: usize,
    /// Runtime that drives the socket. Defaults to the ambient runtime at the
    /// time the first operation starts the driver.
    pub runtime: Option<Handle>,
}

impl Default for UdpSocketConfig {
    fn default() -> Self {
        Self {
            ipv4_enabled: true,
            ipv6_enabled: true,
            max_receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            runtime: None,
        }
    }
}

impl UdpSocketConfig {
    /// Create a new configuration with both address families enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration restricted to IPv4.
    pub fn ipv4_only() -> Self {
        Self {
            ipv6_enabled: false,
            ..Default::default()
        }
    }

    /// Create a configuration restricted to IPv6.
    pub fn ipv6_only() -> Self {
        Self {
            ipv4_enabled: false,
            ..Default::default()
        }
    }

    /// Enable or disable IPv4.
    pub fn ipv4_enabled(mut self, enabled: bool) -> Self {
        self.ipv4_enabled = enabled;
        self
    }

    /// Enable or disable IPv6.
    pub fn ipv6_enabled(mut self, enabled: bool) -> Self {
        self.ipv6_enabled = enabled;
        self
    }

    /// Set the largest datagram size accepted by a receive operation.
    pub fn max_receive_buffer_size(mut self, size: usize) -> Self {
        self.max_receive_buffer_size = size;
        self
    }

    /// Set the runtime that drives the socket.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }
}

/// A received datagram with its source address.
#[derive(Clone, Debug)]
pub struct Datagram {
    /// The datagram payload.
    pub data: Vec<u8>,
    /// The source address of the datagram.
    pub source: std::net::SocketAddr,
}

impl Datagram {
    /// Create a new datagram.
    pub fn new(data: Vec<u8>, source: std::net::SocketAddr) -> Self {
        Self { data, source }
    }
}

/// Predicate consulted before a received datagram completes a receive
/// operation.
///
/// Return `true` to accept the datagram. A rejected datagram is discarded and
/// the receive operation keeps waiting; its timeout is not restarted.
pub type ReceiveFilter = Arc<dyn Fn(&Datagram, Tag) -> bool + Send + Sync>;
