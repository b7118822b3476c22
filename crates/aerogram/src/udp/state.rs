//! State enumerations for datagram sockets.

/// Lifecycle state of a datagram socket.
///
/// Local binding and peer connection are not lifecycle states; query them
/// through [`UdpSocket::local_addr`](crate::udp::UdpSocket::local_addr) and
/// [`UdpSocket::is_connected`](crate::udp::UdpSocket::is_connected).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum UdpSocketState {
    /// Socket is open and accepting operations.
    #[default]
    Open,
    /// A deferred close is draining queued operations. New operations of
    /// each latched direction are rejected; the other direction, if any,
    /// still accepts work.
    Closing,
    /// Socket is closed.
    Closed,
}

impl std::fmt::Display for UdpSocketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UdpSocketState::Open => write!(f, "Open"),
            UdpSocketState::Closing => write!(f, "Closing"),
            UdpSocketState::Closed => write!(f, "Closed"),
        }
    }
}
