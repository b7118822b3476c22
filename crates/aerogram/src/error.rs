//! Error types for the datagram engine.

use thiserror::Error;

/// Errors reported by the datagram engine.
///
/// Errors are `Clone` because the same value may travel through both a
/// synchronous return and an asynchronous failure signal.
#[derive(Debug, Clone, Error)]
pub enum AerogramError {
    /// An argument failed validation before any work was started.
    #[error("bad parameter: {0}")]
    BadParameter(String),
    /// IPv4 is disabled or has been torn down on this socket.
    #[error("IPv4 is unavailable on this socket")]
    Ipv4Unavailable,
    /// IPv6 is disabled or has been torn down on this socket.
    #[error("IPv6 is unavailable on this socket")]
    Ipv6Unavailable,
    /// A queued send did not complete within its timeout.
    #[error("send operation timed out")]
    SendTimeout,
    /// A queued receive did not complete within its timeout.
    #[error("receive operation timed out")]
    ReceiveTimeout,
    /// The socket already has a local binding.
    #[error("socket is already bound")]
    AlreadyBound,
    /// The socket already has a connected peer.
    #[error("socket is already connected")]
    AlreadyConnected,
    /// The operation requires a connected peer.
    #[error("socket is not connected")]
    NotConnected,
    /// New sends are no longer accepted on this socket.
    #[error("sends are closed on this socket")]
    SendsClosed,
    /// New receives are no longer accepted on this socket.
    #[error("receives are closed on this socket")]
    ReceivesClosed,
    /// The socket has been closed.
    #[error("socket is closed")]
    Closed,
    /// Hostname resolution failed.
    #[error("DNS error: {0}")]
    Dns(String),
    /// I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for AerogramError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// A specialized Result type for datagram operations.
pub type Result<T> = std::result::Result<T, AerogramError>;
