//! Asynchronous UDP networking with queued, signal-reported operations.
//!
//! The crate's center is [`udp::UdpSocket`]: sends and receives are submitted
//! with a caller-chosen tag, queued strictly in order per direction, executed
//! by a driver task on a tokio runtime, and reported through signals. Around
//! it sit [`dns`] for cached hostname resolution and [`network_info`] for
//! interface enumeration.
//!
//! # Datagram sockets
//!
//! ```no_run
//! use aerogram::udp::{UdpSocket, UdpSocketConfig};
//!
//! # async fn run() -> aerogram::Result<()> {
//! let socket = UdpSocket::new(UdpSocketConfig::new());
//!
//! socket.datagram_received.connect(|(datagram, tag)| {
//!     println!("[{tag}] {} bytes from {}", datagram.data.len(), datagram.source);
//! });
//! socket.send_failed.connect(|(tag, error)| {
//!     eprintln!("[{tag}] send failed: {error}");
//! });
//!
//! socket.bind(4000)?;
//! socket.receive(None, 1)?;
//! socket.send_to(b"ping".to_vec(), "198.51.100.7", 4000, None, 2)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Connected sockets
//!
//! [`connect_to`](udp::UdpSocket::connect_to) fixes a peer: sends go through
//! [`send`](udp::UdpSocket::send) without a target, and datagrams from any
//! other source are dropped before delivery.
//!
//! # Lifecycle
//!
//! A socket closes immediately with [`close`](udp::UdpSocket::close), which
//! discards queued work, or gracefully with the `close_after_*` methods,
//! which drain the chosen directions first. Either way the
//! [`closed`](udp::UdpSocket::closed) signal fires exactly once.

mod error;

pub mod dns;
pub mod network_info;
pub mod udp;

pub use error::{AerogramError, Result};

// Re-export commonly used types at the crate root
pub use udp::{Datagram, Tag, UdpSocket, UdpSocketConfig, UdpSocketState};
