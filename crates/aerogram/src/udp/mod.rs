//! Asynchronous UDP sockets.
//!
//! Sends and receives are submitted with a tag, queued strictly in order per
//! direction, and complete through the socket's signals. The module's entry
//! point is [`UdpSocket`]; [`UdpSocketConfig`] selects IP versions, receive
//! buffer sizing, and the driving runtime.

mod config;
mod driver;
mod pair;
mod queue;
mod socket;
mod state;

pub use config::{DEFAULT_RECEIVE_BUFFER_SIZE, Datagram, ReceiveFilter, Tag, UdpSocketConfig};
pub use socket::UdpSocket;
pub use state::UdpSocketState;
