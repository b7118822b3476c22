//! Local network interface information.
//!
//! Enumerates the host's interfaces with their addresses, flags, and MTU.
//! The datagram socket uses this to map an interface address to the index
//! IPv6 multicast membership needs, and to answer
//! [`mtu`](crate::udp::UdpSocket::mtu) for unconnected sockets.
//!
//! # Examples
//!
//! ```no_run
//! use aerogram::network_info::NetworkInterface;
//!
//! for iface in NetworkInterface::list() {
//!     println!("{} (index {}, up: {})", iface.name, iface.index, iface.is_up);
//!     for addr in iface.all_addresses() {
//!         println!("  {addr}");
//!     }
//! }
//! ```

mod interface;

pub use interface::{Ipv4Info, Ipv6Info, MacAddress, NetworkInterface};
