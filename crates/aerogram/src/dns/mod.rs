//! Hostname resolution with caching.
//!
//! [`DnsResolver`] resolves names ahead of the address-taking socket calls
//! ([`connect_to_addr`](crate::udp::UdpSocket::connect_to_addr),
//! [`send_to_addr`](crate::udp::UdpSocket::send_to_addr)), so repeated sends
//! to the same host skip resolution. Responses cache according to their TTL,
//! negative answers included.
//!
//! # Examples
//!
//! ```no_run
//! use aerogram::dns::{DnsConfig, DnsResolver, IpStrategy};
//!
//! # async fn run() -> aerogram::Result<()> {
//! let resolver = DnsResolver::new(DnsConfig::cloudflare().ip_strategy(IpStrategy::Ipv4Only))?;
//!
//! // Await the result directly...
//! let addresses = resolver.resolve("example.com").await?;
//! println!("resolved: {addresses:?}");
//!
//! // ...or let signals deliver it.
//! resolver.resolved.connect(|result| {
//!     println!("{} -> {:?}", result.hostname, result.addresses);
//! });
//! resolver.lookup("example.org");
//! # Ok(())
//! # }
//! ```

mod config;
mod resolver;

pub use config::{DnsConfig, IpStrategy};
pub use resolver::{DnsLookupResult, DnsResolver};
