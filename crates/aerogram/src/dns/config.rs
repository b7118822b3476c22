//! Resolver configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for a [`DnsResolver`](crate::dns::DnsResolver).
#[derive(Debug, Clone)]
pub struct DnsConfig {
    /// Query the default upstream resolvers instead of `nameservers`.
    pub use_default_resolvers: bool,

    /// Nameservers queried when `use_default_resolvers` is false, as
    /// IP:port pairs.
    pub nameservers: Vec<SocketAddr>,

    /// Maximum number of cached responses.
    pub cache_size: usize,

    /// Cap on the TTL of cached positive responses.
    pub max_positive_ttl: Duration,

    /// Cap on the TTL of cached negative (NXDOMAIN) responses.
    pub max_negative_ttl: Duration,

    /// Consult the hosts file before querying.
    pub use_hosts_file: bool,

    /// Which record families to query, and in what order.
    pub ip_strategy: IpStrategy,

    /// Attempts per query before reporting failure.
    pub attempts: usize,

    /// Timeout per query attempt.
    pub timeout: Duration,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            use_default_resolvers: true,
            nameservers: Vec::new(),
            cache_size: 512,
            max_positive_ttl: Duration::from_secs(86400),
            max_negative_ttl: Duration::from_secs(60),
            use_hosts_file: true,
            ip_strategy: IpStrategy::default(),
            attempts: 2,
            timeout: Duration::from_secs(5),
        }
    }
}

impl DnsConfig {
    /// Configuration using the default upstream resolvers.
    pub fn system() -> Self {
        Self::default()
    }

    /// Configuration querying the given nameservers.
    pub fn with_nameservers(nameservers: Vec<SocketAddr>) -> Self {
        Self {
            use_default_resolvers: false,
            nameservers,
            ..Default::default()
        }
    }

    /// Configuration querying Google's public resolvers.
    pub fn google() -> Self {
        Self::with_nameservers(vec![
            "8.8.8.8:53".parse().unwrap(),
            "8.8.4.4:53".parse().unwrap(),
        ])
    }

    /// Configuration querying Cloudflare's public resolvers.
    pub fn cloudflare() -> Self {
        Self::with_nameservers(vec![
            "1.1.1.1:53".parse().unwrap(),
            "1.0.0.1:53".parse().unwrap(),
        ])
    }

    /// Set the response cache capacity.
    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Cap the TTL of cached positive responses.
    pub fn max_positive_ttl(mut self, ttl: Duration) -> Self {
        self.max_positive_ttl = ttl;
        self
    }

    /// Cap the TTL of cached negative responses.
    pub fn max_negative_ttl(mut self, ttl: Duration) -> Self {
        self.max_negative_ttl = ttl;
        self
    }

    /// Enable or disable the hosts file.
    pub fn use_hosts_file(mut self, use_hosts: bool) -> Self {
        self.use_hosts_file = use_hosts;
        self
    }

    /// Set the record family strategy.
    pub fn ip_strategy(mut self, strategy: IpStrategy) -> Self {
        self.ip_strategy = strategy;
        self
    }

    /// Set the attempts per query.
    pub fn attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the timeout per attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Which IP record families a lookup queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpStrategy {
    /// A records only.
    Ipv4Only,
    /// AAAA records only.
    Ipv6Only,
    /// Both, preferring IPv4 results.
    #[default]
    Ipv4ThenIpv6,
    /// Both, preferring IPv6 results.
    Ipv6ThenIpv4,
    /// Both families queried in parallel.
    Ipv4AndIpv6,
}
