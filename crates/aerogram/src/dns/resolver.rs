//! Asynchronous DNS resolution.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::config::{NameServerConfig, ResolveHosts, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};

use aerogram_core::Signal;

use crate::dns::config::{DnsConfig, IpStrategy};
use crate::error::{AerogramError, Result};

/// A completed lookup.
#[derive(Debug, Clone)]
pub struct DnsLookupResult {
    /// The name that was looked up.
    pub hostname: String,
    /// Every address the name resolved to.
    pub addresses: Vec<IpAddr>,
    /// How long the response may be cached.
    pub ttl: Duration,
}

/// A caching DNS resolver.
///
/// Resolution is available in two styles: `resolve*` methods await the
/// result, while `lookup*` methods return immediately and report through the
/// [`resolved`](Self::resolved) and [`error`](Self::error) signals, matching
/// how the datagram socket reports its operations.
///
/// # Examples
///
/// ```no_run
/// use std::net::SocketAddr;
///
/// use aerogram::dns::DnsResolver;
/// use aerogram::udp::{UdpSocket, UdpSocketConfig};
///
/// # async fn run() -> aerogram::Result<()> {
/// let resolver = DnsResolver::system()?;
/// let addrs = resolver.resolve("ntp.example.net").await?;
///
/// let socket = UdpSocket::new(UdpSocketConfig::new());
/// socket.connect_to_addr(SocketAddr::new(addrs[0], 123))?;
/// # Ok(())
/// # }
/// ```
pub struct DnsResolver {
    resolver: TokioResolver,

    /// Emitted when a `lookup*` call completes.
    pub resolved: Arc<Signal<DnsLookupResult>>,

    /// Emitted when a `lookup*` call fails, with the hostname.
    pub error: Arc<Signal<(String, AerogramError)>>,
}

/// Which record family a lookup asks for.
#[derive(Clone, Copy)]
enum LookupKind {
    Any,
    V4,
    V6,
}

impl LookupKind {
    fn record_types(self) -> &'static str {
        match self {
            LookupKind::Any => "A or AAAA",
            LookupKind::V4 => "A",
            LookupKind::V6 => "AAAA",
        }
    }
}

impl DnsResolver {
    /// Create a resolver with the given configuration.
    pub fn new(config: DnsConfig) -> Result<Self> {
        let (resolver_config, resolver_opts) = build_resolver_config(&config)?;
        let resolver =
            Resolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .with_options(resolver_opts)
                .build();
        Ok(Self {
            resolver,
            resolved: Arc::new(Signal::new()),
            error: Arc::new(Signal::new()),
        })
    }

    /// Create a resolver with the default configuration.
    pub fn system() -> Result<Self> {
        Self::new(DnsConfig::system())
    }

    /// Create a resolver querying Google's public resolvers.
    pub fn google() -> Result<Self> {
        Self::new(DnsConfig::google())
    }

    /// Create a resolver querying Cloudflare's public resolvers.
    pub fn cloudflare() -> Result<Self> {
        Self::new(DnsConfig::cloudflare())
    }

    /// Start a lookup and return immediately.
    ///
    /// The outcome arrives through [`resolved`](Self::resolved) or
    /// [`error`](Self::error).
    pub fn lookup(&self, hostname: &str) {
        self.spawn_lookup(hostname, LookupKind::Any);
    }

    /// Start an IPv4-only lookup and return immediately.
    pub fn lookup_v4(&self, hostname: &str) {
        self.spawn_lookup(hostname, LookupKind::V4);
    }

    /// Start an IPv6-only lookup and return immediately.
    pub fn lookup_v6(&self, hostname: &str) {
        self.spawn_lookup(hostname, LookupKind::V6);
    }

    /// Resolve a hostname, awaiting the result.
    pub async fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>> {
        let result = run_lookup(&self.resolver, hostname, LookupKind::Any).await?;
        Ok(result.addresses)
    }

    /// Resolve a hostname to its IPv4 addresses only.
    pub async fn resolve_v4(&self, hostname: &str) -> Result<Vec<Ipv4Addr>> {
        let result = run_lookup(&self.resolver, hostname, LookupKind::V4).await?;
        Ok(result
            .addresses
            .into_iter()
            .filter_map(|addr| match addr {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .collect())
    }

    /// Resolve a hostname to its IPv6 addresses only.
    pub async fn resolve_v6(&self, hostname: &str) -> Result<Vec<Ipv6Addr>> {
        let result = run_lookup(&self.resolver, hostname, LookupKind::V6).await?;
        Ok(result
            .addresses
            .into_iter()
            .filter_map(|addr| match addr {
                IpAddr::V4(_) => None,
                IpAddr::V6(v6) => Some(v6),
            })
            .collect())
    }

    /// Drop every cached response.
    pub fn clear_cache(&self) {
        self.resolver.clear_cache();
    }

    fn spawn_lookup(&self, hostname: &str, kind: LookupKind) {
        let hostname = hostname.to_string();
        let resolver = self.resolver.clone();
        let resolved = Arc::clone(&self.resolved);
        let error = Arc::clone(&self.error);

        tokio::spawn(async move {
            match run_lookup(&resolver, &hostname, kind).await {
                Ok(result) => resolved.emit(result),
                Err(e) => {
                    tracing::debug!(
                        target: "aerogram::dns",
                        hostname,
                        error = %e,
                        "lookup failed"
                    );
                    error.emit((hostname, e));
                }
            }
        });
    }
}

impl std::fmt::Debug for DnsResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsResolver").finish_non_exhaustive()
    }
}

/// Translate a [`DnsConfig`] into hickory's configuration pair.
fn build_resolver_config(config: &DnsConfig) -> Result<(ResolverConfig, ResolverOpts)> {
    let resolver_config = if config.use_default_resolvers {
        ResolverConfig::default()
    } else if config.nameservers.is_empty() {
        return Err(AerogramError::Dns("no nameservers configured".to_string()));
    } else {
        let mut resolver_config = ResolverConfig::new();
        for addr in &config.nameservers {
            resolver_config.add_name_server(NameServerConfig::new(*addr, Protocol::Udp));
            resolver_config.add_name_server(NameServerConfig::new(*addr, Protocol::Tcp));
        }
        resolver_config
    };

    let mut opts = ResolverOpts::default();
    opts.cache_size = config.cache_size;
    opts.positive_max_ttl = Some(config.max_positive_ttl);
    opts.negative_max_ttl = Some(config.max_negative_ttl);
    opts.use_hosts_file = if config.use_hosts_file {
        ResolveHosts::Auto
    } else {
        ResolveHosts::Never
    };
    opts.attempts = config.attempts;
    opts.timeout = config.timeout;
    opts.ip_strategy = match config.ip_strategy {
        IpStrategy::Ipv4Only => hickory_resolver::config::LookupIpStrategy::Ipv4Only,
        IpStrategy::Ipv6Only => hickory_resolver::config::LookupIpStrategy::Ipv6Only,
        IpStrategy::Ipv4ThenIpv6 => hickory_resolver::config::LookupIpStrategy::Ipv4thenIpv6,
        IpStrategy::Ipv6ThenIpv4 => hickory_resolver::config::LookupIpStrategy::Ipv6thenIpv4,
        IpStrategy::Ipv4AndIpv6 => hickory_resolver::config::LookupIpStrategy::Ipv4AndIpv6,
    };

    Ok((resolver_config, opts))
}

async fn run_lookup(
    resolver: &TokioResolver,
    hostname: &str,
    kind: LookupKind,
) -> Result<DnsLookupResult> {
    let (addresses, valid_until) = match kind {
        LookupKind::Any => {
            let response = resolver
                .lookup_ip(hostname)
                .await
                .map_err(|e| AerogramError::Dns(e.to_string()))?;
            let addresses: Vec<IpAddr> = response.iter().collect();
            (addresses, response.valid_until())
        }
        LookupKind::V4 => {
            let response = resolver
                .ipv4_lookup(hostname)
                .await
                .map_err(|e| AerogramError::Dns(e.to_string()))?;
            let addresses: Vec<IpAddr> = response.iter().map(|r| IpAddr::V4(r.0)).collect();
            (addresses, response.valid_until())
        }
        LookupKind::V6 => {
            let response = resolver
                .ipv6_lookup(hostname)
                .await
                .map_err(|e| AerogramError::Dns(e.to_string()))?;
            let addresses: Vec<IpAddr> = response.iter().map(|r| IpAddr::V6(r.0)).collect();
            (addresses, response.valid_until())
        }
    };

    if addresses.is_empty() {
        return Err(AerogramError::Dns(format!(
            "no {} records for {hostname}",
            kind.record_types()
        )));
    }

    Ok(DnsLookupResult {
        hostname: hostname.to_string(),
        addresses,
        ttl: remaining_ttl(valid_until),
    })
}

/// How much cache lifetime the response has left.
fn remaining_ttl(valid_until: std::time::Instant) -> Duration {
    valid_until.saturating_duration_since(std::time::Instant::now())
}
