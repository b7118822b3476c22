//! The asynchronous datagram socket.
//!
//! [`UdpSocket`] is a thread-safe handle around a driver task that owns the
//! native sockets and the operation queues. Every send and receive is
//! submitted with a caller-chosen tag and completes later through the
//! socket's signals; queues are strictly first-in-first-out per direction
//! with a single operation in flight at a time.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::SockRef;
use tokio::net::UdpSocket as TokioUdpSocket;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::Instant;

use aerogram_core::Signal;

use crate::error::{AerogramError, Result};
use crate::network_info::NetworkInterface;
use crate::udp::config::{Datagram, ReceiveFilter, Tag, UdpSocketConfig};
use crate::udp::driver::{self, Command, DriverContext};
use crate::udp::pair::{self, IpVersion, SocketPair};
use crate::udp::queue::{ReceiveRequest, SendRequest};
use crate::udp::state::UdpSocketState;

/// State shared between the socket handle and its driver.
pub(crate) struct Inner {
    pub state: UdpSocketState,
    pub close_after_sends: bool,
    pub close_after_receives: bool,
    pub did_bind: bool,
    pub did_connect: bool,
    /// The IP version this socket is committed to, once bound to a concrete
    /// address, connected, or used for a targeted send while uncommitted.
    pub pin: Option<IpVersion>,
    pub sockets: SocketPair,
    pub local_addr: Option<SocketAddr>,
    pub peer_addr: Option<SocketAddr>,
    pub max_receive_buffer_size: usize,
    pub receive_filter: Option<ReceiveFilter>,
    /// Runtime the driver and the socket registrations live on.
    pub runtime: Option<Handle>,
    pub ipv4_enabled: bool,
    pub ipv6_enabled: bool,
}

impl Inner {
    fn new(config: &UdpSocketConfig) -> Self {
        Inner {
            state: UdpSocketState::default(),
            close_after_sends: false,
            close_after_receives: false,
            did_bind: false,
            did_connect: false,
            pin: None,
            sockets: SocketPair::default(),
            local_addr: None,
            peer_addr: None,
            max_receive_buffer_size: config.max_receive_buffer_size,
            receive_filter: None,
            runtime: config.runtime.clone(),
            ipv4_enabled: config.ipv4_enabled,
            ipv6_enabled: config.ipv6_enabled,
        }
    }

    /// Whether this socket may still use the given IP version.
    pub fn version_available(&self, version: IpVersion) -> bool {
        if self.state == UdpSocketState::Closed {
            return false;
        }
        let enabled = match version {
            IpVersion::V4 => self.ipv4_enabled,
            IpVersion::V6 => self.ipv6_enabled,
        };
        enabled && self.pin.is_none_or(|pinned| pinned == version)
    }

    /// True until the socket is bound, connected, or pinned.
    fn uncommitted(&self) -> bool {
        !self.did_bind && !self.did_connect && self.pin.is_none()
    }

    fn check_sendable(&self) -> Result<()> {
        if self.state == UdpSocketState::Closed {
            return Err(AerogramError::Closed);
        }
        if self.close_after_sends {
            return Err(AerogramError::SendsClosed);
        }
        Ok(())
    }

    fn check_receivable(&self) -> Result<()> {
        if self.state == UdpSocketState::Closed {
            return Err(AerogramError::Closed);
        }
        if self.close_after_receives {
            return Err(AerogramError::ReceivesClosed);
        }
        Ok(())
    }
}

/// The runtime the socket drives its I/O on, resolved once and persisted so
/// socket registrations and the driver share one reactor.
fn driving_handle(inner: &mut Inner, config: &UdpSocketConfig) -> Result<Handle> {
    if let Some(handle) = &inner.runtime {
        return Ok(handle.clone());
    }
    let handle = match &config.runtime {
        Some(handle) => handle.clone(),
        None => Handle::try_current()
            .map_err(|_| AerogramError::Io("no tokio runtime available".to_string()))?,
    };
    inner.runtime = Some(handle.clone());
    Ok(handle)
}

/// Return the socket for the given version, creating an unbound one if none
/// exists yet.
fn ensure_socket(
    inner: &mut Inner,
    config: &UdpSocketConfig,
    version: IpVersion,
) -> Result<Arc<TokioUdpSocket>> {
    if let Some(socket) = inner.sockets.get(version) {
        return Ok(socket.clone());
    }
    let handle = driving_handle(inner, config)?;
    let socket = pair::create_socket(version, &handle)?;
    inner.sockets.set(version, socket.clone());
    Ok(socket)
}

/// Make sure every socket a pending receive could complete on exists.
fn ensure_receive_sockets(inner: &mut Inner, config: &UdpSocketConfig) -> Result<()> {
    match inner.pin {
        Some(version) => {
            ensure_socket(inner, config, version)?;
        }
        None => {
            if inner.ipv4_enabled {
                ensure_socket(inner, config, IpVersion::V4)?;
            }
            if inner.ipv6_enabled {
                ensure_socket(inner, config, IpVersion::V6)?;
            }
        }
    }
    Ok(())
}

/// Resolve a host name synchronously through the system resolver.
fn resolve_host(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| AerogramError::BadParameter(format!("cannot resolve {host}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(AerogramError::BadParameter(format!("cannot resolve {host}")));
    }
    Ok(addrs)
}

/// Pick the candidate this socket will use, preferring IPv4 when both
/// families are usable.
fn pick_address(inner: &Inner, addrs: &[SocketAddr]) -> Result<SocketAddr> {
    for version in [IpVersion::V4, IpVersion::V6] {
        if inner.version_available(version)
            && let Some(addr) = addrs.iter().find(|a| IpVersion::of(a) == version)
        {
            return Ok(*addr);
        }
    }
    match addrs.first() {
        Some(addr) => Err(IpVersion::of(addr).unavailable()),
        None => Err(AerogramError::BadParameter("no addresses resolved".to_string())),
    }
}

/// An asynchronous UDP socket with queued, tagged operations.
///
/// The socket accepts operations from any thread and reports their outcome
/// through signals. Sends and receives each queue independently; within a
/// direction operations complete strictly in submission order, one at a
/// time. A fresh socket supports both IP versions and commits to one lazily.
///
/// Dropping the last handle closes the socket.
///
/// # Examples
///
/// ```no_run
/// use aerogram::udp::{UdpSocket, UdpSocketConfig};
///
/// # async fn run() -> aerogram::Result<()> {
/// let socket = UdpSocket::new(UdpSocketConfig::new());
/// socket.datagram_received.connect(|(datagram, _tag)| {
///     println!("got {} bytes from {}", datagram.data.len(), datagram.source);
/// });
/// socket.bind(4000)?;
/// socket.receive(None, 0)?;
/// # Ok(())
/// # }
/// ```
pub struct UdpSocket {
    config: UdpSocketConfig,
    inner: Arc<Mutex<Inner>>,
    command_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
    is_running: Arc<AtomicBool>,
    /// Latch making the `closed` emission exactly-once across the driver's
    /// terminal path and the handle's inline paths.
    closed_emitted: Arc<AtomicBool>,

    /// Emitted when a send completes, with its tag.
    pub datagram_sent: Arc<Signal<Tag>>,
    /// Emitted when a send fails or times out.
    pub send_failed: Arc<Signal<(Tag, AerogramError)>>,
    /// Emitted when a receive completes, with the datagram and its tag.
    pub datagram_received: Arc<Signal<(Datagram, Tag)>>,
    /// Emitted when a receive fails or times out.
    pub receive_failed: Arc<Signal<(Tag, AerogramError)>>,
    /// Emitted exactly once, when the socket has closed.
    pub closed: Arc<Signal<()>>,
}

impl UdpSocket {
    /// Create a socket supporting the IP versions enabled in `config`.
    ///
    /// No native socket exists yet; one is created per version on first use.
    pub fn new(config: UdpSocketConfig) -> Self {
        let inner = Inner::new(&config);
        UdpSocket {
            config,
            inner: Arc::new(Mutex::new(inner)),
            command_tx: Arc::new(Mutex::new(None)),
            is_running: Arc::new(AtomicBool::new(false)),
            closed_emitted: Arc::new(AtomicBool::new(false)),
            datagram_sent: Arc::new(Signal::new()),
            send_failed: Arc::new(Signal::new()),
            datagram_received: Arc::new(Signal::new()),
            receive_failed: Arc::new(Signal::new()),
            closed: Arc::new(Signal::new()),
        }
    }

    /// Create a socket restricted to IPv4, overriding `config`'s families.
    pub fn ipv4_only(config: UdpSocketConfig) -> Self {
        Self::new(config.ipv4_enabled(true).ipv6_enabled(false))
    }

    /// Create a socket restricted to IPv6, overriding `config`'s families.
    pub fn ipv6_only(config: UdpSocketConfig) -> Self {
        Self::new(config.ipv4_enabled(false).ipv6_enabled(true))
    }

    /// Bind to the given port on every enabled IP version.
    ///
    /// Port `0` asks the OS for an ephemeral port. Binding both versions is
    /// atomic: if either bind fails the socket is left untouched.
    pub fn bind(&self, port: u16) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != UdpSocketState::Open {
            return Err(AerogramError::Closed);
        }
        if inner.did_bind {
            return Err(AerogramError::AlreadyBound);
        }
        if inner.did_connect {
            return Err(AerogramError::AlreadyConnected);
        }
        let handle = driving_handle(&mut inner, &self.config)?;
        // Build every socket before committing any, so a half-failed bind
        // leaves the previous sockets in place. An ephemeral dual bind reuses
        // the port the first socket was assigned, keeping one logical port.
        let mut staged: Vec<(IpVersion, Arc<TokioUdpSocket>)> = Vec::new();
        let mut effective_port = port;
        for version in [IpVersion::V4, IpVersion::V6] {
            if !inner.version_available(version) {
                continue;
            }
            let wildcard = match version {
                IpVersion::V4 => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), effective_port),
                IpVersion::V6 => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), effective_port),
            };
            let socket = pair::create_bound_socket(version, wildcard, &handle)?;
            if effective_port == 0
                && let Ok(addr) = socket.local_addr()
            {
                effective_port = addr.port();
            }
            staged.push((version, socket));
        }
        if staged.is_empty() {
            return Err(AerogramError::BadParameter(
                "no IP version enabled".to_string(),
            ));
        }
        for (version, socket) in staged {
            inner.sockets.set(version, socket);
        }
        inner.did_bind = true;
        // A dual bind reports the IPv4 address.
        inner.local_addr = inner
            .sockets
            .v4
            .as_ref()
            .or(inner.sockets.v6.as_ref())
            .and_then(|s| s.local_addr().ok());
        tracing::debug!(target: "aerogram::udp", local = ?inner.local_addr, "socket bound");
        drop(inner);
        self.wake_driver();
        Ok(())
    }

    /// Bind to a specific local address, pinning the socket to its IP
    /// version. `address` may be a host name; it is resolved synchronously.
    pub fn bind_to(&self, address: &str, port: u16) -> Result<()> {
        let addrs = resolve_host(address, port)?;
        let mut inner = self.inner.lock();
        if inner.state != UdpSocketState::Open {
            return Err(AerogramError::Closed);
        }
        if inner.did_bind {
            return Err(AerogramError::AlreadyBound);
        }
        if inner.did_connect {
            return Err(AerogramError::AlreadyConnected);
        }
        let addr = pick_address(&inner, &addrs)?;
        let version = IpVersion::of(&addr);
        let handle = driving_handle(&mut inner, &self.config)?;
        let socket = pair::create_bound_socket(version, addr, &handle)?;
        inner.local_addr = socket.local_addr().ok();
        inner.sockets.set(version, socket);
        inner.sockets.retain_only(version);
        inner.pin = Some(version);
        inner.did_bind = true;
        tracing::debug!(target: "aerogram::udp", local = ?inner.local_addr, "socket bound");
        drop(inner);
        self.wake_driver();
        Ok(())
    }

    /// Connect to a peer given as a host name, resolved synchronously.
    ///
    /// IPv4 candidates are preferred when the socket could use either
    /// version.
    pub fn connect_to(&self, host: &str, port: u16) -> Result<()> {
        let addrs = resolve_host(host, port)?;
        let addr = {
            let inner = self.inner.lock();
            pick_address(&inner, &addrs)?
        };
        self.connect_to_addr(addr)
    }

    /// Connect to the given peer address.
    ///
    /// A connected socket sends with [`send`](Self::send) only and delivers
    /// only datagrams from its peer. Connecting pins the socket to the
    /// peer's IP version and tears down the other version's socket.
    pub fn connect_to_addr(&self, addr: SocketAddr) -> Result<()> {
        let version = IpVersion::of(&addr);
        let mut inner = self.inner.lock();
        if inner.state != UdpSocketState::Open {
            return Err(AerogramError::Closed);
        }
        if inner.peer_addr.is_some() {
            return Err(AerogramError::AlreadyConnected);
        }
        if !inner.version_available(version) {
            return Err(version.unavailable());
        }
        let socket = ensure_socket(&mut inner, &self.config, version)?;
        SockRef::from(socket.as_ref()).connect(&addr.into())?;
        inner.pin = Some(version);
        inner.sockets.retain_only(version);
        inner.did_connect = true;
        inner.peer_addr = Some(addr);
        inner.local_addr = socket.local_addr().ok();
        tracing::debug!(target: "aerogram::udp", peer = %addr, "socket connected");
        drop(inner);
        self.wake_driver();
        Ok(())
    }

    /// Queue a send to the connected peer.
    ///
    /// `timeout` of `None` waits indefinitely; otherwise the deadline arms
    /// when the operation reaches the front of the queue. Completion is
    /// reported through [`datagram_sent`](Self::datagram_sent) or
    /// [`send_failed`](Self::send_failed) with `tag`.
    pub fn send(&self, data: Vec<u8>, timeout: Option<Duration>, tag: Tag) -> Result<()> {
        if data.is_empty() {
            return Err(AerogramError::BadParameter("empty payload".to_string()));
        }
        {
            let inner = self.inner.lock();
            inner.check_sendable()?;
            if inner.peer_addr.is_none() {
                return Err(AerogramError::NotConnected);
            }
        }
        self.submit(Command::Send(SendRequest {
            payload: data.into(),
            target: None,
            timeout,
            tag,
            queued_at: Instant::now(),
        }))
    }

    /// Queue a send to a host name, resolved synchronously before queueing.
    pub fn send_to(
        &self,
        data: Vec<u8>,
        host: &str,
        port: u16,
        timeout: Option<Duration>,
        tag: Tag,
    ) -> Result<()> {
        let addrs = resolve_host(host, port)?;
        let addr = {
            let inner = self.inner.lock();
            pick_address(&inner, &addrs)?
        };
        self.send_to_addr(data, addr, timeout, tag)
    }

    /// Queue a send to an explicit target address.
    ///
    /// Invalid on a connected socket. The first targeted send on a socket
    /// that is neither bound nor connected pins it to the target's IP
    /// version.
    pub fn send_to_addr(
        &self,
        data: Vec<u8>,
        addr: SocketAddr,
        timeout: Option<Duration>,
        tag: Tag,
    ) -> Result<()> {
        if data.is_empty() {
            return Err(AerogramError::BadParameter("empty payload".to_string()));
        }
        let version = IpVersion::of(&addr);
        {
            let mut inner = self.inner.lock();
            inner.check_sendable()?;
            if inner.peer_addr.is_some() {
                return Err(AerogramError::AlreadyConnected);
            }
            if !inner.version_available(version) {
                return Err(version.unavailable());
            }
            if inner.uncommitted() {
                inner.pin = Some(version);
                inner.sockets.retain_only(version);
            }
            ensure_socket(&mut inner, &self.config, version)?;
        }
        self.submit(Command::Send(SendRequest {
            payload: data.into(),
            target: Some(addr),
            timeout,
            tag,
            queued_at: Instant::now(),
        }))
    }

    /// Queue a receive for the next acceptable datagram.
    ///
    /// The datagram arrives through [`datagram_received`](Self::datagram_received)
    /// with `tag`;
    /// `timeout` behaves as for [`send`](Self::send). Creates the native
    /// sockets if none exist, but does not bind them.
    pub fn receive(&self, timeout: Option<Duration>, tag: Tag) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            inner.check_receivable()?;
            ensure_receive_sockets(&mut inner, &self.config)?;
        }
        self.submit(Command::Receive(ReceiveRequest { timeout, tag }))
    }

    /// Close the socket immediately.
    ///
    /// Queued and in-flight operations are discarded without firing their
    /// signals; only [`closed`](Self::closed) fires. Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state == UdpSocketState::Closed {
                return;
            }
            inner.state = UdpSocketState::Closed;
            inner.sockets.teardown();
            inner.local_addr = None;
            inner.peer_addr = None;
            tracing::debug!(target: "aerogram::udp", "socket closing");
        }
        let sender = self.command_tx.lock().take();
        // A send failure means the driver died with its runtime; the
        // terminal signal must still be delivered, from here.
        let driver_reachable = match sender {
            Some(tx) => tx.send(Command::Close).is_ok(),
            None => false,
        };
        if !driver_reachable {
            self.is_running.store(false, Ordering::SeqCst);
            if !self.closed_emitted.swap(true, Ordering::SeqCst) {
                self.closed.emit(());
            }
        }
    }

    /// Close once every already-queued send has completed.
    ///
    /// New sends are rejected from this call on. Receives queued when the
    /// last send completes are discarded silently.
    pub fn close_after_sending(&self) {
        self.close_after(true, false);
    }

    /// Close once every already-queued receive has completed.
    ///
    /// The mirror of [`close_after_sending`](Self::close_after_sending).
    pub fn close_after_receiving(&self) {
        self.close_after(false, true);
    }

    /// Close once both directions have drained their queues.
    pub fn close_after_sending_and_receiving(&self) {
        self.close_after(true, true);
    }

    fn close_after(&self, sends: bool, receives: bool) {
        {
            let mut inner = self.inner.lock();
            if inner.state == UdpSocketState::Closed {
                return;
            }
            inner.close_after_sends |= sends;
            inner.close_after_receives |= receives;
            inner.state = UdpSocketState::Closing;
        }
        let sender = self.command_tx.lock().as_ref().cloned();
        match sender {
            Some(tx) => {
                let _ = tx.send(Command::Wake);
            }
            // No driver means no queued work; the drain is already over.
            None => self.close(),
        }
    }

    /// Join a multicast group, letting the OS pick the interface.
    ///
    /// `group` may be a literal address or a resolvable name.
    pub fn join_multicast_group(&self, group: &str) -> Result<()> {
        self.multicast_op(group, None, pair::join_multicast)
    }

    /// Join a multicast group through the interface owning `interface`.
    pub fn join_multicast_group_on(&self, group: &str, interface: IpAddr) -> Result<()> {
        self.multicast_op(group, Some(interface), pair::join_multicast)
    }

    /// Leave a multicast group joined with
    /// [`join_multicast_group`](Self::join_multicast_group).
    pub fn leave_multicast_group(&self, group: &str) -> Result<()> {
        self.multicast_op(group, None, pair::leave_multicast)
    }

    /// Leave a multicast group joined through a specific interface.
    pub fn leave_multicast_group_on(&self, group: &str, interface: IpAddr) -> Result<()> {
        self.multicast_op(group, Some(interface), pair::leave_multicast)
    }

    fn multicast_op(
        &self,
        group: &str,
        interface: Option<IpAddr>,
        op: fn(&TokioUdpSocket, IpAddr, Option<IpAddr>) -> Result<()>,
    ) -> Result<()> {
        let group_ip = resolve_group(group)?;
        if !group_ip.is_multicast() {
            return Err(AerogramError::BadParameter(format!(
                "{group_ip} is not a multicast address"
            )));
        }
        let version = IpVersion::of_ip(&group_ip);
        let socket = {
            let mut inner = self.inner.lock();
            if inner.state != UdpSocketState::Open {
                return Err(AerogramError::Closed);
            }
            if !inner.version_available(version) {
                return Err(version.unavailable());
            }
            ensure_socket(&mut inner, &self.config, version)?
        };
        op(socket.as_ref(), group_ip, interface)?;
        self.wake_driver();
        Ok(())
    }

    /// Allow or forbid sending to IPv4 broadcast addresses.
    pub fn set_broadcast(&self, enabled: bool) -> Result<()> {
        let socket = {
            let mut inner = self.inner.lock();
            if inner.state != UdpSocketState::Open {
                return Err(AerogramError::Closed);
            }
            if !inner.version_available(IpVersion::V4) {
                return Err(AerogramError::Ipv4Unavailable);
            }
            ensure_socket(&mut inner, &self.config, IpVersion::V4)?
        };
        socket.set_broadcast(enabled)?;
        self.wake_driver();
        Ok(())
    }

    /// Install a predicate consulted for every arriving datagram.
    ///
    /// The filter runs on the driver with the current operation's tag; a
    /// `false` return drops the datagram and the operation keeps waiting
    /// with its deadline untouched.
    pub fn set_receive_filter<F>(&self, filter: F)
    where
        F: Fn(&Datagram, Tag) -> bool + Send + Sync + 'static,
    {
        self.inner.lock().receive_filter = Some(Arc::new(filter));
    }

    /// Remove the receive filter, accepting every datagram again.
    pub fn clear_receive_filter(&self) {
        self.inner.lock().receive_filter = None;
    }

    /// Cap the bytes read per datagram. Larger datagrams are silently
    /// truncated by the OS.
    ///
    /// Takes effect when the next receive operation becomes current.
    pub fn set_max_receive_buffer_size(&self, size: usize) {
        self.inner.lock().max_receive_buffer_size = size;
    }

    /// The current per-datagram receive cap.
    pub fn max_receive_buffer_size(&self) -> usize {
        self.inner.lock().max_receive_buffer_size
    }

    /// Move the socket and its driver to another runtime.
    ///
    /// Queued operations, armed deadlines, and the native sockets carry
    /// over. With a driver running the migration completes asynchronously.
    pub fn move_to_runtime(&self, runtime: Handle) -> Result<()> {
        {
            let guard = self.command_tx.lock();
            if let Some(tx) = guard.as_ref() {
                return tx
                    .send(Command::Migrate(runtime))
                    .map_err(|_| AerogramError::Closed);
            }
        }
        let mut inner = self.inner.lock();
        if inner.state == UdpSocketState::Closed {
            return Err(AerogramError::Closed);
        }
        if !inner.sockets.is_empty()
            && let Some(old) = inner.runtime.clone()
        {
            let detached = inner.sockets.detach(&old)?;
            match SocketPair::attach_detached(detached, &runtime) {
                Ok(pair) => inner.sockets = pair,
                Err(e) => {
                    drop(inner);
                    tracing::error!(
                        target: "aerogram::udp",
                        error = %e,
                        "runtime migration failed; closing socket"
                    );
                    self.close();
                    return Err(e);
                }
            }
        }
        inner.runtime = Some(runtime);
        Ok(())
    }

    /// The socket's lifecycle state.
    pub fn state(&self) -> UdpSocketState {
        self.inner.lock().state
    }

    /// Whether [`close`](Self::close) has completed or been requested.
    pub fn is_closed(&self) -> bool {
        self.state() == UdpSocketState::Closed
    }

    /// Whether the socket is connected to a peer.
    pub fn is_connected(&self) -> bool {
        self.inner.lock().peer_addr.is_some()
    }

    /// The local address, once known.
    ///
    /// Cached when the socket binds, connects, or completes its first send.
    /// A socket bound on both versions reports the IPv4 address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().local_addr
    }

    /// The connected peer's address, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.lock().peer_addr
    }

    /// Whether this socket can still send to and receive from IPv4.
    pub fn is_ipv4(&self) -> bool {
        self.inner.lock().version_available(IpVersion::V4)
    }

    /// Whether this socket can still send to and receive from IPv6.
    pub fn is_ipv6(&self) -> bool {
        self.inner.lock().version_available(IpVersion::V6)
    }

    /// Best-effort MTU toward the current peer or for the local interface.
    ///
    /// A connected socket asks the OS for the discovered path MTU; otherwise
    /// this is the MTU of the interface owning the local address. `None`
    /// when neither is known on this platform.
    pub fn mtu(&self) -> Option<u32> {
        let inner = self.inner.lock();
        #[cfg(target_os = "linux")]
        if inner.peer_addr.is_some()
            && let Some(version) = inner.pin
            && let Some(socket) = inner.sockets.get(version)
            && let Some(mtu) = pair::connected_path_mtu(socket, version)
        {
            return Some(mtu);
        }
        let local = inner.local_addr?;
        drop(inner);
        if local.ip().is_unspecified() {
            return NetworkInterface::default_interface().and_then(|iface| iface.mtu);
        }
        NetworkInterface::find_by_address(local.ip()).and_then(|iface| iface.mtu)
    }

    /// Send a command to the driver, spawning it on first use.
    fn submit(&self, command: Command) -> Result<()> {
        let tx = self.command_sender()?;
        tx.send(command).map_err(|_| AerogramError::Closed)?;
        Ok(())
    }

    fn command_sender(&self) -> Result<mpsc::UnboundedSender<Command>> {
        if let Some(tx) = self.command_tx.lock().as_ref() {
            return Ok(tx.clone());
        }
        let handle = {
            let mut inner = self.inner.lock();
            driving_handle(&mut inner, &self.config)?
        };
        let mut guard = self.command_tx.lock();
        // Another thread may have spawned the driver in the meantime.
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }
        if self.inner.lock().state == UdpSocketState::Closed {
            return Err(AerogramError::Closed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *guard = Some(tx.clone());
        self.is_running.store(true, Ordering::SeqCst);
        driver::spawn_driver(&handle, self.driver_context(), rx);
        Ok(tx)
    }

    /// Nudge a running driver to re-snapshot state changed outside the
    /// command path, such as a replaced or torn-down socket.
    fn wake_driver(&self) {
        if let Some(tx) = self.command_tx.lock().as_ref() {
            let _ = tx.send(Command::Wake);
        }
    }

    pub(crate) fn driver_context(&self) -> DriverContext {
        DriverContext {
            inner: self.inner.clone(),
            command_tx: self.command_tx.clone(),
            is_running: self.is_running.clone(),
            closed_emitted: self.closed_emitted.clone(),
            datagram_sent: self.datagram_sent.clone(),
            send_failed: self.send_failed.clone(),
            datagram_received: self.datagram_received.clone(),
            receive_failed: self.receive_failed.clone(),
            closed: self.closed.clone(),
        }
    }
}

/// Multicast groups may be given by name; resolution is synchronous.
fn resolve_group(group: &str) -> Result<IpAddr> {
    if let Ok(ip) = group.parse::<IpAddr>() {
        return Ok(ip);
    }
    let addrs = resolve_host(group, 0)?;
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
        .ok_or_else(|| AerogramError::BadParameter(format!("cannot resolve {group}")))
}

impl Default for UdpSocket {
    fn default() -> Self {
        Self::new(UdpSocketConfig::new())
    }
}

impl fmt::Debug for UdpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("UdpSocket")
            .field("state", &inner.state)
            .field("local_addr", &inner.local_addr)
            .field("peer_addr", &inner.peer_addr)
            .field("is_running", &self.is_running.load(Ordering::SeqCst))
            .finish()
    }
}

impl Drop for UdpSocket {
    fn drop(&mut self) {
        self.close();
    }
}
