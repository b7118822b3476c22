//! Dual-stack native socket management.
//!
//! A socket engine owns at most one native socket per IP version. Sockets are
//! created lazily, registered with the tokio reactor of the engine's driving
//! runtime, and torn down when the engine pins itself to the other version or
//! closes. For runtime migration the pair can be detached back to `std`
//! sockets and re-registered elsewhere.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket as TokioUdpSocket;
use tokio::runtime::Handle;

use crate::error::{AerogramError, Result};
use crate::network_info::NetworkInterface;

/// IP version of a native socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// The version that routes the given address.
    pub fn of(addr: &SocketAddr) -> Self {
        if addr.is_ipv4() {
            IpVersion::V4
        } else {
            IpVersion::V6
        }
    }

    /// The version of a bare IP address.
    pub fn of_ip(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    /// The error reported when this version cannot be used.
    pub fn unavailable(self) -> AerogramError {
        match self {
            IpVersion::V4 => AerogramError::Ipv4Unavailable,
            IpVersion::V6 => AerogramError::Ipv6Unavailable,
        }
    }
}

impl std::fmt::Display for IpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
        }
    }
}

/// Register a non-blocking `std` socket with the runtime's reactor.
pub(crate) fn attach(socket: std::net::UdpSocket, runtime: &Handle) -> Result<Arc<TokioUdpSocket>> {
    let _guard = runtime.enter();
    Ok(Arc::new(TokioUdpSocket::from_std(socket)?))
}

fn raw_socket(version: IpVersion) -> Result<Socket> {
    let domain = match version {
        IpVersion::V4 => Domain::IPV4,
        IpVersion::V6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    if version == IpVersion::V6 {
        // Keep the v6 socket v6-only so the pair can share a port.
        socket.set_only_v6(true)?;
    }
    Ok(socket)
}

/// Create an unbound socket of the given version.
///
/// The OS assigns a local address lazily, on connect or first send.
pub(crate) fn create_socket(version: IpVersion, runtime: &Handle) -> Result<Arc<TokioUdpSocket>> {
    let socket = raw_socket(version)?;
    attach(socket.into(), runtime)
}

/// Create a socket bound to the given local address.
pub(crate) fn create_bound_socket(
    version: IpVersion,
    addr: SocketAddr,
    runtime: &Handle,
) -> Result<Arc<TokioUdpSocket>> {
    let socket = raw_socket(version)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    attach(socket.into(), runtime)
}

/// The engine's native sockets, at most one per IP version.
#[derive(Debug, Default)]
pub(crate) struct SocketPair {
    pub v4: Option<Arc<TokioUdpSocket>>,
    pub v6: Option<Arc<TokioUdpSocket>>,
}

/// Sockets detached from a reactor, mid-migration.
#[derive(Debug, Default)]
pub(crate) struct DetachedSockets {
    pub v4: Option<std::net::UdpSocket>,
    pub v6: Option<std::net::UdpSocket>,
}

impl SocketPair {
    pub fn get(&self, version: IpVersion) -> Option<&Arc<TokioUdpSocket>> {
        match version {
            IpVersion::V4 => self.v4.as_ref(),
            IpVersion::V6 => self.v6.as_ref(),
        }
    }

    pub fn set(&mut self, version: IpVersion, socket: Arc<TokioUdpSocket>) {
        match version {
            IpVersion::V4 => self.v4 = Some(socket),
            IpVersion::V6 => self.v6 = Some(socket),
        }
    }

    /// The socket that can reach the given address, if it exists.
    pub fn for_target(&self, target: &SocketAddr) -> Option<Arc<TokioUdpSocket>> {
        self.get(IpVersion::of(target)).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_none() && self.v6.is_none()
    }

    /// Tear down the socket of the other version, keeping only `version`.
    pub fn retain_only(&mut self, version: IpVersion) {
        match version {
            IpVersion::V4 => self.v6 = None,
            IpVersion::V6 => self.v4 = None,
        }
    }

    /// Tear down both sockets. Idempotent.
    pub fn teardown(&mut self) {
        self.v4 = None;
        self.v6 = None;
    }

    /// Deregister both sockets from their reactor for migration.
    ///
    /// A handle-side call (option application, a connect) may hold a clone of
    /// a socket for a moment; detaching waits such clones out with a short
    /// bounded retry. On failure any socket already detached is re-registered
    /// on `current_runtime` and the pair is left usable.
    pub fn detach(&mut self, current_runtime: &Handle) -> Result<DetachedSockets> {
        const UNWRAP_ATTEMPTS: usize = 10;

        let mut detached = DetachedSockets::default();
        for version in [IpVersion::V4, IpVersion::V6] {
            let slot = match version {
                IpVersion::V4 => &mut self.v4,
                IpVersion::V6 => &mut self.v6,
            };
            let Some(mut arc) = slot.take() else { continue };
            let mut attempts = UNWRAP_ATTEMPTS;
            let socket = loop {
                match Arc::try_unwrap(arc) {
                    Ok(socket) => break socket,
                    Err(shared) => {
                        attempts -= 1;
                        if attempts == 0 {
                            *slot = Some(shared);
                            self.reattach_detached(detached, current_runtime);
                            return Err(AerogramError::Io(
                                "socket handle still shared during migration".to_string(),
                            ));
                        }
                        arc = shared;
                        std::thread::sleep(std::time::Duration::from_millis(1));
                    }
                }
            };
            match socket.into_std() {
                Ok(std_socket) => match version {
                    IpVersion::V4 => detached.v4 = Some(std_socket),
                    IpVersion::V6 => detached.v6 = Some(std_socket),
                },
                Err(e) => {
                    self.reattach_detached(detached, current_runtime);
                    return Err(e.into());
                }
            }
        }
        Ok(detached)
    }

    /// Register detached sockets with the given runtime's reactor.
    pub fn attach_detached(detached: DetachedSockets, runtime: &Handle) -> Result<SocketPair> {
        Ok(SocketPair {
            v4: detached.v4.map(|s| attach(s, runtime)).transpose()?,
            v6: detached.v6.map(|s| attach(s, runtime)).transpose()?,
        })
    }

    fn reattach_detached(&mut self, detached: DetachedSockets, runtime: &Handle) {
        if let Some(std_socket) = detached.v4
            && let Ok(socket) = attach(std_socket, runtime)
        {
            self.v4 = Some(socket);
        }
        if let Some(std_socket) = detached.v6
            && let Ok(socket) = attach(std_socket, runtime)
        {
            self.v6 = Some(socket);
        }
    }
}

/// Join a multicast group, optionally through a specific local interface.
pub(crate) fn join_multicast(
    socket: &TokioUdpSocket,
    group: IpAddr,
    interface: Option<IpAddr>,
) -> Result<()> {
    match group {
        IpAddr::V4(group) => {
            socket.join_multicast_v4(group, v4_interface(interface)?)?;
        }
        IpAddr::V6(group) => {
            socket.join_multicast_v6(&group, v6_interface_index(interface)?)?;
        }
    }
    Ok(())
}

/// Leave a multicast group joined through [`join_multicast`].
pub(crate) fn leave_multicast(
    socket: &TokioUdpSocket,
    group: IpAddr,
    interface: Option<IpAddr>,
) -> Result<()> {
    match group {
        IpAddr::V4(group) => {
            socket.leave_multicast_v4(group, v4_interface(interface)?)?;
        }
        IpAddr::V6(group) => {
            socket.leave_multicast_v6(&group, v6_interface_index(interface)?)?;
        }
    }
    Ok(())
}

fn v4_interface(interface: Option<IpAddr>) -> Result<Ipv4Addr> {
    match interface {
        None => Ok(Ipv4Addr::UNSPECIFIED),
        Some(IpAddr::V4(addr)) => Ok(addr),
        Some(IpAddr::V6(addr)) => Err(AerogramError::BadParameter(format!(
            "IPv6 interface {addr} cannot carry an IPv4 multicast group"
        ))),
    }
}

/// Map an optional interface address to the interface index the OS expects
/// for IPv6 membership. `None` lets the OS pick (index 0).
fn v6_interface_index(interface: Option<IpAddr>) -> Result<u32> {
    match interface {
        None => Ok(0),
        Some(IpAddr::V4(addr)) => Err(AerogramError::BadParameter(format!(
            "IPv4 interface {addr} cannot carry an IPv6 multicast group"
        ))),
        Some(addr @ IpAddr::V6(_)) => NetworkInterface::find_by_address(addr)
            .map(|iface| iface.index)
            .ok_or_else(|| {
                AerogramError::BadParameter(format!("no interface owns address {addr}"))
            }),
    }
}

/// Path MTU of a connected socket, from the OS route cache.
#[cfg(target_os = "linux")]
pub(crate) fn connected_path_mtu(socket: &TokioUdpSocket, version: IpVersion) -> Option<u32> {
    use std::os::fd::AsRawFd;

    let (level, option) = match version {
        IpVersion::V4 => (libc::IPPROTO_IP, libc::IP_MTU),
        IpVersion::V6 => (libc::IPPROTO_IPV6, libc::IPV6_MTU),
    };
    let mut mtu: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: the fd is a live socket and mtu/len are sized for c_int.
    let rc = unsafe {
        libc::getsockopt(
            socket.as_raw_fd(),
            level,
            option,
            &mut mtu as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    (rc == 0 && mtu > 0).then_some(mtu as u32)
}
