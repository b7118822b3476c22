//! Network interface enumeration.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// A network interface on this host.
#[derive(Debug, Clone)]
pub struct NetworkInterface {
    /// Interface name, such as `eth0` or `en0`.
    pub name: String,
    /// OS interface index, as used for IPv6 multicast membership.
    pub index: u32,
    /// Hardware address, if the interface has one.
    pub mac_address: Option<MacAddress>,
    /// IPv4 addresses assigned to this interface.
    pub ipv4_addresses: Vec<Ipv4Info>,
    /// IPv6 addresses assigned to this interface.
    pub ipv6_addresses: Vec<Ipv6Info>,
    /// Whether the interface is up.
    pub is_up: bool,
    /// Whether this is the loopback interface.
    pub is_loopback: bool,
    /// Maximum transmission unit in bytes, where the platform exposes it.
    pub mtu: Option<u32>,
}

/// MAC (hardware) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl std::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// An IPv4 assignment.
#[derive(Debug, Clone)]
pub struct Ipv4Info {
    /// The address.
    pub address: Ipv4Addr,
    /// Network prefix length.
    pub prefix_len: u8,
    /// Netmask derived from the prefix length.
    pub netmask: Ipv4Addr,
}

impl Ipv4Info {
    fn prefix_to_netmask(prefix_len: u8) -> Ipv4Addr {
        if prefix_len >= 32 {
            Ipv4Addr::new(255, 255, 255, 255)
        } else if prefix_len == 0 {
            Ipv4Addr::new(0, 0, 0, 0)
        } else {
            let mask = !((1u32 << (32 - prefix_len)) - 1);
            Ipv4Addr::from(mask.to_be_bytes())
        }
    }
}

/// An IPv6 assignment.
#[derive(Debug, Clone)]
pub struct Ipv6Info {
    /// The address.
    pub address: Ipv6Addr,
    /// Network prefix length.
    pub prefix_len: u8,
}

impl NetworkInterface {
    /// Every network interface on the system.
    pub fn list() -> Vec<NetworkInterface> {
        netdev::get_interfaces()
            .into_iter()
            .map(Self::from_netdev)
            .collect()
    }

    /// The interface carrying default-route traffic, if one exists.
    pub fn default_interface() -> Option<NetworkInterface> {
        netdev::get_default_interface().ok().map(Self::from_netdev)
    }

    /// The interface that owns the given local address.
    pub fn find_by_address(addr: IpAddr) -> Option<NetworkInterface> {
        Self::list().into_iter().find(|iface| iface.owns_address(addr))
    }

    /// Whether `addr` is assigned to this interface.
    pub fn owns_address(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => self.ipv4_addresses.iter().any(|info| info.address == v4),
            IpAddr::V6(v6) => self.ipv6_addresses.iter().any(|info| info.address == v6),
        }
    }

    /// Every address assigned to this interface, IPv4 first.
    pub fn all_addresses(&self) -> Vec<IpAddr> {
        let mut addrs: Vec<IpAddr> = self
            .ipv4_addresses
            .iter()
            .map(|info| IpAddr::V4(info.address))
            .collect();
        addrs.extend(
            self.ipv6_addresses
                .iter()
                .map(|info| IpAddr::V6(info.address)),
        );
        addrs
    }

    fn from_netdev(iface: netdev::Interface) -> NetworkInterface {
        let ipv4_addresses = iface
            .ipv4
            .iter()
            .map(|net| Ipv4Info {
                address: net.addr(),
                prefix_len: net.prefix_len(),
                netmask: Ipv4Info::prefix_to_netmask(net.prefix_len()),
            })
            .collect();
        let ipv6_addresses = iface
            .ipv6
            .iter()
            .map(|net| Ipv6Info {
                address: net.addr(),
                prefix_len: net.prefix_len(),
            })
            .collect();
        NetworkInterface {
            mtu: interface_mtu(&iface.name),
            mac_address: iface.mac_addr.map(|mac| MacAddress::new(mac.octets())),
            is_up: iface.is_up(),
            is_loopback: iface.is_loopback(),
            index: iface.index,
            name: iface.name,
            ipv4_addresses,
            ipv6_addresses,
        }
    }
}

// netdev does not report the MTU; sysfs has it on Linux.
#[cfg(target_os = "linux")]
fn interface_mtu(name: &str) -> Option<u32> {
    std::fs::read_to_string(format!("/sys/class/net/{name}/mtu"))
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(not(target_os = "linux"))]
fn interface_mtu(_name: &str) -> Option<u32> {
    None
}
