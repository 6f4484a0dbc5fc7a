use socket2::{Domain, Protocol, Type};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddrV4},
};
use tokio::net::UdpSocket;

// this will be common for all our sockets
pub fn new_socket() -> io::Result<socket2::Socket> {
    let socket = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;

    Ok(socket)
}

/// Bind a non-blocking UDP socket on all interfaces. Port 0 picks a free port.
pub fn create_udp_bound(port: u16) -> io::Result<UdpSocket> {
    let socket = new_socket()?;
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&bind_addr.into())?;
    log::trace!("Bound UDP socket to {}", bind_addr);

    UdpSocket::from_std(socket.into())
}

pub fn match_ipv4(addr: &Ipv4Addr, other: &Ipv4Addr, netmask: &Ipv4Addr) -> bool {
    let r = addr & netmask;
    let b = other & netmask;
    r == b
}

/// `true` when the dotted form of `ip` starts with `prefix` (e.g. `"192.168.10."`).
pub fn has_prefix(ip: &Ipv4Addr, prefix: &str) -> bool {
    !prefix.is_empty() && ip.to_string().starts_with(prefix)
}

/// Find the local address the spoofer should send its reports to.
///
/// Prefers an interface whose netmask puts it on the device's subnet, then one
/// whose address shares `prefix`. Loopback interfaces only count when the
/// device itself is on loopback.
pub fn find_nic_for_device(device_ip: &Ipv4Addr, prefix: &str) -> Option<Ipv4Addr> {
    use network_interface::{NetworkInterface, NetworkInterfaceConfig};

    if device_ip.is_loopback() {
        return Some(Ipv4Addr::LOCALHOST);
    }

    let interfaces = NetworkInterface::show().ok()?;

    for itf in &interfaces {
        for addr in &itf.addr {
            if let (IpAddr::V4(nic_ip), Some(IpAddr::V4(netmask))) = (addr.ip(), addr.netmask()) {
                if !nic_ip.is_loopback() && match_ipv4(&nic_ip, device_ip, &netmask) {
                    log::debug!("Found NIC {} ({}) for device {}", itf.name, nic_ip, device_ip);
                    return Some(nic_ip);
                }
            }
        }
    }

    for itf in &interfaces {
        for addr in &itf.addr {
            if let IpAddr::V4(nic_ip) = addr.ip() {
                if !nic_ip.is_loopback() && has_prefix(&nic_ip, prefix) {
                    log::debug!("Using NIC {} ({}) by prefix '{}'", itf.name, nic_ip, prefix);
                    return Some(nic_ip);
                }
            }
        }
    }

    None
}
