//! Local address helpers: own IP for IAM, broadcast address for discovery traffic.

use std::net::{IpAddr, Ipv4Addr};

/// Address peers should use to reach us. Falls back to loopback when there is no route.
pub fn own_ip() -> IpAddr {
    match local_ip_address::local_ip() {
        Ok(ip) => ip,
        Err(e) => {
            tracing::warn!("could not determine local IP, using 127.0.0.1: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// First IPv4 broadcast address of any non-loopback interface, else 255.255.255.255.
pub fn broadcast_addr() -> Ipv4Addr {
    let ifaces = match if_addrs::get_if_addrs() {
        Ok(i) => i,
        Err(e) => {
            tracing::debug!("interface enumeration failed: {}", e);
            Vec::new()
        }
    };
    first_broadcast(ifaces.iter().filter(|i| !i.is_loopback()).filter_map(|i| {
        match &i.addr {
            if_addrs::IfAddr::V4(v4) => {
                tracing::trace!(iface = %i.name, ip = %v4.ip, broadcast = ?v4.broadcast, "interface");
                v4.broadcast
            }
            _ => None,
        }
    }))
}

fn first_broadcast(candidates: impl IntoIterator<Item = Ipv4Addr>) -> Ipv4Addr {
    candidates.into_iter().next().unwrap_or(Ipv4Addr::BROADCAST)
}
