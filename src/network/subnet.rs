//! Subnet calculation and utilities

use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::models::InterfaceInfo;

/// Checks if an IP address is a network or broadcast address
pub fn is_special_address(ip: Ipv4Addr, subnet: &Ipv4Network) -> bool {
    ip == subnet.network() || ip == subnet.broadcast()
}

/// The subnet the interface sits on, normalised to its network address
pub fn local_subnet(interface: &InterfaceInfo) -> Result<Ipv4Network> {
    let network = Ipv4Network::new(interface.ip, interface.prefix_len).map_err(|e| {
        Error::configuration(format!(
            "Invalid address {}/{} on {}: {}",
            interface.ip, interface.prefix_len, interface.name, e
        ))
    })?;

    Ipv4Network::new(network.network(), interface.prefix_len)
        .map_err(|e| Error::configuration(format!("Failed to create subnet network: {}", e)))
}

/// Checks if a target IP is in the same subnet as the local interface (L2 reachable)
pub fn is_local_subnet(target_ip: Ipv4Addr, local_interface: &InterfaceInfo) -> bool {
    local_subnet(local_interface)
        .map(|net| net.contains(target_ip))
        .unwrap_or(false)
}

/// Addresses worth probing, ascending: everything in `subnet` except the
/// network, broadcast and local addresses.
///
/// The iterator is lazy so a /8 never materialises sixteen million addresses.
pub fn probe_targets(subnet: Ipv4Network, local_ip: Ipv4Addr) -> impl Iterator<Item = Ipv4Addr> {
    subnet
        .iter()
        .filter(move |ip| !is_special_address(*ip, &subnet) && *ip != local_ip)
}

#[cfg(test)]
#[path = "subnet_tests.rs"]
mod subnet_tests;
