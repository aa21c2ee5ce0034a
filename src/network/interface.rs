//! Network interface detection and selection

use pnet::datalink::{self, NetworkInterface};
use pnet::util::MacAddr;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::{Error, Result};
use crate::models::InterfaceInfo;

fn is_virtual_adapter_name(name_lower: &str) -> bool {
    name_lower.contains("hyper-v")
        || name_lower.contains("vmware")
        || name_lower.contains("virtualbox")
        || name_lower.contains("docker")
        || name_lower.contains("vethernet")
        || name_lower.contains("wsl")
}

fn is_usable_ipv4(ipv4: Ipv4Addr, prefix: u8) -> bool {
    !ipv4.is_unspecified() && prefix > 0 && !ipv4.is_link_local()
}

/// First usable IPv4 address on the interface, paired with its MAC.
fn interface_info(pnet_if: &NetworkInterface) -> Option<InterfaceInfo> {
    let mac = match pnet_if.mac {
        Some(m) if m != MacAddr::zero() => m,
        _ => return None,
    };

    pnet_if.ips.iter().find_map(|ip_network| match ip_network.ip() {
        IpAddr::V4(ipv4) if is_usable_ipv4(ipv4, ip_network.prefix()) => Some(InterfaceInfo {
            name: pnet_if.name.clone(),
            ip: ipv4,
            mac,
            prefix_len: ip_network.prefix(),
            pnet_interface: pnet_if.clone(),
        }),
        _ => None,
    })
}

fn collect_candidate_interfaces(pnet_interfaces: &[NetworkInterface]) -> Vec<InterfaceInfo> {
    let mut candidates: Vec<InterfaceInfo> = pnet_interfaces
        .iter()
        .filter(|pnet_if| !pnet_if.is_loopback() && pnet_if.is_up())
        .filter(|pnet_if| {
            let skip = is_virtual_adapter_name(&pnet_if.name.to_lowercase());
            if skip {
                tracing::debug!("Skipping virtual adapter: {}", pnet_if.name);
            }
            !skip
        })
        .filter_map(interface_info)
        .collect();

    candidates.sort_by(|a, b| interface_score(&b.ip).cmp(&interface_score(&a.ip)));
    candidates
}

/// Looks up an interface by exact name and resolves its own IPv4 address and MAC.
///
/// Fails with a configuration error when the interface is missing or has no
/// usable IPv4 address (ARP needs one to fill the sender fields).
pub fn find_interface_by_name(name: &str) -> Result<InterfaceInfo> {
    let pnet_interfaces = datalink::interfaces();

    let pnet_if = pnet_interfaces
        .iter()
        .find(|candidate| candidate.name == name)
        .ok_or_else(|| Error::configuration(format!("Interface '{}' not found", name)))?;

    let info = interface_info(pnet_if).ok_or_else(|| {
        Error::configuration(format!(
            "Interface '{}' has no usable IPv4 address or MAC",
            name
        ))
    })?;

    tracing::debug!(
        "Selected interface: {} (IP: {}/{}, MAC: {})",
        info.name,
        info.ip,
        info.prefix_len,
        info.mac
    );
    Ok(info)
}

/// Finds the best IPv4 interface with a MAC address, preferring physical LAN adapters.
pub fn find_valid_interface() -> Result<InterfaceInfo> {
    let pnet_interfaces = datalink::interfaces();
    tracing::debug!("Scanning {} network interfaces...", pnet_interfaces.len());

    if let Some(best) = collect_candidate_interfaces(&pnet_interfaces).into_iter().next() {
        tracing::debug!(
            "Selected interface: {} (IP: {}/{}, MAC: {})",
            best.name,
            best.ip,
            best.prefix_len,
            best.mac
        );
        return Ok(best);
    }

    tracing::warn!("No valid interface found. Available interfaces:");
    for pnet_if in &pnet_interfaces {
        tracing::warn!(
            "  - {} (loopback: {}, mac: {:?}, ips: {:?})",
            pnet_if.name,
            pnet_if.is_loopback(),
            pnet_if.mac,
            pnet_if.ips
        );
    }

    Err(Error::configuration(
        "No valid IPv4 network interface found. Ensure you have an active network connection.",
    ))
}

/// Valid interfaces in priority order
pub fn list_valid_interfaces() -> Vec<InterfaceInfo> {
    let mut seen: Vec<String> = Vec::new();
    collect_candidate_interfaces(&datalink::interfaces())
        .into_iter()
        .filter(|candidate| {
            if seen.contains(&candidate.name) {
                false
            } else {
                seen.push(candidate.name.clone());
                true
            }
        })
        .collect()
}

/// Scores an IP address for interface selection priority
pub fn interface_score(ip: &Ipv4Addr) -> u32 {
    let octets = ip.octets();
    match octets[0] {
        192 if octets[1] == 168 => 100,                  // typical home/office LAN
        10 => 90,                                        // typical office LAN
        172 if (16..=31).contains(&octets[1]) => 50,     // often a container bridge
        _ => 70,
    }
}
