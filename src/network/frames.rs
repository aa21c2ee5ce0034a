//! Ethernet-II + ARP frame construction and parsing
//!
//! Every crafted frame is exactly 42 bytes: a 14-byte Ethernet header with
//! ethertype 0x0806 followed by a 28-byte ARP body (htype 1, ptype 0x0800,
//! hlen 6, plen 4).

use pnet::packet::arp::{ArpHardwareTypes, ArpOperation, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::Packet;
use pnet::util::MacAddr;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Broadcast MAC address for ARP requests
pub const BROADCAST_MAC: MacAddr = MacAddr(0xff, 0xff, 0xff, 0xff, 0xff, 0xff);

/// Ethernet header + ARP body
pub const ARP_FRAME_LEN: usize = 42;

const ETHERNET_HEADER_LEN: usize = 14;

/// The interesting fields of a received ARP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpFrame {
    pub operation: ArpOperation,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpFrame {
    pub fn is_reply(&self) -> bool {
        self.operation == ArpOperations::Reply
    }

    pub fn is_request(&self) -> bool {
        self.operation == ArpOperations::Request
    }
}

fn build_arp_frame(
    eth_src: MacAddr,
    eth_dst: MacAddr,
    operation: ArpOperation,
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; ARP_FRAME_LEN];

    {
        let mut ethernet_packet = MutableEthernetPacket::new(&mut buffer[..ETHERNET_HEADER_LEN])
            .ok_or_else(|| Error::transmit("Failed to construct Ethernet packet buffer"))?;
        ethernet_packet.set_destination(eth_dst);
        ethernet_packet.set_source(eth_src);
        ethernet_packet.set_ethertype(EtherTypes::Arp);
    }

    {
        let mut arp_packet = MutableArpPacket::new(&mut buffer[ETHERNET_HEADER_LEN..])
            .ok_or_else(|| Error::transmit("Failed to construct ARP packet buffer"))?;
        arp_packet.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp_packet.set_protocol_type(EtherTypes::Ipv4);
        arp_packet.set_hw_addr_len(6);
        arp_packet.set_proto_addr_len(4);
        arp_packet.set_operation(operation);
        arp_packet.set_sender_hw_addr(sender_mac);
        arp_packet.set_sender_proto_addr(sender_ip);
        arp_packet.set_target_hw_addr(target_mac);
        arp_packet.set_target_proto_addr(target_ip);
    }

    Ok(buffer)
}

/// Broadcast "who has `target_ip`" from `source_mac`/`source_ip`.
pub fn build_arp_request(
    source_mac: MacAddr,
    source_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> Result<Vec<u8>> {
    build_arp_frame(
        source_mac,
        BROADCAST_MAC,
        ArpOperations::Request,
        source_mac,
        source_ip,
        MacAddr::zero(),
        target_ip,
    )
}

/// Unicast "`sender_ip` is at `sender_mac`" addressed to `target_mac`/`target_ip`.
///
/// The Ethernet source equals the claimed sender MAC, so restoration frames
/// look like they came from the real owner.
pub fn build_arp_reply(
    sender_mac: MacAddr,
    sender_ip: Ipv4Addr,
    target_mac: MacAddr,
    target_ip: Ipv4Addr,
) -> Result<Vec<u8>> {
    build_arp_frame(
        sender_mac,
        target_mac,
        ArpOperations::Reply,
        sender_mac,
        sender_ip,
        target_mac,
        target_ip,
    )
}

/// Parse an Ethernet frame carrying IPv4-over-Ethernet ARP. Anything else is `None`.
pub fn parse_arp_frame(frame: &[u8]) -> Option<ArpFrame> {
    let ethernet = EthernetPacket::new(frame)?;
    if ethernet.get_ethertype() != EtherTypes::Arp {
        return None;
    }

    let arp = ArpPacket::new(ethernet.payload())?;
    if arp.get_hardware_type() != ArpHardwareTypes::Ethernet
        || arp.get_protocol_type() != EtherTypes::Ipv4
        || arp.get_hw_addr_len() != 6
        || arp.get_proto_addr_len() != 4
    {
        return None;
    }

    Some(ArpFrame {
        operation: arp.get_operation(),
        sender_mac: arp.get_sender_hw_addr(),
        sender_ip: arp.get_sender_proto_addr(),
        target_mac: arp.get_target_hw_addr(),
        target_ip: arp.get_target_proto_addr(),
    })
}

/// Parse a frame and keep it only if it is an ARP reply.
pub fn parse_arp_reply(frame: &[u8]) -> Option<ArpFrame> {
    parse_arp_frame(frame).filter(ArpFrame::is_reply)
}

/// True if the frame's ethertype is ARP.
pub fn is_arp_frame(frame: &[u8]) -> bool {
    EthernetPacket::new(frame).is_some_and(|eth| eth.get_ethertype() == EtherTypes::Arp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new(0x02, 0x00, 0x00, 0x00, 0x00, last)
    }

    #[test]
    fn test_request_wire_layout() {
        let frame = build_arp_request(
            mac(1),
            "192.168.1.10".parse().unwrap(),
            "192.168.1.1".parse().unwrap(),
        )
        .unwrap();

        assert_eq!(frame.len(), ARP_FRAME_LEN);
        // destination broadcast, source ours, ethertype ARP
        assert_eq!(&frame[0..6], &[0xff; 6]);
        assert_eq!(&frame[6..12], &[0x02, 0, 0, 0, 0, 1]);
        assert_eq!(&frame[12..14], &[0x08, 0x06]);
        // htype 1, ptype 0x0800, hlen 6, plen 4, op request
        assert_eq!(&frame[14..22], &[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01]);
        // sender hw/proto
        assert_eq!(&frame[22..28], &[0x02, 0, 0, 0, 0, 1]);
        assert_eq!(&frame[28..32], &[192, 168, 1, 10]);
        // target hw zero, target proto requested IP
        assert_eq!(&frame[32..38], &[0; 6]);
        assert_eq!(&frame[38..42], &[192, 168, 1, 1]);
    }

    #[test]
    fn test_reply_is_unicast_with_sender_as_ethernet_source() {
        let frame = build_arp_reply(
            mac(9),
            "10.0.0.1".parse().unwrap(),
            mac(5),
            "10.0.0.5".parse().unwrap(),
        )
        .unwrap();

        assert_eq!(&frame[0..6], &[0x02, 0, 0, 0, 0, 5]);
        assert_eq!(&frame[6..12], &[0x02, 0, 0, 0, 0, 9]);
        assert_eq!(&frame[20..22], &[0x00, 0x02]);

        let parsed = parse_arp_reply(&frame).expect("reply should parse");
        assert_eq!(parsed.sender_mac, mac(9));
        assert_eq!(parsed.sender_ip, "10.0.0.1".parse::<Ipv4Addr>().unwrap());
        assert_eq!(parsed.target_mac, mac(5));
        assert_eq!(parsed.target_ip, "10.0.0.5".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn test_request_is_not_a_reply() {
        let frame = build_arp_request(
            mac(1),
            "10.0.0.2".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
        )
        .unwrap();

        assert!(parse_arp_frame(&frame).unwrap().is_request());
        assert!(parse_arp_reply(&frame).is_none());
    }

    #[test]
    fn test_non_arp_frames_are_ignored() {
        let mut frame = vec![0u8; 60];
        frame[12] = 0x08;
        frame[13] = 0x00; // IPv4
        assert!(!is_arp_frame(&frame));
        assert!(parse_arp_frame(&frame).is_none());
        assert!(parse_arp_frame(&[0u8; 10]).is_none());
    }
}
