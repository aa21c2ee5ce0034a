//! Network module - interface detection, subnet utilities, ARP frames

pub mod forwarding;
pub mod frames;
mod interface;
mod subnet;

pub use forwarding::ip_forwarding_enabled;
pub use frames::{
    build_arp_reply, build_arp_request, parse_arp_frame, parse_arp_reply, ArpFrame,
    ARP_FRAME_LEN, BROADCAST_MAC,
};
pub use interface::{
    find_interface_by_name, find_valid_interface, interface_score, list_valid_interfaces,
};
pub use subnet::{is_local_subnet, is_special_address, local_subnet, probe_targets};
