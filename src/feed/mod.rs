//! Packet record feed from the external dissector

mod ek;
mod tshark;

pub use ek::{parse_ek_line, EK_FIELDS};
pub use tshark::{read_records, record_channel, DissectorCommand, DissectorFeed};
