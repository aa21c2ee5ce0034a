//! ARP spoofing (MITM) engine

mod engine;

pub use engine::{monitor_filter, MitmEngine, MitmState, SpoofSession};
