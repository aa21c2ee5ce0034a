//! Kernel IPv4 forwarding probe
//!
//! Forwarding is toggled by the operator; lanwatch only reads the switch so it
//! can warn before a MITM session black-holes the target's traffic.

use std::path::Path;

const LINUX_FORWARD_SWITCH: &str = "/proc/sys/net/ipv4/ip_forward";

/// `Some(true/false)` on Linux, `None` where the switch can't be read.
pub fn ip_forwarding_enabled() -> Option<bool> {
    read_switch(Path::new(LINUX_FORWARD_SWITCH))
}

fn read_switch(path: &Path) -> Option<bool> {
    let raw = std::fs::read_to_string(path).ok()?;
    match raw.trim() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_switch_values() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("lanwatch_fwd_{}", std::process::id()));

        std::fs::write(&path, "1\n").unwrap();
        assert_eq!(read_switch(&path), Some(true));

        std::fs::write(&path, "0\n").unwrap();
        assert_eq!(read_switch(&path), Some(false));

        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(read_switch(&path), None);

        std::fs::remove_file(&path).ok();
        assert_eq!(read_switch(&path), None);
    }
}
