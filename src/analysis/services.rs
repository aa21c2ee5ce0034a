//! Static port tables

/// Destination ports whose hostname comes from a TLS ClientHello (HTTPS, DNS over TLS)
pub const SNI_PORTS: &[u16] = &[443, 853];

/// Plain DNS
pub const DNS_PORT: u16 = 53;

/// Plaintext protocols worth flagging
pub const UNSECURE_PORTS: &[(u16, &str)] = &[
    (80, "HTTP"),
    (21, "FTP"),
    (23, "Telnet"),
];

/// Plaintext protocol name if `port` carries one
pub fn unsecure_protocol(port: u16) -> Option<&'static str> {
    UNSECURE_PORTS
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsecure_ports() {
        assert_eq!(unsecure_protocol(23), Some("Telnet"));
        assert_eq!(unsecure_protocol(443), None);
    }
}
