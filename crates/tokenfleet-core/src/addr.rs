//! Address validation for registered instances.
//!
//! Instances report themselves by IP literal or by DNS-style host name (for
//! example a Kubernetes service name). Anything else is rejected at
//! registration time.

use std::net::IpAddr;

use crate::ids::IdError;

/// Maximum length of an instance host.
pub const MAX_HOST_LEN: usize = 128;

/// Validate an instance host: an IPv4/IPv6 literal or a DNS-style host name.
///
/// # Errors
///
/// Returns `IdError::Blank` for an empty host, `IdError::TooLong` above 128
/// bytes, and `IdError::InvalidHost` otherwise.
pub fn validate_host(host: &str) -> Result<(), IdError> {
    if host.trim().is_empty() {
        return Err(IdError::Blank("ip"));
    }
    if host.len() > MAX_HOST_LEN {
        return Err(IdError::TooLong {
            kind: "ip",
            max: MAX_HOST_LEN,
            got: host.len(),
        });
    }
    if host.parse::<IpAddr>().is_ok() || host.split('.').all(is_valid_label) {
        Ok(())
    } else {
        Err(IdError::InvalidHost(host.to_string()))
    }
}

/// Validate and narrow a reported port.
///
/// # Errors
///
/// Returns `IdError::InvalidPort` unless the port is in `1..=65535`.
pub fn validate_port(port: i64) -> Result<u16, IdError> {
    match u16::try_from(port) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(IdError::InvalidPort(port)),
    }
}

fn is_valid_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            bytes.len() <= 63
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ip_literals() {
        assert!(validate_host("10.0.0.1").is_ok());
        assert!(validate_host("::1").is_ok());
        assert!(validate_host("fe80::1ff:fe23:4567:890a").is_ok());
    }

    #[test]
    fn accepts_service_names() {
        assert!(validate_host("token-server").is_ok());
        assert!(validate_host("token-server.sentinel.svc.cluster.local").is_ok());
    }

    #[test]
    fn rejects_malformed_hosts() {
        assert!(matches!(validate_host("-bad"), Err(IdError::InvalidHost(_))));
        assert!(matches!(validate_host("a..b"), Err(IdError::InvalidHost(_))));
        assert!(matches!(validate_host("under_score"), Err(IdError::InvalidHost(_))));
        assert_eq!(validate_host(""), Err(IdError::Blank("ip")));
    }

    #[test]
    fn rejects_long_hosts() {
        let host = "a".repeat(129);
        assert!(matches!(validate_host(&host), Err(IdError::TooLong { .. })));
    }

    #[test]
    fn port_bounds() {
        assert_eq!(validate_port(8719), Ok(8719));
        assert_eq!(validate_port(65535), Ok(65535));
        assert_eq!(validate_port(0), Err(IdError::InvalidPort(0)));
        assert_eq!(validate_port(-1), Err(IdError::InvalidPort(-1)));
        assert_eq!(validate_port(65536), Err(IdError::InvalidPort(65536)));
    }
}
