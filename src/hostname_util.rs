use std::net::IpAddr;

/// Prefix of an IDNA A-label (ASCII Compatible Encoding), RFC 5890.
pub const ACE_PREFIX: &str = "xn--";

/// Returns true if `label` is an IDNA A-label, i.e. starts with `xn--`
/// (ASCII case-insensitive).
pub fn is_ace_label(label: &str) -> bool {
    label.len() >= ACE_PREFIX.len()
        && label.as_bytes()[..ACE_PREFIX.len()].eq_ignore_ascii_case(ACE_PREFIX.as_bytes())
}

/// Strips a single trailing dot (FQDN form) and lower-cases ASCII letters.
/// No validation is performed.
pub fn normalize_hostname(hostname: &str) -> String {
    hostname
        .strip_suffix('.')
        .unwrap_or(hostname)
        .to_ascii_lowercase()
}

/// Counts the dot-separated labels of `hostname` without allocating.
pub fn label_count(hostname: &str) -> usize {
    hostname.bytes().filter(|b| *b == b'.').count() + 1
}

/// Validates a raw SNI hostname per RFC 6066 section 3.
/// Rejects trailing dots, control characters, non-ASCII bytes, empty labels,
/// and IP address literals.
pub fn validate_sni_hostname(hostname: &str) -> std::io::Result<()> {
    if hostname.is_empty() {
        return Err(std::io::Error::other("empty SNI hostname"));
    }
    if hostname.len() > 253 {
        return Err(std::io::Error::other("SNI hostname exceeds 253 bytes"));
    }
    if hostname.ends_with('.') {
        return Err(std::io::Error::other("SNI hostname has trailing dot"));
    }
    if hostname.starts_with('.') {
        return Err(std::io::Error::other("SNI hostname has leading dot"));
    }
    if hostname.contains("..") {
        return Err(std::io::Error::other("SNI hostname has empty label"));
    }
    if hostname.split('.').any(|label| label.len() > 63) {
        return Err(std::io::Error::other("SNI hostname label exceeds 63 bytes"));
    }
    // RFC 6066: SNI must be ASCII (IDN hostnames use punycode).
    if !hostname.is_ascii() {
        return Err(std::io::Error::other("SNI hostname contains non-ASCII bytes"));
    }
    if hostname.bytes().any(|b| b.is_ascii_control()) {
        return Err(std::io::Error::other("SNI hostname contains control characters"));
    }
    if hostname.parse::<IpAddr>().is_ok() {
        return Err(std::io::Error::other("SNI hostname is an IP address literal"));
    }
    if hostname.starts_with('[') {
        return Err(std::io::Error::other("SNI hostname is a bracketed IP literal"));
    }
    Ok(())
}

/// Parses an IP literal, accepting the bracketed IPv6 form (`[::1]`).
/// IPv4-mapped IPv6 addresses are folded into their IPv4 form so that
/// `::ffff:10.0.0.1` and `10.0.0.1` compare equal.
pub fn parse_ip_literal(s: &str) -> Option<IpAddr> {
    let s = s
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(s);
    s.parse::<IpAddr>().ok().map(canonical_ip)
}

/// Canonical address form used for every address comparison and map key.
pub fn canonical_ip(ip: IpAddr) -> IpAddr {
    ip.to_canonical()
}
