use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::hostname_util::{canonical_ip, parse_ip_literal};
use crate::pattern_index::HostKey;

/// The `dest_ip` of a multicert line: which local address the certificate is
/// served on when SNI does not pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestIp {
    /// `*`: the table's default certificate.
    Default,
    /// An address, optionally restricted to one port.
    Address(IpAddr, Option<u16>),
}

impl DestIp {
    /// The index key for an address; `None` for the default.
    pub fn host_key(&self) -> Option<HostKey> {
        match *self {
            DestIp::Default => None,
            DestIp::Address(ip, port) => Some(HostKey::Address(ip, port)),
        }
    }
}

impl TryFrom<&str> for DestIp {
    type Error = std::io::Error;

    fn try_from(dest_ip: &str) -> std::io::Result<Self> {
        let dest_ip = dest_ip.trim();
        if dest_ip == "*" {
            return Ok(DestIp::Default);
        }
        if let Some(ip) = parse_ip_literal(dest_ip) {
            return Ok(DestIp::Address(ip, None));
        }
        match dest_ip.parse::<SocketAddr>() {
            Ok(addr) => Ok(DestIp::Address(canonical_ip(addr.ip()), Some(addr.port()))),
            Err(e) => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid dest_ip {}: {}", dest_ip, e),
            )),
        }
    }
}

impl FromStr for DestIp {
    type Err = std::io::Error;

    fn from_str(s: &str) -> std::io::Result<Self> {
        Self::try_from(s)
    }
}

impl fmt::Display for DestIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host_key() {
            Some(key) => write!(f, "{}", key),
            None => f.write_str("*"),
        }
    }
}
