//! Origin certificate name validation.
//!
//! Checks one candidate host (or IP literal) against the handful of names a
//! single certificate carries. Subject-Alternative-Name entries take
//! precedence; the subject Common-Name is consulted only when the certificate
//! carries no SAN DNS entries at all.

use std::net::IpAddr;

use crate::hostname_util::{canonical_ip, parse_ip_literal};
use crate::name_pattern::{self, NamePattern};

/// A name carried by a certificate, in certificate order.
///
/// DNS names are kept as written so a match can be reported verbatim; they are
/// parsed into a [`NamePattern`] when compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertName {
    DnsName(String),
    IpAddress(IpAddr),
    CommonName(String),
}

/// The certificate name that covered the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedName<'a> {
    DnsName(&'a str),
    IpAddress(IpAddr),
    CommonName(&'a str),
}

impl MatchedName<'_> {
    pub fn to_owned_string(&self) -> String {
        match self {
            MatchedName::DnsName(name) | MatchedName::CommonName(name) => name.to_string(),
            MatchedName::IpAddress(ip) => ip.to_string(),
        }
    }
}

/// Returns the first name in `names` that covers `candidate`.
///
/// With `is_ip`, `candidate` is parsed as an IP literal and compared against
/// SAN IP entries only. Otherwise SAN DNS entries are tested in order, and
/// Common-Name entries only if there are no SAN DNS entries. Names that do not
/// parse as patterns never match.
pub fn validate<'a>(names: &'a [CertName], candidate: &str, is_ip: bool) -> Option<MatchedName<'a>> {
    if is_ip {
        let ip = parse_ip_literal(candidate)?;
        return names.iter().find_map(|name| match name {
            CertName::IpAddress(addr) if canonical_ip(*addr) == ip => {
                Some(MatchedName::IpAddress(*addr))
            }
            _ => None,
        });
    }

    let has_san_dns = names.iter().any(|name| matches!(name, CertName::DnsName(_)));
    names.iter().find_map(|name| match name {
        CertName::DnsName(dns) if dns_matches(dns, candidate) => Some(MatchedName::DnsName(dns)),
        CertName::CommonName(cn) if !has_san_dns && dns_matches(cn, candidate) => {
            Some(MatchedName::CommonName(cn))
        }
        _ => None,
    })
}

fn dns_matches(name: &str, candidate: &str) -> bool {
    match NamePattern::parse(name) {
        Ok(pattern) => name_pattern::matches(&pattern, candidate, false),
        Err(_) => false,
    }
}
