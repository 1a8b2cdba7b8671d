use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use log::debug;
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;

use crate::hostname_matcher::CertName;

/// Extracts the names a DER certificate is valid for: SAN DNS names and SAN IP
/// addresses in extension order, followed by the subject Common-Name values.
///
/// A SAN extension that fails to decode is treated as absent.
pub fn cert_names(der: &[u8]) -> std::io::Result<Vec<CertName>> {
    let (_, cert) = parse_x509_certificate(der)
        .map_err(|e| std::io::Error::other(format!("failed to parse certificate: {}", e)))?;

    let mut names = vec![];
    match cert.subject_alternative_name() {
        Ok(Some(san)) => {
            for name in san.value.general_names.iter() {
                match name {
                    GeneralName::DNSName(dns) => names.push(CertName::DnsName(dns.to_string())),
                    GeneralName::IPAddress(bytes) => match ip_from_bytes(bytes) {
                        Some(ip) => names.push(CertName::IpAddress(ip)),
                        None => debug!("Ignoring SAN IP entry of {} bytes", bytes.len()),
                    },
                    _ => {}
                }
            }
        }
        Ok(None) => {}
        Err(e) => debug!("Ignoring undecodable SAN extension: {}", e),
    }

    for attr in cert.subject().iter_common_name() {
        if let Ok(cn) = attr.as_str() {
            names.push(CertName::CommonName(cn.to_string()));
        }
    }

    Ok(names)
}

/// The subject CN and SAN DNS names of a certificate, which are the names a
/// server-side table registers it under.
pub fn host_names(names: &[CertName]) -> impl Iterator<Item = &str> {
    names.iter().filter_map(|name| match name {
        CertName::DnsName(name) | CertName::CommonName(name) => Some(name.as_str()),
        CertName::IpAddress(_) => None,
    })
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
