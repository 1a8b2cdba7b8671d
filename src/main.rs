use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use certmatch::cert_names::cert_names;
use certmatch::config::{load_into, LoadReport};
use certmatch::hostname_util::parse_ip_literal;
use certmatch::rustls_util::load_certs;
use certmatch::{validate, CertAction, CertContext, CertTable, LookupKey};
use log::{debug, error};
use tokio::runtime::Builder;

const USAGE: &str = "\
usage: certmatch [OPTIONS] CONFIG...

Loads ssl_multicert configuration files and reports which certificate each
query resolves to.

options:
  --sni HOST            resolve an SNI hostname
  --addr IP[:PORT]      resolve a local address
  --check CERT HOST     check whether the leaf certificate in CERT is valid for HOST
";

#[derive(Debug, Default)]
struct Args {
    config_paths: Vec<PathBuf>,
    server_names: Vec<String>,
    addresses: Vec<(IpAddr, Option<u16>)>,
    checks: Vec<(PathBuf, String)>,
}

fn parse_address(s: &str) -> Option<(IpAddr, Option<u16>)> {
    if let Some(ip) = parse_ip_literal(s) {
        return Some((ip, None));
    }
    s.parse::<SocketAddr>()
        .ok()
        .map(|addr| (addr.ip().to_canonical(), Some(addr.port())))
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--sni" => {
                let host = args.next().ok_or("--sni needs a hostname")?;
                parsed.server_names.push(host);
            }
            "--addr" => {
                let addr = args.next().ok_or("--addr needs an address")?;
                let addr = parse_address(&addr).ok_or(format!("invalid address: {}", addr))?;
                parsed.addresses.push(addr);
            }
            "--check" => {
                let cert = args.next().ok_or("--check needs a certificate file")?;
                let host = args.next().ok_or("--check needs a hostname")?;
                parsed.checks.push((PathBuf::from(cert), host));
            }
            "-h" | "--help" => return Err(String::new()),
            _ if arg.starts_with("--") => return Err(format!("unknown option: {}", arg)),
            _ => parsed.config_paths.push(PathBuf::from(arg)),
        }
    }
    if parsed.config_paths.is_empty() && parsed.checks.is_empty() {
        return Err("no configuration files given".to_string());
    }
    Ok(parsed)
}

fn describe(context: Option<Arc<CertContext>>) -> String {
    match context {
        Some(context) => match context.action() {
            CertAction::Terminate => context.source().to_string(),
            CertAction::Tunnel => format!("{} (tunnel)", context.source()),
        },
        None => "no certificate".to_string(),
    }
}

fn print_report(report: &LoadReport) {
    println!(
        "loaded {} entries, {} conflicts, {} skipped",
        report.loaded,
        report.conflicts.len(),
        report.skipped.len()
    );
    for conflict in report.conflicts.iter() {
        println!("  conflict: {}", conflict);
    }
    for skipped in report.skipped.iter() {
        println!(
            "  skipped {} entry {}: {}",
            skipped.path.display(),
            skipped.line,
            skipped.error
        );
    }
}

async fn check_certificate(cert_path: &Path, host: &str) -> std::io::Result<()> {
    let cert_bytes = tokio::fs::read(cert_path).await?;
    let certs = load_certs(&cert_bytes)?;
    let names = cert_names(certs[0].as_ref())?;
    debug!("{} names: {:?}", cert_path.display(), names);
    let is_ip = parse_ip_literal(host).is_some();
    match validate(&names, host, is_ip) {
        Some(matched) => println!(
            "{}: valid for {} (matched {})",
            cert_path.display(),
            host,
            matched.to_owned_string()
        ),
        None => println!("{}: not valid for {}", cert_path.display(), host),
    }
    Ok(())
}

async fn run(args: Args) -> std::io::Result<()> {
    let mut table = CertTable::new();
    let mut report = LoadReport::default();
    for config_path in args.config_paths.iter() {
        load_into(&mut table, config_path, &mut report)
            .await
            .map_err(std::io::Error::other)?;
    }

    if !args.config_paths.is_empty() {
        print_report(&report);
        if let Some(default) = table.default_context() {
            println!("default -> {}", describe(Some(default.clone())));
        }
    }

    for server_name in args.server_names.iter() {
        println!("sni {} -> {}", server_name, describe(table.resolve(Some(server_name.as_str()), None)));
    }

    for (ip, port) in args.addresses.iter() {
        let context = table
            .find(LookupKey::Address(*ip, *port))
            .or_else(|| table.default_context().cloned());
        let addr = match port {
            Some(port) => SocketAddr::new(*ip, *port).to_string(),
            None => ip.to_string(),
        };
        println!("addr {} -> {}", addr, describe(context));
    }

    for (cert_path, host) in args.checks.iter() {
        check_certificate(cert_path, host).await?;
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("{}\n", message);
            }
            eprint!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Could not build tokio runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, String> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_queries() {
        let parsed = args(&[
            "--sni",
            "a.example.com",
            "multicert.yaml",
            "--addr",
            "192.0.2.1:443",
            "--addr",
            "[::1]",
            "--check",
            "a.pem",
            "a.example.com",
        ])
        .unwrap();
        assert_eq!(parsed.config_paths, vec![PathBuf::from("multicert.yaml")]);
        assert_eq!(parsed.server_names, vec!["a.example.com"]);
        assert_eq!(
            parsed.addresses,
            vec![
                ("192.0.2.1".parse().unwrap(), Some(443)),
                ("::1".parse().unwrap(), None)
            ]
        );
        assert_eq!(parsed.checks, vec![(PathBuf::from("a.pem"), "a.example.com".to_string())]);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(args(&[]).is_err());
        assert!(args(&["--sni"]).is_err());
        assert!(args(&["--addr", "example.com", "c.yaml"]).is_err());
        assert!(args(&["--verbose", "c.yaml"]).is_err());
        assert!(args(&["--check", "a.pem"]).is_err());
    }
}
