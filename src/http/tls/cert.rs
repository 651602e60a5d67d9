//! Certificate inspection
//!
//! Summaries of the certificates a peer presented, for logging and for
//! assertions in tests.

use openssl::nid::Nid;
use openssl::ssl::SslRef;
use openssl::x509::{X509NameRef, X509Ref};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Subject Common Name
    pub subject: String,
    /// Issuer Common Name
    pub issuer: String,
    /// Subject Alternative Names, as `DNS:<name>` or `IP:<addr>`
    pub subject_alt_names: Vec<String>,
}

impl CertInfo {
    pub fn from_x509_ref(cert: &X509Ref) -> Self {
        CertInfo {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: subject_alt_names(cert),
        }
    }

    /// Whether the certificate names `host` in its SAN list
    pub fn covers(&self, host: &str) -> bool {
        let dns = format!("DNS:{}", host);
        let ip = format!("IP:{}", host);
        self.subject_alt_names
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&dns) || *name == ip)
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| std::str::from_utf8(entry.data().as_slice()).ok())
        .map(str::to_string)
        .unwrap_or_else(|| "<undef>".to_string())
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let Some(names) = cert.subject_alt_names() else {
        return Vec::new();
    };

    names
        .iter()
        .filter_map(|name| {
            if let Some(dns) = name.dnsname() {
                return Some(format!("DNS:{}", dns));
            }
            let ip: IpAddr = match name.ipaddress()? {
                &[a, b, c, d] => Ipv4Addr::new(a, b, c, d).into(),
                octets => <[u8; 16]>::try_from(octets).ok().map(Ipv6Addr::from)?.into(),
            };
            Some(format!("IP:{}", ip))
        })
        .collect()
}

/// Peer certificate chain, leaf first
///
/// On the client side OpenSSL's chain already starts with the leaf; on the
/// server side it does not. Either way the leaf appears exactly once.
pub fn get_cert_chain(ssl: &SslRef) -> Vec<CertInfo> {
    let leaf = ssl.peer_certificate();
    let leaf_der = leaf.as_ref().and_then(|cert| cert.to_der().ok());

    let mut chain: Vec<CertInfo> = leaf
        .as_deref()
        .map(CertInfo::from_x509_ref)
        .into_iter()
        .collect();

    if let Some(stack) = ssl.peer_cert_chain() {
        for cert in stack {
            if leaf_der.is_some() && cert.to_der().ok() == leaf_der {
                continue;
            }
            chain.push(CertInfo::from_x509_ref(cert));
        }
    }

    chain
}
