//! Negotiated TLS parameters
//!
//! Captured once the handshake completes so callers can check what was
//! agreed without holding on to the `Ssl` object.

use super::cert::{get_cert_chain, CertInfo};
use openssl::ssl::{NameType, SslRef};

/// TLS variables available after handshake
#[derive(Debug, Clone, Default)]
pub struct TlsVars {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI servername
    pub servername: Option<String>,

    /// Negotiated ALPN protocol
    pub alpn: Option<String>,

    /// Whether an I/O operation on the session failed
    pub failed: bool,

    /// Peer certificate chain (index 0 is the peer's own certificate)
    pub cert_chain: Vec<CertInfo>,
}

impl TlsVars {
    pub fn from_ssl(ssl: &SslRef) -> Self {
        TlsVars {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "<undef>".to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            alpn: ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            failed: false,
            cert_chain: get_cert_chain(ssl),
        }
    }

    /// The peer's own certificate, if it presented one
    pub fn peer(&self) -> Option<&CertInfo> {
        self.cert_chain.first()
    }

    pub fn is_h2(&self) -> bool {
        self.alpn.as_deref() == Some("h2")
    }
}
