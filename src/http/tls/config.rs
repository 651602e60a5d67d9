//! TLS configuration
//!
//! Client and server configuration builders over an OpenSSL context. A
//! built [`TlsConfig`] is immutable and cheap to clone; every connection
//! creates its own `Ssl` from the shared context.

use super::handshake::DEFAULT_HANDSHAKE_TIMEOUT;
use openssl::pkey::PKey;
use openssl::ssl::{AlpnError, SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use std::fmt;
use std::net::TcpStream;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Name as reported by OpenSSL (e.g. "TLSv1.3")
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Peer verification failed: {0}")]
    VerifyFailed(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The peer did not agree on the required application protocol
    #[error("ALPN negotiation failed (negotiated {0:?})")]
    AlpnFailed(Option<String>),
}

/// TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) is_server: bool,
    /// SNI name; also the host name checked against the peer certificate
    pub(crate) servername: Option<String>,
    pub(crate) verify_peer: bool,
    pub(crate) handshake_timeout: Duration,
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("is_server", &self.is_server)
            .field("servername", &self.servername)
            .field("verify_peer", &self.verify_peer)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> Result<ClientConfigBuilder, TlsError> {
        ClientConfigBuilder::new()
    }

    /// Create a new server configuration builder
    pub fn server() -> Result<ServerConfigBuilder, TlsError> {
        ServerConfigBuilder::new()
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    pub fn servername(&self) -> Option<&str> {
        self.servername.as_deref()
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Connect to a server with TLS (client-side)
    pub fn connect(&self, stream: TcpStream) -> Result<super::TlsSessionOps, TlsError> {
        if self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use server config for client connection".to_string(),
            ));
        }
        super::session::TlsSessionOps::connect(stream, self)
    }

    /// Accept a client connection with TLS (server-side)
    pub fn accept(&self, stream: TcpStream) -> Result<super::TlsSessionOps, TlsError> {
        if !self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use client config for server accept".to_string(),
            ));
        }
        super::session::TlsSessionOps::accept(stream, self)
    }
}

/// Encode protocol names in ALPN wire format (length-prefixed)
fn alpn_wire(protocols: &[&str]) -> Result<Vec<u8>, TlsError> {
    let mut wire = Vec::new();
    for proto in protocols {
        if proto.is_empty() || proto.len() > 255 {
            return Err(TlsError::InvalidConfig(format!(
                "ALPN protocol name {:?} must be 1-255 bytes",
                proto
            )));
        }
        wire.push(proto.len() as u8);
        wire.extend_from_slice(proto.as_bytes());
    }
    Ok(wire)
}

/// First server protocol the client also offers
///
/// The result borrows from `client_protos` so it can be handed back to
/// OpenSSL from the select callback.
fn select_protocol<'a>(accepted: &[Vec<u8>], client_protos: &'a [u8]) -> Option<&'a [u8]> {
    let mut offered = Vec::new();
    let mut pos = 0;
    while pos < client_protos.len() {
        let len = client_protos[pos] as usize;
        pos += 1;
        let Some(proto) = client_protos.get(pos..pos + len) else {
            break;
        };
        offered.push(proto);
        pos += len;
    }

    accepted
        .iter()
        .find_map(|want| offered.iter().copied().find(|proto| *proto == want.as_slice()))
}

fn set_version_range(
    ctx: &mut SslContextBuilder,
    min: TlsVersion,
    max: TlsVersion,
) -> Result<(), TlsError> {
    if min > max {
        return Err(TlsError::InvalidConfig(format!(
            "TLS version range {}..{} is empty",
            min.as_str(),
            max.as_str()
        )));
    }
    ctx.set_min_proto_version(Some(min.to_openssl_version()))?;
    ctx.set_max_proto_version(Some(max.to_openssl_version()))?;
    Ok(())
}

/// Client configuration builder
pub struct ClientConfigBuilder {
    ctx_builder: SslContextBuilder,
    servername: Option<String>,
    verify_peer: bool,
    handshake_timeout: Duration,
}

impl ClientConfigBuilder {
    fn new() -> Result<Self, TlsError> {
        let mut ctx_builder = SslContextBuilder::new(SslMethod::tls_client())?;

        // Peer verification is opt-in: `verify_peer` or a trust anchor
        ctx_builder.set_verify(SslVerifyMode::NONE);

        Ok(ClientConfigBuilder {
            ctx_builder,
            servername: None,
            verify_peer: false,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Result<Self, TlsError> {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Result<Self, TlsError> {
        set_version_range(&mut self.ctx_builder, min, max)?;
        Ok(self)
    }

    /// Set ALPN protocols offered to the server, in preference order
    pub fn alpn(mut self, protocols: &[&str]) -> Result<Self, TlsError> {
        let wire = alpn_wire(protocols)?;
        self.ctx_builder.set_alpn_protos(&wire)?;
        Ok(self)
    }

    /// Set SNI servername
    ///
    /// With peer verification on, the certificate must also match this name.
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self.ctx_builder.set_verify(if verify {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });
        self
    }

    /// Trust the CA certificate(s) in a PEM buffer and verify the peer
    pub fn ca_pem(mut self, pem: &[u8]) -> Result<Self, TlsError> {
        let certs = X509::stack_from_pem(pem)
            .map_err(|e| TlsError::Certificate(format!("Failed to parse CA PEM: {}", e)))?;
        if certs.is_empty() {
            return Err(TlsError::Certificate("No certificate in CA PEM".to_string()));
        }

        for cert in certs {
            self.ctx_builder.cert_store_mut().add_cert(cert)?;
        }
        Ok(self.verify_peer(true))
    }

    /// Trust the CA certificate(s) in a PEM file and verify the peer
    pub fn ca_file<P: AsRef<Path>>(self, path: P) -> Result<Self, TlsError> {
        let pem = std::fs::read(path.as_ref())?;
        self.ca_pem(&pem)
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        Ok(TlsConfig {
            ctx: self.ctx_builder.build(),
            is_server: false,
            servername: self.servername,
            verify_peer: self.verify_peer,
            handshake_timeout: self.handshake_timeout,
        })
    }
}

/// Server configuration builder
pub struct ServerConfigBuilder {
    ctx_builder: SslContextBuilder,
    has_identity: bool,
    handshake_timeout: Duration,
}

impl ServerConfigBuilder {
    fn new() -> Result<Self, TlsError> {
        let ctx_builder = SslContextBuilder::new(SslMethod::tls_server())?;

        Ok(ServerConfigBuilder {
            ctx_builder,
            has_identity: false,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Result<Self, TlsError> {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Result<Self, TlsError> {
        set_version_range(&mut self.ctx_builder, min, max)?;
        Ok(self)
    }

    /// Set the ALPN protocols the server accepts, in preference order
    ///
    /// A client offering none of them gets no ALPN extension back; the
    /// handshake itself still succeeds.
    pub fn alpn(mut self, protocols: &[&str]) -> Result<Self, TlsError> {
        alpn_wire(protocols)?;
        let accepted: Vec<Vec<u8>> = protocols.iter().map(|p| p.as_bytes().to_vec()).collect();

        self.ctx_builder
            .set_alpn_select_callback(move |_ssl, client_protos| {
                select_protocol(&accepted, client_protos).ok_or(AlpnError::NOACK)
            });

        Ok(self)
    }

    /// Load the server certificate (plus any chain) and private key from PEM
    ///
    /// The first certificate in `cert_pem` is the leaf; the rest are sent as
    /// the chain.
    pub fn identity_pem(mut self, cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsError> {
        let mut certs = X509::stack_from_pem(cert_pem)
            .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?
            .into_iter();
        let leaf = certs
            .next()
            .ok_or_else(|| TlsError::Certificate("No certificate in PEM".to_string()))?;

        self.ctx_builder.set_certificate(&leaf)?;
        for cert in certs {
            self.ctx_builder.add_extra_chain_cert(cert)?;
        }

        let key = PKey::private_key_from_pem(key_pem)
            .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;
        // OpenSSL 3 already refuses a mismatched key in set_private_key
        let mismatch =
            |_| TlsError::Certificate("Private key does not match certificate".to_string());
        self.ctx_builder.set_private_key(&key).map_err(mismatch)?;
        self.ctx_builder.check_private_key().map_err(mismatch)?;

        self.has_identity = true;
        Ok(self)
    }

    /// Load the server certificate and private key from PEM files
    pub fn identity_files<P: AsRef<Path>, Q: AsRef<Path>>(
        self,
        cert_path: P,
        key_path: Q,
    ) -> Result<Self, TlsError> {
        let cert = std::fs::read(cert_path.as_ref())?;
        let key = std::fs::read(key_path.as_ref())?;
        self.identity_pem(&cert, &key)
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        if !self.has_identity {
            return Err(TlsError::InvalidConfig(
                "Server configuration needs a certificate and private key".to_string(),
            ));
        }

        Ok(TlsConfig {
            ctx: self.ctx_builder.build(),
            is_server: true,
            servername: None,
            verify_peer: false,
            handshake_timeout: self.handshake_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_CERT: &[u8] = include_bytes!("../../../tests/fixtures/keys/server-cert.pem");
    const SERVER_KEY: &[u8] = include_bytes!("../../../tests/fixtures/keys/server-key.pem");
    const CA_CERT: &[u8] = include_bytes!("../../../tests/fixtures/keys/ca-cert.pem");

    #[test]
    fn test_tls_version_parsing() {
        assert_eq!("TLSv1.2".parse::<TlsVersion>().unwrap(), TlsVersion::Tls12);
        assert_eq!("tlsv1.3".parse::<TlsVersion>().unwrap(), TlsVersion::Tls13);
        assert_eq!("TLS1.0".parse::<TlsVersion>().unwrap(), TlsVersion::Tls10);
        assert!("invalid".parse::<TlsVersion>().is_err());
    }

    #[test]
    fn test_client_config_builder() {
        let config = TlsConfig::client()
            .unwrap()
            .version(TlsVersion::Tls13)
            .unwrap()
            .servername("localhost")
            .ca_pem(CA_CERT)
            .unwrap()
            .alpn(&["h2"])
            .unwrap()
            .build()
            .unwrap();

        assert!(!config.is_server());
        assert_eq!(config.servername(), Some("localhost"));
        assert!(config.verify_peer);
        assert_eq!(config.handshake_timeout(), DEFAULT_HANDSHAKE_TIMEOUT);
    }

    #[test]
    fn test_server_needs_identity() {
        let err = TlsConfig::server().unwrap().build().unwrap_err();
        assert!(matches!(err, TlsError::InvalidConfig(_)));

        let config = TlsConfig::server()
            .unwrap()
            .identity_pem(SERVER_CERT, SERVER_KEY)
            .unwrap()
            .alpn(&["h2"])
            .unwrap()
            .build()
            .unwrap();
        assert!(config.is_server());
    }

    #[test]
    fn test_mismatched_key_is_rejected() {
        let other = openssl::rsa::Rsa::generate(2048).unwrap();
        let other_pem = PKey::from_rsa(other)
            .unwrap()
            .private_key_to_pem_pkcs8()
            .unwrap();

        let err = TlsConfig::server()
            .unwrap()
            .identity_pem(SERVER_CERT, &other_pem)
            .err()
            .unwrap();
        assert!(matches!(err, TlsError::Certificate(_)));
    }

    #[test]
    fn test_bad_inputs() {
        assert!(matches!(
            TlsConfig::client().unwrap().ca_pem(b"not a pem").err().unwrap(),
            TlsError::Certificate(_)
        ));
        assert!(matches!(
            TlsConfig::client().unwrap().alpn(&[""]).err().unwrap(),
            TlsError::InvalidConfig(_)
        ));
        assert!(matches!(
            TlsConfig::client()
                .unwrap()
                .version_range(TlsVersion::Tls13, TlsVersion::Tls12)
                .err()
                .unwrap(),
            TlsError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_select_protocol_prefers_server_order() {
        let accepted = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        let offered = b"\x08http/1.1\x02h2";
        assert_eq!(select_protocol(&accepted, offered), Some(&b"h2"[..]));
        assert_eq!(select_protocol(&accepted, b"\x06spdy/3"), None);
        // Truncated entry is ignored
        assert_eq!(
            select_protocol(&accepted, b"\x08http/1.1\x05h2"),
            Some(&b"http/1.1"[..])
        );
        assert_eq!(select_protocol(&accepted, b""), None);
    }

    #[test]
    fn test_config_debug_omits_context() {
        let config = TlsConfig::client()
            .unwrap()
            .servername("localhost")
            .build()
            .unwrap();
        let shown = format!("{:?}", config);
        assert!(shown.contains("localhost"), "{}", shown);
        assert!(!shown.contains("ctx"), "{}", shown);
    }

    #[test]
    fn test_alpn_wire_format() {
        assert_eq!(
            alpn_wire(&["h2", "http/1.1"]).unwrap(),
            b"\x02h2\x08http/1.1".to_vec()
        );
    }
}
