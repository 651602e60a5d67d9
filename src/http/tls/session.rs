//! TLS session operations
//!
//! This module implements the SessionOps trait for TLS connections,
//! enabling transparent switching between plain TCP and TLS I/O.

use super::config::{TlsConfig, TlsError};
use super::handshake;
use super::vars::TlsVars;
use crate::http::session::{poll_fd, PollEvents, SessionOps, DEFAULT_SESSION_TIMEOUT};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{Ssl, SslStream};
use std::io::{self, Read, Write};
use std::net::{IpAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;
use tracing::debug;

/// TLS session operations
///
/// Wraps an OpenSSL `SslStream` whose handshake has completed.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    vars: TlsVars,
    failed: bool,
}

impl TlsSessionOps {
    /// Create a client TLS connection (perform handshake)
    ///
    /// With peer verification enabled the certificate must chain to a
    /// trusted CA and match the configured servername.
    pub fn connect(tcp: TcpStream, config: &TlsConfig) -> Result<Self, TlsError> {
        let mut ssl = Ssl::new(&config.ctx)?;

        if let Some(ref servername) = config.servername {
            match servername.parse::<IpAddr>() {
                Ok(ip) => {
                    if config.verify_peer {
                        ssl.param_mut().set_ip(ip)?;
                    }
                }
                Err(_) => {
                    ssl.set_hostname(servername)?;
                    if config.verify_peer {
                        ssl.param_mut().set_host(servername)?;
                    }
                }
            }
        }

        let stream = handshake::connect(ssl, tcp, config.handshake_timeout)?;
        Self::established(stream, "client")
    }

    /// Accept a client connection with TLS (perform handshake)
    pub fn accept(tcp: TcpStream, config: &TlsConfig) -> Result<Self, TlsError> {
        let ssl = Ssl::new(&config.ctx)?;
        let stream = handshake::accept(ssl, tcp, config.handshake_timeout)?;
        Self::established(stream, "server")
    }

    fn established(stream: SslStream<TcpStream>, side: &str) -> Result<Self, TlsError> {
        // Backstop for a read that blocks on a partial record after poll
        stream.get_ref().set_read_timeout(Some(DEFAULT_SESSION_TIMEOUT))?;

        let vars = TlsVars::from_ssl(stream.ssl());
        debug!(
            side,
            version = %vars.version,
            cipher = %vars.cipher,
            alpn = ?vars.alpn,
            "TLS handshake complete"
        );

        Ok(TlsSessionOps {
            stream,
            vars,
            failed: false,
        })
    }

    /// Fail unless ALPN selected `proto`
    pub fn require_alpn(self, proto: &str) -> Result<Self, TlsError> {
        if self.vars.alpn.as_deref() == Some(proto) {
            Ok(self)
        } else {
            Err(TlsError::AlpnFailed(self.vars.alpn.clone()))
        }
    }

    /// Get negotiated TLS parameters
    pub fn vars(&self) -> &TlsVars {
        &self.vars
    }

    /// Check if TLS failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }

    fn mark_failed(&mut self, e: io::Error) -> Error {
        self.failed = true;
        self.vars.failed = true;
        Error::Io(e)
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // Decrypted bytes already buffered inside OpenSSL
        if events != PollEvents::Write && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.mark_failed(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(self.mark_failed(e)),
        }
    }

    fn flush(&mut self) -> HttpResult<()> {
        match self.stream.flush() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.mark_failed(e)),
        }
    }

    fn close(&mut self) -> HttpResult<()> {
        // close_notify is best effort; the peer may already be gone
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        match self.stream.get_mut().shutdown(std::net::Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other.map_err(Error::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    const SERVER_CERT: &[u8] = include_bytes!("../../../tests/fixtures/keys/server-cert.pem");
    const SERVER_KEY: &[u8] = include_bytes!("../../../tests/fixtures/keys/server-key.pem");
    const CA_CERT: &[u8] = include_bytes!("../../../tests/fixtures/keys/ca-cert.pem");
    const UNTRUSTED_CA: &[u8] =
        include_bytes!("../../../tests/fixtures/keys/untrusted-ca-cert.pem");

    fn server_config(alpn: &[&str]) -> TlsConfig {
        TlsConfig::server()
            .unwrap()
            .identity_pem(SERVER_CERT, SERVER_KEY)
            .unwrap()
            .alpn(alpn)
            .unwrap()
            .build()
            .unwrap()
    }

    /// Run one server-side accept on a background thread
    fn serve_once(
        config: TlsConfig,
    ) -> (
        std::net::SocketAddr,
        thread::JoinHandle<Result<TlsSessionOps, TlsError>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (tcp, _) = listener.accept().unwrap();
            config.accept(tcp)
        });
        (addr, handle)
    }

    #[test]
    fn test_tls_client_server_roundtrip() {
        let (addr, server) = serve_once(server_config(&["h2"]));

        let client_config = TlsConfig::client()
            .unwrap()
            .ca_pem(CA_CERT)
            .unwrap()
            .servername("localhost")
            .alpn(&["h2"])
            .unwrap()
            .build()
            .unwrap();

        let tcp = TcpStream::connect(addr).unwrap();
        let mut client = client_config.connect(tcp).unwrap().require_alpn("h2").unwrap();
        let mut server = server.join().unwrap().unwrap();

        assert!(client.vars().is_h2());
        assert!(server.vars().is_h2());
        assert_eq!(client.vars().servername.as_deref(), Some("localhost"));
        assert_eq!(server.vars().servername.as_deref(), Some("localhost"));

        let peer = client.vars().peer().unwrap();
        assert_eq!(peer.subject, "localhost");
        assert_eq!(peer.issuer, "h2fixture Test Root CA");

        assert_eq!(client.write(b"Hello").unwrap(), 5);
        assert!(server.poll(PollEvents::Read, Some(Duration::from_secs(2))).unwrap());
        let mut buf = [0u8; 5];
        assert_eq!(server.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"Hello");

        client.close().unwrap();
        server.close().unwrap();
    }

    #[test]
    fn test_untrusted_certificate_is_rejected() {
        let (addr, server) = serve_once(server_config(&["h2"]));

        let client_config = TlsConfig::client()
            .unwrap()
            .ca_pem(UNTRUSTED_CA)
            .unwrap()
            .servername("localhost")
            .build()
            .unwrap();

        let tcp = TcpStream::connect(addr).unwrap();
        let err = client_config.connect(tcp).err().unwrap();
        assert!(matches!(err, TlsError::VerifyFailed(_)), "{:?}", err);

        assert!(server.join().unwrap().is_err());
    }

    #[test]
    fn test_hostname_mismatch_is_rejected() {
        let (addr, server) = serve_once(server_config(&["h2"]));

        let client_config = TlsConfig::client()
            .unwrap()
            .ca_pem(CA_CERT)
            .unwrap()
            .servername("not-localhost.test")
            .build()
            .unwrap();

        let tcp = TcpStream::connect(addr).unwrap();
        let err = client_config.connect(tcp).err().unwrap();
        assert!(matches!(err, TlsError::VerifyFailed(_)), "{:?}", err);

        let _ = server.join().unwrap();
    }

    #[test]
    fn test_alpn_mismatch() {
        let (addr, server) = serve_once(server_config(&["h2"]));

        let client_config = TlsConfig::client()
            .unwrap()
            .ca_pem(CA_CERT)
            .unwrap()
            .servername("localhost")
            .alpn(&["http/1.1"])
            .unwrap()
            .build()
            .unwrap();

        let tcp = TcpStream::connect(addr).unwrap();
        let session = client_config.connect(tcp).unwrap();
        assert_eq!(session.vars().alpn, None);

        let err = session.require_alpn("h2").err().unwrap();
        assert!(matches!(err, TlsError::AlpnFailed(None)));

        let _ = server.join().unwrap();
    }

    #[test]
    fn test_wrong_side_config_is_rejected() {
        let client_config = TlsConfig::client().unwrap().build().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let tcp = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        assert!(matches!(
            client_config.accept(tcp).err().unwrap(),
            TlsError::InvalidConfig(_)
        ));
    }
}
