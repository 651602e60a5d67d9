//! TLS support for the HTTP/2 transports
//!
//! The file server and the probe client both run HTTP/2 over TLS with the
//! protocol agreed through ALPN. This module wraps OpenSSL behind the
//! session operations abstraction:
//!
//! 1. `TlsConfig` holds a built OpenSSL context (versions, identity, trust
//!    anchors, ALPN list, SNI name)
//! 2. `TlsSessionOps` implements `SessionOps` over an established session
//! 3. The HTTP/2 layer reads and writes through it like any other transport
//!
//! # Features
//!
//! - TLS 1.0 through TLS 1.3 (OpenSSL version dependent)
//! - PEM identities with intermediate chains
//! - Peer verification against explicit CA certificates, including the
//!   host name check
//! - ALPN on both sides and SNI on the client
//! - Handshake deadline
//!
//! # Examples
//!
//! ```no_run
//! use h2fixture::http::tls::TlsConfig;
//! use std::net::{TcpListener, TcpStream};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = TlsConfig::server()?
//!     .identity_files("server-cert.pem", "server-key.pem")?
//!     .alpn(&["h2"])?
//!     .build()?;
//!
//! let client = TlsConfig::client()?
//!     .ca_file("ca-cert.pem")?
//!     .servername("localhost")
//!     .alpn(&["h2"])?
//!     .build()?;
//!
//! let listener = TcpListener::bind("127.0.0.1:0")?;
//! let addr = listener.local_addr()?;
//! std::thread::spawn(move || {
//!     let (tcp, _) = listener.accept().unwrap();
//!     let _session = server.accept(tcp).unwrap();
//! });
//!
//! let session = client.connect(TcpStream::connect(addr)?)?.require_alpn("h2")?;
//! println!("negotiated {}", session.vars().version);
//! # Ok(())
//! # }
//! ```

pub mod cert;
pub mod config;
pub mod handshake;
pub mod session;
pub mod vars;

pub use cert::CertInfo;
pub use config::{ClientConfigBuilder, ServerConfigBuilder, TlsConfig, TlsError, TlsVersion};
pub use handshake::DEFAULT_HANDSHAKE_TIMEOUT;
pub use session::TlsSessionOps;
pub use vars::TlsVars;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
