//! HTTP transport layers for the fixture harness
//!
//! Everything the file-serving endpoint and the probe client speak lives
//! below this module:
//!
//! - [`session`]: the session operations abstraction (`SessionOps`) and the
//!   timeout-gated `HttpSession` wrapper every protocol layer reads through
//! - [`tls`]: OpenSSL-backed TLS contexts, ALPN and certificate handling
//! - [`h2`]: a low-level HTTP/2 client and server with explicit frame control
//!
//! # Architecture
//!
//! Protocol code never touches a socket directly. It is written against
//! `SessionOps`, so the same HTTP/2 client and server run over a TLS
//! session in the harness and over a plain loopback socket in unit tests.
//!
//! # Examples
//!
//! ```no_run
//! use h2fixture::http::h2::H2ClientBuilder;
//! use h2fixture::http::tls::TlsConfig;
//! use std::net::TcpStream;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tls = TlsConfig::client()?
//!     .ca_file("tests/fixtures/keys/ca-cert.pem")?
//!     .servername("localhost")
//!     .alpn(&["h2"])?
//!     .build()?;
//!
//! let tcp = TcpStream::connect("127.0.0.1:8443")?;
//! let mut client = H2ClientBuilder::new().build(tls.connect(tcp)?)?;
//! client.connect()?;
//! let response = client.get("/a.js")?;
//! assert_eq!(response.status(), 200);
//! # Ok(())
//! # }
//! ```

pub mod h2;
pub mod session;
pub mod tls;

pub use session::{HttpSession, PlainSessionOps, PollEvents, SessionOps};

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Whether the error means the peer went away rather than misbehaved
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            Error::ConnectionClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            Error::Timeout => false,
        }
    }
}
