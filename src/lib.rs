//! h2fixture - HTTP/2-over-TLS static file serving harness
//!
//! A secure file-serving endpoint, a probe client that multiplexes requests
//! over one HTTP/2 connection, and a completion coordinator that tears both
//! down exactly once after every expected response has been observed.
//!
//! ```no_run
//! use h2fixture::probe::Probe;
//! use h2fixture::scenario::Scenario;
//!
//! # fn example() -> h2fixture::Result<()> {
//! let report = Scenario::builder("tests/fixtures")
//!     .probe(Probe::body("/a.js", "AJS"))
//!     .probe(Probe::not_found("/does_not_exist"))
//!     .build()
//!     .run()?;
//! assert_eq!(report.teardowns, 1);
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod fixture;
pub mod http;
pub mod probe;
pub mod scenario;
pub mod serve;

use std::time::Duration;

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Harness errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] http::Error),

    #[error("HTTP/2 error: {0}")]
    H2(#[from] http::h2::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] http::tls::TlsError),

    /// An observed response did not match its expectation
    #[error("Mismatch: {0}")]
    Mismatch(String),

    /// Countdown misuse: unknown or repeated completion, double teardown
    #[error("Coordinator error: {0}")]
    Coordinator(String),

    #[error("Scenario did not finish within {0:?}")]
    Timeout(Duration),
}
