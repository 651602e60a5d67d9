//! HTTP/2 protocol implementation
//!
//! A small, frame-level HTTP/2 stack for both ends of a test connection.
//!
//! # Architecture
//!
//! Framing, settings, stream state and flow control are implemented here;
//! header compression is delegated to the `hpack` crate. Both endpoints are
//! synchronous and run over any [`SessionOps`](crate::http::SessionOps)
//! transport, normally a TLS session that negotiated `h2` through ALPN.
//!
//! ## Features
//!
//! - **Frame handling**: DATA, HEADERS, RST_STREAM, SETTINGS, PING, GOAWAY,
//!   WINDOW_UPDATE and CONTINUATION; PRIORITY and unknown frame types are
//!   read and ignored
//! - **Stream multiplexing**: many concurrent streams on one connection
//! - **Flow control**: connection and stream windows, WINDOW_UPDATE
//!   replenishment, sends that wait for window
//! - **Settings exchange**: initial SETTINGS plus ACK in both directions
//!
//! # Examples
//!
//! ## HTTP/2 Server
//!
//! ```no_run
//! use h2fixture::http::h2::H2ServerBuilder;
//! use h2fixture::http::tls::TlsConfig;
//! use std::net::TcpListener;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tls = TlsConfig::server()?
//!     .identity_files("server-cert.pem", "server-key.pem")?
//!     .alpn(&["h2"])?
//!     .build()?;
//!
//! let listener = TcpListener::bind("127.0.0.1:0")?;
//! let (tcp, _) = listener.accept()?;
//! let mut server = H2ServerBuilder::new().build(tls.accept(tcp)?)?;
//!
//! let request = server.receive_request()?;
//! server.send_response(request.stream_id(), 200, &[], b"OK")?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod server;
pub mod settings;
pub mod stream;

pub use client::{ClientEvent, H2Client, H2ClientBuilder, H2Response};
pub use error::{Error, ErrorCode, Result};
pub use frames::{DataFrame, Frame, FrameFlags, FrameType, HeadersFrame, SettingsFrame};
pub use server::{H2Request, H2Server, H2ServerBuilder};
pub use settings::{Settings, SettingsBuilder};
pub use stream::{H2Stream, StreamId, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;

/// Decode a complete header block with a connection's HPACK decoder
///
/// Any HPACK failure is a connection error (COMPRESSION_ERROR).
pub(crate) fn hpack_decode(
    decoder: &mut hpack::Decoder<'static>,
    block: &[u8],
) -> Result<Vec<(String, String)>> {
    let fields = decoder
        .decode(block)
        .map_err(|e| Error::Compression(format!("{:?}", e)))?;

    fields
        .into_iter()
        .map(|(name, value)| {
            let name = String::from_utf8(name)
                .map_err(|_| Error::InvalidHeader("non-UTF-8 header name".to_string()))?;
            let value = String::from_utf8(value).map_err(|_| {
                Error::InvalidHeader(format!("non-UTF-8 value for header {}", name))
            })?;
            Ok((name, value))
        })
        .collect()
}

/// Encode a header list with a connection's HPACK encoder
pub(crate) fn hpack_encode<'a, I>(encoder: &mut hpack::Encoder<'static>, headers: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
{
    let mut block = Vec::new();
    // Writing into a Vec cannot fail
    let _ = encoder.encode_into(headers, &mut block);
    block
}
