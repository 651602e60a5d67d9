//! HTTP/2 error types
//!
//! Errors map onto the error codes of RFC 7540 Section 7 so a failing
//! connection can be torn down with a meaningful GOAWAY.

use std::fmt;

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the session layer
    #[error("Session error: {0}")]
    Http(#[from] crate::http::Error),

    /// Protocol error detected (0x1)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Internal error (0x2)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Flow control error (0x3)
    #[error("Flow control error: {0}")]
    FlowControl(String),

    /// Frame received for a closed stream (0x5)
    #[error("Stream closed: {0}")]
    StreamClosed(u32),

    /// Frame size error (0x6)
    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// Compression error (0x9)
    #[error("Compression error: {0}")]
    Compression(String),

    /// Peer reset a stream
    #[error("Stream {stream_id} reset by peer: {code}")]
    Reset { stream_id: u32, code: ErrorCode },

    /// Peer sent GOAWAY
    #[error("GOAWAY received (last stream {last_stream_id}): {code}")]
    GoAway { last_stream_id: u32, code: ErrorCode },

    /// Stream not found
    #[error("Stream not found: {0}")]
    StreamNotFound(u32),

    /// Too many streams
    #[error("Too many concurrent streams")]
    TooManyStreams,

    /// Invalid settings value
    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Missing connection preface
    #[error("Missing connection preface")]
    MissingPreface,

    /// Invalid header
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

impl Error {
    /// Error code to report in GOAWAY or RST_STREAM for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_)
            | Error::MissingPreface
            | Error::InvalidHeader(_)
            | Error::InvalidSettings(_) => ErrorCode::ProtocolError,
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            Error::StreamClosed(_) => ErrorCode::StreamClosed,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::TooManyStreams => ErrorCode::RefusedStream,
            Error::Reset { code, .. } | Error::GoAway { code, .. } => *code,
            Error::ConnectionClosed => ErrorCode::NoError,
            Error::Io(_)
            | Error::Http(_)
            | Error::Internal(_)
            | Error::StreamNotFound(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the peer went away (EOF, reset, GOAWAY) rather than misbehaved
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::ConnectionClosed | Error::GoAway { .. } => true,
            Error::Http(e) => e.is_disconnect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Graceful shutdown
    NoError,
    /// Protocol error detected
    ProtocolError,
    /// Implementation fault
    InternalError,
    /// Flow-control limits exceeded
    FlowControlError,
    /// Settings not acknowledged
    SettingsTimeout,
    /// Frame received for closed stream
    StreamClosed,
    /// Frame size incorrect
    FrameSizeError,
    /// Stream not processed
    RefusedStream,
    /// Stream cancelled
    Cancel,
    /// Compression state not updated
    CompressionError,
    /// TCP connection error for CONNECT method
    ConnectError,
    /// Processing capacity exceeded
    EnhanceYourCalm,
    /// Negotiated TLS parameters not acceptable
    InadequateSecurity,
    /// Use HTTP/1.1 for the request
    Http11Required,
    /// Code outside the registry; peers must treat it as INTERNAL_ERROR
    Unknown(u32),
}

impl ErrorCode {
    /// Wire value
    pub fn as_u32(self) -> u32 {
        match self {
            ErrorCode::NoError => 0x0,
            ErrorCode::ProtocolError => 0x1,
            ErrorCode::InternalError => 0x2,
            ErrorCode::FlowControlError => 0x3,
            ErrorCode::SettingsTimeout => 0x4,
            ErrorCode::StreamClosed => 0x5,
            ErrorCode::FrameSizeError => 0x6,
            ErrorCode::RefusedStream => 0x7,
            ErrorCode::Cancel => 0x8,
            ErrorCode::CompressionError => 0x9,
            ErrorCode::ConnectError => 0xa,
            ErrorCode::EnhanceYourCalm => 0xb,
            ErrorCode::InadequateSecurity => 0xc,
            ErrorCode::Http11Required => 0xd,
            ErrorCode::Unknown(code) => code,
        }
    }

    /// Decode a wire value
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            other => ErrorCode::Unknown(other),
        }
    }

    /// Registry name
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
            ErrorCode::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_values() {
        assert_eq!(ErrorCode::NoError.as_u32(), 0x0);
        assert_eq!(ErrorCode::Http11Required.as_u32(), 0xd);
        assert_eq!(ErrorCode::from_u32(0x1), ErrorCode::ProtocolError);
        assert_eq!(ErrorCode::from_u32(0xff), ErrorCode::Unknown(0xff));
        assert_eq!(ErrorCode::Unknown(0xff).as_u32(), 0xff);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::FlowControlError.to_string(), "FLOW_CONTROL_ERROR (0x3)");
    }

    #[test]
    fn test_error_maps_to_goaway_code() {
        assert_eq!(Error::Protocol("x".into()).code(), ErrorCode::ProtocolError);
        assert_eq!(Error::FrameSize("x".into()).code(), ErrorCode::FrameSizeError);
        assert_eq!(Error::Compression("x".into()).code(), ErrorCode::CompressionError);
        assert_eq!(Error::ConnectionClosed.code(), ErrorCode::NoError);
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(Error::ConnectionClosed.is_disconnect());
        assert!(Error::Http(crate::http::Error::ConnectionClosed).is_disconnect());
        assert!(!Error::Http(crate::http::Error::Timeout).is_disconnect());
        assert!(!Error::Protocol("bad".into()).is_disconnect());
    }
}
