//! TLS handshake with a deadline
//!
//! The handshake runs in blocking mode over the TCP stream with socket
//! read/write timeouts armed for its duration. A peer that stalls mid
//! handshake surfaces as [`TlsError::HandshakeTimeout`] instead of hanging
//! the calling thread.

use super::config::TlsError;
use openssl::ssl::{HandshakeError, MidHandshakeSslStream, Ssl, SslStream};
use openssl::x509::X509VerifyResult;
use std::io;
use std::net::TcpStream;
use std::time::Duration;

/// Default handshake timeout
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the client side of the handshake
pub(crate) fn connect(
    ssl: Ssl,
    tcp: TcpStream,
    timeout: Duration,
) -> Result<SslStream<TcpStream>, TlsError> {
    arm(&tcp, Some(timeout))?;
    let stream = ssl
        .connect(tcp)
        .map_err(|e| handshake_error(e, timeout, "connect"))?;
    arm(stream.get_ref(), None)?;
    Ok(stream)
}

/// Run the server side of the handshake
pub(crate) fn accept(
    ssl: Ssl,
    tcp: TcpStream,
    timeout: Duration,
) -> Result<SslStream<TcpStream>, TlsError> {
    arm(&tcp, Some(timeout))?;
    let stream = ssl
        .accept(tcp)
        .map_err(|e| handshake_error(e, timeout, "accept"))?;
    arm(stream.get_ref(), None)?;
    Ok(stream)
}

fn arm(tcp: &TcpStream, timeout: Option<Duration>) -> Result<(), TlsError> {
    tcp.set_read_timeout(timeout)?;
    tcp.set_write_timeout(timeout)?;
    Ok(())
}

fn handshake_error(
    err: HandshakeError<TcpStream>,
    timeout: Duration,
    side: &str,
) -> TlsError {
    match err {
        HandshakeError::SetupFailure(stack) => TlsError::OpenSsl(stack),
        // A blocking socket only reports WouldBlock once its timeout expired
        HandshakeError::WouldBlock(_) => TlsError::HandshakeTimeout(timeout),
        HandshakeError::Failure(mid) => failure(mid, timeout, side),
    }
}

fn failure(mid: MidHandshakeSslStream<TcpStream>, timeout: Duration, side: &str) -> TlsError {
    let verify = mid.ssl().verify_result();
    if verify != X509VerifyResult::OK {
        return TlsError::VerifyFailed(verify.error_string().to_string());
    }

    if let Some(io_err) = mid.error().io_error() {
        if matches!(
            io_err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ) {
            return TlsError::HandshakeTimeout(timeout);
        }
    }

    TlsError::HandshakeFailed(format!("{} failed: {}", side, mid.error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::ssl::{SslContext, SslMethod};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        // Accepts the TCP connection and never answers the ClientHello
        let silent = thread::spawn(move || {
            let (tcp, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(tcp);
        });

        let ctx = SslContext::builder(SslMethod::tls_client()).unwrap().build();
        let ssl = Ssl::new(&ctx).unwrap();
        let tcp = TcpStream::connect(addr).unwrap();

        let start = Instant::now();
        let err = connect(ssl, tcp, Duration::from_millis(100)).unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(450));
        assert!(matches!(err, TlsError::HandshakeTimeout(_)), "{:?}", err);

        silent.join().unwrap();
    }

    #[test]
    fn test_plaintext_peer_fails_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = thread::spawn(move || {
            use std::io::Write;
            let (mut tcp, _) = listener.accept().unwrap();
            let _ = tcp.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
        });

        let ctx = SslContext::builder(SslMethod::tls_client()).unwrap().build();
        let ssl = Ssl::new(&ctx).unwrap();
        let tcp = TcpStream::connect(addr).unwrap();

        let err = connect(ssl, tcp, DEFAULT_HANDSHAKE_TIMEOUT).unwrap_err();
        assert!(matches!(err, TlsError::HandshakeFailed(_)), "{:?}", err);

        peer.join().unwrap();
    }
}
