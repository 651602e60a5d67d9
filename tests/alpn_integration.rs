//! ALPN negotiation integration tests
//!
//! The harness only speaks HTTP/2, so both ends must agree on `h2`. These
//! tests cover what happens when they do and when they don't.

use h2fixture::http::tls::{TlsConfig, TlsError, TlsSessionOps, TlsVersion};
use std::net::{TcpListener, TcpStream};
use std::thread;

const KEYS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/keys");

fn server_config(alpn: &[&str]) -> TlsConfig {
    TlsConfig::server()
        .unwrap()
        .identity_files(
            format!("{}/server-cert.pem", KEYS),
            format!("{}/server-key.pem", KEYS),
        )
        .unwrap()
        .alpn(alpn)
        .unwrap()
        .build()
        .unwrap()
}

fn client_config(alpn: &[&str]) -> TlsConfig {
    TlsConfig::client()
        .unwrap()
        .ca_file(format!("{}/ca-cert.pem", KEYS))
        .unwrap()
        .servername("localhost")
        .alpn(alpn)
        .unwrap()
        .build()
        .unwrap()
}

/// Handshake a client against a one-shot server; returns both sessions
fn negotiate(server: TlsConfig, client: TlsConfig) -> (TlsSessionOps, TlsSessionOps) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (tcp, _) = listener.accept().unwrap();
        server.accept(tcp).unwrap()
    });

    let client = client.connect(TcpStream::connect(addr).unwrap()).unwrap();
    (client, handle.join().unwrap())
}

#[test]
fn test_alpn_h2_agreed() {
    let (client, server) = negotiate(server_config(&["h2"]), client_config(&["h2"]));

    assert_eq!(client.vars().alpn.as_deref(), Some("h2"));
    assert_eq!(server.vars().alpn.as_deref(), Some("h2"));
    assert!(client.require_alpn("h2").is_ok());
}

#[test]
fn test_alpn_server_preference_wins() {
    let (client, _server) = negotiate(
        server_config(&["h2", "http/1.1"]),
        client_config(&["http/1.1", "h2"]),
    );
    assert_eq!(client.vars().alpn.as_deref(), Some("h2"));
}

#[test]
fn test_alpn_no_overlap() {
    let (client, server) = negotiate(server_config(&["h2"]), client_config(&["http/1.1"]));

    assert_eq!(client.vars().alpn, None);
    assert_eq!(server.vars().alpn, None);
    assert!(matches!(
        client.require_alpn("h2"),
        Err(TlsError::AlpnFailed(None))
    ));
}

#[test]
fn test_alpn_client_offers_nothing() {
    let client = TlsConfig::client()
        .unwrap()
        .ca_file(format!("{}/ca-cert.pem", KEYS))
        .unwrap()
        .servername("localhost")
        .build()
        .unwrap();

    let (client, _server) = negotiate(server_config(&["h2"]), client);
    assert!(!client.vars().is_h2());
}

#[test]
fn test_alpn_with_tls_versions() {
    for version in [TlsVersion::Tls12, TlsVersion::Tls13] {
        let client = TlsConfig::client()
            .unwrap()
            .version(version)
            .unwrap()
            .ca_file(format!("{}/ca-cert.pem", KEYS))
            .unwrap()
            .servername("localhost")
            .alpn(&["h2"])
            .unwrap()
            .build()
            .unwrap();

        let (client, _server) = negotiate(server_config(&["h2"]), client);
        assert_eq!(client.vars().version, version.as_str());
        assert!(client.vars().is_h2());
    }
}

#[test]
fn test_alpn_rejects_bad_names() {
    assert!(TlsConfig::client().unwrap().alpn(&[""]).is_err());

    let long = "x".repeat(256);
    assert!(TlsConfig::server().unwrap().alpn(&[long.as_str()]).is_err());
}
