//! Secure file-serving endpoint
//!
//! Serves a [`FixtureStore`] over HTTP/2 on TLS. Each request's `:path` is
//! resolved against the store:
//!
//! - a regular file answers `200` with `content-length` and the file's bytes
//!   as DATA frames, the last one carrying END_STREAM
//! - anything else answers `404` with END_STREAM on the HEADERS frame
//!
//! Filesystem failures other than absence are treated as absence unless
//! [`FileServerBuilder::strict_errors`] is set, in which case they answer
//! `500`. Filesystem errors never end a connection.
//!
//! An accept thread polls the listener and checks a shutdown flag between
//! polls; every connection gets its own thread that handles one frame at a
//! time. [`FileServer::close`] stops both and waits for them.

use crate::coordinator::Shutdown;
use crate::fixture::{FixtureStore, Lookup};
use crate::http::h2::{self, ErrorCode, H2Request, H2Server, H2ServerBuilder, StreamId};
use crate::http::session::{poll_fd, PollEvents, SessionOps};
use crate::http::tls::TlsConfig;
use crate::Result;
use socket2::{Domain, Protocol, Socket, Type};
use std::fs::File;
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How often idle threads check the shutdown flag
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Listen backlog
pub const DEFAULT_BACKLOG: i32 = 128;

/// Bytes read from a file per DATA batch; frames are split further to the
/// peer's SETTINGS_MAX_FRAME_SIZE
const FILE_CHUNK_SIZE: usize = 64 * 1024;

/// State shared by the accept thread and the connection threads
struct Shared {
    store: FixtureStore,
    tls: TlsConfig,
    h2: H2ServerBuilder,
    strict_errors: bool,
    poll_interval: Duration,
    shutdown: AtomicBool,
    connections: Mutex<Vec<JoinHandle<()>>>,
    responses: AtomicUsize,
}

impl Shared {
    fn connections(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        // A panicking connection thread cannot leave the handle list inconsistent
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// File server builder
pub struct FileServerBuilder {
    store: FixtureStore,
    tls: Option<TlsConfig>,
    bind: SocketAddr,
    backlog: i32,
    strict_errors: bool,
    poll_interval: Duration,
    h2: H2ServerBuilder,
}

impl FileServerBuilder {
    pub fn new(store: FixtureStore) -> Self {
        FileServerBuilder {
            store,
            tls: None,
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            backlog: DEFAULT_BACKLOG,
            strict_errors: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            h2: H2ServerBuilder::new(),
        }
    }

    /// Server TLS configuration
    ///
    /// Defaults to the key and certificate under the store's `keys/`
    /// directory, offering `h2` through ALPN.
    pub fn tls(mut self, config: TlsConfig) -> Self {
        self.tls = Some(config);
        self
    }

    /// Listen address; defaults to an ephemeral port on 127.0.0.1
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind = addr;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Answer 500 instead of 404 when a file's status check fails for a
    /// reason other than absence
    pub fn strict_errors(mut self, strict: bool) -> Self {
        self.strict_errors = strict;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// HTTP/2 settings and timeouts used for every connection
    pub fn h2(mut self, builder: H2ServerBuilder) -> Self {
        self.h2 = builder;
        self
    }

    /// Bind the listener and start accepting connections
    pub fn start(self) -> Result<FileServer> {
        let tls = match self.tls {
            Some(tls) => tls,
            None => self.store.tls_materials()?.server_config()?,
        };

        let listener = listen(self.bind, self.backlog)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            store: self.store,
            tls,
            h2: self.h2,
            strict_errors: self.strict_errors,
            poll_interval: self.poll_interval,
            shutdown: AtomicBool::new(false),
            connections: Mutex::new(Vec::new()),
            responses: AtomicUsize::new(0),
        });

        let accept_shared = Arc::clone(&shared);
        let accept_thread = thread::Builder::new()
            .name("h2fixture-accept".to_string())
            .spawn(move || accept_loop(listener, accept_shared))?;

        info!(
            addr = %local_addr,
            root = %shared.store.root().display(),
            strict = shared.strict_errors,
            "file server listening"
        );

        Ok(FileServer {
            local_addr,
            shared,
            accept_thread: Some(accept_thread),
            closed: false,
        })
    }
}

/// A running file server
pub struct FileServer {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    accept_thread: Option<JoinHandle<()>>,
    closed: bool,
}

impl FileServer {
    pub fn builder(store: FixtureStore) -> FileServerBuilder {
        FileServerBuilder::new(store)
    }

    /// Start a server for `store` with default settings
    pub fn start(store: FixtureStore) -> Result<Self> {
        FileServerBuilder::new(store).start()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Number of responses sent so far, across all connections
    pub fn responses_sent(&self) -> usize {
        self.shared.responses.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop accepting, end every connection and wait for their threads
    ///
    /// Open connections get GOAWAY once their current response is written.
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shared.shutdown.store(true, Ordering::Release);

        let mut panicked = 0;
        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                panicked += 1;
            }
        }

        // The accept thread has exited, so no handle is added after this
        let handles = std::mem::take(&mut *self.shared.connections());
        for handle in handles {
            if handle.join().is_err() {
                panicked += 1;
            }
        }

        info!(addr = %self.local_addr, responses = self.responses_sent(), "file server closed");

        if panicked > 0 {
            return Err(io::Error::other(format!("{} server thread(s) panicked", panicked)).into());
        }
        Ok(())
    }
}

impl Shutdown for FileServer {
    fn shutdown(&mut self) -> Result<()> {
        self.close()
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "file server close failed");
        }
    }
}

fn listen(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let fd = listener.as_raw_fd();

    while !shared.is_shutting_down() {
        match poll_fd(fd, PollEvents::Read, Some(shared.poll_interval)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!(error = %e, "listener poll failed");
                break;
            }
        }

        let (tcp, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                continue
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        };
        debug!(%peer, "connection accepted");

        let conn_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(format!("h2fixture-conn-{}", peer))
            .spawn(move || serve_connection(tcp, peer, &conn_shared));

        match spawned {
            Ok(handle) => {
                let mut connections = shared.connections();
                connections.retain(|h| !h.is_finished());
                connections.push(handle);
            }
            Err(e) => warn!(%peer, error = %e, "could not spawn connection thread"),
        }
    }

    debug!("accept loop finished");
}

fn serve_connection(tcp: TcpStream, peer: SocketAddr, shared: &Shared) {
    let setup = tcp
        .set_nonblocking(false)
        .and_then(|()| tcp.set_nodelay(true));
    if let Err(e) = setup {
        warn!(%peer, error = %e, "socket setup failed");
        return;
    }

    let session = match shared.tls.accept(tcp).and_then(|s| s.require_alpn("h2")) {
        Ok(session) => session,
        Err(e) => {
            warn!(%peer, error = %e, "TLS setup failed");
            return;
        }
    };

    let mut server = match shared.h2.clone().build(session) {
        Ok(server) => server,
        Err(e) => {
            warn!(%peer, error = %e, "HTTP/2 setup failed");
            return;
        }
    };

    match run_connection(&mut server, shared) {
        Ok(()) => debug!(%peer, "connection finished"),
        Err(e) if e.is_disconnect() => debug!(%peer, "client disconnected"),
        Err(e) => {
            warn!(%peer, error = %e, "connection failed");
            if let Err(e) = server.goaway(e.code(), &e.to_string()) {
                debug!(%peer, error = %e, "GOAWAY not delivered");
            }
        }
    }

    if let Err(e) = server.close() {
        debug!(%peer, error = %e, "close failed");
    }
}

/// Serve requests until shutdown or the connection fails
fn run_connection<S: SessionOps>(server: &mut H2Server<S>, shared: &Shared) -> h2::Result<()> {
    server.accept()?;

    while !shared.is_shutting_down() {
        let Some(request) = server.poll_request(shared.poll_interval)? else {
            continue;
        };

        match respond(server, &request, &shared.store, shared.strict_errors) {
            Ok(_) => {
                shared.responses.fetch_add(1, Ordering::Relaxed);
            }
            // The client reset the stream mid-response
            Err(h2::Error::StreamClosed(stream_id)) | Err(h2::Error::StreamNotFound(stream_id)) => {
                debug!(stream_id, "stream went away before the response was written");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Answer one request from the store; returns the status sent
pub(crate) fn respond<S: SessionOps>(
    server: &mut H2Server<S>,
    request: &H2Request,
    store: &FixtureStore,
    strict: bool,
) -> h2::Result<u16> {
    let stream_id = request.stream_id();
    let path = request.path();
    let lookup = store.lookup(path);
    let status = lookup.status(strict);

    match lookup {
        Lookup::Found { path: file_path, len } => match File::open(&file_path) {
            Ok(file) => {
                let head_only = request.method() == "HEAD";
                send_file(server, stream_id, file, len, head_only)?;
            }
            Err(e) => {
                let status = if strict { 500 } else { 404 };
                debug!(stream_id, path, error = %e, status, "open failed");
                server.send_headers(stream_id, status, &[], true)?;
                return Ok(status);
            }
        },
        Lookup::Missing(reason) => {
            trace!(stream_id, path, ?reason, "no file");
            server.send_headers(stream_id, status, &[], true)?;
        }
        Lookup::Failed(e) => {
            debug!(stream_id, path, error = %e, status, "status check failed");
            server.send_headers(stream_id, status, &[], true)?;
        }
    }

    debug!(stream_id, path, status, "response sent");
    Ok(status)
}

fn send_file<S: SessionOps>(
    server: &mut H2Server<S>,
    stream_id: StreamId,
    mut file: File,
    len: u64,
    head_only: bool,
) -> h2::Result<()> {
    let content_length = len.to_string();
    let headers = [("content-length", content_length.as_str())];

    if len == 0 || head_only {
        return server.send_headers(stream_id, 200, &headers, true);
    }
    server.send_headers(stream_id, 200, &headers, false)?;

    let mut buf = vec![0u8; FILE_CHUNK_SIZE];
    let mut remaining = len;
    loop {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match file.read(&mut buf[..want]) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(stream_id, error = %e, "file read failed mid-response");
                return server.reset_stream(stream_id, ErrorCode::InternalError);
            }
        };
        remaining -= n as u64;

        // A file that shrank since the status check ends early
        let last = n == 0 || remaining == 0;
        server.send_data(stream_id, &buf[..n], last)?;
        if last {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::{H2Client, H2ClientBuilder};
    use crate::http::tls::TlsSessionOps;
    use crate::http::PlainSessionOps;

    fn fixtures() -> FixtureStore {
        FixtureStore::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures"))
    }

    fn tls_client(server: &FileServer) -> H2Client<TlsSessionOps> {
        let tls = fixtures()
            .tls_materials()
            .unwrap()
            .client_config("localhost")
            .unwrap();
        let tcp = TcpStream::connect(server.local_addr()).unwrap();
        let session = tls.connect(tcp).unwrap().require_alpn("h2").unwrap();
        let mut client = H2ClientBuilder::new()
            .timeout(Duration::from_secs(5))
            .build(session)
            .unwrap();
        client.connect().unwrap();
        client
    }

    #[test]
    fn test_serves_file_and_404s() {
        let mut server = FileServer::start(fixtures()).unwrap();
        assert_ne!(server.port(), 0);
        let mut client = tls_client(&server);

        let response = client.get("/a.js").unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), b"AJS");
        assert_eq!(response.header("content-length"), Some("3"));

        let response = client.get("/does_not_exist").unwrap();
        assert_eq!(response.status(), 404);
        assert!(response.body().is_empty());
        assert_eq!(response.header("content-length"), None);

        let response = client.get("/nested").unwrap();
        assert_eq!(response.status(), 404);

        let response = client.get("/nested/../nested/b.txt").unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), b"nested fixture\n");

        // No file is literally named "b.txt?cache=no"
        let response = client.get("/nested/b.txt?cache=no").unwrap();
        assert_eq!(response.status(), 404);

        let response = client.get("/../Cargo.toml").unwrap();
        assert_eq!(response.status(), 404);

        client.close().unwrap();
        server.close().unwrap();
        assert_eq!(server.responses_sent(), 6);
    }

    #[test]
    fn test_head_sends_length_only() {
        let server = FileServer::start(fixtures()).unwrap();
        let mut client = tls_client(&server);

        let stream_id = client
            .send_request("HEAD", "/a.js", &[], bytes::Bytes::new())
            .unwrap();
        match client.next_event().unwrap() {
            h2::ClientEvent::Response {
                stream_id: id,
                status,
                headers,
            } => {
                assert_eq!(id, stream_id);
                assert_eq!(status, 200);
                assert!(headers.contains(&("content-length".to_string(), "3".to_string())));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            client.next_event().unwrap(),
            h2::ClientEvent::End { stream_id }
        );

        client.close().unwrap();
    }

    #[test]
    fn test_strict_errors() {
        let lenient = FileServer::start(fixtures()).unwrap();
        let strict = FileServer::builder(fixtures())
            .strict_errors(true)
            .start()
            .unwrap();

        let mut client = tls_client(&lenient);
        assert_eq!(client.get("/a.js/child").unwrap().status(), 404);
        client.close().unwrap();

        let mut client = tls_client(&strict);
        assert_eq!(client.get("/a.js/child").unwrap().status(), 500);
        assert_eq!(client.get("/does_not_exist").unwrap().status(), 404);
        client.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent_and_stops_listening() {
        let mut server = FileServer::start(fixtures()).unwrap();
        let addr = server.local_addr();

        server.close().unwrap();
        assert!(server.is_closed());
        server.close().unwrap();

        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn test_close_ends_open_connections() {
        let mut server = FileServer::start(fixtures()).unwrap();
        let mut client = tls_client(&server);
        assert_eq!(client.get("/a.js").unwrap().status(), 200);

        server.close().unwrap();

        // The server says goodbye instead of leaving the client hanging
        match client.next_event() {
            Err(e) => assert!(e.is_disconnect(), "{:?}", e),
            Ok(event) => panic!("unexpected event {:?}", event),
        }
    }

    #[test]
    fn test_plaintext_client_is_dropped() {
        use std::io::{Read, Write};

        let server = FileServer::start(fixtures()).unwrap();
        let mut tcp = TcpStream::connect(server.local_addr()).unwrap();
        tcp.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        tcp.write_all(crate::http::h2::CONNECTION_PREFACE).unwrap();

        // The TLS handshake fails and the connection is closed
        let mut buf = [0u8; 64];
        let n = tcp.read(&mut buf).unwrap_or(0);
        assert!(n < buf.len());
    }

    #[test]
    fn test_respond_over_plain_session() {
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let tcp = TcpStream::connect(addr).unwrap();
            let mut client = H2Client::new(PlainSessionOps::new(tcp)).unwrap();
            let found = client.get("/a.js").unwrap();
            let missing = client.get("/does_not_exist").unwrap();
            client.close().unwrap();
            (found, missing)
        });

        let (tcp, _) = listener.accept().unwrap();
        let mut server = H2Server::new(PlainSessionOps::new(tcp)).unwrap();
        let store = fixtures();

        let request = server.receive_request().unwrap();
        assert_eq!(respond(&mut server, &request, &store, false).unwrap(), 200);
        let request = server.receive_request().unwrap();
        assert_eq!(respond(&mut server, &request, &store, false).unwrap(), 404);

        let (found, missing) = handle.join().unwrap();
        assert_eq!(found.body(), b"AJS");
        assert_eq!(missing.status(), 404);
        assert!(missing.body().is_empty());
    }
}
