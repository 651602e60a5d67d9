//! Probe client
//!
//! Opens one TLS connection that negotiated `h2`, issues every probe on
//! its own stream before reading any response (as many as the server's
//! stream limit allows at once), then gathers the events of all streams in whatever order the server produces them. Each stream's
//! terminal event counts down the [`Coordinator`]; the last one tears the
//! connection and the server down.

use crate::coordinator::{Coordinator, Shutdown};
use crate::http::h2::{self, ClientEvent, ErrorCode, H2Client, H2ClientBuilder, StreamId};
use crate::http::tls::{TlsConfig, TlsSessionOps};
use crate::http::SessionOps;
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default time allowed for a whole probe run
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// What a probe's response must look like
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    /// Only the status is checked
    Status(u16),
    /// Status 200 and exactly these body bytes
    Body(Bytes),
    /// Status 404 and not a single DATA event
    NotFound,
}

/// One request and its expectation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub path: String,
    pub expect: Expect,
}

impl Probe {
    pub fn new(path: impl Into<String>, expect: Expect) -> Self {
        Probe {
            path: path.into(),
            expect,
        }
    }

    pub fn body(path: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Probe::new(path, Expect::Body(contents.into()))
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Probe::new(path, Expect::NotFound)
    }

    pub fn status(path: impl Into<String>, status: u16) -> Self {
        Probe::new(path, Expect::Status(status))
    }
}

/// Everything seen on one stream
#[derive(Debug, Clone)]
pub struct Observation {
    pub stream_id: StreamId,
    pub path: String,
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Number of DATA frames that carried bytes
    pub data_events: usize,
    pub ended: bool,
    pub reset: Option<ErrorCode>,
}

impl Observation {
    fn new(stream_id: StreamId, path: &str) -> Self {
        Observation {
            stream_id,
            path: path.to_string(),
            status: None,
            headers: Vec::new(),
            body: Bytes::new(),
            data_events: 0,
            ended: false,
            reset: None,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check the observation against an expectation
    pub fn verify(&self, expect: &Expect) -> Result<()> {
        if let Some(code) = self.reset {
            return Err(self.mismatch(format!("stream reset with {}", code)));
        }
        if !self.ended {
            return Err(self.mismatch("stream did not end".to_string()));
        }

        let want_status = match expect {
            Expect::Status(status) => *status,
            Expect::Body(_) => 200,
            Expect::NotFound => 404,
        };
        if self.status != Some(want_status) {
            return Err(self.mismatch(format!(
                "expected status {}, got {:?}",
                want_status, self.status
            )));
        }

        match expect {
            Expect::Body(contents) if self.body != *contents => Err(self.mismatch(format!(
                "body differs: expected {} bytes {:?}, got {} bytes {:?}",
                contents.len(),
                preview(contents),
                self.body.len(),
                preview(&self.body)
            ))),
            Expect::NotFound if self.data_events > 0 || !self.body.is_empty() => {
                Err(self.mismatch(format!(
                    "404 delivered {} data events ({} bytes)",
                    self.data_events,
                    self.body.len()
                )))
            }
            _ => Ok(()),
        }
    }

    fn mismatch(&self, what: String) -> Error {
        Error::Mismatch(format!("{} (stream {}): {}", self.path, self.stream_id, what))
    }
}

fn preview(bytes: &[u8]) -> String {
    const MAX: usize = 32;
    let shown = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX)]).into_owned();
    if bytes.len() > MAX {
        format!("{}...", shown)
    } else {
        shown
    }
}

/// Outcome of a probe run
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    /// One observation per probe, in issue order
    pub observations: Vec<Observation>,
    /// Stream IDs in the order their responses completed
    pub completion_order: Vec<StreamId>,
}

impl ProbeReport {
    /// Observation for the first probe of `path`
    pub fn get(&self, path: &str) -> Option<&Observation> {
        self.observations.iter().find(|o| o.path == path)
    }
}

/// HTTP/2 client driving a set of probes
pub struct ProbeClient<S: SessionOps> {
    client: H2Client<S>,
}

impl ProbeClient<TlsSessionOps> {
    /// Connect over TLS; the server must agree on `h2` through ALPN
    ///
    /// The `:authority` sent with every request is the configured
    /// servername with the port.
    pub fn connect(addr: SocketAddr, tls: &TlsConfig) -> Result<Self> {
        let tcp = TcpStream::connect_timeout(&addr, tls.handshake_timeout())?;
        tcp.set_nodelay(true)?;

        let session = tls.connect(tcp)?.require_alpn("h2")?;
        if let Some(peer) = session.vars().peer() {
            debug!(subject = %peer.subject, issuer = %peer.issuer, "server certificate");
        }

        let host = tls.servername().unwrap_or("localhost");
        let client = H2ClientBuilder::new()
            .authority(format!("{}:{}", host, addr.port()))
            .build(session)?;
        ProbeClient::from_client(client)
    }
}

impl<S: SessionOps> ProbeClient<S> {
    /// Wrap an HTTP/2 client, completing its connection preface
    pub fn from_client(mut client: H2Client<S>) -> Result<Self> {
        client.connect()?;
        Ok(ProbeClient { client })
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    pub fn transport(&self) -> &S {
        self.client.transport()
    }

    /// Issue every probe, then collect responses until the coordinator
    /// has torn down
    ///
    /// Probes beyond the server's SETTINGS_MAX_CONCURRENT_STREAMS wait for
    /// earlier streams to finish. Streams finishing while probes are still
    /// waiting are reported to the coordinator once the last probe is
    /// issued, so the countdown cannot reach zero early.
    ///
    /// A mismatch does not stop collection: every stream still counts down
    /// so teardown happens, and the mismatches are reported afterwards.
    pub fn run(
        &mut self,
        probes: &[Probe],
        coordinator: &mut Coordinator<'_>,
        deadline: Duration,
    ) -> Result<ProbeReport> {
        let started = Instant::now();
        let mut observations = Vec::with_capacity(probes.len());
        let mut index = HashMap::with_capacity(probes.len());
        let mut bodies: HashMap<StreamId, BytesMut> = HashMap::new();
        let mut completion_order = Vec::with_capacity(probes.len());
        let mut held: Vec<StreamId> = Vec::new();
        let mut waiting = probes.iter();
        let mut all_issued = false;

        loop {
            if !all_issued {
                all_issued =
                    self.issue(&mut waiting, coordinator, &mut index, &mut observations)?;
                if all_issued {
                    debug!(count = probes.len(), "all probes issued");
                    coordinator.settle(self)?;
                    for stream_id in held.drain(..) {
                        coordinator.complete(stream_id, self)?;
                    }
                }
            }
            if coordinator.is_done() {
                break;
            }

            let remaining = deadline
                .checked_sub(started.elapsed())
                .filter(|d| !d.is_zero())
                .ok_or(Error::Timeout(deadline))?;
            self.client.set_timeout(Some(remaining));

            let event = match self.client.next_event() {
                Ok(event) => event,
                Err(h2::Error::Http(crate::http::Error::Timeout)) => {
                    return Err(Error::Timeout(deadline))
                }
                Err(e) => return Err(e.into()),
            };

            let stream_id = event.stream_id();
            let Some(&slot) = index.get(&stream_id) else {
                return Err(Error::Coordinator(format!(
                    "event for stream {} that no probe issued",
                    stream_id
                )));
            };
            let observation = &mut observations[slot];

            match event {
                ClientEvent::Response {
                    status, headers, ..
                } => {
                    trace!(stream_id, status, "response");
                    observation.status = Some(status);
                    observation.headers = headers;
                }
                ClientEvent::Data { data, .. } => {
                    observation.data_events += 1;
                    bodies.entry(stream_id).or_default().extend_from_slice(&data);
                }
                ClientEvent::End { .. } => {
                    observation.ended = true;
                }
                ClientEvent::Reset { code, .. } => {
                    warn!(stream_id, %code, "probe stream reset");
                    observation.reset = Some(code);
                }
            }

            if event_is_terminal(&observations[slot]) {
                if let Some(body) = bodies.remove(&stream_id) {
                    observations[slot].body = body.freeze();
                }
                completion_order.push(stream_id);
                if all_issued {
                    coordinator.complete(stream_id, self)?;
                } else {
                    held.push(stream_id);
                }
            }
        }

        let failures: Vec<String> = probes
            .iter()
            .zip(&observations)
            .filter_map(|(probe, observation)| observation.verify(&probe.expect).err())
            .map(|e| e.to_string())
            .collect();
        if !failures.is_empty() {
            return Err(Error::Mismatch(failures.join("; ")));
        }

        Ok(ProbeReport {
            observations,
            completion_order,
        })
    }
}

impl<S: SessionOps> ProbeClient<S> {
    /// Issue waiting probes until none are left (returns true) or the
    /// server's stream limit is reached (returns false)
    fn issue(
        &mut self,
        waiting: &mut std::slice::Iter<'_, Probe>,
        coordinator: &mut Coordinator<'_>,
        index: &mut HashMap<StreamId, usize>,
        observations: &mut Vec<Observation>,
    ) -> Result<bool> {
        while let Some(probe) = waiting.as_slice().first() {
            let stream_id = match self.client.get_request(&probe.path) {
                Ok(stream_id) => stream_id,
                Err(h2::Error::TooManyStreams) => {
                    trace!(path = %probe.path, "stream limit reached, probe waits");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };
            waiting.next();
            coordinator.track(stream_id)?;
            trace!(stream_id, path = %probe.path, "probe issued");
            index.insert(stream_id, observations.len());
            observations.push(Observation::new(stream_id, &probe.path));
        }
        Ok(true)
    }
}

fn event_is_terminal(observation: &Observation) -> bool {
    observation.ended || observation.reset.is_some()
}

impl<S: SessionOps> Shutdown for ProbeClient<S> {
    fn shutdown(&mut self) -> Result<()> {
        debug!("closing probe connection");
        self.client.close().map_err(Error::from)
    }
}
