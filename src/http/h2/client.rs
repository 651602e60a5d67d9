//! HTTP/2 client
//!
//! The client issues requests without waiting for their responses and then
//! reports everything the server sends back as a sequence of
//! [`ClientEvent`]s, one frame at a time. Connection housekeeping (SETTINGS,
//! PING, WINDOW_UPDATE) is handled internally and never surfaces as an event.

use super::codec::FrameCodec;
use super::error::{Error, ErrorCode, Result};
use super::flow_control::FlowControl;
use super::frames::*;
use super::settings::{Settings, SettingsBuilder};
use super::stream::{StreamId, StreamManager};
use super::{
    hpack_decode, hpack_encode, CONNECTION_PREFACE, CONNECTION_STREAM_ID,
    DEFAULT_INITIAL_WINDOW_SIZE,
};
use crate::http::{HttpSession, SessionOps};
use bytes::Bytes;
use hpack::{Decoder, Encoder};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace};

/// Something the server did on one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Response header block with its `:status`
    Response {
        stream_id: StreamId,
        status: u16,
        headers: Vec<(String, String)>,
    },
    /// A non-empty chunk of response body
    Data { stream_id: StreamId, data: Bytes },
    /// The server ended the stream; always the last event for a stream
    End { stream_id: StreamId },
    /// The server reset the stream
    Reset { stream_id: StreamId, code: ErrorCode },
}

impl ClientEvent {
    pub fn stream_id(&self) -> StreamId {
        match self {
            ClientEvent::Response { stream_id, .. }
            | ClientEvent::Data { stream_id, .. }
            | ClientEvent::End { stream_id }
            | ClientEvent::Reset { stream_id, .. } => *stream_id,
        }
    }

    /// Whether no further events will follow for this stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientEvent::End { .. } | ClientEvent::Reset { .. })
    }
}

/// Header block spanning CONTINUATION frames
#[derive(Debug, Clone, Copy)]
struct PendingHeaders {
    stream_id: StreamId,
    end_stream: bool,
}

/// HTTP/2 client
pub struct H2Client<S: SessionOps> {
    session: HttpSession<S>,
    streams: StreamManager,
    /// Connection-level flow control
    flow: FlowControl,
    encoder: Encoder<'static>,
    decoder: Decoder<'static>,
    local_settings: Settings,
    /// Remote (server) settings
    remote_settings: Settings,
    authority: String,
    events: VecDeque<ClientEvent>,
    continuation: Option<PendingHeaders>,
    connected: bool,
    closed: bool,
}

impl<S: SessionOps> H2Client<S> {
    /// Create a client with default settings
    pub fn new(session: S) -> Result<Self> {
        H2ClientBuilder::new().build(session)
    }

    /// Perform HTTP/2 connection preface and settings exchange
    ///
    /// The server's first frame must be a SETTINGS frame (RFC 7540 Section
    /// 3.5); it is acknowledged before this returns.
    pub fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }

        let mut preface = CONNECTION_PREFACE.to_vec();
        preface.extend_from_slice(&FrameCodec::encode_settings_frame(&SettingsFrame::new(
            self.local_settings.clone(),
        )));
        self.session.write_all(&preface)?;

        let frame = self.read_frame()?;
        if frame.frame_type != FrameType::Settings || frame.flags.is_ack() {
            return Err(Error::Protocol(format!(
                "Expected SETTINGS as first server frame, got {}",
                frame.frame_type
            )));
        }
        let settings = FrameCodec::decode_settings(&frame)?;
        self.apply_remote_settings(&settings.settings)?;

        self.connected = true;
        debug!(authority = %self.authority, "HTTP/2 client connected");
        Ok(())
    }

    fn apply_remote_settings(&mut self, settings: &Settings) -> Result<()> {
        debug!(?settings, "received server SETTINGS");
        self.remote_settings.merge(settings);

        if settings.max_concurrent_streams.is_some() {
            self.streams
                .set_max_concurrent_streams(settings.max_concurrent_streams);
        }
        if let Some(size) = settings.initial_window_size {
            self.streams.apply_initial_window_size(size)?;
        }

        self.write(FrameCodec::encode_settings_frame(&SettingsFrame::ack()))
    }

    /// Set the per-read timeout (`None` waits forever)
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.session.set_timeout(timeout);
    }

    /// Issue a request without waiting for its response
    ///
    /// A request without body carries END_STREAM on its HEADERS frame.
    pub fn send_request(
        &mut self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: Bytes,
    ) -> Result<StreamId> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.connect()?;

        let stream_id = self.streams.create_stream()?;

        let pseudo = [
            (":method", method),
            (":path", path),
            (":scheme", "https"),
            (":authority", self.authority.as_str()),
        ];
        let fields = pseudo
            .iter()
            .chain(headers.iter())
            .map(|(name, value)| (name.as_bytes(), value.as_bytes()));
        let block = hpack_encode(&mut self.encoder, fields);

        let end_stream = body.is_empty();
        if let Some(stream) = self.streams.get_stream_mut(stream_id) {
            stream.send_headers(end_stream)?;
        }
        let max_frame = self.remote_settings.get_max_frame_size() as usize;
        self.write(FrameCodec::encode_header_block(
            stream_id, &block, end_stream, max_frame,
        ))?;
        trace!(stream_id, method, path, "request sent");

        if !end_stream {
            self.send_body(stream_id, body)?;
        }

        Ok(stream_id)
    }

    /// Issue a GET without waiting for its response
    pub fn get_request(&mut self, path: &str) -> Result<StreamId> {
        self.send_request("GET", path, &[], Bytes::new())
    }

    /// Send a request body, waiting for window as needed
    fn send_body(&mut self, stream_id: StreamId, mut body: Bytes) -> Result<()> {
        let max_frame = self.remote_settings.get_max_frame_size() as usize;

        while !body.is_empty() {
            let stream_window = self
                .streams
                .get_stream(stream_id)
                .ok_or(Error::StreamClosed(stream_id))?
                .flow()
                .send
                .available();
            let n = body
                .len()
                .min(max_frame)
                .min(stream_window)
                .min(self.flow.send.available());

            if n == 0 {
                let frame = self.read_frame()?;
                self.process_frame(frame)?;
                continue;
            }

            let chunk = body.split_to(n);
            let end_stream = body.is_empty();
            self.flow.send.consume(n);
            if let Some(stream) = self.streams.get_stream_mut(stream_id) {
                stream.flow_mut().send.consume(n);
                stream.send_data(end_stream)?;
            }
            self.write(FrameCodec::encode_data_frame(&DataFrame::new(
                stream_id, chunk, end_stream,
            )))?;
        }

        Ok(())
    }

    /// Wait for the next stream event
    ///
    /// Reads frames until one of them produces an event. GOAWAY from the
    /// server ends the connection with [`Error::GoAway`].
    pub fn next_event(&mut self) -> Result<ClientEvent> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Ok(event);
            }
            if self.closed {
                return Err(Error::ConnectionClosed);
            }

            let frame = self.read_frame()?;
            self.process_frame(frame)?;
        }
    }

    /// Send a GET and wait for its complete response
    ///
    /// Events for other streams that arrive meanwhile are kept for
    /// [`next_event`](Self::next_event).
    pub fn get(&mut self, path: &str) -> Result<H2Response> {
        let stream_id = self.get_request(path)?;

        let mut response = H2Response {
            stream_id,
            status: 0,
            headers: Vec::new(),
            body: Bytes::new(),
        };
        let mut body = Vec::new();
        let mut others = Vec::new();

        let result = loop {
            match self.next_event() {
                Ok(event) if event.stream_id() != stream_id => others.push(event),
                Ok(ClientEvent::Response {
                    status, headers, ..
                }) => {
                    response.status = status;
                    response.headers = headers;
                }
                Ok(ClientEvent::Data { data, .. }) => body.extend_from_slice(&data),
                Ok(ClientEvent::End { .. }) => break Ok(()),
                Ok(ClientEvent::Reset { code, .. }) => break Err(Error::Reset { stream_id, code }),
                Err(e) => break Err(e),
            }
        };

        for event in others.into_iter().rev() {
            self.events.push_front(event);
        }
        result?;

        response.body = Bytes::from(body);
        Ok(response)
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let max = self.local_settings.get_max_frame_size() as usize;
        FrameCodec::read_frame(&mut self.session, max)
    }

    fn write(&mut self, bytes: Bytes) -> Result<()> {
        self.session.write_all(&bytes)?;
        Ok(())
    }

    /// Handle one inbound frame, queueing any resulting events
    fn process_frame(&mut self, frame: Frame) -> Result<()> {
        trace!(
            frame_type = frame.frame_type.name(),
            stream_id = frame.stream_id,
            len = frame.payload_len(),
            "frame received"
        );

        if let Some(pending) = self.continuation {
            if frame.frame_type != FrameType::Continuation || frame.stream_id != pending.stream_id
            {
                return Err(Error::Protocol(format!(
                    "Expected CONTINUATION on stream {}, got {} on stream {}",
                    pending.stream_id, frame.frame_type, frame.stream_id
                )));
            }
        }

        match frame.frame_type {
            FrameType::Settings => {
                let settings = FrameCodec::decode_settings(&frame)?;
                if settings.ack {
                    debug!("server acknowledged SETTINGS");
                } else {
                    self.apply_remote_settings(&settings.settings)?;
                }
            }
            FrameType::Headers => {
                let headers = FrameCodec::decode_headers(&frame)?;
                let stream = self
                    .streams
                    .get_stream_mut(headers.stream_id)
                    .ok_or(Error::StreamClosed(headers.stream_id))?;
                stream.receive_headers(&headers)?;

                let pending = PendingHeaders {
                    stream_id: headers.stream_id,
                    end_stream: headers.end_stream,
                };
                if headers.end_headers {
                    self.complete_header_block(pending)?;
                } else {
                    self.continuation = Some(pending);
                }
            }
            FrameType::Continuation => {
                let pending = self.continuation.ok_or_else(|| {
                    Error::Protocol("CONTINUATION without preceding HEADERS".to_string())
                })?;
                if let Some(stream) = self.streams.get_stream_mut(frame.stream_id) {
                    stream.receive_continuation(&frame.payload);
                }
                if frame.flags.is_end_headers() {
                    self.continuation = None;
                    self.complete_header_block(pending)?;
                }
            }
            FrameType::Data => self.receive_data(&frame)?,
            FrameType::RstStream => {
                let rst = FrameCodec::decode_rst_stream(&frame)?;
                if let Some(mut stream) = self.streams.remove_stream(rst.stream_id) {
                    stream.reset();
                    debug!(stream_id = rst.stream_id, code = %rst.error_code, "stream reset by server");
                    self.events.push_back(ClientEvent::Reset {
                        stream_id: rst.stream_id,
                        code: rst.error_code,
                    });
                }
            }
            FrameType::Ping => {
                let ping = FrameCodec::decode_ping(&frame)?;
                if !ping.ack {
                    self.write(FrameCodec::encode_ping_frame(&PingFrame::ack(ping.data)))?;
                }
            }
            FrameType::WindowUpdate => {
                let update = FrameCodec::decode_window_update(&frame)?;
                if update.stream_id == CONNECTION_STREAM_ID {
                    self.flow.send.increase(update.size_increment)?;
                } else if let Some(stream) = self.streams.get_stream_mut(update.stream_id) {
                    stream.flow_mut().send.increase(update.size_increment)?;
                }
            }
            FrameType::Goaway => {
                let goaway = FrameCodec::decode_goaway(&frame)?;
                debug!(
                    last_stream_id = goaway.last_stream_id,
                    code = %goaway.error_code,
                    "server sent GOAWAY"
                );
                return Err(Error::GoAway {
                    last_stream_id: goaway.last_stream_id,
                    code: goaway.error_code,
                });
            }
            FrameType::PushPromise => {
                return Err(Error::Protocol("PUSH_PROMISE with push disabled".to_string()));
            }
            FrameType::Priority => {}
        }

        Ok(())
    }

    fn complete_header_block(&mut self, pending: PendingHeaders) -> Result<()> {
        let stream_id = pending.stream_id;
        let stream = self
            .streams
            .get_stream_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        let block = stream.finish_header_block();
        let first_block = stream.header_blocks_received() == 1;

        // Decode even trailers: the HPACK table must stay in sync
        let fields = hpack_decode(&mut self.decoder, &block)?;

        if first_block {
            let mut status = None;
            let mut headers = Vec::with_capacity(fields.len());
            for (name, value) in fields {
                if name == ":status" {
                    status = Some(value.parse::<u16>().map_err(|_| {
                        Error::InvalidHeader(format!("bad :status {:?}", value))
                    })?);
                } else if !name.starts_with(':') {
                    headers.push((name, value));
                }
            }
            let status = status.ok_or_else(|| {
                Error::InvalidHeader(format!("response on stream {} lacks :status", stream_id))
            })?;

            trace!(stream_id, status, "response headers");
            self.events.push_back(ClientEvent::Response {
                stream_id,
                status,
                headers,
            });
        } else {
            trace!(stream_id, count = fields.len(), "trailers ignored");
        }

        if pending.end_stream {
            self.finish_stream(stream_id);
        }
        Ok(())
    }

    fn receive_data(&mut self, frame: &Frame) -> Result<()> {
        let data = FrameCodec::decode_data(frame)?;
        self.flow.receive(data.frame_size())?;

        let stream = self
            .streams
            .get_stream_mut(data.stream_id)
            .ok_or(Error::StreamClosed(data.stream_id))?;
        stream.receive_data(&data)?;
        let body = stream.take_body();
        let stream_update = if data.end_stream {
            None
        } else {
            stream.flow_mut().take_window_update()?
        };

        if let Some(increment) = self.flow.take_window_update()? {
            self.write(FrameCodec::encode_window_update_frame(
                &WindowUpdateFrame::new(CONNECTION_STREAM_ID, increment),
            ))?;
        }
        if let Some(increment) = stream_update {
            self.write(FrameCodec::encode_window_update_frame(
                &WindowUpdateFrame::new(data.stream_id, increment),
            ))?;
        }

        if !body.is_empty() {
            self.events.push_back(ClientEvent::Data {
                stream_id: data.stream_id,
                data: Bytes::from(body),
            });
        }
        if data.end_stream {
            self.finish_stream(data.stream_id);
        }
        Ok(())
    }

    fn finish_stream(&mut self, stream_id: StreamId) {
        self.streams.remove_stream(stream_id);
        self.events.push_back(ClientEvent::End { stream_id });
    }

    /// Close the connection with GOAWAY(NO_ERROR)
    ///
    /// Closing twice is a no-op. A peer that already went away is not an
    /// error.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.connected {
            let goaway = GoawayFrame::new(
                self.streams.last_remote_stream_id(),
                ErrorCode::NoError,
                Bytes::new(),
            );
            if let Err(e) = self.write(FrameCodec::encode_goaway_frame(&goaway)) {
                debug!(error = %e, "GOAWAY not delivered");
            }
        }

        match self.session.close() {
            Err(e) if !e.is_disconnect() => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn local_settings(&self) -> &Settings {
        &self.local_settings
    }

    pub fn remote_settings(&self) -> &Settings {
        &self.remote_settings
    }

    /// The transport, e.g. to inspect negotiated TLS parameters
    pub fn transport(&self) -> &S {
        self.session.get_ref()
    }
}

/// A complete HTTP/2 response
#[derive(Debug, Clone)]
pub struct H2Response {
    pub stream_id: StreamId,
    pub status: u16,
    /// Regular (non-pseudo) headers in arrival order
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl H2Response {
    pub fn status(&self) -> u16 {
        self.status
    }

    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Get body as string
    pub fn body_string(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| Error::Internal(format!("Invalid UTF-8 in body: {}", e)))
    }
}

/// HTTP/2 client builder
pub struct H2ClientBuilder {
    settings: SettingsBuilder,
    authority: String,
    timeout: Option<Duration>,
}

impl H2ClientBuilder {
    pub fn new() -> Self {
        H2ClientBuilder {
            settings: SettingsBuilder::new()
                .enable_push(false)
                .initial_window_size(DEFAULT_INITIAL_WINDOW_SIZE),
            authority: "localhost".to_string(),
            timeout: None,
        }
    }

    /// Replace the advertised settings
    pub fn settings(mut self, settings: SettingsBuilder) -> Self {
        self.settings = settings;
        self
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings = self.settings.initial_window_size(size);
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_frame_size(size);
        self
    }

    /// Value of the `:authority` pseudo-header
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Per-read timeout; the session default applies when unset
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client; the preface is sent on the first request or on
    /// [`H2Client::connect`]
    pub fn build<S: SessionOps>(self, session: S) -> Result<H2Client<S>> {
        let local_settings = self.settings.build()?;

        let mut streams = StreamManager::new(true);
        streams.set_initial_recv_window(local_settings.get_initial_window_size());

        let mut session = HttpSession::new(session);
        if let Some(timeout) = self.timeout {
            session.set_timeout(Some(timeout));
        }

        Ok(H2Client {
            session,
            streams,
            flow: FlowControl::default(),
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            local_settings,
            remote_settings: Settings::protocol_defaults(),
            authority: self.authority,
            events: VecDeque::new(),
            continuation: None,
            connected: false,
            closed: false,
        })
    }
}

impl Default for H2ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
