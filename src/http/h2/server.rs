//! HTTP/2 server
//!
//! Terminates one client connection: checks the preface, exchanges SETTINGS,
//! turns inbound HEADERS/DATA into [`H2Request`]s and writes responses.
//! Sending honours the peer's SETTINGS_MAX_FRAME_SIZE and both flow-control
//! windows; while waiting for window the server keeps reading frames, so
//! requests that arrive meanwhile are queued rather than lost.

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
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default SETTINGS_MAX_CONCURRENT_STREAMS advertised to clients
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;

/// A request received on one stream
#[derive(Debug, Clone)]
pub struct H2Request {
    stream_id: StreamId,
    method: String,
    path: String,
    scheme: Option<String>,
    authority: Option<String>,
    headers: Vec<(String, String)>,
    body: Bytes,
    ended_on_headers: bool,
}

impl H2Request {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The `:path` pseudo-header, exactly as sent
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Regular (non-pseudo) headers in arrival order
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
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

    /// Whether END_STREAM was set on the request's HEADERS frame
    pub fn ended_on_headers(&self) -> bool {
        self.ended_on_headers
    }

    fn from_fields(stream_id: StreamId, fields: Vec<(String, String)>, end_stream: bool) -> Result<Self> {
        let mut method = None;
        let mut path = None;
        let mut scheme = None;
        let mut authority = None;
        let mut headers = Vec::new();

        for (name, value) in fields {
            match name.as_str() {
                ":method" => method = Some(value),
                ":path" => path = Some(value),
                ":scheme" => scheme = Some(value),
                ":authority" => authority = Some(value),
                other if other.starts_with(':') => {
                    return Err(Error::InvalidHeader(format!(
                        "unknown pseudo-header {}",
                        other
                    )));
                }
                _ => headers.push((name, value)),
            }
        }

        Ok(H2Request {
            stream_id,
            method: method.ok_or_else(|| Error::InvalidHeader(":method missing".to_string()))?,
            path: path.ok_or_else(|| Error::InvalidHeader(":path missing".to_string()))?,
            scheme,
            authority,
            headers,
            body: Bytes::new(),
            ended_on_headers: end_stream,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingHeaders {
    stream_id: StreamId,
    end_stream: bool,
}

/// HTTP/2 server connection
pub struct H2Server<S: SessionOps> {
    session: HttpSession<S>,
    streams: StreamManager,
    /// Connection-level flow control
    flow: FlowControl,
    encoder: Encoder<'static>,
    decoder: Decoder<'static>,
    local_settings: Settings,
    /// Remote (client) settings
    remote_settings: Settings,
    /// Complete requests not yet handed out
    requests: VecDeque<H2Request>,
    /// Requests whose body is still arriving
    partial: HashMap<StreamId, H2Request>,
    continuation: Option<PendingHeaders>,
    accepted: bool,
    goaway_sent: bool,
    closed: bool,
}

impl<S: SessionOps> H2Server<S> {
    /// Create a server connection with default settings
    pub fn new(session: S) -> Result<Self> {
        H2ServerBuilder::new().build(session)
    }

    /// Read the client preface and exchange SETTINGS
    pub fn accept(&mut self) -> Result<()> {
        if self.accepted {
            return Ok(());
        }

        let mut preface = [0u8; 24];
        self.session.read_exact(&mut preface)?;
        if preface[..] != CONNECTION_PREFACE[..] {
            return Err(Error::MissingPreface);
        }

        self.write(FrameCodec::encode_settings_frame(&SettingsFrame::new(
            self.local_settings.clone(),
        )))?;

        let frame = self.read_frame()?;
        if frame.frame_type != FrameType::Settings || frame.flags.is_ack() {
            return Err(Error::Protocol(format!(
                "Expected SETTINGS after preface, got {}",
                frame.frame_type
            )));
        }
        let settings = FrameCodec::decode_settings(&frame)?;
        self.apply_remote_settings(&settings.settings)?;

        self.accepted = true;
        debug!("HTTP/2 connection accepted");
        Ok(())
    }

    fn apply_remote_settings(&mut self, settings: &Settings) -> Result<()> {
        debug!(?settings, "received client SETTINGS");
        self.remote_settings.merge(settings);

        if let Some(size) = settings.initial_window_size {
            self.streams.apply_initial_window_size(size)?;
        }

        self.write(FrameCodec::encode_settings_frame(&SettingsFrame::ack()))
    }

    /// Set the per-read timeout (`None` waits forever)
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.session.set_timeout(timeout);
    }

    /// Wait for the next complete request
    pub fn receive_request(&mut self) -> Result<H2Request> {
        self.accept()?;

        loop {
            if let Some(request) = self.requests.pop_front() {
                return Ok(request);
            }
            let frame = self.read_frame()?;
            self.process_frame(frame)?;
        }
    }

    /// Process at most one frame, waiting up to `timeout` for it
    ///
    /// Returns a complete request if one is available afterwards. Lets a
    /// caller interleave frame processing with checks of its own, such as a
    /// shutdown flag.
    pub fn poll_request(&mut self, timeout: Duration) -> Result<Option<H2Request>> {
        self.accept()?;

        if let Some(request) = self.requests.pop_front() {
            return Ok(Some(request));
        }
        if !self.session.poll_readable(Some(timeout))? {
            return Ok(None);
        }

        let frame = self.read_frame()?;
        self.process_frame(frame)?;
        Ok(self.requests.pop_front())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let max = self.local_settings.get_max_frame_size() as usize;
        FrameCodec::read_frame(&mut self.session, max)
    }

    fn write(&mut self, bytes: Bytes) -> Result<()> {
        self.session.write_all(&bytes)?;
        Ok(())
    }

    /// Handle one inbound frame
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
                    debug!("client acknowledged SETTINGS");
                } else {
                    self.apply_remote_settings(&settings.settings)?;
                }
            }
            FrameType::Headers => {
                let headers = FrameCodec::decode_headers(&frame)?;
                if self.streams.get_stream(headers.stream_id).is_none() {
                    self.streams.accept_remote_stream(headers.stream_id)?;
                }
                self.streams
                    .get_stream_mut(headers.stream_id)
                    .ok_or(Error::StreamNotFound(headers.stream_id))?
                    .receive_headers(&headers)?;

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
                debug!(stream_id = rst.stream_id, code = %rst.error_code, "stream reset by client");
                self.streams.remove_stream(rst.stream_id);
                self.partial.remove(&rst.stream_id);
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
                debug!(code = %goaway.error_code, "client sent GOAWAY");
                return Err(Error::GoAway {
                    last_stream_id: goaway.last_stream_id,
                    code: goaway.error_code,
                });
            }
            FrameType::PushPromise => {
                return Err(Error::Protocol("PUSH_PROMISE from client".to_string()));
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

        let fields = hpack_decode(&mut self.decoder, &block)?;

        if first_block {
            let limit = self.local_settings.get_max_concurrent_streams();
            if limit.map_or(false, |max| self.streams.active_stream_count() > max as usize) {
                warn!(stream_id, "refusing stream over concurrency limit");
                return self.reset_stream(stream_id, ErrorCode::RefusedStream);
            }

            let request = match H2Request::from_fields(stream_id, fields, pending.end_stream) {
                Ok(request) => request,
                Err(e) => {
                    warn!(stream_id, error = %e, "malformed request");
                    return self.reset_stream(stream_id, ErrorCode::ProtocolError);
                }
            };
            debug!(stream_id, method = %request.method, path = %request.path, "request received");
            self.partial.insert(stream_id, request);
        } else {
            trace!(stream_id, count = fields.len(), "trailers ignored");
        }

        if pending.end_stream {
            self.finish_request(stream_id);
        }
        Ok(())
    }

    fn receive_data(&mut self, frame: &Frame) -> Result<()> {
        let data = FrameCodec::decode_data(frame)?;
        self.flow.receive(data.frame_size())?;
        if let Some(increment) = self.flow.take_window_update()? {
            self.write(FrameCodec::encode_window_update_frame(
                &WindowUpdateFrame::new(CONNECTION_STREAM_ID, increment),
            ))?;
        }

        if self.streams.get_stream(data.stream_id).is_none() {
            if self.streams.was_closed(data.stream_id) {
                return self.reset_stream(data.stream_id, ErrorCode::StreamClosed);
            }
            return Err(Error::Protocol(format!(
                "DATA on idle stream {}",
                data.stream_id
            )));
        }
        let stream = self
            .streams
            .get_stream_mut(data.stream_id)
            .ok_or(Error::StreamNotFound(data.stream_id))?;
        stream.receive_data(&data)?;

        if data.end_stream {
            self.finish_request(data.stream_id);
        } else if let Some(increment) = stream.flow_mut().take_window_update()? {
            self.write(FrameCodec::encode_window_update_frame(
                &WindowUpdateFrame::new(data.stream_id, increment),
            ))?;
        }
        Ok(())
    }

    /// Move a request whose stream the client has ended to the ready queue
    fn finish_request(&mut self, stream_id: StreamId) {
        if let Some(mut request) = self.partial.remove(&stream_id) {
            if let Some(stream) = self.streams.get_stream_mut(stream_id) {
                request.body = Bytes::from(stream.take_body());
            }
            self.requests.push_back(request);
        }
    }

    /// Send a response header block
    pub fn send_headers(
        &mut self,
        stream_id: StreamId,
        status: u16,
        headers: &[(&str, &str)],
        end_stream: bool,
    ) -> Result<()> {
        let stream = self
            .streams
            .get_stream_mut(stream_id)
            .ok_or(Error::StreamNotFound(stream_id))?;
        stream.send_headers(end_stream)?;
        let closed = stream.state().is_closed();

        let status = status.to_string();
        let fields = std::iter::once((&b":status"[..], status.as_bytes())).chain(
            headers
                .iter()
                .map(|(name, value)| (name.as_bytes(), value.as_bytes())),
        );
        let block = hpack_encode(&mut self.encoder, fields);

        let max_frame = self.remote_settings.get_max_frame_size() as usize;
        self.write(FrameCodec::encode_header_block(
            stream_id, &block, end_stream, max_frame,
        ))?;
        trace!(stream_id, status = %status, end_stream, "response headers sent");

        if closed {
            self.streams.remove_stream(stream_id);
        }
        Ok(())
    }

    /// Send body bytes on a stream
    ///
    /// Frames never exceed the client's SETTINGS_MAX_FRAME_SIZE. When either
    /// window is exhausted this blocks, processing inbound frames, until the
    /// client opens it again.
    pub fn send_data(&mut self, stream_id: StreamId, data: &[u8], end_stream: bool) -> Result<()> {
        if data.is_empty() && !end_stream {
            return Ok(());
        }

        let max_frame = self.remote_settings.get_max_frame_size() as usize;
        let mut offset = 0;

        loop {
            let remaining = data.len() - offset;
            let stream_window = self
                .streams
                .get_stream(stream_id)
                .ok_or(Error::StreamClosed(stream_id))?
                .flow()
                .send
                .available();
            let n = remaining
                .min(max_frame)
                .min(stream_window)
                .min(self.flow.send.available());

            if n == 0 && remaining > 0 {
                trace!(stream_id, remaining, "waiting for flow-control window");
                let frame = self.read_frame()?;
                self.process_frame(frame)?;
                continue;
            }

            let last = end_stream && n == remaining;
            self.flow.send.consume(n);
            let stream = self
                .streams
                .get_stream_mut(stream_id)
                .ok_or(Error::StreamClosed(stream_id))?;
            stream.flow_mut().send.consume(n);
            stream.send_data(last)?;
            let closed = stream.state().is_closed();

            let chunk = Bytes::copy_from_slice(&data[offset..offset + n]);
            self.write(FrameCodec::encode_data_frame(&DataFrame::new(
                stream_id, chunk, last,
            )))?;
            offset += n;

            if closed {
                self.streams.remove_stream(stream_id);
            }
            if offset == data.len() {
                return Ok(());
            }
        }
    }

    /// Send a complete response
    ///
    /// An empty body ends the stream on the HEADERS frame.
    pub fn send_response(
        &mut self,
        stream_id: StreamId,
        status: u16,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<()> {
        if body.is_empty() {
            return self.send_headers(stream_id, status, headers, true);
        }

        self.send_headers(stream_id, status, headers, false)?;
        self.send_data(stream_id, body, true)
    }

    /// Reset a stream with RST_STREAM
    pub fn reset_stream(&mut self, stream_id: StreamId, code: ErrorCode) -> Result<()> {
        self.streams.remove_stream(stream_id);
        self.partial.remove(&stream_id);
        self.write(FrameCodec::encode_rst_stream_frame(&RstStreamFrame {
            stream_id,
            error_code: code,
        }))
    }

    /// Send GOAWAY; only the first call writes anything
    pub fn goaway(&mut self, code: ErrorCode, debug_data: &str) -> Result<()> {
        if self.goaway_sent || !self.accepted {
            return Ok(());
        }
        self.goaway_sent = true;

        let frame = GoawayFrame::new(
            self.streams.last_remote_stream_id(),
            code,
            Bytes::copy_from_slice(debug_data.as_bytes()),
        );
        self.write(FrameCodec::encode_goaway_frame(&frame))
    }

    /// Send GOAWAY(NO_ERROR) and close the transport; idempotent
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Err(e) = self.goaway(ErrorCode::NoError, "") {
            debug!(error = %e, "GOAWAY not delivered");
        }
        match self.session.close() {
            Err(e) if !e.is_disconnect() => Err(e.into()),
            _ => Ok(()),
        }
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

/// HTTP/2 server builder
#[derive(Debug, Clone)]
pub struct H2ServerBuilder {
    settings: SettingsBuilder,
    timeout: Option<Duration>,
}

impl H2ServerBuilder {
    pub fn new() -> Self {
        H2ServerBuilder {
            settings: SettingsBuilder::new()
                .max_concurrent_streams(DEFAULT_MAX_CONCURRENT_STREAMS)
                .initial_window_size(DEFAULT_INITIAL_WINDOW_SIZE),
            timeout: None,
        }
    }

    /// Replace the advertised settings
    pub fn settings(mut self, settings: SettingsBuilder) -> Self {
        self.settings = settings;
        self
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings = self.settings.max_concurrent_streams(max);
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings = self.settings.max_frame_size(size);
        self
    }

    /// Per-read timeout; the session default applies when unset
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the server; the preface is read on [`H2Server::accept`] or the
    /// first request
    pub fn build<S: SessionOps>(self, session: S) -> Result<H2Server<S>> {
        let local_settings = self.settings.build()?;

        let mut streams = StreamManager::new(false);
        streams.set_initial_recv_window(local_settings.get_initial_window_size());

        let mut session = HttpSession::new(session);
        if let Some(timeout) = self.timeout {
            session.set_timeout(Some(timeout));
        }

        Ok(H2Server {
            session,
            streams,
            flow: FlowControl::default(),
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            local_settings,
            remote_settings: Settings::protocol_defaults(),
            requests: VecDeque::new(),
            partial: HashMap::new(),
            continuation: None,
            accepted: false,
            goaway_sent: false,
            closed: false,
        })
    }
}

impl Default for H2ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
