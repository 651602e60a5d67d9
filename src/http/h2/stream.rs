//! HTTP/2 stream management
//!
//! Stream states and transitions as defined in RFC 7540 Section 5.1, plus
//! the per-connection table of streams.

use super::error::{Error, Result};
use super::flow_control::FlowControl;
use super::frames::{DataFrame, HeadersFrame};
use super::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_STREAM_ID};
use std::collections::HashMap;

/// Stream ID type
pub type StreamId = u32;

/// Stream state as defined in RFC 7540 Section 5.1
///
/// The reserved states only arise from server push, which this stack never
/// enables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No frames have been sent or received
    Idle,
    /// Both sides can send frames
    Open,
    /// We sent END_STREAM, the peer may still send
    HalfClosedLocal,
    /// The peer sent END_STREAM, we may still send
    HalfClosedRemote,
    Closed,
}

impl StreamState {
    /// Check if stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }

    /// State after the peer's END_STREAM
    fn remote_ended(self) -> Self {
        match self {
            StreamState::HalfClosedLocal | StreamState::Closed => StreamState::Closed,
            _ => StreamState::HalfClosedRemote,
        }
    }

    /// State after our END_STREAM
    fn local_ended(self) -> Self {
        match self {
            StreamState::HalfClosedRemote | StreamState::Closed => StreamState::Closed,
            _ => StreamState::HalfClosedLocal,
        }
    }
}

/// HTTP/2 stream
#[derive(Debug)]
pub struct H2Stream {
    id: StreamId,
    state: StreamState,
    flow: FlowControl,
    /// Header block fragments awaiting END_HEADERS
    header_block: Vec<u8>,
    /// Complete header blocks seen so far (1 = headers, 2+ = trailers)
    header_blocks_received: u32,
    /// Body bytes not yet taken by the owner
    body: Vec<u8>,
}

impl H2Stream {
    /// Create a stream with the given initial send and receive windows
    pub fn new(id: StreamId, send_window: u32, recv_window: u32) -> Self {
        H2Stream {
            id,
            state: StreamState::Idle,
            flow: FlowControl::new(send_window, recv_window),
            header_block: Vec::new(),
            header_blocks_received: 0,
            body: Vec::new(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn flow(&self) -> &FlowControl {
        &self.flow
    }

    pub fn flow_mut(&mut self) -> &mut FlowControl {
        &mut self.flow
    }

    /// Number of complete header blocks received
    pub fn header_blocks_received(&self) -> u32 {
        self.header_blocks_received
    }

    /// Whether the peer has finished sending on this stream
    pub fn is_remote_closed(&self) -> bool {
        matches!(self.state, StreamState::HalfClosedRemote | StreamState::Closed)
    }

    /// Get accumulated body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Take body (consumes the body data)
    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.body)
    }

    /// Process an incoming HEADERS frame
    ///
    /// END_STREAM takes effect here even when CONTINUATION frames follow.
    pub fn receive_headers(&mut self, frame: &HeadersFrame) -> Result<()> {
        match self.state {
            StreamState::Idle => {
                self.state = StreamState::Open;
            }
            StreamState::Open | StreamState::HalfClosedLocal => {}
            StreamState::HalfClosedRemote | StreamState::Closed => {
                return Err(Error::StreamClosed(self.id));
            }
        }

        if frame.end_stream {
            self.state = self.state.remote_ended();
        }

        self.header_block.extend_from_slice(&frame.header_block);
        Ok(())
    }

    /// Append a CONTINUATION fragment to the pending header block
    pub fn receive_continuation(&mut self, fragment: &[u8]) {
        self.header_block.extend_from_slice(fragment);
    }

    /// Take the completed header block once END_HEADERS has been seen
    pub fn finish_header_block(&mut self) -> Vec<u8> {
        self.header_blocks_received += 1;
        std::mem::take(&mut self.header_block)
    }

    /// Process an incoming DATA frame
    ///
    /// The full frame size, padding included, is charged to the stream's
    /// receive window.
    pub fn receive_data(&mut self, frame: &DataFrame) -> Result<()> {
        if !self.state.can_receive() {
            return Err(Error::StreamClosed(self.id));
        }

        self.flow.receive(frame.frame_size())?;
        self.body.extend_from_slice(&frame.data);

        if frame.end_stream {
            self.state = self.state.remote_ended();
        }

        Ok(())
    }

    /// Record that we are sending HEADERS
    pub fn send_headers(&mut self, end_stream: bool) -> Result<()> {
        match self.state {
            StreamState::Idle => self.state = StreamState::Open,
            StreamState::Open | StreamState::HalfClosedRemote => {}
            StreamState::HalfClosedLocal | StreamState::Closed => {
                return Err(Error::Protocol(format!(
                    "Cannot send HEADERS on stream {} in state {:?}",
                    self.id, self.state
                )));
            }
        }

        if end_stream {
            self.state = self.state.local_ended();
        }

        Ok(())
    }

    /// Record that we are sending DATA
    ///
    /// Window accounting is the caller's job; this only validates state.
    pub fn send_data(&mut self, end_stream: bool) -> Result<()> {
        if !self.state.can_send() {
            return Err(Error::StreamClosed(self.id));
        }

        if end_stream {
            self.state = self.state.local_ended();
        }

        Ok(())
    }

    /// Close the stream (RST_STREAM sent or received)
    pub fn reset(&mut self) {
        self.state = StreamState::Closed;
        self.header_block.clear();
        self.body.clear();
    }
}

/// Stream manager
///
/// Owns every live stream of one connection and allocates stream IDs.
#[derive(Debug)]
pub struct StreamManager {
    streams: HashMap<StreamId, H2Stream>,
    /// Next locally initiated stream ID (client: odd, server: even)
    next_stream_id: StreamId,
    /// Highest stream ID the peer has opened
    last_remote_stream_id: StreamId,
    /// Peer's SETTINGS_MAX_CONCURRENT_STREAMS
    max_concurrent_streams: Option<u32>,
    /// Send window for new streams (peer's SETTINGS_INITIAL_WINDOW_SIZE)
    initial_send_window: u32,
    /// Receive window for new streams (our SETTINGS_INITIAL_WINDOW_SIZE)
    initial_recv_window: u32,
}

impl StreamManager {
    /// Create a new stream manager
    ///
    /// # Arguments
    /// * `is_client` - True if this is a client (odd stream IDs), false for server (even)
    pub fn new(is_client: bool) -> Self {
        StreamManager {
            streams: HashMap::new(),
            next_stream_id: if is_client { 1 } else { 2 },
            last_remote_stream_id: 0,
            max_concurrent_streams: None,
            initial_send_window: DEFAULT_INITIAL_WINDOW_SIZE,
            initial_recv_window: DEFAULT_INITIAL_WINDOW_SIZE,
        }
    }

    pub fn set_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.max_concurrent_streams = max;
    }

    pub fn set_initial_recv_window(&mut self, size: u32) {
        self.initial_recv_window = size;
    }

    /// Apply the peer's new SETTINGS_INITIAL_WINDOW_SIZE to every stream
    pub fn apply_initial_window_size(&mut self, size: u32) -> Result<()> {
        self.initial_send_window = size;
        for stream in self.streams.values_mut() {
            stream.flow_mut().send.update_initial_size(size)?;
        }
        Ok(())
    }

    pub fn peek_next_stream_id(&self) -> StreamId {
        self.next_stream_id
    }

    pub fn last_remote_stream_id(&self) -> StreamId {
        self.last_remote_stream_id
    }

    /// Allocate the next local stream ID and create its stream
    pub fn create_stream(&mut self) -> Result<StreamId> {
        if let Some(max) = self.max_concurrent_streams {
            if self.active_stream_count() >= max as usize {
                return Err(Error::TooManyStreams);
            }
        }

        let stream_id = self.next_stream_id;
        if stream_id > MAX_STREAM_ID {
            return Err(Error::Protocol("Stream IDs exhausted".to_string()));
        }
        self.next_stream_id += 2;

        self.streams.insert(
            stream_id,
            H2Stream::new(stream_id, self.initial_send_window, self.initial_recv_window),
        );
        Ok(stream_id)
    }

    /// Open a stream the peer initiated
    ///
    /// Peer stream IDs must have the peer's parity and increase
    /// monotonically (RFC 7540 Section 5.1.1).
    pub fn accept_remote_stream(&mut self, stream_id: StreamId) -> Result<&mut H2Stream> {
        let we_are_client = self.next_stream_id % 2 == 1;
        let peer_parity_ok = (stream_id % 2 == 1) != we_are_client;

        if !peer_parity_ok {
            return Err(Error::Protocol(format!(
                "Stream {} has the wrong parity for a peer-initiated stream",
                stream_id
            )));
        }
        if stream_id <= self.last_remote_stream_id {
            return Err(Error::StreamClosed(stream_id));
        }

        self.last_remote_stream_id = stream_id;
        let (send, recv) = (self.initial_send_window, self.initial_recv_window);
        Ok(self
            .streams
            .entry(stream_id)
            .or_insert_with(|| H2Stream::new(stream_id, send, recv)))
    }

    /// Whether `stream_id` was opened at some point and has since been removed
    pub fn was_closed(&self, stream_id: StreamId) -> bool {
        if self.streams.contains_key(&stream_id) {
            return false;
        }
        let local = (stream_id % 2) == (self.next_stream_id % 2);
        if local {
            stream_id < self.next_stream_id
        } else {
            stream_id <= self.last_remote_stream_id
        }
    }

    pub fn get_stream(&self, stream_id: StreamId) -> Option<&H2Stream> {
        self.streams.get(&stream_id)
    }

    pub fn get_stream_mut(&mut self, stream_id: StreamId) -> Option<&mut H2Stream> {
        self.streams.get_mut(&stream_id)
    }

    pub fn remove_stream(&mut self, stream_id: StreamId) -> Option<H2Stream> {
        self.streams.remove(&stream_id)
    }

    /// Number of streams that are not closed
    pub fn active_stream_count(&self) -> usize {
        self.streams
            .values()
            .filter(|s| !s.state().is_closed())
            .count()
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.streams.keys().copied().collect()
    }

    /// Clean up closed streams
    pub fn cleanup_closed_streams(&mut self) {
        self.streams.retain(|_, stream| !stream.state().is_closed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn stream(id: StreamId) -> H2Stream {
        H2Stream::new(id, 65535, 65535)
    }

    #[test]
    fn test_client_request_lifecycle() {
        let mut s = stream(1);
        assert_eq!(s.state(), StreamState::Idle);

        // GET: HEADERS with END_STREAM
        s.send_headers(true).unwrap();
        assert_eq!(s.state(), StreamState::HalfClosedLocal);

        s.receive_headers(&HeadersFrame::new(1, Bytes::from("hdr"), false, true))
            .unwrap();
        assert_eq!(s.state(), StreamState::HalfClosedLocal);
        assert_eq!(s.finish_header_block(), b"hdr");
        assert_eq!(s.header_blocks_received(), 1);

        s.receive_data(&DataFrame::new(1, Bytes::from("AJS"), true))
            .unwrap();
        assert_eq!(s.state(), StreamState::Closed);
        assert_eq!(s.take_body(), b"AJS");
    }

    #[test]
    fn test_headers_only_response_closes_stream() {
        let mut s = stream(1);
        s.send_headers(true).unwrap();
        s.receive_headers(&HeadersFrame::new(1, Bytes::new(), true, true))
            .unwrap();
        assert_eq!(s.state(), StreamState::Closed);
        assert!(s.is_remote_closed());
    }

    #[test]
    fn test_server_side_lifecycle() {
        let mut s = stream(1);
        s.receive_headers(&HeadersFrame::new(1, Bytes::new(), true, true))
            .unwrap();
        assert_eq!(s.state(), StreamState::HalfClosedRemote);
        assert!(!s.state().can_receive());

        s.send_headers(false).unwrap();
        assert_eq!(s.state(), StreamState::HalfClosedRemote);
        s.send_data(true).unwrap();
        assert_eq!(s.state(), StreamState::Closed);
        assert!(s.send_data(false).is_err());
    }

    #[test]
    fn test_data_after_end_stream_is_rejected() {
        let mut s = stream(1);
        s.receive_headers(&HeadersFrame::new(1, Bytes::new(), true, true))
            .unwrap();
        let err = s
            .receive_data(&DataFrame::new(1, Bytes::from("x"), false))
            .unwrap_err();
        assert!(matches!(err, Error::StreamClosed(1)));
    }

    #[test]
    fn test_continuation_accumulates() {
        let mut s = stream(3);
        s.receive_headers(&HeadersFrame::new(3, Bytes::from("ab"), false, false))
            .unwrap();
        s.receive_continuation(b"cd");
        assert_eq!(s.finish_header_block(), b"abcd");
    }

    #[test]
    fn test_receive_data_charges_window() {
        let mut s = H2Stream::new(1, 100, 10);
        s.send_headers(true).unwrap();
        s.receive_data(&DataFrame::new(1, Bytes::from("12345"), false))
            .unwrap();
        assert_eq!(s.flow().recv.size(), 5);
        assert!(s
            .receive_data(&DataFrame::new(1, Bytes::from("123456"), false))
            .is_err());
    }

    #[test]
    fn test_stream_manager_ids() {
        let mut client = StreamManager::new(true);
        assert_eq!(client.create_stream().unwrap(), 1);
        assert_eq!(client.create_stream().unwrap(), 3);
        assert_eq!(client.peek_next_stream_id(), 5);

        let mut server = StreamManager::new(false);
        assert_eq!(server.create_stream().unwrap(), 2);
    }

    #[test]
    fn test_stream_manager_max_concurrent() {
        let mut manager = StreamManager::new(true);
        manager.set_max_concurrent_streams(Some(2));

        manager.create_stream().unwrap();
        manager.create_stream().unwrap();
        assert!(matches!(
            manager.create_stream().unwrap_err(),
            Error::TooManyStreams
        ));
    }

    #[test]
    fn test_accept_remote_stream_validation() {
        let mut server = StreamManager::new(false);
        server.accept_remote_stream(1).unwrap();
        server.accept_remote_stream(5).unwrap();
        assert_eq!(server.last_remote_stream_id(), 5);

        assert!(matches!(
            server.accept_remote_stream(3),
            Err(Error::StreamClosed(3))
        ));
        assert!(matches!(
            server.accept_remote_stream(6),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_was_closed() {
        let mut server = StreamManager::new(false);
        server.accept_remote_stream(1).unwrap();
        assert!(!server.was_closed(1));
        server.remove_stream(1);
        assert!(server.was_closed(1));
        assert!(!server.was_closed(3));
    }

    #[test]
    fn test_apply_initial_window_size() {
        let mut manager = StreamManager::new(true);
        let id = manager.create_stream().unwrap();
        manager.apply_initial_window_size(1000).unwrap();

        assert_eq!(manager.get_stream(id).unwrap().flow().send.size(), 1000);
        let next = manager.create_stream().unwrap();
        assert_eq!(manager.get_stream(next).unwrap().flow().send.size(), 1000);
    }

    #[test]
    fn test_stream_manager_cleanup() {
        let mut manager = StreamManager::new(true);
        let id1 = manager.create_stream().unwrap();
        let id2 = manager.create_stream().unwrap();

        manager.get_stream_mut(id1).unwrap().reset();
        assert_eq!(manager.active_stream_count(), 1);

        manager.cleanup_closed_streams();
        assert!(manager.get_stream(id1).is_none());
        assert!(manager.get_stream(id2).is_some());
    }
}
