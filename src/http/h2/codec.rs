//! HTTP/2 frame encoding and decoding
//!
//! Encoders produce complete frames (9-byte header plus payload) ready to be
//! written to a session. Decoders take a raw [`Frame`] and validate its
//! payload layout: padding, priority fields, fixed-size control payloads.

use super::error::{Error, ErrorCode, Result};
use super::frames::*;
use super::settings::{Settings, SettingsParameter};
use super::CONNECTION_STREAM_ID;
use crate::http::{HttpSession, SessionOps};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// HTTP/2 frame header size (9 bytes)
pub const FRAME_HEADER_SIZE: usize = 9;

/// Stateless frame encoder/decoder
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame header
    pub fn encode_header(
        frame_type: FrameType,
        flags: FrameFlags,
        stream_id: u32,
        length: usize,
    ) -> [u8; FRAME_HEADER_SIZE] {
        let mut header = [0u8; FRAME_HEADER_SIZE];

        // Length (24 bits, big-endian)
        header[0] = ((length >> 16) & 0xFF) as u8;
        header[1] = ((length >> 8) & 0xFF) as u8;
        header[2] = (length & 0xFF) as u8;

        header[3] = frame_type.as_u8();
        header[4] = flags.as_u8();

        // Stream ID (31 bits, reserved bit cleared)
        header[5..9].copy_from_slice(&(stream_id & 0x7FFF_FFFF).to_be_bytes());

        header
    }

    /// Decode a frame header into (raw type, flags, stream id, payload length)
    pub fn decode_header(bytes: &[u8; FRAME_HEADER_SIZE]) -> (u8, FrameFlags, u32, usize) {
        let length =
            ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize);
        let stream_id = u32::from_be_bytes([bytes[5] & 0x7F, bytes[6], bytes[7], bytes[8]]);

        (bytes[3], FrameFlags::from_u8(bytes[4]), stream_id, length)
    }

    /// Encode a DATA frame
    pub fn encode_data_frame(frame: &DataFrame) -> Bytes {
        let flags = FrameFlags::empty()
            .with(FrameFlags::END_STREAM, frame.end_stream)
            .with(FrameFlags::PADDED, frame.padding.is_some());

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.frame_size());
        buf.put_slice(&Self::encode_header(
            FrameType::Data,
            flags,
            frame.stream_id,
            frame.frame_size(),
        ));

        if let Some(pad_len) = frame.padding {
            buf.put_u8(pad_len);
        }
        buf.put_slice(&frame.data);
        if let Some(pad_len) = frame.padding {
            buf.put_bytes(0, pad_len as usize);
        }

        buf.freeze()
    }

    /// Encode a single HEADERS frame
    pub fn encode_headers_frame(frame: &HeadersFrame) -> Bytes {
        let flags = FrameFlags::empty()
            .with(FrameFlags::END_STREAM, frame.end_stream)
            .with(FrameFlags::END_HEADERS, frame.end_headers)
            .with(FrameFlags::PRIORITY, frame.priority.is_some())
            .with(FrameFlags::PADDED, frame.padding.is_some());

        let mut payload_len = frame.header_block.len();
        if frame.priority.is_some() {
            payload_len += 5;
        }
        if let Some(pad_len) = frame.padding {
            payload_len += 1 + pad_len as usize;
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(
            FrameType::Headers,
            flags,
            frame.stream_id,
            payload_len,
        ));

        if let Some(pad_len) = frame.padding {
            buf.put_u8(pad_len);
        }
        if let Some(priority) = &frame.priority {
            let mut dep = priority.stream_dependency & 0x7FFF_FFFF;
            if priority.exclusive {
                dep |= 0x8000_0000;
            }
            buf.put_u32(dep);
            buf.put_u8(priority.weight);
        }
        buf.put_slice(&frame.header_block);
        if let Some(pad_len) = frame.padding {
            buf.put_bytes(0, pad_len as usize);
        }

        buf.freeze()
    }

    /// Encode a complete header block as HEADERS plus any CONTINUATION frames
    ///
    /// No fragment exceeds `max_frame_size`; END_HEADERS lands on the last one.
    pub fn encode_header_block(
        stream_id: u32,
        block: &[u8],
        end_stream: bool,
        max_frame_size: usize,
    ) -> Bytes {
        let max_frame_size = max_frame_size.max(1);
        let mut chunks = block.chunks(max_frame_size).peekable();
        let mut buf = BytesMut::with_capacity(block.len() + FRAME_HEADER_SIZE);

        let first = chunks.next().unwrap_or_default();
        let first_frame = HeadersFrame::new(
            stream_id,
            Bytes::copy_from_slice(first),
            end_stream,
            chunks.peek().is_none(),
        );
        buf.put_slice(&Self::encode_headers_frame(&first_frame));

        while let Some(fragment) = chunks.next() {
            let flags = FrameFlags::empty().with(FrameFlags::END_HEADERS, chunks.peek().is_none());
            buf.put_slice(&Self::encode_header(
                FrameType::Continuation,
                flags,
                stream_id,
                fragment.len(),
            ));
            buf.put_slice(fragment);
        }

        buf.freeze()
    }

    /// Encode a SETTINGS frame
    pub fn encode_settings_frame(frame: &SettingsFrame) -> Bytes {
        let flags = FrameFlags::empty().with(FrameFlags::ACK, frame.ack);

        // Each setting is 6 bytes (2 byte ID + 4 byte value); an ACK is empty
        let entries = if frame.ack {
            Vec::new()
        } else {
            frame.settings.entries()
        };

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + entries.len() * 6);
        buf.put_slice(&Self::encode_header(
            FrameType::Settings,
            flags,
            CONNECTION_STREAM_ID,
            entries.len() * 6,
        ));
        for (parameter, value) in entries {
            buf.put_u16(parameter.as_u16());
            buf.put_u32(value);
        }

        buf.freeze()
    }

    /// Encode a PING frame
    pub fn encode_ping_frame(frame: &PingFrame) -> Bytes {
        let flags = FrameFlags::empty().with(FrameFlags::ACK, frame.ack);

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 8);
        buf.put_slice(&Self::encode_header(FrameType::Ping, flags, CONNECTION_STREAM_ID, 8));
        buf.put_slice(&frame.data);

        buf.freeze()
    }

    /// Encode a GOAWAY frame
    pub fn encode_goaway_frame(frame: &GoawayFrame) -> Bytes {
        let payload_len = 8 + frame.debug_data.len();

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_slice(&Self::encode_header(
            FrameType::Goaway,
            FrameFlags::empty(),
            CONNECTION_STREAM_ID,
            payload_len,
        ));
        buf.put_u32(frame.last_stream_id & 0x7FFF_FFFF);
        buf.put_u32(frame.error_code.as_u32());
        buf.put_slice(&frame.debug_data);

        buf.freeze()
    }

    /// Encode a WINDOW_UPDATE frame
    pub fn encode_window_update_frame(frame: &WindowUpdateFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(
            FrameType::WindowUpdate,
            FrameFlags::empty(),
            frame.stream_id,
            4,
        ));
        buf.put_u32(frame.size_increment & 0x7FFF_FFFF);

        buf.freeze()
    }

    /// Encode a RST_STREAM frame
    pub fn encode_rst_stream_frame(frame: &RstStreamFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + 4);
        buf.put_slice(&Self::encode_header(
            FrameType::RstStream,
            FrameFlags::empty(),
            frame.stream_id,
            4,
        ));
        buf.put_u32(frame.error_code.as_u32());

        buf.freeze()
    }

    /// Read the next frame from a session
    ///
    /// Frames of unknown (extension) types are skipped, as RFC 7540 Section
    /// 4.1 requires. Payloads larger than `max_payload` are a FRAME_SIZE_ERROR.
    pub fn read_frame<S: SessionOps>(
        session: &mut HttpSession<S>,
        max_payload: usize,
    ) -> Result<Frame> {
        loop {
            let mut header = [0u8; FRAME_HEADER_SIZE];
            session.read_exact(&mut header)?;

            let (raw_type, flags, stream_id, payload_len) = Self::decode_header(&header);

            if payload_len > max_payload {
                return Err(Error::FrameSize(format!(
                    "Frame payload {} exceeds limit {}",
                    payload_len, max_payload
                )));
            }

            let mut payload = vec![0u8; payload_len];
            if payload_len > 0 {
                session.read_exact(&mut payload)?;
            }

            match FrameType::from_u8(raw_type) {
                Some(frame_type) => {
                    return Ok(Frame::new(frame_type, flags, stream_id, Bytes::from(payload)));
                }
                None => {
                    trace!(frame_type = raw_type, stream_id, "ignoring extension frame");
                }
            }
        }
    }

    /// Strip padding from a DATA or HEADERS payload
    fn strip_padding(flags: FrameFlags, mut payload: Bytes) -> Result<(Bytes, Option<u8>)> {
        if !flags.is_padded() {
            return Ok((payload, None));
        }

        if payload.is_empty() {
            return Err(Error::FrameSize("Padded frame without pad length".to_string()));
        }

        let pad_len = payload.get_u8();
        if pad_len as usize > payload.len() {
            return Err(Error::Protocol(format!(
                "Padding {} exceeds remaining payload {}",
                pad_len,
                payload.len()
            )));
        }

        payload.truncate(payload.len() - pad_len as usize);
        Ok((payload, Some(pad_len)))
    }

    fn require_stream(frame: &Frame) -> Result<()> {
        if frame.is_connection_level() {
            return Err(Error::Protocol(format!(
                "{} frame on stream 0",
                frame.frame_type.name()
            )));
        }
        Ok(())
    }

    fn require_connection(frame: &Frame) -> Result<()> {
        if !frame.is_connection_level() {
            return Err(Error::Protocol(format!(
                "{} frame must have stream ID 0",
                frame.frame_type.name()
            )));
        }
        Ok(())
    }

    /// Decode a HEADERS frame payload
    pub fn decode_headers(frame: &Frame) -> Result<HeadersFrame> {
        Self::require_stream(frame)?;

        let (mut block, padding) = Self::strip_padding(frame.flags, frame.payload.clone())?;

        let priority = if frame.flags.is_priority() {
            if block.len() < 5 {
                return Err(Error::FrameSize("HEADERS priority fields truncated".to_string()));
            }
            let dep = block.get_u32();
            let weight = block.get_u8();
            Some(PrioritySpec {
                stream_dependency: dep & 0x7FFF_FFFF,
                exclusive: dep & 0x8000_0000 != 0,
                weight,
            })
        } else {
            None
        };

        Ok(HeadersFrame {
            stream_id: frame.stream_id,
            header_block: block,
            end_stream: frame.flags.is_end_stream(),
            end_headers: frame.flags.is_end_headers(),
            priority,
            padding,
        })
    }

    /// Decode a DATA frame payload
    pub fn decode_data(frame: &Frame) -> Result<DataFrame> {
        Self::require_stream(frame)?;

        let (data, padding) = Self::strip_padding(frame.flags, frame.payload.clone())?;

        Ok(DataFrame {
            stream_id: frame.stream_id,
            data,
            end_stream: frame.flags.is_end_stream(),
            padding,
        })
    }

    /// Decode a SETTINGS frame payload
    pub fn decode_settings(frame: &Frame) -> Result<SettingsFrame> {
        Self::require_connection(frame)?;

        if frame.flags.is_ack() {
            if !frame.payload.is_empty() {
                return Err(Error::FrameSize("SETTINGS ACK with payload".to_string()));
            }
            return Ok(SettingsFrame::ack());
        }

        if frame.payload.len() % 6 != 0 {
            return Err(Error::FrameSize(format!(
                "SETTINGS payload length {} is not a multiple of 6",
                frame.payload.len()
            )));
        }

        let mut settings = Settings::new();
        let mut payload = frame.payload.clone();
        while payload.has_remaining() {
            let id = payload.get_u16();
            let value = payload.get_u32();

            // Unknown settings are ignored per RFC 7540
            if let Some(parameter) = SettingsParameter::from_u16(id) {
                if parameter == SettingsParameter::EnablePush && value > 1 {
                    return Err(Error::Protocol(format!("ENABLE_PUSH value {}", value)));
                }
                settings.set(parameter, value);
            }
        }
        settings.validate().map_err(|e| match e {
            Error::InvalidSettings(msg) => Error::Protocol(msg),
            other => other,
        })?;

        Ok(SettingsFrame::new(settings))
    }

    /// Decode a WINDOW_UPDATE increment
    pub fn decode_window_update(frame: &Frame) -> Result<WindowUpdateFrame> {
        if frame.payload.len() != 4 {
            return Err(Error::FrameSize("WINDOW_UPDATE must be 4 bytes".to_string()));
        }

        let increment = frame.payload.clone().get_u32() & 0x7FFF_FFFF;
        if increment == 0 {
            return Err(Error::Protocol("WINDOW_UPDATE increment of 0".to_string()));
        }

        Ok(WindowUpdateFrame::new(frame.stream_id, increment))
    }

    /// Decode a RST_STREAM frame
    pub fn decode_rst_stream(frame: &Frame) -> Result<RstStreamFrame> {
        Self::require_stream(frame)?;
        if frame.payload.len() != 4 {
            return Err(Error::FrameSize("RST_STREAM must be 4 bytes".to_string()));
        }

        Ok(RstStreamFrame {
            stream_id: frame.stream_id,
            error_code: ErrorCode::from_u32(frame.payload.clone().get_u32()),
        })
    }

    /// Decode a PING frame
    pub fn decode_ping(frame: &Frame) -> Result<PingFrame> {
        Self::require_connection(frame)?;

        let data: [u8; 8] = frame.payload[..]
            .try_into()
            .map_err(|_| Error::FrameSize("PING must be 8 bytes".to_string()))?;

        Ok(PingFrame {
            ack: frame.flags.is_ack(),
            data,
        })
    }

    /// Decode a GOAWAY frame
    pub fn decode_goaway(frame: &Frame) -> Result<GoawayFrame> {
        Self::require_connection(frame)?;
        if frame.payload.len() < 8 {
            return Err(Error::FrameSize("GOAWAY shorter than 8 bytes".to_string()));
        }

        let mut payload = frame.payload.clone();
        let last_stream_id = payload.get_u32() & 0x7FFF_FFFF;
        let error_code = ErrorCode::from_u32(payload.get_u32());

        Ok(GoawayFrame::new(last_stream_id, error_code, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::h2::settings::SettingsBuilder;
    use crate::http::PlainSessionOps;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};

    fn parse(encoded: &Bytes) -> Frame {
        let header: [u8; FRAME_HEADER_SIZE] = encoded[..FRAME_HEADER_SIZE].try_into().unwrap();
        let (raw, flags, stream_id, len) = FrameCodec::decode_header(&header);
        assert_eq!(len, encoded.len() - FRAME_HEADER_SIZE);
        Frame::new(
            FrameType::from_u8(raw).unwrap(),
            flags,
            stream_id,
            encoded.slice(FRAME_HEADER_SIZE..),
        )
    }

    #[test]
    fn test_encode_decode_header() {
        let flags = FrameFlags::from_u8(FrameFlags::END_STREAM | FrameFlags::END_HEADERS);
        let header = FrameCodec::encode_header(FrameType::Headers, flags, 42, 1234);
        let (raw, decoded_flags, stream_id, len) = FrameCodec::decode_header(&header);

        assert_eq!(raw, FrameType::Headers.as_u8());
        assert_eq!(decoded_flags, flags);
        assert_eq!(stream_id, 42);
        assert_eq!(len, 1234);
    }

    #[test]
    fn test_decode_header_ignores_reserved_bit() {
        let mut header = FrameCodec::encode_header(FrameType::Data, FrameFlags::empty(), 7, 0);
        header[5] |= 0x80;
        let (_, _, stream_id, _) = FrameCodec::decode_header(&header);
        assert_eq!(stream_id, 7);
    }

    #[test]
    fn test_encode_data_frame() {
        let frame = DataFrame::new(1, Bytes::from("Hello"), true);
        let encoded = FrameCodec::encode_data_frame(&frame);

        assert_eq!(encoded[0..3], [0, 0, 5]);
        assert_eq!(encoded[3], FrameType::Data.as_u8());
        assert_eq!(encoded[4], FrameFlags::END_STREAM);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 1]);
        assert_eq!(&encoded[9..], b"Hello");
    }

    #[test]
    fn test_padded_data_frame_decodes_to_payload() {
        let frame = DataFrame::new(3, Bytes::from("Hi"), false).with_padding(10);
        let encoded = FrameCodec::encode_data_frame(&frame);
        assert_eq!(encoded[0..3], [0, 0, 13]);

        let decoded = FrameCodec::decode_data(&parse(&encoded)).unwrap();
        assert_eq!(decoded.data, Bytes::from("Hi"));
        assert_eq!(decoded.padding, Some(10));
        assert_eq!(decoded.frame_size(), 13);
        assert!(!decoded.end_stream);
    }

    #[test]
    fn test_padding_longer_than_payload_is_rejected() {
        let frame = Frame::new(
            FrameType::Data,
            FrameFlags::from_u8(FrameFlags::PADDED),
            1,
            Bytes::from_static(&[5, b'a', b'b']),
        );
        assert!(matches!(FrameCodec::decode_data(&frame), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_headers_with_priority_and_padding() {
        let frame = HeadersFrame::new(5, Bytes::from_static(b"\x82\x84"), true, true)
            .with_priority(PrioritySpec {
                stream_dependency: 3,
                exclusive: true,
                weight: 15,
            })
            .with_padding(4);
        let decoded = FrameCodec::decode_headers(&parse(&FrameCodec::encode_headers_frame(&frame)))
            .unwrap();

        assert_eq!(decoded.header_block, Bytes::from_static(b"\x82\x84"));
        assert_eq!(decoded.priority, frame.priority);
        assert!(decoded.end_stream);
        assert!(decoded.end_headers);
    }

    #[test]
    fn test_header_block_split_into_continuations() {
        let block = vec![0xAB; 40];
        let encoded = FrameCodec::encode_header_block(1, &block, true, 16);

        // 16 + 16 + 8 bytes of fragments, three frame headers
        assert_eq!(encoded.len(), 40 + 3 * FRAME_HEADER_SIZE);

        let first = parse(&encoded.slice(0..FRAME_HEADER_SIZE + 16));
        assert_eq!(first.frame_type, FrameType::Headers);
        assert!(first.flags.is_end_stream());
        assert!(!first.flags.is_end_headers());

        let last = parse(&encoded.slice(2 * (FRAME_HEADER_SIZE + 16)..));
        assert_eq!(last.frame_type, FrameType::Continuation);
        assert!(last.flags.is_end_headers());
        assert_eq!(last.payload_len(), 8);
    }

    #[test]
    fn test_small_header_block_is_single_frame() {
        let encoded = FrameCodec::encode_header_block(3, b"\x88", false, 16384);
        let frame = parse(&encoded);
        assert_eq!(frame.frame_type, FrameType::Headers);
        assert!(frame.flags.is_end_headers());
        assert!(!frame.flags.is_end_stream());
    }

    #[test]
    fn test_settings_encode_decode() {
        let settings = SettingsBuilder::new()
            .header_table_size(8192)
            .enable_push(false)
            .initial_window_size(65535)
            .build()
            .unwrap();

        let encoded = FrameCodec::encode_settings_frame(&SettingsFrame::new(settings.clone()));
        assert_eq!(encoded[0..3], [0, 0, 18]);
        assert_eq!(&encoded[5..9], &[0, 0, 0, 0]);

        let decoded = FrameCodec::decode_settings(&parse(&encoded)).unwrap();
        assert!(!decoded.ack);
        assert_eq!(decoded.settings, settings);
    }

    #[test]
    fn test_settings_ack_and_bad_length() {
        let ack = FrameCodec::encode_settings_frame(&SettingsFrame::ack());
        assert_eq!(ack[0..3], [0, 0, 0]);
        assert_eq!(ack[4], FrameFlags::ACK);
        assert!(FrameCodec::decode_settings(&parse(&ack)).unwrap().ack);

        let bad = Frame::new(FrameType::Settings, FrameFlags::empty(), 0, Bytes::from_static(&[0; 5]));
        assert!(matches!(FrameCodec::decode_settings(&bad), Err(Error::FrameSize(_))));
    }

    #[test]
    fn test_settings_unknown_parameter_ignored() {
        let payload = Bytes::from_static(&[0x00, 0x08, 0, 0, 0, 1, 0x00, 0x03, 0, 0, 0, 7]);
        let frame = Frame::new(FrameType::Settings, FrameFlags::empty(), 0, payload);
        let decoded = FrameCodec::decode_settings(&frame).unwrap();
        assert_eq!(decoded.settings.max_concurrent_streams, Some(7));
    }

    #[test]
    fn test_ping_round_trip() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8];
        let encoded = FrameCodec::encode_ping_frame(&PingFrame::ack(data));
        let decoded = FrameCodec::decode_ping(&parse(&encoded)).unwrap();
        assert!(decoded.ack);
        assert_eq!(decoded.data, data);
    }

    #[test]
    fn test_window_update_zero_increment() {
        let encoded = FrameCodec::encode_window_update_frame(&WindowUpdateFrame::new(42, 1000));
        let decoded = FrameCodec::decode_window_update(&parse(&encoded)).unwrap();
        assert_eq!(decoded.stream_id, 42);
        assert_eq!(decoded.size_increment, 1000);

        let zero = Frame::new(FrameType::WindowUpdate, FrameFlags::empty(), 0, Bytes::from_static(&[0; 4]));
        assert!(FrameCodec::decode_window_update(&zero).is_err());
    }

    #[test]
    fn test_goaway_and_rst_stream() {
        let goaway = GoawayFrame::new(7, ErrorCode::NoError, Bytes::from("bye"));
        let decoded = FrameCodec::decode_goaway(&parse(&FrameCodec::encode_goaway_frame(&goaway))).unwrap();
        assert_eq!(decoded.last_stream_id, 7);
        assert_eq!(decoded.error_code, ErrorCode::NoError);
        assert_eq!(decoded.debug_data, Bytes::from("bye"));

        let rst = RstStreamFrame {
            stream_id: 3,
            error_code: ErrorCode::Cancel,
        };
        let decoded = FrameCodec::decode_rst_stream(&parse(&FrameCodec::encode_rst_stream_frame(&rst))).unwrap();
        assert_eq!(decoded.stream_id, 3);
        assert_eq!(decoded.error_code, ErrorCode::Cancel);
    }

    #[test]
    fn test_read_frame_skips_extension_types() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut writer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (reader, _) = listener.accept().unwrap();

        let mut unknown = FrameCodec::encode_header(FrameType::Data, FrameFlags::empty(), 0, 2).to_vec();
        unknown[3] = 0xfa;
        unknown.extend_from_slice(b"zz");
        writer.write_all(&unknown).unwrap();
        writer
            .write_all(&FrameCodec::encode_ping_frame(&PingFrame::new([9; 8])))
            .unwrap();

        let mut session = HttpSession::new(PlainSessionOps::new(reader));
        let frame = FrameCodec::read_frame(&mut session, 16384).unwrap();
        assert_eq!(frame.frame_type, FrameType::Ping);
        assert_eq!(&frame.payload[..], &[9; 8]);
    }

    #[test]
    fn test_read_frame_enforces_size_limit() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut writer = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (reader, _) = listener.accept().unwrap();

        let frame = DataFrame::new(1, Bytes::from(vec![0u8; 64]), false);
        writer.write_all(&FrameCodec::encode_data_frame(&frame)).unwrap();

        let mut session = HttpSession::new(PlainSessionOps::new(reader));
        let err = FrameCodec::read_frame(&mut session, 32).unwrap_err();
        assert!(matches!(err, Error::FrameSize(_)));
    }
}
