//! Frame codec for `tokio_util::codec::Framed`.
//!
//! Decoding is frame-bounded: a frame is yielded only once its tag, length and
//! exactly `length - 4` body bytes are available. Encoding renders
//! [`FrontendMessage`]s into the write buffer; `Framed` only touches the socket
//! on flush, so every message of one logical operation goes out together.
//!
//! In skip mode, `DataRow` and `CopyData` frames are consumed using only their
//! length header. Their bodies are discarded as they arrive and never buffered.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::{constants, ProtocolError};
use crate::protocol::backend::tags;
use crate::protocol::frontend::FrontendMessage;

/// Tag byte plus the length field.
pub const HEADER_SIZE: usize = 5;

/// Default ceiling on a single backend frame (1 GiB, the server's own field limit).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024 * 1024;

/// One frame read from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendFrame {
    /// A complete frame with its body.
    Full { tag: u8, body: Bytes },
    /// A row-data frame whose body was discarded unread.
    Skipped { tag: u8, len: usize },
}

impl BackendFrame {
    pub fn tag(&self) -> u8 {
        match self {
            BackendFrame::Full { tag, .. } | BackendFrame::Skipped { tag, .. } => *tag,
        }
    }

    /// Size on the wire, header included.
    pub fn wire_len(&self) -> usize {
        HEADER_SIZE
            + match self {
                BackendFrame::Full { body, .. } => body.len(),
                BackendFrame::Skipped { len, .. } => *len,
            }
    }
}

#[derive(Debug, Clone, Copy)]
struct Discard {
    tag: u8,
    remaining: usize,
    total: usize,
}

/// Codec for the PostgreSQL v3 message stream.
#[derive(Debug, Clone)]
pub struct PgCodec {
    max_frame_size: usize,
    skip_rows: bool,
    discarding: Option<Discard>,
}

impl Default for PgCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl PgCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            skip_rows: false,
            discarding: None,
        }
    }

    /// Enable or disable skip mode for row-data frames.
    pub fn set_skip_rows(&mut self, skip: bool) {
        self.skip_rows = skip;
    }

    pub fn skip_rows(&self) -> bool {
        self.skip_rows
    }

    fn is_row_data(tag: u8) -> bool {
        tag == tags::DATA_ROW || tag == tags::COPY_DATA
    }

    fn drain_discard(&mut self, src: &mut BytesMut) -> Option<BackendFrame> {
        let discard = self.discarding.as_mut()?;
        let n = discard.remaining.min(src.len());
        src.advance(n);
        discard.remaining -= n;
        if discard.remaining > 0 {
            return None;
        }
        let done = self.discarding.take()?;
        Some(BackendFrame::Skipped {
            tag: done.tag,
            len: done.total,
        })
    }
}

impl Decoder for PgCodec {
    type Item = BackendFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.discarding.is_some() {
            return Ok(self.drain_discard(src));
        }

        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let tag = src[0];
        let len = i32::from_be_bytes([src[1], src[2], src[3], src[4]]);
        if len < 4 {
            return Err(ProtocolError::protocol(constants::ERR_FRAME_TOO_SHORT));
        }
        let body_len = len as usize - 4;
        if body_len > self.max_frame_size {
            return Err(ProtocolError::protocol(format!(
                "Frame '{}' of {body_len} bytes exceeds the {} byte limit",
                tag as char, self.max_frame_size
            )));
        }

        if self.skip_rows && Self::is_row_data(tag) {
            src.advance(HEADER_SIZE);
            trace!(tag = %(tag as char), body_len, "Discarding frame body");
            self.discarding = Some(Discard {
                tag,
                remaining: body_len,
                total: body_len,
            });
            return Ok(self.drain_discard(src));
        }

        if src.len() < HEADER_SIZE + body_len {
            src.reserve(HEADER_SIZE + body_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let body = src.split_to(body_len).freeze();
        Ok(Some(BackendFrame::Full { tag, body }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() && self.discarding.is_none() => Ok(None),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }
}

impl Encoder<FrontendMessage> for PgCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: FrontendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn waits_for_complete_body() {
        let mut codec = PgCodec::default();
        let bytes = frame(b'C', b"SELECT 1\0");
        let mut buf = BytesMut::from(&bytes[..7]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put_slice(&bytes[7..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            decoded,
            BackendFrame::Full {
                tag: b'C',
                body: Bytes::from_static(b"SELECT 1\0")
            }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn rejects_short_length() {
        let mut codec = PgCodec::default();
        let mut buf = BytesMut::from(&[b'Z', 0, 0, 0, 3][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::Protocol(_))
        ));
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut codec = PgCodec::new(16);
        let mut buf = BytesMut::from(&frame(b'D', &[0u8; 32])[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn skip_mode_discards_rows_incrementally() {
        let mut codec = PgCodec::default();
        codec.set_skip_rows(true);

        let row = frame(b'D', &[7u8; 100]);
        let mut buf = BytesMut::from(&row[..40]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        // Header and partial body were consumed, nothing buffered.
        assert!(buf.is_empty());

        buf.put_slice(&row[40..]);
        buf.put_slice(&frame(b'C', b"SELECT 2\0"));
        assert_eq!(
            codec.decode(&mut buf).unwrap().unwrap(),
            BackendFrame::Skipped { tag: b'D', len: 100 }
        );
        // Non-row frames are still delivered whole.
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().tag(), b'C');
    }
}
