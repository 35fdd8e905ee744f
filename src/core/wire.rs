//! # Wire Primitives
//!
//! Appenders and parsers for the primitive field types of the PostgreSQL
//! protocol: fixed-width big-endian integers, NUL-terminated strings and
//! length-prefixed byte strings.
//!
//! ## Frame Layout
//! ```text
//! [Tag(1, optional)] [Length(4, includes itself)] [Body(Length - 4)]
//! ```
//!
//! The startup, SSL and cancel packets are untagged; every other frame carries
//! a one-byte ASCII tag that is not counted in the length.

use bytes::{BufMut, BytesMut};

use crate::error::{constants, ProtocolError, Result};

/// Largest count the protocol's 16-bit count fields accept (treated as unsigned by the server).
pub const MAX_COUNT: usize = u16::MAX as usize;

/// Append a NUL-terminated string.
pub fn put_cstr(buf: &mut BytesMut, s: &str) -> Result<()> {
    put_cstr_bytes(buf, s.as_bytes())
}

/// Append raw bytes followed by a NUL terminator.
pub fn put_cstr_bytes(buf: &mut BytesMut, s: &[u8]) -> Result<()> {
    if s.contains(&0) {
        return Err(ProtocolError::protocol(constants::ERR_NUL_IN_STRING));
    }
    buf.put_slice(s);
    buf.put_u8(0);
    Ok(())
}

/// Append an `int32` length followed by the bytes, or `-1` for null.
pub fn put_len_prefixed(buf: &mut BytesMut, value: Option<&[u8]>) -> Result<()> {
    match value {
        None => buf.put_i32(-1),
        Some(bytes) => {
            let len = i32::try_from(bytes.len())
                .map_err(|_| ProtocolError::protocol(constants::ERR_LENGTH_OVERFLOW))?;
            buf.put_i32(len);
            buf.put_slice(bytes);
        }
    }
    Ok(())
}

/// Append a 16-bit count, rejecting values the field cannot hold.
pub fn put_count(buf: &mut BytesMut, count: usize) -> Result<()> {
    if count > MAX_COUNT {
        return Err(ProtocolError::protocol(constants::ERR_COUNT_OVERFLOW));
    }
    buf.put_u16(count as u16);
    Ok(())
}

/// Append an Execute row limit. The field is a signed int32 on which any
/// value `<= 0` means "no limit", so limits past `i32::MAX` are capped.
pub fn put_row_limit(buf: &mut BytesMut, max_rows: u32) {
    buf.put_i32(i32::try_from(max_rows).unwrap_or(i32::MAX));
}

/// Append a complete frame: optional tag, self-inclusive length, then the body
/// written by `body`.
///
/// On error the buffer is restored to its previous length, so a rejected
/// message never leaves partial bytes queued for the socket.
pub fn put_frame<F>(buf: &mut BytesMut, tag: Option<u8>, body: F) -> Result<()>
where
    F: FnOnce(&mut BytesMut) -> Result<()>,
{
    let start = buf.len();
    if let Some(tag) = tag {
        buf.put_u8(tag);
    }
    let len_pos = buf.len();
    buf.put_i32(0);

    if let Err(e) = body(buf) {
        buf.truncate(start);
        return Err(e);
    }

    let len = match i32::try_from(buf.len() - len_pos) {
        Ok(len) => len,
        Err(_) => {
            buf.truncate(start);
            return Err(ProtocolError::protocol(constants::ERR_LENGTH_OVERFLOW));
        }
    };
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Cursor over a message body.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Offset of the cursor from the start of the body.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(ProtocolError::protocol(constants::ERR_UNEXPECTED_EOF));
        }
        let out = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Advance past `len` bytes without looking at them.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    /// Read a NUL-terminated byte string, excluding the terminator.
    pub fn read_cstr_bytes(&mut self) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ProtocolError::protocol(constants::ERR_UNTERMINATED_STRING))?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    /// Read a NUL-terminated UTF-8 string.
    pub fn read_cstr(&mut self) -> Result<&'a str> {
        let bytes = self.read_cstr_bytes()?;
        std::str::from_utf8(bytes)
            .map_err(|e| ProtocolError::protocol(format!("Invalid UTF-8 in string field: {e}")))
    }

    /// Read an `int32` length followed by that many bytes; `-1` yields `None`.
    pub fn read_len_prefixed(&mut self) -> Result<Option<&'a [u8]>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        self.read_bytes(len as usize).map(Some)
    }

    /// Consume and return everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    /// Fail if any bytes are left over.
    pub fn finish(&self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::protocol(constants::ERR_TRAILING_BYTES))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn frame_length_includes_itself_but_not_tag() {
        let mut buf = BytesMut::new();
        put_frame(&mut buf, Some(b'Q'), |b| put_cstr(b, "SELECT 1")).unwrap();
        assert_eq!(buf[0], b'Q');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, 4 + "SELECT 1".len() + 1);
        assert_eq!(buf.len(), 1 + len as usize);
    }

    #[test]
    fn untagged_frame() {
        let mut buf = BytesMut::new();
        put_frame(&mut buf, None, |b| {
            b.put_i32(80877103);
            Ok(())
        })
        .unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 8, 0x04, 0xD2, 0x16, 0x2F]);
    }

    #[test]
    fn rejected_body_leaves_buffer_untouched() {
        let mut buf = BytesMut::new();
        put_frame(&mut buf, Some(b'S'), |_| Ok(())).unwrap();
        let before = buf.len();
        let err = put_frame(&mut buf, Some(b'P'), |b| put_count(b, MAX_COUNT + 1));
        assert!(err.is_err());
        assert_eq!(buf.len(), before);
    }

    #[test]
    fn cstr_rejects_embedded_nul() {
        let mut buf = BytesMut::new();
        assert!(put_cstr(&mut buf, "a\0b").is_err());
    }

    #[test]
    fn reader_round_trip() {
        let mut buf = BytesMut::new();
        buf.put_i16(-2);
        buf.put_i32(7);
        buf.put_i64(-9);
        put_cstr(&mut buf, "name").unwrap();
        put_len_prefixed(&mut buf, Some(b"abc")).unwrap();
        put_len_prefixed(&mut buf, None).unwrap();

        let mut r = WireReader::new(&buf);
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_i32().unwrap(), 7);
        assert_eq!(r.read_i64().unwrap(), -9);
        assert_eq!(r.read_cstr().unwrap(), "name");
        assert_eq!(r.read_len_prefixed().unwrap(), Some(&b"abc"[..]));
        assert_eq!(r.read_len_prefixed().unwrap(), None);
        r.finish().unwrap();
    }

    #[test]
    fn reader_detects_truncation() {
        let mut r = WireReader::new(&[0, 0, 0]);
        assert!(r.read_i32().is_err());
        let mut r = WireReader::new(b"no terminator");
        assert!(r.read_cstr().is_err());
    }
}
