//! Byte-level reader and writer for PostgreSQL wire frames.
//!
//! Integers are big-endian, strings are null-terminated. Backend frames are
//! `[tag][4-byte length][body]` where the length counts itself and the body
//! but not the tag.

use crate::error::{HoneyError, HoneyResult};

/// Cursor over an inbound frame. Every read either returns the requested
/// bytes or a [`HoneyError::Format`]; nothing reads past the span.
#[derive(Debug, Clone)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Take the next `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> HoneyResult<&'a [u8]> {
        self.take("read_bytes", n)
    }

    pub fn read_byte(&mut self) -> HoneyResult<u8> {
        Ok(self.take("read_byte", 1)?[0])
    }

    /// Signed 32-bit big-endian integer.
    pub fn read_i32(&mut self) -> HoneyResult<i32> {
        let b = self.take("read_i32", 4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Unsigned 16-bit big-endian integer.
    pub fn read_u16(&mut self) -> HoneyResult<u16> {
        let b = self.take("read_u16", 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Raw bytes up to (not including) the next null byte; the cursor moves
    /// past the terminator.
    pub fn read_cstr(&mut self) -> HoneyResult<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| HoneyError::format("read_string", "missing null terminator"))?;
        self.pos += end + 1;
        Ok(&rest[..end])
    }

    /// Null-terminated string. Invalid UTF-8 is replaced rather than rejected
    /// since the peer is untrusted and we only ever log these values.
    pub fn read_string(&mut self) -> HoneyResult<String> {
        Ok(String::from_utf8_lossy(self.read_cstr()?).into_owned())
    }

    fn take(&mut self, op: &'static str, n: usize) -> HoneyResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(HoneyError::format(
                op,
                format!("need {} bytes, {} remaining", n, self.remaining()),
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
}

/// Position of an open frame's length placeholder, returned by
/// [`FrameWriter::begin_frame`] and consumed by [`FrameWriter::end_frame`].
#[derive(Debug)]
#[must_use = "an open frame must be closed with end_frame"]
pub struct FrameMark {
    len_pos: usize,
}

/// Append-only builder for outbound frames.
#[derive(Debug, Default, Clone)]
pub struct FrameWriter {
    buf: Vec<u8>,
}

impl FrameWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write_byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_i32(&mut self, n: i32) {
        self.buf.extend_from_slice(&n.to_be_bytes());
    }

    pub fn write_i16(&mut self, n: i16) {
        self.buf.extend_from_slice(&n.to_be_bytes());
    }

    /// Write `s` followed by a null terminator.
    pub fn write_string(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Start a frame: writes `tag` and four placeholder length bytes.
    pub fn begin_frame(&mut self, tag: u8) -> FrameMark {
        self.buf.push(tag);
        let len_pos = self.buf.len();
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
        FrameMark { len_pos }
    }

    /// Close a frame by patching its length: every byte from the length
    /// field through the current end of the buffer.
    pub fn end_frame(&mut self, mark: FrameMark) {
        let len = (self.buf.len() - mark.len_pos) as u32;
        self.buf[mark.len_pos..mark.len_pos + 4].copy_from_slice(&len.to_be_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
