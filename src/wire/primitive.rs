//! Writable-style primitives
//!
//! Fixed-width big-endian integers, 2-byte length-prefixed strings and
//! blobs, and the zero-compressed variable-length integers used by the
//! registration sub-record and block-key records.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Longest value a 2-byte length prefix can describe
pub const MAX_SHORT_LEN: usize = u16::MAX as usize;

/// Checked reader over one decoded frame.
///
/// Every read fails with [`Error::MalformedPacket`] instead of panicking
/// when the input is truncated.
#[derive(Debug, Clone)]
pub struct WireReader {
    buf: Bytes,
}

impl WireReader {
    /// Create a reader over `buf`
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// True when everything has been consumed
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::malformed(format!(
                "truncated {}: need {} bytes, have {}",
                what,
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn u8(&mut self, what: &str) -> Result<u8> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    pub fn i8(&mut self, what: &str) -> Result<i8> {
        self.need(1, what)?;
        Ok(self.buf.get_i8())
    }

    pub fn u16(&mut self, what: &str) -> Result<u16> {
        self.need(2, what)?;
        Ok(self.buf.get_u16())
    }

    pub fn u32(&mut self, what: &str) -> Result<u32> {
        self.need(4, what)?;
        Ok(self.buf.get_u32())
    }

    pub fn i32(&mut self, what: &str) -> Result<i32> {
        self.need(4, what)?;
        Ok(self.buf.get_i32())
    }

    pub fn u64(&mut self, what: &str) -> Result<u64> {
        self.need(8, what)?;
        Ok(self.buf.get_u64())
    }

    pub fn i64(&mut self, what: &str) -> Result<i64> {
        self.need(8, what)?;
        Ok(self.buf.get_i64())
    }

    pub fn bool(&mut self, what: &str) -> Result<bool> {
        Ok(self.u8(what)? != 0)
    }

    /// Read `n` raw bytes without copying
    pub fn bytes(&mut self, n: usize, what: &str) -> Result<Bytes> {
        self.need(n, what)?;
        Ok(self.buf.split_to(n))
    }

    /// 2-byte length-prefixed byte blob
    pub fn blob(&mut self, what: &str) -> Result<Bytes> {
        let len = self.u16(what)? as usize;
        self.bytes(len, what)
    }

    /// 2-byte length-prefixed UTF-8 string
    pub fn string(&mut self, what: &str) -> Result<String> {
        let raw = self.blob(what)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| Error::malformed(format!("{} is not valid UTF-8", what)))
    }

    /// Zero-compressed variable-length long
    pub fn vlong(&mut self, what: &str) -> Result<i64> {
        let first = self.i8(what)?;
        let len = vint_size(first);
        if len == 1 {
            return Ok(first as i64);
        }
        let mut value: i64 = 0;
        for _ in 0..len - 1 {
            value = (value << 8) | (self.u8(what)? as i64);
        }
        if is_negative_vint(first) {
            Ok(!value)
        } else {
            Ok(value)
        }
    }

    /// Zero-compressed variable-length int
    pub fn vint(&mut self, what: &str) -> Result<i32> {
        let value = self.vlong(what)?;
        i32::try_from(value)
            .map_err(|_| Error::malformed(format!("{} out of int range: {}", what, value)))
    }

    /// Take everything that is left
    pub fn rest(&mut self) -> Bytes {
        let len = self.buf.remaining();
        self.buf.split_to(len)
    }
}

/// Encoded size of a vlong given its first byte
fn vint_size(first: i8) -> usize {
    if first >= -112 {
        1
    } else if first < -120 {
        (-119 - first as i32) as usize
    } else {
        (-111 - first as i32) as usize
    }
}

fn is_negative_vint(first: i8) -> bool {
    first < -120 || (-112..0).contains(&first)
}

/// Writer producing Writable-style primitives.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.put_u32(v);
    }

    pub fn i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn i64(&mut self, v: i64) {
        self.buf.put_i64(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    pub fn raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// 2-byte length-prefixed byte blob
    pub fn blob(&mut self, bytes: &[u8], what: &str) -> Result<()> {
        if bytes.len() > MAX_SHORT_LEN {
            return Err(Error::malformed(format!(
                "{} is {} bytes, longer than a short length prefix allows",
                what,
                bytes.len()
            )));
        }
        self.buf.put_u16(bytes.len() as u16);
        self.buf.put_slice(bytes);
        Ok(())
    }

    /// 2-byte length-prefixed UTF-8 string
    pub fn string(&mut self, s: &str, what: &str) -> Result<()> {
        self.blob(s.as_bytes(), what)
    }

    /// Zero-compressed variable-length long
    pub fn vlong(&mut self, value: i64) {
        if (-112..=127).contains(&value) {
            self.buf.put_i8(value as i8);
            return;
        }
        let mut marker: i32 = -112;
        let mut magnitude = value;
        if magnitude < 0 {
            magnitude = !magnitude;
            marker = -120;
        }
        let mut tmp = magnitude;
        while tmp != 0 {
            tmp >>= 8;
            marker -= 1;
        }
        self.buf.put_i8(marker as i8);
        let len = if marker < -120 {
            -(marker + 120)
        } else {
            -(marker + 112)
        };
        for idx in (0..len).rev() {
            let shift = idx * 8;
            self.buf.put_u8(((magnitude >> shift) & 0xff) as u8);
        }
    }

    /// Zero-compressed variable-length int
    pub fn vint(&mut self, value: i32) {
        self.vlong(value as i64);
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    /// Prefix the written body with its 4-byte big-endian length
    pub fn into_frame(self) -> Result<Bytes> {
        let len = u32::try_from(self.buf.len())
            .map_err(|_| Error::Internal("frame body exceeds u32 length".to_string()))?;
        let mut frame = BytesMut::with_capacity(4 + self.buf.len());
        frame.put_u32(len);
        frame.put_slice(&self.buf);
        Ok(frame.freeze())
    }
}

// =============================================================================
// Tests
// =============================================================================
