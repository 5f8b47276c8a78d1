//! XDR (RFC 4506) encoding
//!
//! Everything travels in big-endian 4-byte units. Opaque data and strings
//! carry a length word and are zero padded to the next unit; fixed-size
//! opaques (cookie verifiers) have no length word.

use alloc::vec::Vec;

use crate::error::XdrError;

/// XDR unit size
pub const UNIT: usize = 4;

/// Longest file name accepted in either direction
pub const MAX_NAME_LEN: usize = 255;

/// Bytes of padding after `len` bytes of opaque data
pub const fn padding(len: usize) -> usize {
    (UNIT - len % UNIT) % UNIT
}

/// Growable XDR writer
#[derive(Debug, Default, Clone)]
pub struct XdrEncoder {
    buf: Vec<u8>,
}

impl XdrEncoder {
    pub fn new() -> Self {
        XdrEncoder { buf: Vec::with_capacity(128) }
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn put_bool(&mut self, v: bool) -> &mut Self {
        self.put_u32(v as u32)
    }

    /// Fixed-length opaque, padded, no length word
    pub fn put_fixed(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self.buf.resize(self.buf.len() + padding(data.len()), 0);
        self
    }

    /// Variable-length opaque: length word, data, padding
    pub fn put_opaque(&mut self, data: &[u8]) -> &mut Self {
        self.put_u32(data.len() as u32);
        self.put_fixed(data)
    }

    pub fn put_str(&mut self, s: &str) -> &mut Self {
        self.put_opaque(s.as_bytes())
    }

    /// File name component; rejected above 255 bytes
    pub fn put_filename(&mut self, name: &str) -> Result<&mut Self, XdrError> {
        if name.len() > MAX_NAME_LEN {
            return Err(XdrError::TooLong {
                len: name.len() as u32,
                max: MAX_NAME_LEN as u32,
            });
        }
        Ok(self.put_str(name))
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked XDR reader over a received datagram
#[derive(Debug, Clone)]
pub struct XdrDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> XdrDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        XdrDecoder { buf, pos: 0 }
    }

    /// Resume decoding `buf` at byte `pos`
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        XdrDecoder {
            buf,
            pos: pos.min(buf.len()),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], XdrError> {
        if n > self.remaining() {
            return Err(XdrError::PrematureEnd {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn get_u32(&mut self) -> Result<u32, XdrError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, XdrError> {
        let hi = self.get_u32()? as u64;
        let lo = self.get_u32()? as u64;
        Ok(hi << 32 | lo)
    }

    pub fn get_bool(&mut self) -> Result<bool, XdrError> {
        match self.get_u32()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(XdrError::BadBool(v)),
        }
    }

    /// Fixed-length opaque of `len` bytes plus padding
    pub fn get_fixed(&mut self, len: usize) -> Result<&'a [u8], XdrError> {
        let padded = len.saturating_add(padding(len));
        let data = self.take(padded)?;
        Ok(&data[..len])
    }

    /// Variable-length opaque of at most `max` bytes
    pub fn get_opaque(&mut self, max: usize) -> Result<&'a [u8], XdrError> {
        let len = self.get_u32()?;
        if len as usize > max {
            return Err(XdrError::TooLong { len, max: max as u32 });
        }
        self.get_fixed(len as usize)
    }

    /// File name in a directory listing
    pub fn get_filename(&mut self) -> Result<&'a [u8], XdrError> {
        self.get_opaque(MAX_NAME_LEN)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), XdrError> {
        self.take(n).map(|_| ())
    }
}
