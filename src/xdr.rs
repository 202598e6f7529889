//! XDR (RFC 4506) primitive codec.
//!
//! Canonical big-endian, 4-byte-aligned encode/decode of the primitive XDR
//! types. `Decoder`/`Encoder` carry all the codec state so record types
//! express their wire layout as a sequence of calls against one of the two,
//! instead of threading a parser object through each field by hand.

use crate::error::{Error, Result};

/// Default cap on any single variable-length read (vector, opaque, string).
/// Matches the fragment/message cap used by the record-marking framer.
pub const MAX_VEC_LEN: u32 = 16 * 1024 * 1024;

pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Decoder { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::xdr(format!(
                "short read: need {n} bytes, have {}",
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    pub fn u64(&mut self) -> Result<u64> {
        let hi = self.u32()? as u64;
        let lo = self.u32()? as u64;
        Ok((hi << 32) | lo)
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(self.u64()? as i64)
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.u32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::xdr(format!("invalid bool value {other}"))),
        }
    }

    /// Consumes the padding bytes that round `len` up to a 4-byte boundary.
    fn padding(&mut self, len: usize) -> Result<()> {
        let pad = (4 - (len % 4)) % 4;
        if pad > 0 {
            self.take(pad)?;
        }
        Ok(())
    }

    /// Reads a length-prefixed opaque byte string, capped at `max`.
    pub fn opaque(&mut self, max: u32) -> Result<Vec<u8>> {
        let len = self.u32()?;
        if len > max {
            return Err(Error::xdr(format!("opaque length {len} exceeds cap {max}")));
        }
        let bytes = self.take(len as usize)?.to_vec();
        self.padding(len as usize)?;
        Ok(bytes)
    }

    /// Reads a fixed-size opaque byte string (no length prefix, still
    /// padded to a 4-byte boundary).
    pub fn fixed_opaque(&mut self, len: usize) -> Result<Vec<u8>> {
        let bytes = self.take(len)?.to_vec();
        self.padding(len)?;
        Ok(bytes)
    }

    pub fn string(&mut self, max: u32) -> Result<String> {
        let bytes = self.opaque(max)?;
        String::from_utf8(bytes).map_err(|e| Error::xdr(format!("invalid utf-8: {e}")))
    }

    /// Reads a `count`-element vector of `u32`s, capped at `max` elements.
    pub fn bitmap(&mut self, max: u32) -> Result<Vec<u32>> {
        let count = self.u32()?;
        if count > max {
            return Err(Error::xdr(format!("bitmap word count {count} exceeds cap {max}")));
        }
        (0..count).map(|_| self.u32()).collect()
    }

    pub fn option<T>(&mut self, read: impl FnOnce(&mut Self) -> Result<T>) -> Result<Option<T>> {
        if self.bool()? {
            Ok(Some(read(self)?))
        } else {
            Ok(None)
        }
    }

    /// Reads a variable-length array of elements decoded by `read`, capped
    /// at `max` elements.
    pub fn vector<T>(
        &mut self,
        max: u32,
        mut read: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let count = self.u32()?;
        if count > max {
            return Err(Error::xdr(format!("vector length {count} exceeds cap {max}")));
        }
        (0..count).map(|_| read(self)).collect()
    }
}

pub struct Encoder {
    buf: Vec<u8>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Encoder { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.u32(v as u32);
    }

    pub fn u64(&mut self, v: u64) {
        self.u32((v >> 32) as u32);
        self.u32(v as u32);
    }

    pub fn i64(&mut self, v: i64) {
        self.u64(v as u64);
    }

    pub fn bool(&mut self, v: bool) {
        self.u32(if v { 1 } else { 0 });
    }

    fn padding(&mut self, len: usize) {
        let pad = (4 - (len % 4)) % 4;
        self.buf.extend(std::iter::repeat(0u8).take(pad));
    }

    pub fn opaque(&mut self, bytes: &[u8]) {
        self.u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
        self.padding(bytes.len());
    }

    /// Writes a fixed-size opaque string without a length prefix, still
    /// padded to a 4-byte boundary.
    pub fn fixed_opaque(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        self.padding(bytes.len());
    }

    pub fn string(&mut self, s: &str) {
        self.opaque(s.as_bytes());
    }

    pub fn bitmap(&mut self, words: &[u32]) {
        self.u32(words.len() as u32);
        for w in words {
            self.u32(*w);
        }
    }

    pub fn option<T>(&mut self, value: &Option<T>, write: impl FnOnce(&mut Self, &T)) {
        match value {
            Some(v) => {
                self.bool(true);
                write(self, v);
            }
            None => self.bool(false),
        }
    }

    /// Appends bytes that are already a complete, correctly padded XDR
    /// encoding (e.g. a sub-result produced by a nested `Encoder`), with no
    /// further length prefix or padding of its own.
    pub fn raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn vector<T>(&mut self, items: &[T], mut write: impl FnMut(&mut Self, &T)) {
        self.u32(items.len() as u32);
        for item in items {
            write(self, item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_round_trip() {
        let mut enc = Encoder::new();
        enc.u32(0xdead_beef);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.u32().unwrap(), 0xdead_beef);
        assert!(dec.is_empty());
    }

    #[test]
    fn u64_round_trip() {
        let mut enc = Encoder::new();
        enc.u64(0x0102_0304_0506_0708);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.u64().unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn opaque_round_trip_with_padding() {
        let mut enc = Encoder::new();
        enc.opaque(b"abc");
        let bytes = enc.into_bytes();
        // 4-byte length + 3 data bytes + 1 pad byte = 8
        assert_eq!(bytes.len(), 8);
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.opaque(MAX_VEC_LEN).unwrap(), b"abc");
        assert!(dec.is_empty());
    }

    #[test]
    fn opaque_over_cap_is_rejected() {
        let mut enc = Encoder::new();
        enc.opaque(&[0u8; 16]);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert!(dec.opaque(8).is_err());
    }

    #[test]
    fn string_round_trip() {
        let mut enc = Encoder::new();
        enc.string("hello");
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.string(MAX_VEC_LEN).unwrap(), "hello");
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let mut enc = Encoder::new();
        enc.opaque(&[0xff, 0xfe, 0xfd]);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert!(dec.string(MAX_VEC_LEN).is_err());
    }

    #[test]
    fn option_round_trip() {
        let mut enc = Encoder::new();
        enc.option(&Some(7u32), |e, v| e.u32(*v));
        enc.option(&None::<u32>, |e, v| e.u32(*v));
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.option(|d| d.u32()).unwrap(), Some(7));
        assert_eq!(dec.option(|d| d.u32()).unwrap(), None);
    }

    #[test]
    fn vector_round_trip() {
        let mut enc = Encoder::new();
        enc.vector(&[1u32, 2, 3], |e, v| e.u32(*v));
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.vector(16, |d| d.u32()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn short_buffer_errors() {
        let mut dec = Decoder::new(&[0, 0]);
        assert!(dec.u32().is_err());
    }
}
