//! Byte views and primitive decoders.
//!
//! Every decoder in the crate works on a [`ByteView`]: a cheap, cloneable
//! window (file offset + length) into the one shared file buffer. Views never
//! copy bytes; only text rendering allocates.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::error::{MachoError, Result};

/// Absolute byte range in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ByteRange {
    /// First byte, as a file offset.
    pub start: u64,
    /// Number of bytes covered.
    pub len: u64,
}

impl ByteRange {
    /// Create a range from a start offset and a length.
    pub const fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// One past the last covered byte.
    pub const fn end(&self) -> u64 {
        self.start + self.len
    }

    /// Whether `offset` falls inside the range.
    pub const fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end()
    }

    /// Whether the range covers no bytes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:X}, 0x{:X})", self.start, self.end())
    }
}

/// Read bytes with bounds checking.
pub fn read_bytes(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    match offset.checked_add(len) {
        Some(end) if end <= data.len() => Ok(&data[offset..end]),
        _ => Err(MachoError::TruncatedData {
            offset,
            expected: len,
            actual: data.len().saturating_sub(offset),
        }),
    }
}

/// Read a little-endian u16.
pub fn read_u16(data: &[u8], offset: usize) -> Result<u16> {
    read_bytes(data, offset, 2).map(LittleEndian::read_u16)
}

/// Read a little-endian u32.
pub fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    read_bytes(data, offset, 4).map(LittleEndian::read_u32)
}

/// Read a little-endian u64.
pub fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    read_bytes(data, offset, 8).map(LittleEndian::read_u64)
}

/// A decoded LEB128 value and how many bytes it occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leb {
    /// Raw 64-bit value. For signed LEBs this is the sign-extended bit pattern.
    pub value: u64,
    /// Encoded length in bytes.
    pub len: usize,
    /// Whether the value was decoded as SLEB128.
    pub signed: bool,
}

impl Leb {
    /// Render the value, honoring signedness.
    pub fn display(&self) -> String {
        if self.signed {
            (self.value as i64).to_string()
        } else {
            self.value.to_string()
        }
    }
}

/// Decode an unsigned LEB128 value from the start of `bytes`.
///
/// `base` is the file offset of `bytes[0]` and is only used for error reports.
pub fn read_uleb128(bytes: &[u8], base: usize) -> Result<Leb> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (index, &byte) in bytes.iter().enumerate() {
        let chunk = u64::from(byte & 0x7F);
        if shift < 64 {
            if shift > 57 && chunk >> (64 - shift) != 0 {
                return Err(MachoError::MalformedLeb { offset: base });
            }
            value |= chunk << shift;
        } else if chunk != 0 {
            return Err(MachoError::MalformedLeb { offset: base });
        }
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(Leb {
                value,
                len: index + 1,
                signed: false,
            });
        }
    }
    Err(MachoError::TruncatedData {
        offset: base + bytes.len(),
        expected: 1,
        actual: 0,
    })
}

/// Decode a signed LEB128 value from the start of `bytes`.
pub fn read_sleb128(bytes: &[u8], base: usize) -> Result<Leb> {
    let mut value: i64 = 0;
    let mut shift = 0u32;
    for (index, &byte) in bytes.iter().enumerate() {
        if shift < 64 {
            value |= i64::from(byte & 0x7F) << shift;
        } else if byte & 0x7F != 0 && byte & 0x7F != 0x7F {
            return Err(MachoError::MalformedLeb { offset: base });
        }
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 64 && byte & 0x40 != 0 {
                value |= -1i64 << shift;
            }
            return Ok(Leb {
                value: value as u64,
                len: index + 1,
                signed: true,
            });
        }
    }
    Err(MachoError::TruncatedData {
        offset: base + bytes.len(),
        expected: 1,
        actual: 0,
    })
}

/// Immutable window into the shared file buffer.
#[derive(Clone)]
pub struct ByteView {
    buffer: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteView")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl ByteView {
    /// View over the whole buffer.
    pub fn new(buffer: Arc<[u8]>) -> Self {
        let len = buffer.len();
        Self {
            buffer,
            offset: 0,
            len,
        }
    }

    /// Sub-view relative to this view. Fails when it would leave the view.
    pub fn slice(&self, offset: usize, len: usize) -> Result<ByteView> {
        read_bytes(self.as_slice(), offset, len).map_err(|_| MachoError::TruncatedData {
            offset: self.offset + offset,
            expected: len,
            actual: self.len.saturating_sub(offset),
        })?;
        Ok(ByteView {
            buffer: Arc::clone(&self.buffer),
            offset: self.offset + offset,
            len,
        })
    }

    /// Zero-length view anchored at an absolute file offset.
    pub fn empty_at(&self, file_offset: usize) -> ByteView {
        ByteView {
            buffer: Arc::clone(&self.buffer),
            offset: file_offset.min(self.buffer.len()),
            len: 0,
        }
    }

    /// The viewed bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.len]
    }

    /// Absolute file offset of the first byte.
    pub fn file_offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes in the view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute range covered.
    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.offset as u64, self.len as u64)
    }

    /// Absolute range as a `usize` range.
    pub fn file_range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    /// Read a u32 at a view-relative offset.
    pub fn u32_at(&self, offset: usize) -> Result<u32> {
        read_u32(self.as_slice(), offset).map_err(|e| self.rebase_error(e))
    }

    /// Start a field-by-field cursor at the beginning of the view.
    pub fn shifter(&self) -> Shifter<'_> {
        Shifter {
            view: self,
            cursor: 0,
        }
    }

    fn rebase_error(&self, err: MachoError) -> MachoError {
        match err {
            MachoError::TruncatedData {
                offset,
                expected,
                actual,
            } => MachoError::TruncatedData {
                offset: self.offset + offset,
                expected,
                actual,
            },
            other => other,
        }
    }
}

/// Stateful cursor that decodes a structure field by field.
#[derive(Debug)]
pub struct Shifter<'a> {
    view: &'a ByteView,
    cursor: usize,
}

impl<'a> Shifter<'a> {
    /// View-relative position of the cursor.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Absolute file offset of the cursor.
    pub fn file_position(&self) -> usize {
        self.view.offset + self.cursor
    }

    /// Bytes left before the end of the view.
    pub fn remaining(&self) -> usize {
        self.view.len - self.cursor
    }

    /// Whether the cursor reached the end of the view.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.view.len
    }

    /// Take the next `len` bytes.
    pub fn shift_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let bytes = read_bytes(self.view.as_slice(), self.cursor, len)
            .map_err(|e| self.view.rebase_error(e))?;
        self.cursor += len;
        Ok(bytes)
    }

    /// Take the next `len` bytes as a sub-view.
    pub fn shift_view(&mut self, len: usize) -> Result<ByteView> {
        let view = self.view.slice(self.cursor, len)?;
        self.cursor += len;
        Ok(view)
    }

    /// Advance without decoding.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.shift_bytes(len).map(|_| ())
    }

    /// Take one byte.
    pub fn shift_u8(&mut self) -> Result<u8> {
        Ok(self.shift_bytes(1)?[0])
    }

    /// Take a little-endian u16.
    pub fn shift_u16(&mut self) -> Result<u16> {
        self.shift_bytes(2).map(LittleEndian::read_u16)
    }

    /// Take a little-endian u32.
    pub fn shift_u32(&mut self) -> Result<u32> {
        self.shift_bytes(4).map(LittleEndian::read_u32)
    }

    /// Take a little-endian i32.
    pub fn shift_i32(&mut self) -> Result<i32> {
        self.shift_bytes(4).map(LittleEndian::read_i32)
    }

    /// Take a little-endian u64.
    pub fn shift_u64(&mut self) -> Result<u64> {
        self.shift_bytes(8).map(LittleEndian::read_u64)
    }

    /// Take a pointer-sized value (4 or 8 bytes).
    pub fn shift_pointer(&mut self, is_64_bit: bool) -> Result<u64> {
        if is_64_bit {
            self.shift_u64()
        } else {
            self.shift_u32().map(u64::from)
        }
    }

    /// Take a fixed-size, NUL-padded name such as `segname[16]`.
    pub fn shift_fixed_name(&mut self, len: usize) -> Result<String> {
        let raw = self.shift_bytes(len)?;
        let end = memchr::memchr(0, raw).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Take an unsigned LEB128.
    pub fn shift_uleb128(&mut self) -> Result<Leb> {
        let base = self.file_position();
        let leb = read_uleb128(&self.view.as_slice()[self.cursor..], base)?;
        self.cursor += leb.len;
        Ok(leb)
    }

    /// Take a signed LEB128.
    pub fn shift_sleb128(&mut self) -> Result<Leb> {
        let base = self.file_position();
        let leb = read_sleb128(&self.view.as_slice()[self.cursor..], base)?;
        self.cursor += leb.len;
        Ok(leb)
    }

    /// Take a NUL-terminated string, terminator included in the returned bytes.
    pub fn shift_cstring(&mut self) -> Result<&'a [u8]> {
        let rest = &self.view.as_slice()[self.cursor..];
        match memchr::memchr(0, rest) {
            Some(nul) => self.shift_bytes(nul + 1),
            None => Err(MachoError::TruncatedData {
                offset: self.file_position() + rest.len(),
                expected: 1,
                actual: 0,
            }),
        }
    }
}

/// Render a byte string up to its first NUL, or `None` when it is not UTF-8.
pub fn utf8_until_nul(bytes: &[u8]) -> Option<&str> {
    let end = memchr::memchr(0, bytes).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).ok()
}

/// Upper-case hex of a u64 with `0x` prefix, the way every field value is shown.
pub fn hex_u64(value: u64) -> String {
    format!("0x{value:X}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_uleb(mut n: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (n & 0x7F) as u8;
            n >>= 7;
            if n == 0 {
                out.push(byte);
                return out;
            }
            out.push(byte | 0x80);
        }
    }

    fn view(bytes: &[u8]) -> ByteView {
        ByteView::new(Arc::from(bytes.to_vec()))
    }

    #[test]
    fn test_read_u32() {
        let data = [0x01, 0x02, 0x03, 0x04];
        assert_eq!(read_u32(&data, 0).unwrap(), 0x04030201);
        assert!(read_u32(&data, 1).is_err());
    }

    #[test]
    fn test_uleb_known_values() {
        assert_eq!(read_uleb128(&[0x00], 0).unwrap().value, 0);
        assert_eq!(read_uleb128(&[0x7F], 0).unwrap().value, 127);
        let leb = read_uleb128(&[0xE5, 0x8E, 0x26], 0).unwrap();
        assert_eq!(leb.value, 624_485);
        assert_eq!(leb.len, 3);
    }

    #[test]
    fn test_uleb_length_matches_bit_width() {
        let samples = [
            0u64,
            1,
            127,
            128,
            300,
            16_383,
            16_384,
            0xFFFF_FFFF,
            (1u64 << 62) + 12345,
            (1u64 << 63) - 1,
        ];
        for n in samples {
            let encoded = encode_uleb(n);
            let leb = read_uleb128(&encoded, 0).unwrap();
            assert_eq!(leb.value, n);
            let bits = 64 - n.leading_zeros() as usize;
            assert_eq!(leb.len, ((bits + 6) / 7).max(1), "length for {n}");
        }
    }

    #[test]
    fn test_uleb_truncated() {
        assert!(matches!(
            read_uleb128(&[0x80, 0x80], 10),
            Err(MachoError::TruncatedData { offset: 12, .. })
        ));
    }

    #[test]
    fn test_sleb_negative() {
        let leb = read_sleb128(&[0x7F], 0).unwrap();
        assert_eq!(leb.value as i64, -1);
        let leb = read_sleb128(&[0x80, 0x7F], 0).unwrap();
        assert_eq!(leb.value as i64, -128);
        assert_eq!(leb.display(), "-128");
    }

    #[test]
    fn test_view_slice_bounds() {
        let v = view(&[0u8; 16]);
        let sub = v.slice(4, 8).unwrap();
        assert_eq!(sub.file_offset(), 4);
        assert_eq!(sub.range(), ByteRange::new(4, 8));
        assert!(sub.slice(4, 8).is_err());
        match sub.slice(6, 4) {
            Err(MachoError::TruncatedData { offset, .. }) => assert_eq!(offset, 10),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_shifter_fields() {
        let mut bytes = vec![];
        bytes.extend_from_slice(&0x11223344u32.to_le_bytes());
        bytes.extend_from_slice(b"__TEXT\0\0\0\0\0\0\0\0\0\0");
        bytes.extend_from_slice(&[0xAC, 0x02]);
        bytes.extend_from_slice(b"_main\0");
        let v = view(&bytes);
        let mut s = v.shifter();
        assert_eq!(s.shift_u32().unwrap(), 0x11223344);
        assert_eq!(s.shift_fixed_name(16).unwrap(), "__TEXT");
        let leb = s.shift_uleb128().unwrap();
        assert_eq!((leb.value, leb.len), (300, 2));
        assert_eq!(s.shift_cstring().unwrap(), b"_main\0");
        assert!(s.is_exhausted());
        assert!(s.shift_u8().is_err());
    }

    #[test]
    fn test_byte_range_contains() {
        let r = ByteRange::new(0x10, 4);
        assert!(r.contains(0x10));
        assert!(r.contains(0x13));
        assert!(!r.contains(0x14));
        assert!(!ByteRange::new(5, 0).contains(5));
    }
}
