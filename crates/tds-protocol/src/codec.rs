//! Low-level field helpers shared by the wire decoders.
//!
//! Strings on the TDS wire are UTF-16LE with a character count prefix of one
//! (`B_VARCHAR`) or two (`US_VARCHAR`) bytes.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Fail with [`ProtocolError::UnexpectedEof`] unless `n` bytes remain.
pub fn ensure(src: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        return Err(ProtocolError::UnexpectedEof);
    }
    Ok(())
}

/// Read a UTF-16LE string with a 1-byte character count.
pub fn read_b_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    ensure(src, 1)?;
    let len = src.get_u8() as usize;
    read_utf16_string(src, len)
}

/// Read a UTF-16LE string with a 2-byte character count.
pub fn read_us_varchar(src: &mut impl Buf) -> Result<String, ProtocolError> {
    ensure(src, 2)?;
    let len = src.get_u16_le() as usize;
    read_utf16_string(src, len)
}

/// Read `char_count` UTF-16LE code units.
pub fn read_utf16_string(src: &mut impl Buf, char_count: usize) -> Result<String, ProtocolError> {
    ensure(src, char_count * 2)?;
    let units: Vec<u16> = (0..char_count).map(|_| src.get_u16_le()).collect();
    decode_utf16(&units)
}

/// Decode a UTF-16LE byte slice. An odd trailing byte is an error.
pub fn utf16le_bytes_to_string(bytes: &[u8]) -> Result<String, ProtocolError> {
    if bytes.len() % 2 != 0 {
        return Err(ProtocolError::StringEncoding("odd byte count in UTF-16 data"));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    decode_utf16(&units)
}

fn decode_utf16(units: &[u16]) -> Result<String, ProtocolError> {
    String::from_utf16(units).map_err(|_| ProtocolError::StringEncoding("invalid UTF-16"))
}

/// Write a UTF-16LE string with a 1-byte character count, truncating at 255.
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let chars: Vec<u16> = s.encode_utf16().collect();
    let len = chars.len().min(255);
    dst.put_u8(len as u8);
    for &c in &chars[..len] {
        dst.put_u16_le(c);
    }
}

/// Write a UTF-16LE string with a 2-byte character count, truncating at 65535.
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) {
    let chars: Vec<u16> = s.encode_utf16().collect();
    let len = chars.len().min(65535);
    dst.put_u16_le(len as u16);
    for &c in &chars[..len] {
        dst.put_u16_le(c);
    }
}

/// Write a UTF-16LE string without any prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for c in s.encode_utf16() {
        dst.put_u16_le(c);
    }
}

/// Byte length of `s` once encoded as UTF-16.
#[must_use]
pub fn utf16_byte_len(s: &str) -> usize {
    s.encode_utf16().count() * 2
}
