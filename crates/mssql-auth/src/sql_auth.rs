//! LOGIN7 password obfuscation.
//!
//! The password travels as UTF-16LE with every byte nibble-swapped and then
//! XORed with `0xA5`. This is obfuscation only; confidentiality comes from
//! TLS.

use bytes::Bytes;

const MASK: u8 = 0xA5;

/// Obfuscate `password` for the LOGIN7 password field.
#[must_use]
pub fn obfuscate_password(password: &str) -> Bytes {
    password
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .map(|b| b.rotate_left(4) ^ MASK)
        .collect::<Vec<u8>>()
        .into()
}

/// Reverse [`obfuscate_password`], as the server does.
///
/// Returns `None` for an odd length or invalid UTF-16.
#[must_use]
pub fn deobfuscate_password(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            u16::from_le_bytes([(pair[0] ^ MASK).rotate_left(4), (pair[1] ^ MASK).rotate_left(4)])
        })
        .collect();
    String::from_utf16(&units).ok()
}
