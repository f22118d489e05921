// src/hash/nixbase32.rs

//! Nix's base32 digest encoding
//!
//! Not RFC 4648: the alphabet omits `e`, `o`, `t` and `u`, and bytes are
//! consumed from the end of the digest, so the first character carries the
//! most significant bits of the last byte.

const ALPHABET: &[u8; 32] = b"0123456789abcdfghijklmnpqrsvwxyz";

/// Length of the encoding of `byte_len` bytes
pub const fn encoded_len(byte_len: usize) -> usize {
    if byte_len == 0 {
        0
    } else {
        (byte_len * 8 - 1) / 5 + 1
    }
}

/// Encode raw bytes
pub fn encode(bytes: &[u8]) -> String {
    let len = encoded_len(bytes.len());
    let mut out = String::with_capacity(len);

    for n in (0..len).rev() {
        let bit = n * 5;
        let i = bit / 8;
        let j = bit % 8;
        let low = u16::from(bytes[i]) >> j;
        let high = if i + 1 < bytes.len() {
            u16::from(bytes[i + 1]) << (8 - j)
        } else {
            0
        };
        out.push(ALPHABET[((low | high) & 0x1f) as usize] as char);
    }

    out
}

/// Decode to raw bytes; `None` on a foreign character or overflowing input
pub fn decode(s: &str) -> Option<Vec<u8>> {
    let byte_len = s.len() * 5 / 8;
    if encoded_len(byte_len) != s.len() {
        return None;
    }
    let mut bytes = vec![0u8; byte_len];

    for (n, c) in s.bytes().rev().enumerate() {
        let digit = ALPHABET.iter().position(|&a| a == c)? as u16;
        let bit = n * 5;
        let i = bit / 8;
        let j = bit % 8;
        let shifted = digit << j;
        bytes[i] |= (shifted & 0xff) as u8;
        let carry = (shifted >> 8) as u8;
        if carry != 0 {
            if i + 1 < byte_len {
                bytes[i + 1] |= carry;
            } else {
                return None;
            }
        }
    }

    Some(bytes)
}
