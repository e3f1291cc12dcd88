//! Additive byte-wise stream cipher used to obscure GAR bodies.
//!
//! Each body byte was stored as `plain + k (mod 256)` where `k` is the next
//! keystream byte, so recovery subtracts. The generator is a chain: bytes
//! must be processed strictly in order, one keystream byte each.

use super::keystream::Xorshift128;

pub fn deobfuscate_in_place(data: &mut [u8], keystream: &mut Xorshift128) {
    for byte in data {
        *byte = byte.wrapping_sub(keystream.next_byte());
    }
}

pub fn deobfuscate(data: &[u8], keystream: &mut Xorshift128) -> Vec<u8> {
    let mut result = data.to_vec();
    deobfuscate_in_place(&mut result, keystream);
    result
}

/// Inverse of [`deobfuscate`]. Only used to build fixtures; this crate
/// does not write GAR files.
pub fn obfuscate(data: &[u8], keystream: &mut Xorshift128) -> Vec<u8> {
    let mut result = data.to_vec();
    for byte in &mut result {
        *byte = byte.wrapping_add(keystream.next_byte());
    }
    result
}
