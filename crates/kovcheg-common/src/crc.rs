//! IEEE CRC-32 hashing utilities.
//!
//! PKZIP checksums every entry payload with the IEEE CRC-32 polynomial,
//! and the traditional PKZIP cipher drives its key schedule off the same
//! table one byte at a time.

use crc32fast::Hasher;

/// Compute the CRC-32 of a byte slice in one shot.
#[inline]
pub fn hash_bytes(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Advance a raw CRC-32 register by a single byte.
///
/// `crc` is the bare shift register without the leading/trailing
/// complement steps; this is the update the traditional PKZIP cipher key
/// schedule requires. The complements below cancel crc32fast's
/// init/finalise convention, leaving the raw table step.
#[inline]
pub fn update_byte(crc: u32, byte: u8) -> u32 {
    let mut hasher = Hasher::new_with_initial(!crc);
    hasher.update(&[byte]);
    !hasher.finalize()
}

/// A streaming CRC-32 accumulator.
#[derive(Debug, Clone, Default)]
pub struct Crc32 {
    hasher: Hasher,
}

impl Crc32 {
    /// Start a new accumulation.
    #[inline]
    pub fn new() -> Self {
        Self {
            hasher: Hasher::new(),
        }
    }

    /// Feed bytes into the accumulator.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Current CRC-32 value. The accumulator stays usable.
    #[inline]
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_value() {
        // Classic CRC-32 test vector.
        assert_eq!(hash_bytes(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn test_streaming_matches_oneshot() {
        let mut crc = Crc32::new();
        crc.update(b"1234");
        crc.update(b"56789");
        assert_eq!(crc.value(), hash_bytes(b"123456789"));
    }

    #[test]
    fn test_update_byte_matches_table_step() {
        // The raw register step: next = table[(crc ^ b) & 0xff] ^ (crc >> 8).
        // Build the reference table directly from the reflected polynomial.
        fn table_entry(i: u32) -> u32 {
            let mut c = i;
            for _ in 0..8 {
                c = if c & 1 != 0 { 0xEDB88320 ^ (c >> 1) } else { c >> 1 };
            }
            c
        }

        let crc = 0x12345678u32;
        for &b in &[0u8, 1, 0x41, 0xFF] {
            let expected = table_entry((crc ^ b as u32) & 0xff) ^ (crc >> 8);
            assert_eq!(update_byte(crc, b), expected);
        }
    }
}
