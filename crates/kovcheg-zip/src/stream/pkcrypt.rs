//! Traditional PKZIP cipher stream layer.
//!
//! The APPNOTE stream cipher: three 32-bit keys seeded from the password,
//! advanced one byte at a time off the CRC-32 table. A 12-byte encryption
//! header precedes the payload; its last byte is a verifier so a wrong
//! password is usually caught before decompression starts.

use std::io::SeekFrom;

use rand::RngCore;

use kovcheg_common::crc;

use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamExt, StreamProp};

const HEADER_SIZE: usize = 12;

#[derive(Debug, Clone)]
struct Keys([u32; 3]);

impl Keys {
    fn new(password: &[u8]) -> Self {
        let mut keys = Keys([0x12345678, 0x23456789, 0x34567890]);
        for &byte in password {
            keys.update(byte);
        }
        keys
    }

    fn update(&mut self, plain: u8) {
        self.0[0] = crc::update_byte(self.0[0], plain);
        self.0[1] = self.0[1]
            .wrapping_add(self.0[0] & 0xff)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.0[2] = crc::update_byte(self.0[2], (self.0[1] >> 24) as u8);
    }

    fn cipher_byte(&self) -> u8 {
        let temp = (self.0[2] | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    fn encrypt(&mut self, plain: u8) -> u8 {
        let cipher = plain ^ self.cipher_byte();
        self.update(plain);
        cipher
    }

    fn decrypt(&mut self, cipher: u8) -> u8 {
        let plain = cipher ^ self.cipher_byte();
        self.update(plain);
        plain
    }
}

/// ZipCrypto cipher layer.
///
/// Construction performs the header I/O: the write side emits the
/// encryption header, the read side consumes it and checks the verifier.
/// Totals count the base-side bytes, header included, which is what the
/// entry's compressed size must cover.
pub struct PkcryptStream<S> {
    base: S,
    keys: Keys,
    writing: bool,
    total_in: u64,
    total_out: u64,
    total_in_max: Option<u64>,
}

/// Cipher state carried over from the header exchange.
///
/// Produced by [`start_write`]/[`start_read`] against a borrowed base,
/// so a failed header exchange does not cost the caller its stream.
pub(crate) struct PkcryptState {
    keys: Keys,
    writing: bool,
}

/// Emit the 12-byte encryption header with the two verifier bytes in
/// its tail, returning the advanced cipher state.
pub(crate) fn start_write(
    base: &mut dyn Stream,
    password: &str,
    verify1: u8,
    verify2: u8,
) -> Result<PkcryptState> {
    let mut keys = Keys::new(password.as_bytes());

    let mut header = [0u8; HEADER_SIZE];
    rand::thread_rng().fill_bytes(&mut header[..HEADER_SIZE - 2]);
    header[HEADER_SIZE - 2] = verify1;
    header[HEADER_SIZE - 1] = verify2;
    for byte in &mut header {
        *byte = keys.encrypt(*byte);
    }
    base.write_all(&header)?;

    Ok(PkcryptState {
        keys,
        writing: true,
    })
}

/// Consume and verify the encryption header, returning the advanced
/// cipher state. A verifier mismatch is a checksum error.
pub(crate) fn start_read(
    base: &mut dyn Stream,
    password: &str,
    verify2: u8,
) -> Result<PkcryptState> {
    let mut keys = Keys::new(password.as_bytes());

    let mut header = [0u8; HEADER_SIZE];
    base.read_exact(&mut header)?;
    for byte in &mut header {
        *byte = keys.decrypt(*byte);
    }
    // Only the final byte is checkable: with a data descriptor the
    // CRC was unknown at encryption time.
    if header[HEADER_SIZE - 1] != verify2 {
        return Err(ZipError::Crc {
            expected: verify2 as u32,
            actual: header[HEADER_SIZE - 1] as u32,
        });
    }

    Ok(PkcryptState {
        keys,
        writing: false,
    })
}

impl<S: Stream> PkcryptStream<S> {
    /// Wrap `base` with cipher state from a completed header exchange.
    pub(crate) fn resume(base: S, state: PkcryptState) -> Self {
        let writing = state.writing;
        Self {
            base,
            keys: state.keys,
            writing,
            total_in: if writing { 0 } else { HEADER_SIZE as u64 },
            total_out: if writing { HEADER_SIZE as u64 } else { 0 },
            total_in_max: None,
        }
    }

    /// Wrap `base` for encrypting writes; emits the 12-byte header with
    /// the two verifier bytes in its tail.
    pub fn new_write(mut base: S, password: &str, verify1: u8, verify2: u8) -> Result<Self> {
        let state = start_write(&mut base, password, verify1, verify2)?;
        Ok(Self::resume(base, state))
    }

    /// Wrap `base` for decrypting reads; consumes the header and fails
    /// with a checksum error when the verifier does not match.
    pub fn new_read(mut base: S, password: &str, verify2: u8) -> Result<Self> {
        let state = start_read(&mut base, password, verify2)?;
        Ok(Self::resume(base, state))
    }

    /// Access the wrapped stream.
    pub fn base(&self) -> &S {
        &self.base
    }

    /// Access the wrapped stream mutably.
    pub fn base_mut(&mut self) -> &mut S {
        &mut self.base
    }

    /// Unwrap, returning the wrapped stream.
    pub fn into_inner(self) -> S {
        self.base
    }
}

impl<S: Stream> Stream for PkcryptStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.writing {
            return Err(ZipError::Param("cipher stream opened for writing"));
        }

        let budget = match self.total_in_max {
            Some(max) => max.saturating_sub(self.total_in),
            None => u64::MAX,
        };
        if budget == 0 {
            return Ok(0);
        }

        let want = buf.len().min(budget.min(usize::MAX as u64) as usize);
        let n = self.base.read(&mut buf[..want])?;
        for byte in &mut buf[..n] {
            *byte = self.keys.decrypt(*byte);
        }
        self.total_in += n as u64;
        self.total_out += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.writing {
            return Err(ZipError::Param("cipher stream opened for reading"));
        }

        let mut encrypted = [0u8; 4096];
        for chunk in buf.chunks(encrypted.len()) {
            for (out, &plain) in encrypted.iter_mut().zip(chunk) {
                *out = self.keys.encrypt(plain);
            }
            self.base.write_all(&encrypted[..chunk.len()])?;
        }
        self.total_in += buf.len() as u64;
        self.total_out += buf.len() as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(ZipError::Param("transform layers cannot seek"))
    }

    fn tell(&mut self) -> Result<u64> {
        self.base.tell()
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        match prop {
            StreamProp::TotalIn => Some(self.total_in as i64),
            StreamProp::TotalOut => Some(self.total_out as i64),
            StreamProp::HeaderSize => Some(HEADER_SIZE as i64),
            StreamProp::FooterSize => Some(0),
            _ => None,
        }
    }

    fn set_prop(&mut self, prop: StreamProp, value: i64) -> Result<()> {
        match prop {
            StreamProp::TotalInMax => {
                self.total_in_max = Some(value.max(0) as u64);
                Ok(())
            }
            _ => Err(ZipError::Param("property not supported by this stream")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemStream;

    #[test]
    fn test_key_schedule_is_deterministic() {
        let keys = Keys::new(b"password");
        let again = Keys::new(b"password");
        assert_eq!(keys.0, again.0);

        let other = Keys::new(b"passwore");
        assert_ne!(keys.0, other.0);
    }

    #[test]
    fn test_roundtrip() {
        let plaintext = b"attack at dawn, bring snacks";

        let mut enc =
            PkcryptStream::new_write(MemStream::new(), "s3cret", 0xAA, 0xBB).unwrap();
        enc.write_all(plaintext).unwrap();
        let stored = enc.into_inner().into_vec();

        assert_eq!(stored.len(), plaintext.len() + HEADER_SIZE);
        assert_ne!(&stored[HEADER_SIZE..], plaintext.as_slice());

        let mut dec =
            PkcryptStream::new_read(MemStream::from_vec(stored), "s3cret", 0xBB).unwrap();
        let mut out = vec![0u8; plaintext.len()];
        dec.read_exact(&mut out).unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_wrong_password_fails_verifier() {
        let mut enc = PkcryptStream::new_write(MemStream::new(), "right", 0x11, 0x22).unwrap();
        enc.write_all(b"payload").unwrap();
        let stored = enc.into_inner().into_vec();

        // A one-byte verifier lets 1 in 256 wrong passwords through; in
        // that case the decrypted payload is still garbage.
        match PkcryptStream::new_read(MemStream::from_vec(stored), "wrong", 0x22) {
            Err(ZipError::Crc { .. }) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(mut dec) => {
                let mut out = [0u8; 7];
                dec.read_exact(&mut out).unwrap();
                assert_ne!(&out, b"payload");
            }
        }
    }

    #[test]
    fn test_totals_include_header() {
        let mut enc = PkcryptStream::new_write(MemStream::new(), "pw", 1, 2).unwrap();
        enc.write_all(b"12345").unwrap();
        assert_eq!(enc.get_prop(StreamProp::TotalOut), Some(5 + HEADER_SIZE as i64));
    }
}
