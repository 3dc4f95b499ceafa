//! WinZip AES stream layer (AE-1 / AE-2).
//!
//! Framing per the WinZip AE spec: a salt and a 2-byte password verifier
//! before the payload, a 10-byte truncated HMAC-SHA1 authentication code
//! after it. Keys come from PBKDF2-HMAC-SHA1 over the password; the
//! payload is AES-CTR with a little-endian block counter starting at 1,
//! and the HMAC always covers the ciphertext.

use std::io::SeekFrom;

use aes::cipher::{KeyIvInit, StreamCipher};
use aes::{Aes128, Aes192, Aes256};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamExt, StreamProp};

type HmacSha1 = Hmac<Sha1>;

const PBKDF2_ROUNDS: u32 = 1000;
const VERIFIER_SIZE: usize = 2;
const MAC_SIZE: usize = 10;

enum CtrCipher {
    Aes128(ctr::Ctr128LE<Aes128>),
    Aes192(ctr::Ctr128LE<Aes192>),
    Aes256(ctr::Ctr128LE<Aes256>),
}

impl CtrCipher {
    fn new(mode: u8, key: &[u8]) -> Result<Self> {
        // Counter occupies the whole block, little-endian, starting at 1.
        let mut iv = [0u8; 16];
        iv[0] = 1;

        let cipher = match mode {
            1 => Self::Aes128(
                ctr::Ctr128LE::new_from_slices(key, &iv)
                    .map_err(|_| ZipError::Internal("AES key setup failed"))?,
            ),
            2 => Self::Aes192(
                ctr::Ctr128LE::new_from_slices(key, &iv)
                    .map_err(|_| ZipError::Internal("AES key setup failed"))?,
            ),
            3 => Self::Aes256(
                ctr::Ctr128LE::new_from_slices(key, &iv)
                    .map_err(|_| ZipError::Internal("AES key setup failed"))?,
            ),
            _ => return Err(ZipError::Support("unknown AES encryption strength")),
        };
        Ok(cipher)
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.apply_keystream(buf),
            Self::Aes192(c) => c.apply_keystream(buf),
            Self::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// WinZip AES cipher layer.
///
/// Construction performs the header I/O: the write side generates and
/// emits salt + verifier, the read side consumes them and rejects a
/// wrong password. Totals count base-side bytes including the framing,
/// which is what the entry's compressed size must cover. On the read
/// side the input budget tells the layer where the ciphertext ends and
/// the authentication code begins.
pub struct AesStream<S> {
    base: S,
    mode: u8,
    writing: bool,
    cipher: CtrCipher,
    mac: Option<HmacSha1>,
    total_in: u64,
    total_out: u64,
    total_in_max: Option<u64>,
    payload_done: u64,
}

fn derive_keys(
    password: &str,
    salt: &[u8],
    key_size: usize,
) -> (Vec<u8>, Vec<u8>, [u8; VERIFIER_SIZE]) {
    let mut derived = vec![0u8; 2 * key_size + VERIFIER_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut derived);

    let cipher_key = derived[..key_size].to_vec();
    let mac_key = derived[key_size..2 * key_size].to_vec();
    let verifier = [derived[2 * key_size], derived[2 * key_size + 1]];
    (cipher_key, mac_key, verifier)
}

/// Cipher and authentication state from a completed header exchange.
///
/// Produced by [`start_write`]/[`start_read`] against a borrowed base,
/// so a failed header exchange does not cost the caller its stream.
pub(crate) struct AesState {
    cipher: CtrCipher,
    mac: HmacSha1,
    mode: u8,
    writing: bool,
}

/// Emit salt and password verifier, returning the cipher state.
///
/// `mode` is the encryption strength, 1/2/3 for 128/192/256-bit keys.
pub(crate) fn start_write(base: &mut dyn Stream, password: &str, mode: u8) -> Result<AesState> {
    let salt_size = salt_size_for(mode)?;

    let mut salt = vec![0u8; salt_size];
    rand::thread_rng().fill_bytes(&mut salt);

    let (cipher_key, mac_key, verifier) = derive_keys(password, &salt, 8 + 8 * mode as usize);
    base.write_all(&salt)?;
    base.write_all(&verifier)?;

    Ok(AesState {
        cipher: CtrCipher::new(mode, &cipher_key)?,
        mac: HmacSha1::new_from_slice(&mac_key)
            .map_err(|_| ZipError::Internal("HMAC key setup failed"))?,
        mode,
        writing: true,
    })
}

/// Consume salt and verifier, returning the cipher state. A wrong
/// password is a checksum error.
pub(crate) fn start_read(base: &mut dyn Stream, password: &str, mode: u8) -> Result<AesState> {
    let salt_size = salt_size_for(mode)?;

    let mut salt = vec![0u8; salt_size];
    base.read_exact(&mut salt)?;
    let mut stored_verifier = [0u8; VERIFIER_SIZE];
    base.read_exact(&mut stored_verifier)?;

    let (cipher_key, mac_key, verifier) = derive_keys(password, &salt, 8 + 8 * mode as usize);
    if stored_verifier != verifier {
        return Err(ZipError::Crc {
            expected: u16::from_le_bytes(verifier) as u32,
            actual: u16::from_le_bytes(stored_verifier) as u32,
        });
    }

    Ok(AesState {
        cipher: CtrCipher::new(mode, &cipher_key)?,
        mac: HmacSha1::new_from_slice(&mac_key)
            .map_err(|_| ZipError::Internal("HMAC key setup failed"))?,
        mode,
        writing: false,
    })
}

fn salt_size_for(mode: u8) -> Result<usize> {
    if !(1..=3).contains(&mode) {
        return Err(ZipError::Support("unknown AES encryption strength"));
    }
    Ok(4 + 4 * mode as usize)
}

impl<S: Stream> AesStream<S> {
    /// Wrap `base` with state from a completed header exchange.
    pub(crate) fn resume(base: S, state: AesState) -> Self {
        let header = (4 + 4 * state.mode as usize + VERIFIER_SIZE) as u64;
        let writing = state.writing;
        Self {
            base,
            mode: state.mode,
            writing,
            cipher: state.cipher,
            mac: Some(state.mac),
            total_in: if writing { 0 } else { header },
            total_out: if writing { header } else { 0 },
            total_in_max: None,
            payload_done: 0,
        }
    }

    /// Wrap `base` for encrypting writes; emits salt and verifier.
    ///
    /// `mode` is the encryption strength, 1/2/3 for 128/192/256-bit keys.
    pub fn new_write(mut base: S, password: &str, mode: u8) -> Result<Self> {
        let state = start_write(&mut base, password, mode)?;
        Ok(Self::resume(base, state))
    }

    /// Wrap `base` for decrypting reads; consumes salt and verifier and
    /// fails with a checksum error on a wrong password.
    pub fn new_read(mut base: S, password: &str, mode: u8) -> Result<Self> {
        let state = start_read(&mut base, password, mode)?;
        Ok(Self::resume(base, state))
    }

    fn header_size(&self) -> usize {
        4 + 4 * self.mode as usize + VERIFIER_SIZE
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

    /// Ciphertext bytes between header and footer, when the input budget
    /// is known.
    fn payload_budget(&self) -> Option<u64> {
        self.total_in_max.map(|max| {
            max.saturating_sub(self.header_size() as u64)
                .saturating_sub(MAC_SIZE as u64)
        })
    }
}

impl<S: Stream> Stream for AesStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.writing {
            return Err(ZipError::Param("AES stream opened for writing"));
        }

        let budget = match self.payload_budget() {
            Some(max) => max.saturating_sub(self.payload_done),
            None => u64::MAX,
        };
        if budget == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = buf.len().min(budget.min(usize::MAX as u64) as usize);
        let n = self.base.read(&mut buf[..want])?;

        if let Some(mac) = self.mac.as_mut() {
            mac.update(&buf[..n]);
        }
        self.cipher.apply(&mut buf[..n]);

        self.payload_done += n as u64;
        self.total_in += n as u64;
        self.total_out += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.writing {
            return Err(ZipError::Param("AES stream opened for reading"));
        }

        let mut encrypted = [0u8; 4096];
        for chunk in buf.chunks(encrypted.len()) {
            encrypted[..chunk.len()].copy_from_slice(chunk);
            self.cipher.apply(&mut encrypted[..chunk.len()]);
            if let Some(mac) = self.mac.as_mut() {
                mac.update(&encrypted[..chunk.len()]);
            }
            self.base.write_all(&encrypted[..chunk.len()])?;
        }
        self.payload_done += buf.len() as u64;
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

    fn close(&mut self) -> Result<()> {
        let Some(mac) = self.mac.take() else {
            return Ok(());
        };
        let computed = mac.finalize().into_bytes();

        if self.writing {
            self.base.write_all(&computed[..MAC_SIZE])?;
            self.total_out += MAC_SIZE as u64;
            return Ok(());
        }

        // Authenticate only a fully drained payload; a partial read has
        // nothing to check against.
        if self.payload_budget() == Some(self.payload_done) {
            let mut stored = [0u8; MAC_SIZE];
            self.base.read_exact(&mut stored)?;
            self.total_in += MAC_SIZE as u64;
            if stored != computed[..MAC_SIZE] {
                return Err(ZipError::Crc {
                    expected: u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]),
                    actual: u32::from_le_bytes([
                        computed[0], computed[1], computed[2], computed[3],
                    ]),
                });
            }
        }
        Ok(())
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        match prop {
            StreamProp::TotalIn => Some(self.total_in as i64),
            StreamProp::TotalOut => Some(self.total_out as i64),
            StreamProp::HeaderSize => Some(self.header_size() as i64),
            StreamProp::FooterSize => Some(MAC_SIZE as i64),
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

    fn encrypt(data: &[u8], password: &str, mode: u8) -> Vec<u8> {
        let mut stream = AesStream::new_write(MemStream::new(), password, mode).unwrap();
        stream.write_all(data).unwrap();
        stream.close().unwrap();
        stream.into_inner().into_vec()
    }

    #[test]
    fn test_framing_overhead() {
        for (mode, salt) in [(1u8, 8usize), (2, 12), (3, 16)] {
            let stored = encrypt(b"0123456789", "pw", mode);
            assert_eq!(stored.len(), 10 + salt + VERIFIER_SIZE + MAC_SIZE);
        }
    }

    #[test]
    fn test_empty_payload_still_framed() {
        let stored = encrypt(b"", "pw", 3);
        assert_eq!(stored.len(), 16 + VERIFIER_SIZE + MAC_SIZE);
    }

    #[test]
    fn test_roundtrip_with_authentication() {
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let stored = encrypt(plaintext, "p", 3);
        let stored_len = stored.len();

        let mut dec = AesStream::new_read(MemStream::from_vec(stored), "p", 3).unwrap();
        dec.set_prop(StreamProp::TotalInMax, stored_len as i64).unwrap();

        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = dec.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, plaintext);
        dec.close().unwrap();
    }

    #[test]
    fn test_wrong_password_fails_verifier() {
        let stored = encrypt(b"secret payload", "right", 3);
        let result = AesStream::new_read(MemStream::from_vec(stored), "wrong", 3);
        assert!(matches!(result, Err(ZipError::Crc { .. })));
    }

    #[test]
    fn test_tampered_ciphertext_fails_mac() {
        let mut stored = encrypt(b"untampered content here", "pw", 1);
        let stored_len = stored.len();
        // Flip one payload bit past the 8+2 byte header.
        stored[12] ^= 0x01;

        let mut dec = AesStream::new_read(MemStream::from_vec(stored), "pw", 1).unwrap();
        dec.set_prop(StreamProp::TotalInMax, stored_len as i64).unwrap();
        let mut sink = [0u8; 64];
        while dec.read(&mut sink).unwrap() > 0 {}
        assert!(matches!(dec.close(), Err(ZipError::Crc { .. })));
    }
}
