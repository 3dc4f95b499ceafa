//! CRC-32 observer stream layer.

use std::io::SeekFrom;

use kovcheg_common::crc::Crc32;

use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamProp};

/// A tap that checksums every byte passing through it.
///
/// Sits payload-side of the entry pipeline, so it always sees the
/// uncompressed plaintext: on write it hashes what the caller produced,
/// on read it hashes what decompression delivered.
#[derive(Debug)]
pub struct Crc32Stream<S> {
    base: S,
    crc: Crc32,
    total_in: u64,
    total_out: u64,
}

impl<S: Stream> Crc32Stream<S> {
    /// Wrap `base`.
    pub fn new(base: S) -> Self {
        Self {
            base,
            crc: Crc32::new(),
            total_in: 0,
            total_out: 0,
        }
    }

    /// CRC-32 of all bytes observed so far.
    pub fn value(&self) -> u32 {
        self.crc.value()
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

impl<S: Stream> Stream for Crc32Stream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.base.read(buf)?;
        self.crc.update(&buf[..n]);
        self.total_in += n as u64;
        self.total_out += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.base.write(buf)?;
        self.crc.update(&buf[..n]);
        self.total_in += n as u64;
        self.total_out += n as u64;
        Ok(n)
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
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemStream, StreamExt};

    #[test]
    fn test_write_side_crc() {
        let mut tap = Crc32Stream::new(MemStream::new());
        tap.write_all(b"123456789").unwrap();
        assert_eq!(tap.value(), 0xCBF43926);
        assert_eq!(tap.get_prop(StreamProp::TotalOut), Some(9));
    }

    #[test]
    fn test_read_side_crc() {
        let mut tap = Crc32Stream::new(MemStream::from_vec(b"hi\n".to_vec()));
        let mut buf = [0u8; 16];
        assert_eq!(tap.read(&mut buf).unwrap(), 3);
        assert_eq!(tap.value(), 0xD7D541C2);
    }
}
