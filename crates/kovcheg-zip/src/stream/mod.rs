//! Stream abstraction and concrete stream layers.
//!
//! Everything the archive touches — file storage, in-memory buffers, and
//! the per-entry transform layers (CRC tap, compressors, ciphers) — speaks
//! the same [`Stream`] capability set, so layers compose in any order and
//! the archive core stays agnostic of what it is stacked on.

mod crc32;
mod file;
mod memory;
mod mmap;
mod raw;

mod deflate;
pub(crate) mod pkcrypt;

#[cfg(feature = "aes-crypto")]
pub(crate) mod aes;
#[cfg(feature = "bzip2")]
mod bzip2;
#[cfg(feature = "lzma")]
mod lzma;

pub use crc32::Crc32Stream;
pub use deflate::DeflateStream;
pub use file::FileStream;
pub use memory::MemStream;
pub use mmap::MmapStream;
pub use pkcrypt::PkcryptStream;
pub use raw::RawStream;

#[cfg(feature = "aes-crypto")]
pub use aes::AesStream;
#[cfg(feature = "bzip2")]
pub use bzip2::Bzip2Stream;
#[cfg(feature = "lzma")]
pub use lzma::LzmaStream;

pub use std::io::SeekFrom;

use crate::error::{Result, ZipError};

/// Numeric stream properties.
///
/// Layers answer the ones that apply to them; [`Stream::get_prop`]
/// returns `None` for the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProp {
    /// Bytes consumed from the layer's input side.
    TotalIn,
    /// Bytes produced on the layer's output side.
    TotalOut,
    /// Budget of input bytes the layer may consume.
    TotalInMax,
    /// Budget of output bytes the layer may produce.
    TotalOutMax,
    /// Bytes of framing the layer writes before the payload.
    HeaderSize,
    /// Bytes of framing the layer writes after the payload.
    FooterSize,
    /// Compression level for encoding layers.
    CompressLevel,
    /// Disk number for split storage.
    DiskNumber,
    /// Per-disk size for split storage.
    DiskSize,
}

/// Byte-oriented stream with seeking and numeric properties.
///
/// The capability set every storage backend and transform layer exposes.
/// Transform layers refuse [`seek`](Stream::seek); storage backends
/// ignore [`close`](Stream::close) beyond flushing.
pub trait Stream {
    /// Read up to `buf.len()` bytes. Returns 0 at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf`, returning how many bytes were accepted.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Reposition the stream.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Current position.
    fn tell(&mut self) -> Result<u64>;

    /// Finalise the layer: flush codec tails, emit trailing framing,
    /// verify authentication. Storage backends flush.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Query a numeric property.
    fn get_prop(&self, _prop: StreamProp) -> Option<i64> {
        None
    }

    /// Set a numeric property.
    fn set_prop(&mut self, _prop: StreamProp, _value: i64) -> Result<()> {
        Err(ZipError::Param("property not supported by this stream"))
    }
}

/// Little-endian integer and bulk-copy helpers over any [`Stream`].
pub trait StreamExt: Stream {
    /// Fill `buf` completely or fail with [`ZipError::EndOfStream`].
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(ZipError::EndOfStream);
            }
            filled += n;
        }
        Ok(())
    }

    /// Write all of `buf` or fail.
    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..])?;
            if n == 0 {
                return Err(ZipError::Stream(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "stream accepted no bytes",
                )));
            }
            written += n;
        }
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_all(&[value])
    }

    fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    /// Copy exactly `len` bytes from `source` into this stream.
    fn copy_from(&mut self, source: &mut dyn Stream, len: u64) -> Result<()> {
        let mut buf = [0u8; 4096];
        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(buf.len() as u64) as usize;
            let n = source.read(&mut buf[..chunk])?;
            if n == 0 {
                return Err(ZipError::EndOfStream);
            }
            self.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        Ok(())
    }
}

impl<S: Stream + ?Sized> StreamExt for S {}

impl Stream for Box<dyn Stream> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        (**self).seek(pos)
    }

    fn tell(&mut self) -> Result<u64> {
        (**self).tell()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        (**self).get_prop(prop)
    }

    fn set_prop(&mut self, prop: StreamProp, value: i64) -> Result<()> {
        (**self).set_prop(prop, value)
    }
}

/// Archive open mode, bit-composable from read/write/append/create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenMode(u8);

impl OpenMode {
    /// Read existing entries.
    pub const READ: OpenMode = OpenMode(1 << 0);
    /// Write new entries.
    pub const WRITE: OpenMode = OpenMode(1 << 1);
    /// Keep existing entries and add after them.
    pub const APPEND: OpenMode = OpenMode(1 << 2);
    /// Start from an empty archive.
    pub const CREATE: OpenMode = OpenMode(1 << 3);

    /// Whether every bit of `other` is set in `self`.
    #[inline]
    pub fn contains(self, other: OpenMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for OpenMode {
    type Output = OpenMode;

    fn bitor(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_mode_composition() {
        let mode = OpenMode::WRITE | OpenMode::APPEND;
        assert!(mode.contains(OpenMode::WRITE));
        assert!(mode.contains(OpenMode::APPEND));
        assert!(!mode.contains(OpenMode::READ));
        assert!(mode.contains(OpenMode::WRITE | OpenMode::APPEND));
    }

    #[test]
    fn test_ext_integers_roundtrip() {
        let mut stream = MemStream::new();
        stream.write_u32(0x04034b50).unwrap();
        stream.write_u16(20).unwrap();
        stream.write_u64(u64::MAX - 1).unwrap();

        stream.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(stream.read_u32().unwrap(), 0x04034b50);
        assert_eq!(stream.read_u16().unwrap(), 20);
        assert_eq!(stream.read_u64().unwrap(), u64::MAX - 1);
    }

    #[test]
    fn test_copy_from() {
        let mut src = MemStream::from_vec(vec![7u8; 10000]);
        let mut dst = MemStream::new();
        dst.copy_from(&mut src, 10000).unwrap();
        assert_eq!(dst.as_slice(), &[7u8; 10000][..]);
    }
}
