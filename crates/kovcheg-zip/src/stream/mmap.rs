//! Memory-mapped read-only storage stream.

use std::fs::File;
use std::io::SeekFrom;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Result, ZipError};
use crate::stream::Stream;

/// A read-only storage stream over a memory-mapped file.
///
/// The fast path for listing and extracting: the EOCD scan and central
/// directory walk become plain memory reads.
#[derive(Debug)]
pub struct MmapStream {
    mmap: Mmap,
    pos: usize,
}

impl MmapStream {
    /// Map `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap, pos: 0 })
    }
}

impl Stream for MmapStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let available = self.mmap.len().saturating_sub(self.pos);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.mmap[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(ZipError::Param("memory-mapped stream is read-only"))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.mmap.len() as i64 + delta,
        };
        if target < 0 {
            return Err(ZipError::Param("seek before start of stream"));
        }
        self.pos = (target as usize).min(self.mmap.len());
        Ok(self.pos as u64)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.pos as u64)
    }
}
