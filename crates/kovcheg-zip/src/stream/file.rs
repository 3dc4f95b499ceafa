//! File-backed storage stream.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;
use crate::stream::{OpenMode, Stream};

/// A storage stream over a file on disk.
#[derive(Debug)]
pub struct FileStream {
    file: File,
}

impl FileStream {
    /// Open `path` for the given archive mode.
    ///
    /// Read-only modes open the file as-is; any write mode opens
    /// read-write, creating the file when the create bit is set and
    /// truncating only for create without append.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.read(true);

        if mode.contains(OpenMode::WRITE) || mode.contains(OpenMode::APPEND) {
            options.write(true);
        }
        if mode.contains(OpenMode::CREATE) {
            options.create(true);
            if !mode.contains(OpenMode::APPEND) {
                options.truncate(true);
            }
        }

        Ok(Self {
            file: options.open(path)?,
        })
    }
}

impl Stream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.file.write(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos)?)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    fn close(&mut self) -> Result<()> {
        Ok(self.file.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamExt;

    #[test]
    fn test_create_write_reopen_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");

        let mut stream =
            FileStream::open(&path, OpenMode::WRITE | OpenMode::CREATE).unwrap();
        stream.write_u32(0x06054b50).unwrap();
        stream.close().unwrap();
        drop(stream);

        let mut stream = FileStream::open(&path, OpenMode::READ).unwrap();
        assert_eq!(stream.read_u32().unwrap(), 0x06054b50);
        assert_eq!(stream.tell().unwrap(), 4);
    }
}
