//! BZIP2 stream layer (feature `bzip2`).

use std::io::SeekFrom;

use bzip2::{Action, Compress, Compression, Decompress, Status};

use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamExt, StreamProp};

const CHUNK: usize = 4096;

enum Codec {
    Reader {
        decomp: Decompress,
        in_buf: Box<[u8]>,
        in_pos: usize,
        in_len: usize,
        in_read: u64,
        eof: bool,
        finished: bool,
    },
    Writer {
        comp: Option<Compress>,
    },
}

/// BZIP2 codec layer, compression method 12.
pub struct Bzip2Stream<S> {
    base: S,
    codec: Codec,
    total_in_max: Option<u64>,
    level: u32,
}

impl<S: Stream> Bzip2Stream<S> {
    /// Wrap `base` for decompressing reads.
    pub fn new_read(base: S) -> Self {
        Self {
            base,
            codec: Codec::Reader {
                decomp: Decompress::new(false),
                in_buf: vec![0u8; CHUNK].into_boxed_slice(),
                in_pos: 0,
                in_len: 0,
                in_read: 0,
                eof: false,
                finished: false,
            },
            total_in_max: None,
            level: 6,
        }
    }

    /// Wrap `base` for compressing writes.
    pub fn new_write(base: S) -> Self {
        Self {
            base,
            codec: Codec::Writer { comp: None },
            total_in_max: None,
            level: 6,
        }
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

impl<S: Stream> Stream for Bzip2Stream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Codec::Reader {
            decomp,
            in_buf,
            in_pos,
            in_len,
            in_read,
            eof,
            finished,
        } = &mut self.codec
        else {
            return Err(ZipError::Param("bzip2 stream opened for writing"));
        };

        if buf.is_empty() || *finished {
            return Ok(0);
        }

        loop {
            if *in_pos == *in_len && !*eof {
                let budget = match self.total_in_max {
                    Some(max) => max.saturating_sub(*in_read),
                    None => u64::MAX,
                };
                let want = in_buf.len().min(budget.min(usize::MAX as u64) as usize);
                let n = if want == 0 { 0 } else { self.base.read(&mut in_buf[..want])? };
                *in_pos = 0;
                *in_len = n;
                *in_read += n as u64;
                if n == 0 {
                    *eof = true;
                }
            }

            let before_in = decomp.total_in();
            let before_out = decomp.total_out();
            let status = decomp
                .decompress(&in_buf[*in_pos..*in_len], buf)
                .map_err(|_| ZipError::Format("corrupt bzip2 stream"))?;
            *in_pos += (decomp.total_in() - before_in) as usize;
            let produced = (decomp.total_out() - before_out) as usize;

            if status == Status::StreamEnd {
                *finished = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if *eof {
                return Err(ZipError::Format("truncated bzip2 stream"));
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let Codec::Writer { comp } = &mut self.codec else {
            return Err(ZipError::Param("bzip2 stream opened for reading"));
        };

        let comp = comp.get_or_insert_with(|| Compress::new(Compression::new(self.level), 30));
        let mut out_buf = [0u8; CHUNK];
        let mut consumed = 0;

        while consumed < buf.len() {
            let before_in = comp.total_in();
            let before_out = comp.total_out();
            comp.compress(&buf[consumed..], &mut out_buf, Action::Run)
                .map_err(|_| ZipError::Internal("bzip2 compression failed"))?;
            consumed += (comp.total_in() - before_in) as usize;
            let produced = (comp.total_out() - before_out) as usize;
            self.base.write_all(&out_buf[..produced])?;
        }

        Ok(buf.len())
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(ZipError::Param("transform layers cannot seek"))
    }

    fn tell(&mut self) -> Result<u64> {
        self.base.tell()
    }

    fn close(&mut self) -> Result<()> {
        if let Codec::Writer { comp } = &mut self.codec {
            // A zero-byte payload still carries the stream framing.
            let comp = comp.get_or_insert_with(|| Compress::new(Compression::new(self.level), 30));
            let mut out_buf = [0u8; CHUNK];
            loop {
                let before_out = comp.total_out();
                let status = comp
                    .compress(&[], &mut out_buf, Action::Finish)
                    .map_err(|_| ZipError::Internal("bzip2 finish failed"))?;
                let produced = (comp.total_out() - before_out) as usize;
                self.base.write_all(&out_buf[..produced])?;
                if status == Status::StreamEnd {
                    break;
                }
            }
        }
        Ok(())
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        match (&self.codec, prop) {
            (Codec::Reader { decomp, .. }, StreamProp::TotalIn) => Some(decomp.total_in() as i64),
            (Codec::Reader { decomp, .. }, StreamProp::TotalOut) => Some(decomp.total_out() as i64),
            (Codec::Writer { comp: Some(c) }, StreamProp::TotalIn) => Some(c.total_in() as i64),
            (Codec::Writer { comp: Some(c) }, StreamProp::TotalOut) => Some(c.total_out() as i64),
            (Codec::Writer { comp: None }, StreamProp::TotalIn | StreamProp::TotalOut) => Some(0),
            (_, StreamProp::CompressLevel) => Some(self.level as i64),
            _ => None,
        }
    }

    fn set_prop(&mut self, prop: StreamProp, value: i64) -> Result<()> {
        match prop {
            StreamProp::TotalInMax => {
                self.total_in_max = Some(value.max(0) as u64);
                Ok(())
            }
            StreamProp::CompressLevel => {
                if matches!(&self.codec, Codec::Writer { comp: Some(_) }) {
                    return Err(ZipError::Param("compression already started"));
                }
                self.level = value.clamp(1, 9) as u32;
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
    fn test_roundtrip() {
        let data: Vec<u8> = (0..5000u32).flat_map(|i| (i % 251).to_le_bytes()).collect();

        let mut enc = Bzip2Stream::new_write(MemStream::new());
        enc.write_all(&data).unwrap();
        enc.close().unwrap();
        let compressed = enc.into_inner().into_vec();
        assert_eq!(&compressed[..2], b"BZ");

        let mut dec = Bzip2Stream::new_read(MemStream::from_vec(compressed));
        let mut out = Vec::new();
        let mut buf = [0u8; 333];
        loop {
            let n = dec.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, data);
    }
}
