//! Raw deflate stream layer.
//!
//! ZIP stores deflate payloads raw, without the zlib wrapper, so both
//! directions run flate2's low-level codec with `zlib_header = false`.

use std::io::SeekFrom;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

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

/// Deflate codec layer.
///
/// In read mode, inflates what it pulls from its base; in write mode,
/// deflates what is written into it. An input budget bounds how much
/// compressed data a reader may pull, so an encrypted or stored-size
/// payload never bleeds into the following record.
pub struct DeflateStream<S> {
    base: S,
    codec: Codec,
    total_in_max: Option<u64>,
    level: u32,
}

impl<S: Stream> DeflateStream<S> {
    /// Wrap `base` for inflating reads.
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

    /// Wrap `base` for deflating writes.
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

impl<S: Stream> Stream for DeflateStream<S> {
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
            return Err(ZipError::Param("deflate stream opened for writing"));
        };

        if buf.is_empty() || *finished {
            return Ok(0);
        }

        loop {
            // Refill the compressed-input window within budget.
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

            let flush = if *eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };

            let before_in = decomp.total_in();
            let before_out = decomp.total_out();
            let status = decomp
                .decompress(&in_buf[*in_pos..*in_len], buf, flush)
                .map_err(|_| ZipError::Format("corrupt deflate stream"))?;
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
                // No progress possible and the input is exhausted.
                return Err(ZipError::Format("truncated deflate stream"));
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let Codec::Writer { comp } = &mut self.codec else {
            return Err(ZipError::Param("deflate stream opened for reading"));
        };

        let comp = comp.get_or_insert_with(|| Compress::new(Compression::new(self.level), false));
        let mut out_buf = [0u8; CHUNK];
        let mut consumed = 0;

        while consumed < buf.len() {
            let before_in = comp.total_in();
            let before_out = comp.total_out();
            comp.compress(&buf[consumed..], &mut out_buf, FlushCompress::None)
                .map_err(|_| ZipError::Internal("deflate compression failed"))?;
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
        // Flush the codec tail on the write side; reads have no tail.
        if let Codec::Writer { comp: Some(comp) } = &mut self.codec {
            let mut out_buf = [0u8; CHUNK];
            loop {
                let before_out = comp.total_out();
                let status = comp
                    .compress(&[], &mut out_buf, FlushCompress::Finish)
                    .map_err(|_| ZipError::Internal("deflate finish failed"))?;
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

    fn write_deflated(data: &[u8], level: i64) -> Vec<u8> {
        let mut stream = DeflateStream::new_write(MemStream::new());
        stream.set_prop(StreamProp::CompressLevel, level).unwrap();
        stream.write_all(data).unwrap();
        stream.close().unwrap();
        stream.into_inner().into_vec()
    }

    fn read_inflated(compressed: Vec<u8>, expect: usize) -> Vec<u8> {
        let mut stream = DeflateStream::new_read(MemStream::from_vec(compressed));
        let mut out = Vec::new();
        let mut buf = [0u8; 257];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert!(out.len() <= expect);
        out
    }

    #[test]
    fn test_roundtrip() {
        let data: Vec<u8> = (0..10000u32).flat_map(|i| i.to_le_bytes()).collect();
        let compressed = write_deflated(&data, 6);
        assert!(compressed.len() < data.len());
        assert_eq!(read_inflated(compressed, data.len()), data);
    }

    #[test]
    fn test_budget_bounds_input() {
        let data = b"bounded payload bounded payload bounded payload".to_vec();
        let compressed = write_deflated(&data, 9);
        let compressed_len = compressed.len();

        // Trailing garbage after the deflate stream must not be pulled.
        let mut with_tail = compressed;
        with_tail.extend_from_slice(b"PK\x01\x02 next record");

        let mut stream = DeflateStream::new_read(MemStream::from_vec(with_tail));
        stream
            .set_prop(StreamProp::TotalInMax, compressed_len as i64)
            .unwrap();
        let mut out = vec![0u8; data.len() + 64];
        let mut total = 0;
        loop {
            let n = stream.read(&mut out[total..]).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(&out[..total], &data[..]);
        assert_eq!(stream.get_prop(StreamProp::TotalIn), Some(compressed_len as i64));
    }

    #[test]
    fn test_truncated_stream_is_format_error() {
        let compressed = write_deflated(b"some data that compresses", 6);
        let truncated = compressed[..compressed.len() - 3].to_vec();

        let mut stream = DeflateStream::new_read(MemStream::from_vec(truncated));
        let mut buf = [0u8; 256];
        let mut result = Ok(0);
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        assert!(matches!(result, Err(ZipError::Format(_))));
    }
}
