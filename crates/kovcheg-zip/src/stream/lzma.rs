//! ZIP-flavoured LZMA stream layer (feature `lzma`).
//!
//! Method 14 payloads start with a small header the LZMA SDK never
//! framed itself: SDK version major/minor, a u16 properties size (5),
//! then the classic LZMA1 properties byte and dictionary size. Raw LZMA1
//! data follows, normally terminated by an end-of-stream marker; readers
//! of marker-less payloads are bounded by the known input and output
//! sizes instead.

use std::io::SeekFrom;

use xz2::stream::{Action, Filters, LzmaOptions, Status, Stream as XzStream};

use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamExt, StreamProp};

const CHUNK: usize = 4096;

/// SDK version advertised in the payload header.
const SDK_VERSION: (u8, u8) = (9, 20);
/// lc=3, lp=0, pb=2 packed as (pb * 5 + lp) * 9 + lc.
const DEFAULT_PROPS: u8 = 93;
const DEFAULT_DICT_SIZE: u32 = 1 << 23;
/// version(2) + props size(2) + props(5).
const ZIP_LZMA_HEADER_SIZE: u64 = 9;

fn encoder_options(level: u32) -> Result<LzmaOptions> {
    let mut opts = LzmaOptions::new_preset(level)
        .map_err(|_| ZipError::Internal("LZMA options setup failed"))?;
    opts.literal_context_bits(3)
        .literal_position_bits(0)
        .position_bits(2)
        .dict_size(DEFAULT_DICT_SIZE);
    Ok(opts)
}

fn decoder_options(props: u8, dict_size: u32) -> Result<LzmaOptions> {
    if props >= 9 * 5 * 5 {
        return Err(ZipError::Format("invalid LZMA properties"));
    }
    let lc = props % 9;
    let lp = (props / 9) % 5;
    let pb = props / 45;

    let mut opts = LzmaOptions::new_preset(6)
        .map_err(|_| ZipError::Internal("LZMA options setup failed"))?;
    opts.literal_context_bits(lc as u32)
        .literal_position_bits(lp as u32)
        .position_bits(pb as u32)
        .dict_size(dict_size);
    Ok(opts)
}

fn raw_stream(opts: &LzmaOptions, encoder: bool) -> Result<XzStream> {
    let mut filters = Filters::new();
    filters.lzma1(opts);
    let stream = if encoder {
        XzStream::new_raw_encoder(&filters)
    } else {
        XzStream::new_raw_decoder(&filters)
    };
    stream.map_err(|_| ZipError::Internal("LZMA stream setup failed"))
}

enum Codec {
    Reader {
        xz: Option<XzStream>,
        in_buf: Box<[u8]>,
        in_pos: usize,
        in_len: usize,
        in_read: u64,
        out_done: u64,
        eof: bool,
        finished: bool,
    },
    Writer {
        xz: Option<XzStream>,
    },
}

/// ZIP LZMA codec layer, compression method 14.
pub struct LzmaStream<S> {
    base: S,
    codec: Codec,
    total_in_max: Option<u64>,
    total_out_max: Option<u64>,
    level: u32,
}

impl<S: Stream> LzmaStream<S> {
    /// Wrap `base` for decompressing reads.
    pub fn new_read(base: S) -> Self {
        Self {
            base,
            codec: Codec::Reader {
                xz: None,
                in_buf: vec![0u8; CHUNK].into_boxed_slice(),
                in_pos: 0,
                in_len: 0,
                in_read: 0,
                out_done: 0,
                eof: false,
                finished: false,
            },
            total_in_max: None,
            total_out_max: None,
            level: 6,
        }
    }

    /// Wrap `base` for compressing writes.
    pub fn new_write(base: S) -> Self {
        Self {
            base,
            codec: Codec::Writer { xz: None },
            total_in_max: None,
            total_out_max: None,
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

    /// Emit the ZIP LZMA payload header and build the encoder.
    fn start_encoder(base: &mut S, level: u32) -> Result<XzStream> {
        base.write_u8(SDK_VERSION.0)?;
        base.write_u8(SDK_VERSION.1)?;
        base.write_u16(5)?;
        base.write_u8(DEFAULT_PROPS)?;
        base.write_u32(DEFAULT_DICT_SIZE)?;
        raw_stream(&encoder_options(level)?, true)
    }

    /// Consume the ZIP LZMA payload header and build the decoder.
    fn start_decoder(base: &mut S) -> Result<XzStream> {
        let _version_major = base.read_u8()?;
        let _version_minor = base.read_u8()?;
        if base.read_u16()? != 5 {
            return Err(ZipError::Format("invalid LZMA properties size"));
        }
        let props = base.read_u8()?;
        let dict_size = base.read_u32()?;
        raw_stream(&decoder_options(props, dict_size)?, false)
    }
}

impl<S: Stream> Stream for LzmaStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Codec::Reader {
            xz,
            in_buf,
            in_pos,
            in_len,
            in_read,
            out_done,
            eof,
            finished,
        } = &mut self.codec
        else {
            return Err(ZipError::Param("LZMA stream opened for writing"));
        };

        if buf.is_empty() || *finished {
            return Ok(0);
        }

        if xz.is_none() {
            *xz = Some(Self::start_decoder(&mut self.base)?);
            *in_read = ZIP_LZMA_HEADER_SIZE;
        }
        let Some(xz) = xz.as_mut() else {
            return Err(ZipError::Internal("LZMA decoder missing"));
        };

        // Marker-less payloads stop at the known uncompressed size.
        let out_budget = match self.total_out_max {
            Some(max) => max.saturating_sub(*out_done),
            None => u64::MAX,
        };
        if out_budget == 0 {
            *finished = true;
            return Ok(0);
        }
        let out_want = buf.len().min(out_budget.min(usize::MAX as u64) as usize);

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

            let action = if *eof { Action::Finish } else { Action::Run };
            let before_in = xz.total_in();
            let before_out = xz.total_out();
            let status = xz
                .process(&in_buf[*in_pos..*in_len], &mut buf[..out_want], action)
                .map_err(|_| ZipError::Format("corrupt LZMA stream"))?;
            *in_pos += (xz.total_in() - before_in) as usize;
            let produced = (xz.total_out() - before_out) as usize;
            *out_done += produced as u64;

            if status == Status::StreamEnd {
                *finished = true;
                return Ok(produced);
            }
            if produced > 0 {
                return Ok(produced);
            }
            if *eof {
                return Err(ZipError::Format("truncated LZMA stream"));
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let Codec::Writer { xz } = &mut self.codec else {
            return Err(ZipError::Param("LZMA stream opened for reading"));
        };

        if xz.is_none() {
            *xz = Some(Self::start_encoder(&mut self.base, self.level)?);
        }
        let Some(xz) = xz.as_mut() else {
            return Err(ZipError::Internal("LZMA encoder missing"));
        };

        let mut out_buf = [0u8; CHUNK];
        let mut consumed = 0;
        while consumed < buf.len() {
            let before_in = xz.total_in();
            let before_out = xz.total_out();
            xz.process(&buf[consumed..], &mut out_buf, Action::Run)
                .map_err(|_| ZipError::Internal("LZMA compression failed"))?;
            consumed += (xz.total_in() - before_in) as usize;
            let produced = (xz.total_out() - before_out) as usize;
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
        if let Codec::Writer { xz } = &mut self.codec {
            // A zero-byte payload still carries the header and marker.
            if xz.is_none() {
                *xz = Some(Self::start_encoder(&mut self.base, self.level)?);
            }
            let Some(xz) = xz.as_mut() else {
                return Err(ZipError::Internal("LZMA encoder missing"));
            };

            let mut out_buf = [0u8; CHUNK];
            loop {
                let before_out = xz.total_out();
                let status = xz
                    .process(&[], &mut out_buf, Action::Finish)
                    .map_err(|_| ZipError::Internal("LZMA finish failed"))?;
                let produced = (xz.total_out() - before_out) as usize;
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
            (Codec::Reader { xz: Some(xz), .. }, StreamProp::TotalIn) => {
                Some((xz.total_in() + ZIP_LZMA_HEADER_SIZE) as i64)
            }
            (Codec::Reader { xz: Some(xz), .. }, StreamProp::TotalOut) => {
                Some(xz.total_out() as i64)
            }
            (Codec::Writer { xz: Some(xz) }, StreamProp::TotalIn) => Some(xz.total_in() as i64),
            (Codec::Writer { xz: Some(xz) }, StreamProp::TotalOut) => {
                Some((xz.total_out() + ZIP_LZMA_HEADER_SIZE) as i64)
            }
            (Codec::Reader { xz: None, .. }, StreamProp::TotalIn | StreamProp::TotalOut)
            | (Codec::Writer { xz: None }, StreamProp::TotalIn | StreamProp::TotalOut) => Some(0),
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
            StreamProp::TotalOutMax => {
                self.total_out_max = Some(value.max(0) as u64);
                Ok(())
            }
            StreamProp::CompressLevel => {
                if matches!(&self.codec, Codec::Writer { xz: Some(_) }) {
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
    fn test_roundtrip_with_zip_header() {
        let data = b"kovcheg kovcheg kovcheg kovcheg kovcheg".repeat(40);

        let mut enc = LzmaStream::new_write(MemStream::new());
        enc.write_all(&data).unwrap();
        enc.close().unwrap();
        let compressed = enc.into_inner().into_vec();

        // version + props size + props byte + dictionary size.
        assert_eq!(compressed[2..4], [5, 0]);
        assert_eq!(compressed[4], DEFAULT_PROPS);
        assert_eq!(&compressed[5..9], &DEFAULT_DICT_SIZE.to_le_bytes());

        let mut dec = LzmaStream::new_read(MemStream::from_vec(compressed));
        let mut out = Vec::new();
        let mut buf = [0u8; 500];
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
