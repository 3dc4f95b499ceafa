//! Pass-through stream layer.

use std::io::SeekFrom;

use crate::error::{Result, ZipError};
use crate::stream::{Stream, StreamProp};

/// A transform layer that transforms nothing.
///
/// Stands in for a cipher when the entry is unencrypted and for a codec
/// in raw or stored mode, keeping the entry pipeline uniform. Counts the
/// bytes flowing through it and, on the read side, stops at the
/// configured input budget so a stored payload read never runs into the
/// following record.
#[derive(Debug)]
pub struct RawStream<S> {
    base: S,
    total_in: u64,
    total_out: u64,
    total_in_max: Option<u64>,
}

impl<S: Stream> RawStream<S> {
    /// Wrap `base`.
    pub fn new(base: S) -> Self {
        Self {
            base,
            total_in: 0,
            total_out: 0,
            total_in_max: None,
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

impl<S: Stream> Stream for RawStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let budget = match self.total_in_max {
            Some(max) => max.saturating_sub(self.total_in),
            None => u64::MAX,
        };
        if budget == 0 {
            return Ok(0);
        }

        let want = buf.len().min(budget.min(usize::MAX as u64) as usize);
        let n = self.base.read(&mut buf[..want])?;
        self.total_in += n as u64;
        self.total_out += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.base.write(buf)?;
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
            StreamProp::TotalInMax => self.total_in_max.map(|v| v as i64),
            StreamProp::HeaderSize | StreamProp::FooterSize => Some(0),
            _ => None,
        }
    }

    fn set_prop(&mut self, prop: StreamProp, value: i64) -> Result<()> {
        match prop {
            StreamProp::TotalInMax => {
                self.total_in_max = Some(value.max(0) as u64);
                Ok(())
            }
            // Accepted and ignored: store has no level.
            StreamProp::CompressLevel => Ok(()),
            _ => Err(ZipError::Param("property not supported by this stream")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemStream, StreamExt};

    #[test]
    fn test_read_budget_stops_short() {
        let base = MemStream::from_vec(vec![9u8; 100]);
        let mut raw = RawStream::new(base);
        raw.set_prop(StreamProp::TotalInMax, 10).unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(raw.read(&mut buf).unwrap(), 10);
        assert_eq!(raw.read(&mut buf).unwrap(), 0);
        assert_eq!(raw.get_prop(StreamProp::TotalIn), Some(10));
    }

    #[test]
    fn test_write_counts_totals() {
        let mut raw = RawStream::new(MemStream::new());
        raw.write_all(b"abcdef").unwrap();
        assert_eq!(raw.get_prop(StreamProp::TotalOut), Some(6));
        assert_eq!(raw.into_inner().as_slice(), b"abcdef");
    }
}
