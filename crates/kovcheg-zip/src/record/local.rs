//! Local file header structure.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Local file header (without signature).
///
/// Precedes each entry's payload. When the entry was written streaming,
/// the CRC and size fields are zero and the real values follow the
/// payload in a data descriptor.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct LocalFileHeader {
    /// Version needed to extract
    pub version_needed: u16,
    /// General purpose bit flag
    pub flags: u16,
    /// Compression method
    pub compression_method: u16,
    /// File last modification time and date (DOS format)
    pub dos_date: u32,
    /// CRC-32 of uncompressed data
    pub crc32: u32,
    /// Compressed size
    pub compressed_size: u32,
    /// Uncompressed size
    pub uncompressed_size: u32,
    /// File name length
    pub filename_size: u16,
    /// Extra field length
    pub extrafield_size: u16,
}

impl LocalFileHeader {
    /// Local file header signature as u32.
    pub const SIGNATURE: u32 = 0x04034b50;

    /// Total variable-length data size following this header.
    pub fn variable_data_size(&self) -> usize {
        self.filename_size as usize + self.extrafield_size as usize
    }
}
