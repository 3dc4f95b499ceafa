//! Central directory file header structure.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Central directory file header (without signature).
///
/// One per entry in the catalog at the end of the archive. Carries
/// everything the local header carries plus the trailing seven fields a
/// reader needs to locate and classify the entry without touching its
/// local header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct CentralFileHeader {
    /// Version made by
    pub version_madeby: u16,
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
    /// File comment length
    pub comment_size: u16,
    /// Disk number where file starts
    pub disk_number_start: u16,
    /// Internal file attributes
    pub internal_fa: u16,
    /// External file attributes
    pub external_fa: u32,
    /// Relative offset of local file header
    pub local_header_offset: u32,
}

impl CentralFileHeader {
    /// Central directory header signature as u32.
    pub const SIGNATURE: u32 = 0x02014b50;

    /// Total variable-length data size following this header.
    pub fn variable_data_size(&self) -> usize {
        self.filename_size as usize
            + self.extrafield_size as usize
            + self.comment_size as usize
    }
}
