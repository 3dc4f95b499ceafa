//! End of Central Directory (EOCD) structures.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// End of Central Directory record (without signature).
///
/// The archive footer. Fields that outgrow their 16- or 32-bit width are
/// stored as all-ones sentinels and resolved through the ZIP64 records.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct EocdRecord {
    /// Number of this disk
    pub disk_number: u16,
    /// Disk where central directory starts
    pub cd_disk: u16,
    /// Number of central directory records on this disk
    pub cd_entries_disk: u16,
    /// Total number of central directory records
    pub cd_entries_total: u16,
    /// Size of central directory (bytes)
    pub cd_size: u32,
    /// Offset of start of central directory
    pub cd_offset: u32,
    /// Comment length
    pub comment_size: u16,
}

impl EocdRecord {
    /// EOCD signature as u32.
    pub const SIGNATURE: u32 = 0x06054b50;

    /// EOCD signature bytes, for backward scanning.
    pub const MAGIC: [u8; 4] = [0x50, 0x4b, 0x05, 0x06];

    /// Whether any field carries a ZIP64 sentinel.
    pub fn is_zip64(&self) -> bool {
        self.cd_entries_total == u16::MAX
            || self.cd_offset == u32::MAX
            || self.cd_size == u32::MAX
    }
}

/// ZIP64 End of Central Directory locator (without signature).
///
/// Sits immediately before the classic EOCD and points at the ZIP64
/// EOCD record.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct Eocd64Locator {
    /// Disk number containing the ZIP64 EOCD
    pub eocd64_disk: u32,
    /// Offset of the ZIP64 EOCD record
    pub eocd64_offset: u64,
    /// Total number of disks
    pub total_disks: u32,
}

impl Eocd64Locator {
    /// ZIP64 EOCD locator signature as u32.
    pub const SIGNATURE: u32 = 0x07064b50;
}

/// ZIP64 End of Central Directory record (without signature).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct Eocd64Record {
    /// Size of this record, not counting signature or this field
    pub record_size: u64,
    /// Version made by
    pub version_madeby: u16,
    /// Version needed to extract
    pub version_needed: u16,
    /// This disk number
    pub disk_number: u32,
    /// Disk where central directory starts
    pub cd_disk: u32,
    /// Number of central directory records on this disk
    pub cd_entries_disk: u64,
    /// Total number of central directory records
    pub cd_entries_total: u64,
    /// Size of central directory (bytes)
    pub cd_size: u64,
    /// Offset of start of central directory
    pub cd_offset: u64,
}

impl Eocd64Record {
    /// ZIP64 EOCD signature as u32.
    pub const SIGNATURE: u32 = 0x06064b50;

    /// The `record_size` value for a record with no extensible data.
    pub const FIXED_RECORD_SIZE: u64 = 44;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip64_sentinels() {
        let mut eocd = EocdRecord {
            disk_number: 0,
            cd_disk: 0,
            cd_entries_disk: 3,
            cd_entries_total: 3,
            cd_size: 150,
            cd_offset: 1024,
            comment_size: 0,
        };
        assert!(!eocd.is_zip64());

        eocd.cd_entries_total = u16::MAX;
        assert!(eocd.is_zip64());

        eocd.cd_entries_total = 3;
        eocd.cd_offset = u32::MAX;
        assert!(eocd.is_zip64());

        eocd.cd_offset = 1024;
        eocd.cd_size = u32::MAX;
        assert!(eocd.is_zip64());
    }
}
