//! Per-entry metadata record.

use crate::attrib;

/// General-purpose bit flag values.
///
/// Bits 1-2 are overloaded by the format: for deflate they encode the
/// level hint, for LZMA bit 1 marks an end-of-stream terminated payload.
pub mod flags {
    /// Entry payload is encrypted.
    pub const ENCRYPTED: u16 = 1 << 0;
    /// Deflate was run at maximum compression (level 8 or 9).
    pub const DEFLATE_MAX: u16 = 1 << 1;
    /// Deflate was run at fast compression (level 2).
    pub const DEFLATE_FAST: u16 = 1 << 2;
    /// Deflate was run at super-fast compression (level 1).
    pub const DEFLATE_SUPER_FAST: u16 = DEFLATE_MAX | DEFLATE_FAST;
    /// LZMA payload carries an end-of-stream marker.
    pub const LZMA_EOS_MARKER: u16 = 1 << 1;
    /// CRC and sizes follow the payload in a data descriptor.
    pub const DATA_DESCRIPTOR: u16 = 1 << 3;
    /// Filename and comment are UTF-8.
    pub const UTF8: u16 = 1 << 11;
}

/// AES encryption strengths carried in the AES extra field.
pub mod aes {
    /// AE-1: CRC stored and verified in addition to the HMAC.
    pub const VERSION_AE1: u16 = 1;
    /// AE-2: CRC stored as zero, HMAC alone authenticates.
    pub const VERSION_AE2: u16 = 2;

    /// 128-bit key strength.
    pub const MODE_128: u8 = 1;
    /// 192-bit key strength.
    pub const MODE_192: u8 = 2;
    /// 256-bit key strength.
    pub const MODE_256: u8 = 3;
}

/// Compression methods the codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CompressionMethod {
    /// No compression (stored).
    Store = 0,
    /// DEFLATE compression.
    Deflate = 8,
    /// BZIP2 compression.
    Bzip2 = 12,
    /// LZMA compression.
    Lzma = 14,
    /// AES-encrypted entry; the real method lives in the AES extra field.
    Aes = 99,
}

impl TryFrom<u16> for CompressionMethod {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Store),
            8 => Ok(Self::Deflate),
            12 => Ok(Self::Bzip2),
            14 => Ok(Self::Lzma),
            99 => Ok(Self::Aes),
            other => Err(other),
        }
    }
}

/// When to emit the ZIP64 extra field for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zip64Policy {
    /// Emit the subfield only when a size or offset needs 64 bits.
    #[default]
    Auto,
    /// Always emit the subfield.
    Force,
    /// Never emit the subfield; oversized fields become a parameter error.
    Disable,
}

/// Metadata for a single archive entry.
///
/// Mirrors the union of the local and central header fields. The
/// `*_size` fields hold the lengths declared on the wire; the owned
/// `filename`/`extrafield`/`comment` are the corresponding bytes, valid
/// until the cursor scans the next entry. Timestamps are POSIX seconds;
/// zero means "not carried".
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    /// Version made by (host system in the high byte).
    pub version_madeby: u16,
    /// Version needed to extract; zero lets the writer compute it.
    pub version_needed: u16,
    /// General purpose bit flag.
    pub flag: u16,
    /// Compression method as stored on the wire.
    pub compression_method: u16,
    /// Modification time.
    pub modified_date: i64,
    /// Access time.
    pub accessed_date: i64,
    /// Creation time.
    pub creation_date: i64,
    /// CRC-32 of the uncompressed payload.
    pub crc: u32,
    /// Compressed payload size in bytes.
    pub compressed_size: u64,
    /// Uncompressed payload size in bytes.
    pub uncompressed_size: u64,
    /// Declared filename length.
    pub filename_size: u16,
    /// Declared extra-field length.
    pub extrafield_size: u16,
    /// Declared comment length.
    pub comment_size: u16,
    /// Disk number where the entry starts.
    pub disk_number: u32,
    /// Internal file attributes.
    pub internal_fa: u16,
    /// External file attributes (host-system specific).
    pub external_fa: u32,
    /// Disk offset of the local header.
    pub disk_offset: u64,
    /// Entry filename.
    pub filename: String,
    /// Raw extra-field bytes.
    pub extrafield: Vec<u8>,
    /// Entry comment.
    pub comment: String,
    /// AES extension version (0 = no AES).
    pub aes_version: u16,
    /// AES encryption strength (1/2/3 = 128/192/256-bit).
    pub aes_encryption_mode: u8,
    /// ZIP64 emission policy.
    pub zip64: Zip64Policy,
}

impl FileInfo {
    /// Compression method decoded, or the raw value if unknown.
    pub fn method(&self) -> Result<CompressionMethod, u16> {
        CompressionMethod::try_from(self.compression_method)
    }

    /// Whether this entry is a directory.
    ///
    /// True when either the external attributes mark a directory for the
    /// originating host system, or the stored name has a trailing slash.
    pub fn is_dir(&self) -> bool {
        if attrib::is_dir(self.external_fa, self.version_madeby) {
            return true;
        }
        self.filename.ends_with('/') || self.filename.ends_with('\\')
    }

    /// Size of this entry's central-directory record on the wire.
    pub fn central_record_size(&self) -> u64 {
        crate::record::CENTRAL_HEADER_SIZE as u64
            + self.filename_size as u64
            + self.extrafield_size as u64
            + self.comment_size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_decoding() {
        assert_eq!(CompressionMethod::try_from(0), Ok(CompressionMethod::Store));
        assert_eq!(CompressionMethod::try_from(8), Ok(CompressionMethod::Deflate));
        assert_eq!(CompressionMethod::try_from(99), Ok(CompressionMethod::Aes));
        assert_eq!(CompressionMethod::try_from(97), Err(97));
    }

    #[test]
    fn test_is_dir_by_name() {
        let mut info = FileInfo {
            filename: "docs/".to_string(),
            ..Default::default()
        };
        assert!(info.is_dir());

        info.filename = "docs\\".to_string();
        assert!(info.is_dir());

        info.filename = "docs".to_string();
        assert!(!info.is_dir());
    }

    #[test]
    fn test_is_dir_by_attributes() {
        // Unix host system (3) in the high byte, S_IFDIR in the upper
        // 16 bits of the external attributes.
        let info = FileInfo {
            version_madeby: 3 << 8,
            external_fa: 0o040755 << 16,
            filename: "docs".to_string(),
            ..Default::default()
        };
        assert!(info.is_dir());
    }
}
