//! Extra-field TLV codec.
//!
//! The extra-field area of a header is a sequence of
//! `(type: u16, length: u16, payload[length])` records. Recognised types
//! decode into typed variants; everything else is preserved as an opaque
//! `(type, bytes)` pair so emission can keep unrecognised subfields
//! intact. ZIP64 decoding depends on which classic header fields carried
//! the all-ones sentinel, so the parser takes that context up front.

use kovcheg_common::{BinaryReader, BinaryWriter};

use crate::error::{Result, ZipError};

/// Extra-field type identifiers.
pub mod field_type {
    /// ZIP64 extended information.
    pub const ZIP64: u16 = 0x0001;
    /// NTFS timestamps.
    pub const NTFS: u16 = 0x000a;
    /// Info-ZIP UNIX timestamps and ids (original version).
    pub const UNIX1: u16 = 0x000d;
    /// WinZip AES encryption.
    pub const AES: u16 = 0x9901;
}

/// Which classic header fields held the ZIP64 sentinel.
///
/// Only the sentinel-valued fields are present in the ZIP64 payload, in
/// the fixed order the flags below are declared in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zip64Context {
    pub uncompressed_size: bool,
    pub compressed_size: bool,
    pub disk_offset: bool,
    pub disk_number: bool,
}

/// One decoded extra-field record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraField<'a> {
    /// 64-bit replacements for sentinel-valued classic fields.
    Zip64 {
        uncompressed_size: Option<u64>,
        compressed_size: Option<u64>,
        disk_offset: Option<u64>,
        disk_number: Option<u32>,
    },
    /// NTFS timestamps in 100-ns ticks.
    Ntfs {
        modified: Option<u64>,
        accessed: Option<u64>,
        creation: Option<u64>,
    },
    /// POSIX timestamps; uid/gid and the variable tail are dropped.
    Unix1 { accessed: u32, modified: u32 },
    /// AES descriptor carrying the real compression method.
    Aes {
        version: u16,
        strength: u8,
        compression_method: u16,
    },
    /// Unrecognised subfield, preserved verbatim.
    Unknown { field_type: u16, data: &'a [u8] },
}

/// Iterator over the subfields of an extra-field area.
pub struct ExtraFields<'a> {
    reader: BinaryReader<'a>,
    ctx: Zip64Context,
}

impl<'a> ExtraFields<'a> {
    /// Parse `extrafield` with the given ZIP64 sentinel context.
    pub fn new(extrafield: &'a [u8], ctx: Zip64Context) -> Self {
        Self {
            reader: BinaryReader::new(extrafield),
            ctx,
        }
    }

    fn decode_zip64(&self, payload: &[u8]) -> Result<ExtraField<'a>> {
        let mut reader = BinaryReader::new(payload);
        let mut uncompressed_size = None;
        let mut compressed_size = None;
        let mut disk_offset = None;
        let mut disk_number = None;

        if self.ctx.uncompressed_size {
            uncompressed_size = Some(reader.read_u64()?);
        }
        if self.ctx.compressed_size {
            compressed_size = Some(reader.read_u64()?);
        }
        if self.ctx.disk_offset {
            disk_offset = Some(reader.read_u64()?);
        }
        if self.ctx.disk_number {
            disk_number = Some(reader.read_u32()?);
        }

        Ok(ExtraField::Zip64 {
            uncompressed_size,
            compressed_size,
            disk_offset,
            disk_number,
        })
    }

    fn decode_ntfs(payload: &[u8]) -> Result<ExtraField<'a>> {
        let mut reader = BinaryReader::new(payload);
        let _reserved = reader.read_u32()?;

        let mut modified = None;
        let mut accessed = None;
        let mut creation = None;

        // Nested attribute records; only 0x01 (timestamps) is understood.
        while reader.remaining() >= 4 {
            let attrib_id = reader.read_u16()?;
            let attrib_size = reader.read_u16()?;

            if attrib_id == 0x01 && attrib_size == 24 {
                modified = Some(reader.read_u64()?);
                accessed = Some(reader.read_u64()?);
                creation = Some(reader.read_u64()?);
            } else {
                reader.advance(attrib_size as usize);
            }
        }

        Ok(ExtraField::Ntfs {
            modified,
            accessed,
            creation,
        })
    }

    fn decode_unix1(payload: &[u8]) -> Result<ExtraField<'a>> {
        let mut reader = BinaryReader::new(payload);
        let accessed = reader.read_u32()?;
        let modified = reader.read_u32()?;
        // uid/gid and anything after them are ignored; slicing per
        // subfield makes the variable-tail skip implicit.
        Ok(ExtraField::Unix1 { accessed, modified })
    }

    fn decode_aes(payload: &[u8]) -> Result<ExtraField<'a>> {
        let mut reader = BinaryReader::new(payload);

        let version = reader.read_u16()?;
        if version != 1 && version != 2 {
            return Err(ZipError::Format("unsupported AES extension version"));
        }
        if reader.read_u8()? != b'A' || reader.read_u8()? != b'E' {
            return Err(ZipError::Format("invalid AES extension marker"));
        }
        let strength = reader.read_u8()?;
        let compression_method = reader.read_u16()?;

        Ok(ExtraField::Aes {
            version,
            strength,
            compression_method,
        })
    }
}

impl<'a> Iterator for ExtraFields<'a> {
    type Item = Result<ExtraField<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.remaining() < 4 {
            return None;
        }

        let field_type = self.reader.read_u16().ok()?;
        let field_size = self.reader.read_u16().ok()?;
        let payload = match self.reader.read_bytes(field_size as usize) {
            Ok(payload) => payload,
            Err(_) => return Some(Err(ZipError::Format("truncated extra field"))),
        };

        let field = match field_type {
            field_type::ZIP64 => self.decode_zip64(payload),
            field_type::NTFS => Self::decode_ntfs(payload),
            field_type::UNIX1 => Self::decode_unix1(payload),
            field_type::AES => Self::decode_aes(payload),
            _ => Ok(ExtraField::Unknown {
                field_type,
                data: payload,
            }),
        };

        Some(field)
    }
}

/// Emit a ZIP64 subfield carrying the given oversized values.
///
/// Emitted even when all slots are empty, so a forced-ZIP64 entry still
/// carries the marker.
pub fn emit_zip64(
    writer: &mut BinaryWriter,
    uncompressed_size: Option<u64>,
    compressed_size: Option<u64>,
    disk_offset: Option<u64>,
) {
    let count = [uncompressed_size, compressed_size, disk_offset]
        .iter()
        .flatten()
        .count();

    writer.write_u16(field_type::ZIP64);
    writer.write_u16(8 * count as u16);
    if let Some(size) = uncompressed_size {
        writer.write_u64(size);
    }
    if let Some(size) = compressed_size {
        writer.write_u64(size);
    }
    if let Some(offset) = disk_offset {
        writer.write_u64(offset);
    }
}

/// Byte length of a ZIP64 subfield payload for the given slot count.
pub fn zip64_payload_size(slots: u16) -> u16 {
    8 * slots
}

/// Emit an NTFS subfield carrying all three POSIX timestamps.
pub fn emit_ntfs(writer: &mut BinaryWriter, modified: i64, accessed: i64, creation: i64) {
    const PAYLOAD_SIZE: u16 = 4 + 2 + 2 + 8 + 8 + 8;

    writer.write_u16(field_type::NTFS);
    writer.write_u16(PAYLOAD_SIZE);
    writer.write_u32(0); // reserved
    writer.write_u16(0x01);
    writer.write_u16(PAYLOAD_SIZE - 8);
    writer.write_u64(crate::time::unix_to_ntfs(modified));
    writer.write_u64(crate::time::unix_to_ntfs(accessed));
    writer.write_u64(crate::time::unix_to_ntfs(creation));
}

/// Emit an AES subfield.
pub fn emit_aes(writer: &mut BinaryWriter, version: u16, strength: u8, compression_method: u16) {
    writer.write_u16(field_type::AES);
    writer.write_u16(7);
    writer.write_u16(version);
    writer.write_u8(b'A');
    writer.write_u8(b'E');
    writer.write_u8(strength);
    writer.write_u16(compression_method);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zip64_reads_only_sentinel_slots() {
        let mut writer = BinaryWriter::new();
        emit_zip64(&mut writer, Some(0x1_0000_0001), None, Some(0x2_0000_0002));

        let ctx = Zip64Context {
            uncompressed_size: true,
            disk_offset: true,
            ..Default::default()
        };
        let fields: Vec<_> = ExtraFields::new(writer.as_slice(), ctx)
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(
            fields,
            vec![ExtraField::Zip64 {
                uncompressed_size: Some(0x1_0000_0001),
                compressed_size: None,
                disk_offset: Some(0x2_0000_0002),
                disk_number: None,
            }]
        );
    }

    #[test]
    fn test_ntfs_roundtrip_and_inner_skip() {
        let mut writer = BinaryWriter::new();
        emit_ntfs(&mut writer, 1234567890, 1234567891, 1234567892);

        // Append an NTFS record with an unknown inner attribute.
        writer.write_u16(field_type::NTFS);
        writer.write_u16(4 + 2 + 2 + 4);
        writer.write_u32(0);
        writer.write_u16(0x7f);
        writer.write_u16(4);
        writer.write_u32(0xdeadbeef);

        let fields: Vec<_> = ExtraFields::new(writer.as_slice(), Zip64Context::default())
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(fields.len(), 2);
        match fields[0] {
            ExtraField::Ntfs {
                modified: Some(m),
                accessed: Some(a),
                creation: Some(c),
            } => {
                assert_eq!(crate::time::ntfs_to_unix(m), 1234567890);
                assert_eq!(crate::time::ntfs_to_unix(a), 1234567891);
                assert_eq!(crate::time::ntfs_to_unix(c), 1234567892);
            }
            ref other => panic!("unexpected field: {other:?}"),
        }
        assert!(matches!(
            fields[1],
            ExtraField::Ntfs {
                modified: None,
                accessed: None,
                creation: None
            }
        ));
    }

    #[test]
    fn test_unix1_short_payload() {
        // A 12-byte UNIX1 record: timestamps plus uid/gid, no tail.
        let mut writer = BinaryWriter::new();
        writer.write_u16(field_type::UNIX1);
        writer.write_u16(12);
        writer.write_u32(111);
        writer.write_u32(222);
        writer.write_u16(1000);
        writer.write_u16(1000);

        let fields: Vec<_> = ExtraFields::new(writer.as_slice(), Zip64Context::default())
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(
            fields,
            vec![ExtraField::Unix1 {
                accessed: 111,
                modified: 222
            }]
        );
    }

    #[test]
    fn test_aes_marker_validation() {
        let mut writer = BinaryWriter::new();
        emit_aes(&mut writer, 2, 3, 8);

        let fields: Vec<_> = ExtraFields::new(writer.as_slice(), Zip64Context::default())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            fields,
            vec![ExtraField::Aes {
                version: 2,
                strength: 3,
                compression_method: 8
            }]
        );

        // Corrupt the 'A' marker byte.
        let mut bytes = writer.into_vec();
        bytes[6] = b'X';
        let result: Result<Vec<_>> =
            ExtraFields::new(&bytes, Zip64Context::default()).collect();
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_preserved() {
        let mut writer = BinaryWriter::new();
        writer.write_u16(0x5455); // extended timestamp, not decoded here
        writer.write_u16(5);
        writer.write_bytes(&[1, 2, 3, 4, 5]);

        let fields: Vec<_> = ExtraFields::new(writer.as_slice(), Zip64Context::default())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            fields,
            vec![ExtraField::Unknown {
                field_type: 0x5455,
                data: &[1, 2, 3, 4, 5]
            }]
        );
    }
}
