//! Entry header codec.
//!
//! One reader handles both the local and central record, parameterised
//! by `local`; the central record carries seven trailing fields the
//! local one lacks. On emission the extra-field area is recomputed from
//! the logical record: caller-supplied subfields are copied through
//! except the ZIP64 and NTFS types, which the emitter owns.

use kovcheg_common::{BinaryReader, BinaryWriter};

use crate::attrib;
use crate::entry::{flags, CompressionMethod, FileInfo, Zip64Policy};
use crate::error::{Result, ZipError};
use crate::extra::{self, ExtraField, ExtraFields, Zip64Context};
use crate::record::{CentralFileHeader, Eocd64Record, EocdRecord, LocalFileHeader};
use crate::stream::{Stream, StreamExt};
use crate::time;

/// Read a local or central file header at the current stream position.
///
/// Hitting either EOCD signature, or the end of the stream, terminates
/// iteration with [`ZipError::EndOfList`]; any other unexpected magic is
/// a format error.
pub(crate) fn read_file_header(stream: &mut dyn Stream, local: bool) -> Result<FileInfo> {
    let magic = match stream.read_u32() {
        Ok(magic) => magic,
        Err(ZipError::EndOfStream) => return Err(ZipError::EndOfList),
        Err(err) => return Err(err),
    };
    if magic == EocdRecord::SIGNATURE || magic == Eocd64Record::SIGNATURE {
        return Err(ZipError::EndOfList);
    }
    let expected = if local {
        LocalFileHeader::SIGNATURE
    } else {
        CentralFileHeader::SIGNATURE
    };
    if magic != expected {
        return Err(ZipError::Signature {
            expected,
            actual: magic,
        });
    }

    let mut file_info = FileInfo::default();
    let dos_date;

    if local {
        let mut buf = [0u8; std::mem::size_of::<LocalFileHeader>()];
        stream.read_exact(&mut buf)?;
        let header: LocalFileHeader = BinaryReader::new(&buf).read_struct()?;

        file_info.version_needed = header.version_needed;
        file_info.flag = header.flags;
        file_info.compression_method = header.compression_method;
        dos_date = header.dos_date;
        file_info.crc = header.crc32;
        file_info.compressed_size = header.compressed_size as u64;
        file_info.uncompressed_size = header.uncompressed_size as u64;
        file_info.filename_size = header.filename_size;
        file_info.extrafield_size = header.extrafield_size;
    } else {
        let mut buf = [0u8; std::mem::size_of::<CentralFileHeader>()];
        stream.read_exact(&mut buf)?;
        let header: CentralFileHeader = BinaryReader::new(&buf).read_struct()?;

        file_info.version_madeby = header.version_madeby;
        file_info.version_needed = header.version_needed;
        file_info.flag = header.flags;
        file_info.compression_method = header.compression_method;
        dos_date = header.dos_date;
        file_info.crc = header.crc32;
        file_info.compressed_size = header.compressed_size as u64;
        file_info.uncompressed_size = header.uncompressed_size as u64;
        file_info.filename_size = header.filename_size;
        file_info.extrafield_size = header.extrafield_size;
        file_info.comment_size = header.comment_size;
        file_info.disk_number = header.disk_number_start as u32;
        file_info.internal_fa = header.internal_fa;
        file_info.external_fa = header.external_fa;
        file_info.disk_offset = header.local_header_offset as u64;
    }

    if dos_date != 0 {
        file_info.modified_date = time::dos_to_unix(dos_date);
    }

    if file_info.filename_size > 0 {
        let mut name = vec![0u8; file_info.filename_size as usize];
        stream.read_exact(&mut name)?;
        file_info.filename = String::from_utf8_lossy(&name).into_owned();
    }

    if file_info.extrafield_size > 0 {
        let mut extrafield = vec![0u8; file_info.extrafield_size as usize];
        stream.read_exact(&mut extrafield)?;

        let ctx = Zip64Context {
            uncompressed_size: file_info.uncompressed_size == u32::MAX as u64,
            compressed_size: file_info.compressed_size == u32::MAX as u64,
            disk_offset: !local && file_info.disk_offset == u32::MAX as u64,
            disk_number: !local && file_info.disk_number == u16::MAX as u32,
        };

        for field in ExtraFields::new(&extrafield, ctx) {
            match field? {
                ExtraField::Zip64 {
                    uncompressed_size,
                    compressed_size,
                    disk_offset,
                    disk_number,
                } => {
                    if let Some(size) = uncompressed_size {
                        file_info.uncompressed_size = size;
                    }
                    if let Some(size) = compressed_size {
                        file_info.compressed_size = size;
                    }
                    if let Some(offset) = disk_offset {
                        file_info.disk_offset = offset;
                    }
                    if let Some(disk) = disk_number {
                        file_info.disk_number = disk;
                    }
                }
                ExtraField::Ntfs {
                    modified,
                    accessed,
                    creation,
                } => {
                    if let Some(ticks) = modified {
                        file_info.modified_date = time::ntfs_to_unix(ticks);
                    }
                    if let Some(ticks) = accessed {
                        file_info.accessed_date = time::ntfs_to_unix(ticks);
                    }
                    if let Some(ticks) = creation {
                        file_info.creation_date = time::ntfs_to_unix(ticks);
                    }
                }
                ExtraField::Unix1 { accessed, modified } => {
                    // Fills gaps only; an NTFS subfield earlier in the
                    // area wins for fields it already set.
                    if file_info.accessed_date == 0 {
                        file_info.accessed_date = accessed as i64;
                    }
                    if file_info.modified_date == 0 {
                        file_info.modified_date = modified as i64;
                    }
                }
                ExtraField::Aes {
                    version,
                    strength,
                    compression_method,
                } => {
                    file_info.aes_version = version;
                    file_info.aes_encryption_mode = strength;
                    // The outer record says 99; this is the real method.
                    file_info.compression_method = compression_method;
                }
                ExtraField::Unknown { .. } => {}
            }
        }

        file_info.extrafield = extrafield;
    }

    if !local && file_info.comment_size > 0 {
        let mut comment = vec![0u8; file_info.comment_size as usize];
        stream.read_exact(&mut comment)?;
        file_info.comment = String::from_utf8_lossy(&comment).into_owned();
    }

    Ok(file_info)
}

/// Caller-supplied TLVs as raw `(type, payload)` pairs.
///
/// Stops at the first malformed record, keeping everything parsed so
/// far, the way a tolerant reader would.
fn raw_subfields(extrafield: &[u8]) -> Vec<(u16, &[u8])> {
    let mut reader = BinaryReader::new(extrafield);
    let mut subfields = Vec::new();

    while reader.remaining() >= 4 {
        let Ok(field_type) = reader.read_u16() else { break };
        let Ok(field_size) = reader.read_u16() else { break };
        let Ok(payload) = reader.read_bytes(field_size as usize) else {
            break;
        };
        subfields.push((field_type, payload));
    }
    subfields
}

/// Write a local or central file header for `file_info`.
pub(crate) fn write_file_header(
    stream: &mut dyn Stream,
    local: bool,
    file_info: &FileInfo,
) -> Result<()> {
    // Only oversized fields occupy ZIP64 slots; a value of exactly
    // 2^32 - 1 still fits the classic field.
    let zip64_uncompressed = file_info.uncompressed_size > u32::MAX as u64;
    let zip64_compressed = file_info.compressed_size > u32::MAX as u64;
    let zip64_offset = file_info.disk_offset > u32::MAX as u64;
    let zip64_slots =
        u16::from(zip64_uncompressed) + u16::from(zip64_compressed) + u16::from(zip64_offset);

    let zip64 = match file_info.zip64 {
        Zip64Policy::Auto => zip64_slots > 0,
        Zip64Policy::Force => true,
        Zip64Policy::Disable => {
            if zip64_slots > 0 {
                return Err(ZipError::Param("entry requires ZIP64 but it is disabled"));
            }
            false
        }
    };

    let mut extrafield_size: u16 = 0;
    if zip64 {
        extrafield_size += 4 + extra::zip64_payload_size(zip64_slots);
    }

    // Caller subfields pass through, except the types the emitter owns.
    // A caller-supplied AES subfield is authoritative and suppresses ours.
    let subfields = raw_subfields(&file_info.extrafield);
    let mut skip_aes = false;
    for (field_type, payload) in &subfields {
        if *field_type == extra::field_type::AES {
            skip_aes = true;
        }
        if *field_type != extra::field_type::ZIP64 && *field_type != extra::field_type::NTFS {
            extrafield_size += 4 + payload.len() as u16;
        }
    }

    let write_aes = !skip_aes && file_info.flag & flags::ENCRYPTED != 0 && file_info.aes_version != 0;
    if write_aes {
        extrafield_size += 4 + 7;
    }

    let write_ntfs = file_info.modified_date != 0
        && file_info.accessed_date != 0
        && file_info.creation_date != 0;
    if write_ntfs {
        extrafield_size += 4 + 32;
    }

    let version_needed = if file_info.version_needed != 0 {
        file_info.version_needed
    } else {
        let mut version = 20;
        if zip64 {
            version = 45;
        }
        if file_info.flag & flags::ENCRYPTED != 0 && file_info.aes_version != 0 {
            version = 51;
        }
        if file_info.compression_method == CompressionMethod::Lzma as u16 {
            version = 63;
        }
        version
    };

    let compression_method = if file_info.aes_version != 0 {
        CompressionMethod::Aes as u16
    } else {
        file_info.compression_method
    };

    let dos_date = if file_info.modified_date != 0 {
        time::unix_to_dos(file_info.modified_date)
    } else {
        0
    };

    let crc32 = file_info.crc;
    let compressed_size = file_info.compressed_size.min(u32::MAX as u64) as u32;
    let uncompressed_size = file_info.uncompressed_size.min(u32::MAX as u64) as u32;

    // Directories carry exactly one trailing slash on the wire.
    let is_dir = attrib::is_dir(file_info.external_fa, file_info.version_madeby);
    let base_name = if is_dir {
        file_info
            .filename
            .strip_suffix(['/', '\\'])
            .unwrap_or(&file_info.filename)
    } else {
        file_info.filename.as_str()
    };
    let filename_size = base_name.len() + usize::from(is_dir);
    if filename_size > u16::MAX as usize {
        return Err(ZipError::Param("filename too long"));
    }
    let filename_size = filename_size as u16;

    let comment_size = file_info.comment.len();
    if comment_size > u16::MAX as usize {
        return Err(ZipError::Param("entry comment too long"));
    }

    let mut writer = BinaryWriter::with_capacity(
        crate::record::CENTRAL_HEADER_SIZE
            + filename_size as usize
            + extrafield_size as usize
            + comment_size,
    );

    if local {
        writer.write_u32(LocalFileHeader::SIGNATURE);
        writer.write_struct(&LocalFileHeader {
            version_needed,
            flags: file_info.flag,
            compression_method,
            dos_date,
            crc32,
            compressed_size,
            uncompressed_size,
            filename_size,
            extrafield_size,
        });
    } else {
        writer.write_u32(CentralFileHeader::SIGNATURE);
        writer.write_struct(&CentralFileHeader {
            version_madeby: file_info.version_madeby,
            version_needed,
            flags: file_info.flag,
            compression_method,
            dos_date,
            crc32,
            compressed_size,
            uncompressed_size,
            filename_size,
            extrafield_size,
            comment_size: comment_size as u16,
            disk_number_start: file_info.disk_number.min(u16::MAX as u32) as u16,
            internal_fa: file_info.internal_fa,
            external_fa: file_info.external_fa,
            local_header_offset: file_info.disk_offset.min(u32::MAX as u64) as u32,
        });
    }

    writer.write_bytes(base_name.as_bytes());
    if is_dir {
        writer.write_u8(b'/');
    }

    for (field_type, payload) in &subfields {
        if *field_type == extra::field_type::ZIP64 || *field_type == extra::field_type::NTFS {
            continue;
        }
        writer.write_u16(*field_type);
        writer.write_u16(payload.len() as u16);
        writer.write_bytes(payload);
    }

    if zip64 {
        extra::emit_zip64(
            &mut writer,
            zip64_uncompressed.then_some(file_info.uncompressed_size),
            zip64_compressed.then_some(file_info.compressed_size),
            zip64_offset.then_some(file_info.disk_offset),
        );
    }
    if write_ntfs {
        extra::emit_ntfs(
            &mut writer,
            file_info.modified_date,
            file_info.accessed_date,
            file_info.creation_date,
        );
    }
    if write_aes {
        extra::emit_aes(
            &mut writer,
            file_info.aes_version,
            file_info.aes_encryption_mode,
            file_info.compression_method,
        );
    }

    if !local {
        writer.write_bytes(file_info.comment.as_bytes());
    }

    stream.write_all(writer.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{MemStream, SeekFrom};

    fn sample_info() -> FileInfo {
        FileInfo {
            version_madeby: 3 << 8 | 20,
            flag: flags::DATA_DESCRIPTOR,
            compression_method: CompressionMethod::Deflate as u16,
            modified_date: 1234567890,
            crc: 0xCAFEBABE,
            compressed_size: 420,
            uncompressed_size: 1337,
            disk_offset: 64,
            filename: "dir/file.txt".to_string(),
            comment: "an entry comment".to_string(),
            ..Default::default()
        }
    }

    fn emit_then_parse(info: &FileInfo, local: bool) -> FileInfo {
        let mut stream = MemStream::new();
        write_file_header(&mut stream, local, info).unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();
        read_file_header(&mut stream, local).unwrap()
    }

    #[test]
    fn test_central_roundtrip() {
        let info = sample_info();
        let parsed = emit_then_parse(&info, false);

        assert_eq!(parsed.filename, info.filename);
        assert_eq!(parsed.comment, info.comment);
        assert_eq!(parsed.crc, info.crc);
        assert_eq!(parsed.compressed_size, info.compressed_size);
        assert_eq!(parsed.uncompressed_size, info.uncompressed_size);
        assert_eq!(parsed.disk_offset, info.disk_offset);
        assert_eq!(parsed.version_madeby, info.version_madeby);
        assert_eq!(parsed.version_needed, 20);
        assert_eq!(parsed.flag, info.flag);
        // DOS storage has 2-second resolution.
        assert!((parsed.modified_date - info.modified_date).abs() <= 1);
    }

    #[test]
    fn test_local_roundtrip() {
        let info = sample_info();
        let parsed = emit_then_parse(&info, true);

        assert_eq!(parsed.filename, info.filename);
        assert_eq!(parsed.compressed_size, info.compressed_size);
        assert_eq!(parsed.uncompressed_size, info.uncompressed_size);
        // Local records never carry the central-only fields.
        assert_eq!(parsed.comment, "");
        assert_eq!(parsed.disk_offset, 0);
    }

    #[test]
    fn test_zip64_promotion_at_exactly_2_to_32() {
        let mut info = sample_info();

        // 2^32 - 1 stays classic: no extra field at all.
        info.uncompressed_size = u32::MAX as u64;
        let mut stream = MemStream::new();
        write_file_header(&mut stream, false, &info).unwrap();
        let bytes = stream.into_vec();
        assert_eq!(&bytes[30..32], &0u16.to_le_bytes());

        // 2^32 needs the uncompressed-size slot.
        info.uncompressed_size = 1 << 32;
        let parsed = emit_then_parse(&info, false);
        assert_eq!(parsed.uncompressed_size, 1 << 32);
        // On the wire the classic field is the sentinel.
        let mut stream = MemStream::new();
        write_file_header(&mut stream, false, &info).unwrap();
        let bytes = stream.into_vec();
        assert_eq!(&bytes[24..28], &u32::MAX.to_le_bytes());
        // ZIP64 subfield: type 1, payload 8 (one slot).
        let extra_start = 46 + info.filename.len();
        assert_eq!(&bytes[extra_start..extra_start + 4], &[0x01, 0x00, 0x08, 0x00]);
    }

    #[test]
    fn test_zip64_disable_rejects_oversized() {
        let mut info = sample_info();
        info.zip64 = Zip64Policy::Disable;
        info.uncompressed_size = (1 << 32) + 5;

        let mut stream = MemStream::new();
        assert!(matches!(
            write_file_header(&mut stream, false, &info),
            Err(ZipError::Param(_))
        ));
    }

    #[test]
    fn test_zip64_force_emits_empty_subfield() {
        let mut info = sample_info();
        info.zip64 = Zip64Policy::Force;

        let mut stream = MemStream::new();
        write_file_header(&mut stream, false, &info).unwrap();
        let bytes = stream.into_vec();
        let extra_start = 46 + info.filename.len();
        assert_eq!(&bytes[extra_start..extra_start + 4], &[0x01, 0x00, 0x00, 0x00]);

        let parsed = emit_then_parse(&info, false);
        assert_eq!(parsed.version_needed, 45);
    }

    #[test]
    fn test_directory_slash_normalisation() {
        let mut info = sample_info();
        info.external_fa = 0o040755 << 16;
        info.comment.clear();

        for name in ["assets", "assets/", "assets\\"] {
            info.filename = name.to_string();
            let parsed = emit_then_parse(&info, false);
            assert_eq!(parsed.filename, "assets/", "input {name:?}");
            assert!(parsed.is_dir());
        }
    }

    #[test]
    fn test_ntfs_timestamps_roundtrip() {
        let mut info = sample_info();
        info.modified_date = 1600000000;
        info.accessed_date = 1600000001;
        info.creation_date = 1600000002;

        let parsed = emit_then_parse(&info, false);
        assert_eq!(parsed.modified_date, 1600000000);
        assert_eq!(parsed.accessed_date, 1600000001);
        assert_eq!(parsed.creation_date, 1600000002);
    }

    #[test]
    fn test_aes_entry_stores_method_99() {
        let mut info = sample_info();
        info.flag |= flags::ENCRYPTED;
        info.aes_version = crate::entry::aes::VERSION_AE2;
        info.aes_encryption_mode = crate::entry::aes::MODE_256;

        let mut stream = MemStream::new();
        write_file_header(&mut stream, false, &info).unwrap();
        let bytes = stream.as_slice();
        // Method field at offset 10 of the central record.
        assert_eq!(&bytes[10..12], &99u16.to_le_bytes());

        stream.seek(SeekFrom::Start(0)).unwrap();
        let parsed = read_file_header(&mut stream, false).unwrap();
        // The AES subfield restores the real method.
        assert_eq!(parsed.compression_method, CompressionMethod::Deflate as u16);
        assert_eq!(parsed.aes_version, 2);
        assert_eq!(parsed.aes_encryption_mode, 3);
        assert_eq!(parsed.version_needed, 51);
    }

    #[test]
    fn test_caller_aes_subfield_is_authoritative() {
        let mut info = sample_info();
        info.flag |= flags::ENCRYPTED;
        info.aes_version = crate::entry::aes::VERSION_AE2;
        info.aes_encryption_mode = crate::entry::aes::MODE_256;

        // Caller supplies an AE-1/128 subfield of their own.
        let mut caller = BinaryWriter::new();
        extra::emit_aes(&mut caller, 1, 1, info.compression_method);
        info.extrafield = caller.into_vec();
        info.extrafield_size = info.extrafield.len() as u16;

        let parsed = emit_then_parse(&info, false);
        assert_eq!(parsed.aes_version, 1);
        assert_eq!(parsed.aes_encryption_mode, 1);
    }

    #[test]
    fn test_caller_zip64_and_ntfs_subfields_are_replaced() {
        let mut info = sample_info();

        // A stale caller ZIP64 subfield must not survive emission.
        let mut caller = BinaryWriter::new();
        extra::emit_zip64(&mut caller, Some(9999), None, None);
        caller.write_u16(0x5455);
        caller.write_u16(1);
        caller.write_u8(3);
        info.extrafield = caller.into_vec();
        info.extrafield_size = info.extrafield.len() as u16;

        let parsed = emit_then_parse(&info, false);
        assert_eq!(parsed.uncompressed_size, info.uncompressed_size);
        // The unknown subfield survives.
        assert!(ExtraFields::new(&parsed.extrafield, Zip64Context::default()).any(|f| matches!(
            f,
            Ok(ExtraField::Unknown {
                field_type: 0x5455,
                ..
            })
        )));
    }

    #[test]
    fn test_eocd_magic_terminates_iteration() {
        let mut stream = MemStream::new();
        stream.write_u32(EocdRecord::SIGNATURE).unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();
        assert!(matches!(
            read_file_header(&mut stream, false),
            Err(ZipError::EndOfList)
        ));

        let mut stream = MemStream::new();
        assert!(matches!(
            read_file_header(&mut stream, false),
            Err(ZipError::EndOfList)
        ));
    }

    #[test]
    fn test_wrong_magic_is_signature_error() {
        let mut stream = MemStream::new();
        stream.write_u32(0x12344321).unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();
        assert!(matches!(
            read_file_header(&mut stream, true),
            Err(ZipError::Signature { .. })
        ));
    }
}
