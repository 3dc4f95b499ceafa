//! End-of-central-directory discovery and emission.
//!
//! Reading starts from the back of the archive: locate the classic EOCD
//! by scanning backwards over the comment-sized tail, upgrade through
//! the ZIP64 locator when the classic fields carry sentinels, then
//! sanity-check and, for one well-known producer bug, re-derive the
//! central directory offset.

use kovcheg_common::{BinaryReader, BinaryWriter};
use memchr::memmem;

use crate::error::{Result, ZipError};
use crate::record::{
    CentralFileHeader, Eocd64Locator, Eocd64Record, EocdRecord, EOCD64_LOCATOR_SIZE, EOCD_SIZE,
};
use crate::stream::{MemStream, SeekFrom, Stream, StreamExt, StreamProp};

/// Resolved central-directory extents.
#[derive(Debug, Clone, Default)]
pub(crate) struct CentralDirInfo {
    pub disk_number_with_cd: u32,
    pub number_entry: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
    pub version_madeby: u16,
    pub comment: Option<String>,
    /// Correction added to every stored local-header offset; nonzero
    /// only for archives shifted after creation (see below).
    pub disk_offset_shift: u64,
}

/// Locate the classic EOCD signature by scanning backwards.
///
/// The record sits in the last `comment_max + record` bytes of the
/// archive; the scan slides a window from the end, overlapping chunks
/// by the signature length, and the first hit from the end wins.
pub(crate) fn find_eocd(stream: &mut dyn Stream) -> Result<u64> {
    const WINDOW: usize = 1024;

    let file_size = stream.seek(SeekFrom::End(0))?;
    let max_back = (u16::MAX as u64 + EOCD_SIZE as u64).min(file_size);
    let finder = memmem::FinderRev::new(&EocdRecord::MAGIC);

    let mut buf = [0u8; WINDOW + 4];
    let mut back_read: u64 = 0;

    while back_read < max_back {
        back_read = (back_read + WINDOW as u64).min(max_back);
        let read_pos = file_size - back_read;
        let read_size = (buf.len() as u64).min(file_size - read_pos) as usize;

        stream.seek(SeekFrom::Start(read_pos))?;
        stream.read_exact(&mut buf[..read_size])?;

        if let Some(index) = finder.rfind(&buf[..read_size]) {
            return Ok(read_pos + index as u64);
        }
    }

    Err(ZipError::Format("end of central directory not found"))
}

/// Read the ZIP64 EOCD chain hanging off a classic EOCD at `eocd_pos`.
///
/// Returns the ZIP64 record and its file position.
fn read_zip64_eocd(stream: &mut dyn Stream, eocd_pos: u64) -> Result<(Eocd64Record, u64)> {
    let locator_pos = eocd_pos
        .checked_sub(EOCD64_LOCATOR_SIZE as u64)
        .ok_or(ZipError::Format("no room for ZIP64 locator"))?;

    stream.seek(SeekFrom::Start(locator_pos))?;
    if stream.read_u32()? != Eocd64Locator::SIGNATURE {
        return Err(ZipError::Format("ZIP64 locator missing"));
    }
    let mut buf = [0u8; std::mem::size_of::<Eocd64Locator>()];
    stream.read_exact(&mut buf)?;
    let locator: Eocd64Locator = BinaryReader::new(&buf).read_struct()?;

    stream.seek(SeekFrom::Start(locator.eocd64_offset))?;
    if stream.read_u32()? != Eocd64Record::SIGNATURE {
        return Err(ZipError::Format("ZIP64 end of central directory missing"));
    }
    let mut buf = [0u8; std::mem::size_of::<Eocd64Record>()];
    stream.read_exact(&mut buf)?;
    let record: Eocd64Record = BinaryReader::new(&buf).read_struct()?;

    Ok((record, locator.eocd64_offset))
}

/// Discover and resolve the central directory of an existing archive.
pub(crate) fn read_central_dir(stream: &mut dyn Stream) -> Result<CentralDirInfo> {
    let mut eocd_pos = find_eocd(stream)?;

    stream.seek(SeekFrom::Start(eocd_pos + 4))?;
    let mut buf = [0u8; std::mem::size_of::<EocdRecord>()];
    stream.read_exact(&mut buf)?;
    let eocd: EocdRecord = BinaryReader::new(&buf).read_struct()?;

    if eocd.cd_entries_disk != eocd.cd_entries_total {
        return Err(ZipError::Format("inconsistent entry counts"));
    }

    let mut info = CentralDirInfo {
        disk_number_with_cd: eocd.cd_disk as u32,
        number_entry: eocd.cd_entries_total as u64,
        cd_size: eocd.cd_size as u64,
        cd_offset: eocd.cd_offset as u64,
        ..Default::default()
    };

    if eocd.comment_size > 0 {
        let mut comment = vec![0u8; eocd.comment_size as usize];
        stream.read_exact(&mut comment)?;
        info.comment = Some(String::from_utf8_lossy(&comment).into_owned());
    }

    if eocd.is_zip64() {
        let (eocd64, eocd64_pos) = read_zip64_eocd(stream, eocd_pos)?;
        eocd_pos = eocd64_pos;

        info.version_madeby = eocd64.version_madeby;
        info.disk_number_with_cd = eocd64.cd_disk;
        info.number_entry = eocd64.cd_entries_total;
        info.cd_size = eocd64.cd_size;
        info.cd_offset = eocd64.cd_offset;
    }

    if eocd_pos < info.cd_offset + info.cd_size {
        return Err(ZipError::Format("central directory extends past its end record"));
    }

    // Some producers shift an archive (self-extractor stubs, prepended
    // data) without rewriting the stored offsets. If no central header
    // lives at the stated offset but one does at eocd - cd_size, adopt
    // the corrected offset and remember the shift for entry seeks.
    stream.seek(SeekFrom::Start(info.cd_offset))?;
    if stream.read_u32().unwrap_or(0) != CentralFileHeader::SIGNATURE {
        let derived_offset = eocd_pos - info.cd_size;
        stream.seek(SeekFrom::Start(derived_offset))?;
        if stream.read_u32().unwrap_or(0) == CentralFileHeader::SIGNATURE {
            info.disk_offset_shift = derived_offset - info.cd_offset;
            info.cd_offset = derived_offset;
        }
    }

    Ok(info)
}

/// Emitted central-directory extents.
pub(crate) struct WrittenCentralDir {
    pub cd_offset: u64,
    pub cd_size: u64,
    pub disk_number_with_cd: u32,
}

/// Flush the staged central directory and emit the EOCD chain.
///
/// The ZIP64 record and locator appear only when an extent outgrows the
/// classic fields; the classic EOCD is always written, with oversized
/// fields clamped to their sentinels. The comment comes last.
pub(crate) fn write_central_dir(
    stream: &mut dyn Stream,
    cd_mem: &mut MemStream,
    number_entry: u64,
    version_madeby: u16,
    comment: Option<&str>,
) -> Result<WrittenCentralDir> {
    let mut disk_number_with_cd = stream
        .get_prop(StreamProp::DiskNumber)
        .map(|disk| disk.max(0) as u32)
        .unwrap_or(0);
    if stream.get_prop(StreamProp::DiskSize).unwrap_or(0) > 0 {
        disk_number_with_cd += 1;
    }

    let cd_offset = stream.tell()?;
    let cd_size = cd_mem.len();
    cd_mem.seek(SeekFrom::Start(0))?;
    stream.copy_from(cd_mem, cd_size)?;

    let mut writer = BinaryWriter::with_capacity(EOCD_SIZE + 128);

    if cd_offset > u32::MAX as u64 || number_entry > u16::MAX as u64 {
        let eocd64_pos = cd_offset + cd_size;

        writer.write_u32(Eocd64Record::SIGNATURE);
        writer.write_struct(&Eocd64Record {
            record_size: Eocd64Record::FIXED_RECORD_SIZE,
            version_madeby,
            version_needed: 45,
            disk_number: disk_number_with_cd,
            cd_disk: disk_number_with_cd,
            cd_entries_disk: number_entry,
            cd_entries_total: number_entry,
            cd_size,
            cd_offset,
        });

        writer.write_u32(Eocd64Locator::SIGNATURE);
        writer.write_struct(&Eocd64Locator {
            eocd64_disk: disk_number_with_cd,
            eocd64_offset: eocd64_pos,
            total_disks: disk_number_with_cd + 1,
        });
    }

    let comment = comment.unwrap_or("");
    if comment.len() > u16::MAX as usize {
        return Err(ZipError::Param("archive comment too long"));
    }

    writer.write_u32(EocdRecord::SIGNATURE);
    writer.write_struct(&EocdRecord {
        disk_number: disk_number_with_cd.min(u16::MAX as u32) as u16,
        cd_disk: disk_number_with_cd.min(u16::MAX as u32) as u16,
        cd_entries_disk: number_entry.min(u16::MAX as u64) as u16,
        cd_entries_total: number_entry.min(u16::MAX as u64) as u16,
        cd_size: cd_size.min(u32::MAX as u64) as u32,
        cd_offset: cd_offset.min(u32::MAX as u64) as u32,
        comment_size: comment.len() as u16,
    });
    writer.write_bytes(comment.as_bytes());

    stream.write_all(writer.as_slice())?;

    Ok(WrittenCentralDir {
        cd_offset,
        cd_size,
        disk_number_with_cd,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::FileInfo;
    use crate::header::write_file_header;

    /// One fake central record staged in memory.
    fn staged_cd() -> MemStream {
        let mut cd = MemStream::new();
        let info = FileInfo {
            filename: "a.txt".to_string(),
            uncompressed_size: 5,
            compressed_size: 5,
            ..Default::default()
        };
        write_file_header(&mut cd, false, &info).unwrap();
        cd
    }

    #[test]
    fn test_emit_then_discover() {
        let mut cd = staged_cd();
        let cd_len = cd.len();
        let mut archive = MemStream::new();
        // Pretend payload bytes precede the central directory.
        archive.write_all(&[0u8; 100]).unwrap();

        let written =
            write_central_dir(&mut archive, &mut cd, 1, 20, Some("archive comment")).unwrap();
        assert_eq!(written.cd_offset, 100);
        assert_eq!(written.cd_size, cd_len);

        let info = read_central_dir(&mut archive).unwrap();
        assert_eq!(info.number_entry, 1);
        assert_eq!(info.cd_offset, 100);
        assert_eq!(info.cd_size, cd_len);
        assert_eq!(info.comment.as_deref(), Some("archive comment"));
        assert_eq!(info.disk_offset_shift, 0);
    }

    #[test]
    fn test_discover_with_max_comment() {
        let mut cd = staged_cd();
        let mut archive = MemStream::new();
        archive.write_all(&[0u8; 64]).unwrap();

        let comment = "c".repeat(u16::MAX as usize);
        write_central_dir(&mut archive, &mut cd, 1, 20, Some(&comment)).unwrap();

        let info = read_central_dir(&mut archive).unwrap();
        assert_eq!(info.comment.map(|c| c.len()), Some(u16::MAX as usize));
    }

    #[test]
    fn test_comment_too_long_rejected() {
        let mut cd = staged_cd();
        let mut archive = MemStream::new();
        let comment = "c".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            write_central_dir(&mut archive, &mut cd, 1, 20, Some(&comment)),
            Err(ZipError::Param(_))
        ));
    }

    #[test]
    fn test_zip64_promotion_by_entry_count() {
        let mut cd = staged_cd();
        let cd_len = cd.len();
        let mut archive = MemStream::new();

        write_central_dir(&mut archive, &mut cd, 70000, 45, None).unwrap();

        // Classic record carries the sentinel, the ZIP64 chain is present.
        let info = read_central_dir(&mut archive).unwrap();
        assert_eq!(info.number_entry, 70000);
        assert_eq!(info.cd_size, cd_len);
        assert_eq!(info.version_madeby, 45);
    }

    #[test]
    fn test_no_zip64_at_exactly_65535_entries() {
        let mut cd = staged_cd();
        let mut archive = MemStream::new();

        write_central_dir(&mut archive, &mut cd, u16::MAX as u64, 20, None).unwrap();

        // No locator: the bytes right before the EOCD are CD payload.
        let bytes = archive.as_slice();
        let eocd_pos = bytes.len() - EOCD_SIZE;
        assert_eq!(
            &bytes[eocd_pos..eocd_pos + 4],
            &EocdRecord::SIGNATURE.to_le_bytes()
        );
        assert!(eocd_pos < EOCD64_LOCATOR_SIZE
            || bytes[eocd_pos - EOCD64_LOCATOR_SIZE..eocd_pos][..4]
                != Eocd64Locator::SIGNATURE.to_le_bytes());
    }

    #[test]
    fn test_producer_bug_offset_shift() {
        let mut cd = staged_cd();
        let cd_len = cd.len();

        // The central directory really starts at 612, but the EOCD
        // claims 100: a 512-byte stub was prepended after creation.
        let mut archive = MemStream::new();
        archive.write_all(&[0u8; 612]).unwrap();
        cd.seek(SeekFrom::Start(0)).unwrap();
        archive.copy_from(&mut cd, cd_len).unwrap();

        let mut writer = BinaryWriter::new();
        writer.write_u32(EocdRecord::SIGNATURE);
        writer.write_struct(&EocdRecord {
            disk_number: 0,
            cd_disk: 0,
            cd_entries_disk: 1,
            cd_entries_total: 1,
            cd_size: cd_len as u32,
            cd_offset: 100,
            comment_size: 0,
        });
        archive.write_all(writer.as_slice()).unwrap();

        let info = read_central_dir(&mut archive).unwrap();
        assert_eq!(info.disk_offset_shift, 512);
        assert_eq!(info.cd_offset, 612);
    }

    #[test]
    fn test_impossible_extent_is_format_error() {
        let mut archive = MemStream::new();
        let mut writer = BinaryWriter::new();
        writer.write_u32(EocdRecord::SIGNATURE);
        writer.write_struct(&EocdRecord {
            disk_number: 0,
            cd_disk: 0,
            cd_entries_disk: 1,
            cd_entries_total: 1,
            cd_size: 500,
            cd_offset: 100,
            comment_size: 0,
        });
        archive.write_all(writer.as_slice()).unwrap();

        // eocd_pos (0) < cd_offset + cd_size.
        assert!(matches!(
            read_central_dir(&mut archive),
            Err(ZipError::Format(_))
        ));
    }

    #[test]
    fn test_missing_eocd() {
        let mut archive = MemStream::from_vec(vec![0u8; 4000]);
        assert!(matches!(find_eocd(&mut archive), Err(ZipError::Format(_))));
    }

    #[test]
    fn test_inconsistent_counts_rejected() {
        let mut archive = MemStream::new();
        let mut writer = BinaryWriter::new();
        writer.write_u32(EocdRecord::SIGNATURE);
        writer.write_struct(&EocdRecord {
            disk_number: 0,
            cd_disk: 0,
            cd_entries_disk: 1,
            cd_entries_total: 2,
            cd_size: 0,
            cd_offset: 0,
            comment_size: 0,
        });
        archive.write_all(writer.as_slice()).unwrap();

        assert!(matches!(
            read_central_dir(&mut archive),
            Err(ZipError::Format(_))
        ));
    }
}
