//! Archive handle: open modes, cursor, lookup, and entry lifecycle.

use std::path::Path;

use crate::entry::{aes, flags, CompressionMethod, FileInfo};
use crate::eocd;
use crate::error::{Result, ZipError};
use crate::header;
use crate::path;
use crate::pipeline::{Direction, EntryPipeline};
use crate::record::DATA_DESCRIPTOR_SIGNATURE;
use crate::stream::{
    FileStream, MemStream, MmapStream, OpenMode, SeekFrom, Stream, StreamExt, StreamProp,
};

/// "Version made by" for archives this library produces.
fn default_version_madeby() -> u16 {
    let host: u16 = if cfg!(windows) {
        0
    } else if cfg!(target_os = "macos") {
        19
    } else {
        3
    };
    (host << 8) | 45
}

/// A ZIP archive open for reading, writing, or appending.
///
/// The handle owns its storage stream and walks the central directory
/// with a sequential cursor; entries are opened one at a time and their
/// payload flows through a layered stream stack. All I/O is synchronous
/// and the handle is single-threaded; wrap it yourself if you need to
/// share it.
///
/// # Example
///
/// ```no_run
/// use kovcheg_zip::{OpenMode, ZipArchive};
///
/// let mut archive = ZipArchive::open_path("assets.zip", OpenMode::READ)?;
/// archive.goto_first_entry()?;
/// loop {
///     println!("{}", archive.entry_info()?.filename);
///     match archive.goto_next_entry() {
///         Ok(()) => {}
///         Err(kovcheg_zip::ZipError::EndOfList) => break,
///         Err(err) => return Err(err),
///     }
/// }
/// # Ok::<(), kovcheg_zip::ZipError>(())
/// ```
pub struct ZipArchive {
    /// Absent only while an entry pipeline owns the stream.
    storage: Option<Box<dyn Stream>>,
    /// Central-directory staging buffer; write modes only.
    cd_staging: Option<MemStream>,
    open_mode: OpenMode,

    disk_number_with_cd: u32,
    disk_offset_shift: u64,

    cd_start_pos: u64,
    cd_current_pos: u64,
    cd_offset: u64,
    cd_size: u64,

    number_entry: u64,
    version_madeby: u16,
    comment: Option<String>,

    file_info: FileInfo,
    local_file_info: FileInfo,
    entry_scanned: bool,
    entry: Option<EntryPipeline>,
}

impl ZipArchive {
    /// Open an archive over an arbitrary storage stream.
    ///
    /// Read and append modes discover the existing central directory;
    /// append additionally stages it in memory and repositions the
    /// stream so new entries overwrite the old catalog. Create skips
    /// discovery entirely.
    pub fn open(stream: Box<dyn Stream>, mode: OpenMode) -> Result<Self> {
        if mode.contains(OpenMode::APPEND) && !mode.contains(OpenMode::WRITE) {
            return Err(ZipError::Param("append requires write access"));
        }

        let mut archive = Self {
            storage: Some(stream),
            cd_staging: None,
            open_mode: mode,
            disk_number_with_cd: 0,
            disk_offset_shift: 0,
            cd_start_pos: 0,
            cd_current_pos: 0,
            cd_offset: 0,
            cd_size: 0,
            number_entry: 0,
            version_madeby: default_version_madeby(),
            comment: None,
            file_info: FileInfo::default(),
            local_file_info: FileInfo::default(),
            entry_scanned: false,
            entry: None,
        };

        if mode.contains(OpenMode::WRITE) {
            archive.cd_staging = Some(MemStream::new());
        }

        if mode.contains(OpenMode::READ) || mode.contains(OpenMode::APPEND) {
            if !mode.contains(OpenMode::CREATE) {
                let info = eocd::read_central_dir(archive.storage_mut()?)?;
                archive.disk_number_with_cd = info.disk_number_with_cd;
                archive.disk_offset_shift = info.disk_offset_shift;
                archive.number_entry = info.number_entry;
                archive.cd_offset = info.cd_offset;
                archive.cd_size = info.cd_size;
                archive.comment = info.comment;
                if info.version_madeby != 0 {
                    archive.version_madeby = info.version_madeby;
                }
            }

            if mode.contains(OpenMode::APPEND) {
                let (cd_offset, cd_size) = (archive.cd_offset, archive.cd_size);
                let Self {
                    storage: Some(storage),
                    cd_staging: Some(staging),
                    ..
                } = &mut archive
                else {
                    return Err(ZipError::Internal("append state missing"));
                };

                if cd_size > 0 {
                    // Keep the existing catalog in memory and let new
                    // entries overwrite it in the file.
                    storage.seek(SeekFrom::Start(cd_offset))?;
                    staging.copy_from(&mut **storage, cd_size)?;
                    storage.seek(SeekFrom::Start(cd_offset))?;
                } else {
                    storage.seek(SeekFrom::End(0))?;
                }
            } else {
                archive.cd_start_pos = archive.cd_offset;
            }
        }

        archive.cd_current_pos = archive.cd_start_pos;
        Ok(archive)
    }

    /// Open an archive file on disk.
    pub fn open_path<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        Self::open(Box::new(FileStream::open(path, mode)?), mode)
    }

    /// Open an archive file read-only through a memory map.
    pub fn open_mmap<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(Box::new(MmapStream::open(path)?), OpenMode::READ)
    }

    fn storage_mut(&mut self) -> Result<&mut (dyn Stream + '_)> {
        match self.storage.as_mut() {
            Some(storage) => Ok(&mut **storage),
            None => Err(ZipError::Param("an entry is open")),
        }
    }

    /// The stream the cursor reads central records from: the staging
    /// buffer in write modes, the storage itself otherwise.
    fn cd_stream_mut(&mut self) -> Result<&mut dyn Stream> {
        if self.open_mode.contains(OpenMode::WRITE) {
            Ok(self
                .cd_staging
                .as_mut()
                .ok_or(ZipError::Internal("central directory staging missing"))?)
        } else {
            self.storage_mut()
        }
    }

    /// Close the archive.
    ///
    /// An open entry is closed first, propagating its error. In write
    /// modes the staged central directory and the EOCD chain are
    /// flushed to storage.
    pub fn close(mut self) -> Result<()> {
        if self.entry.is_some() {
            self.entry_close()?;
        }

        if self.open_mode.contains(OpenMode::WRITE) {
            let number_entry = self.number_entry;
            let version_madeby = self.version_madeby;
            let comment = self.comment.take();

            let Self {
                storage: Some(storage),
                cd_staging: Some(staging),
                ..
            } = &mut self
            else {
                return Err(ZipError::Internal("write state missing"));
            };

            let written = eocd::write_central_dir(
                &mut **storage,
                staging,
                number_entry,
                version_madeby,
                comment.as_deref(),
            )?;
            self.cd_offset = written.cd_offset;
            self.cd_size = written.cd_size;
            self.disk_number_with_cd = written.disk_number_with_cd;
        }

        if let Some(storage) = self.storage.as_deref_mut() {
            storage.close()?;
        }
        Ok(())
    }

    /// The archive comment, if one is present.
    pub fn comment(&self) -> Result<&str> {
        self.comment
            .as_deref()
            .ok_or(ZipError::Exist("archive comment"))
    }

    /// Set the archive comment emitted on close.
    pub fn set_comment(&mut self, comment: &str) -> Result<()> {
        if comment.len() > u16::MAX as usize {
            return Err(ZipError::Param("archive comment too long"));
        }
        self.comment = Some(comment.to_string());
        Ok(())
    }

    /// The "version made by" stamped on new entries.
    pub fn version_madeby(&self) -> u16 {
        self.version_madeby
    }

    /// Override the "version made by" field.
    pub fn set_version_madeby(&mut self, version_madeby: u16) {
        self.version_madeby = version_madeby;
    }

    /// Total number of entries in the central directory.
    pub fn number_entry(&self) -> u64 {
        self.number_entry
    }

    /// Disk number holding the central directory.
    pub fn disk_number_with_cd(&self) -> u32 {
        self.disk_number_with_cd
    }

    /// Offset correction applied to stored local-header offsets; nonzero
    /// only for archives whose catalog was shifted after creation.
    pub fn disk_offset_shift(&self) -> u64 {
        self.disk_offset_shift
    }

    // Cursor -------------------------------------------------------------

    fn scan_current_entry(&mut self) -> Result<()> {
        self.entry_scanned = false;
        let pos = self.cd_current_pos;

        let cd = self.cd_stream_mut()?;
        cd.seek(SeekFrom::Start(pos))?;
        self.file_info = header::read_file_header(cd, false)?;
        self.entry_scanned = true;
        Ok(())
    }

    /// Move the cursor to the first entry and scan its header.
    pub fn goto_first_entry(&mut self) -> Result<()> {
        self.cd_current_pos = self.cd_start_pos;
        self.scan_current_entry()
    }

    /// Advance the cursor past the current entry and scan the next.
    ///
    /// Returns [`ZipError::EndOfList`] past the last entry.
    pub fn goto_next_entry(&mut self) -> Result<()> {
        if !self.entry_scanned {
            return Err(ZipError::Param("no entry scanned"));
        }
        self.cd_current_pos += self.file_info.central_record_size();
        self.scan_current_entry()
    }

    /// The cursor position of the current entry, for [`goto_entry`].
    ///
    /// [`goto_entry`]: Self::goto_entry
    pub fn entry_pos(&self) -> u64 {
        self.cd_current_pos
    }

    /// Reseat the cursor at a position previously returned by
    /// [`entry_pos`](Self::entry_pos) and scan the header there.
    pub fn goto_entry(&mut self, cd_pos: u64) -> Result<()> {
        if cd_pos < self.cd_start_pos || cd_pos > self.cd_start_pos + self.cd_size {
            return Err(ZipError::Param("cursor position out of range"));
        }
        self.cd_current_pos = cd_pos;
        self.scan_current_entry()
    }

    /// Find an entry by name.
    ///
    /// Slash direction never matters; case only when `ignore_case` is
    /// false. The current entry is checked first, then the scan restarts
    /// from the beginning. O(n) over the catalog.
    pub fn locate_entry(&mut self, filename: &str, ignore_case: bool) -> Result<()> {
        if self.entry_scanned && path::matches(&self.file_info.filename, filename, ignore_case) {
            return Ok(());
        }

        self.goto_first_entry()?;
        loop {
            if path::matches(&self.file_info.filename, filename, ignore_case) {
                return Ok(());
            }
            self.goto_next_entry()?;
        }
    }

    /// Scan from the first entry until `matcher` returns true.
    pub fn locate_first_entry(
        &mut self,
        mut matcher: impl FnMut(&FileInfo) -> bool,
    ) -> Result<()> {
        self.goto_first_entry()?;
        if matcher(&self.file_info) {
            return Ok(());
        }
        self.locate_next_entry(matcher)
    }

    /// Continue a [`locate_first_entry`](Self::locate_first_entry) scan.
    pub fn locate_next_entry(&mut self, mut matcher: impl FnMut(&FileInfo) -> bool) -> Result<()> {
        loop {
            self.goto_next_entry()?;
            if matcher(&self.file_info) {
                return Ok(());
            }
        }
    }

    // Entry lifecycle ----------------------------------------------------

    /// Metadata of the entry under the cursor.
    pub fn entry_info(&self) -> Result<&FileInfo> {
        if !self.entry_scanned {
            return Err(ZipError::Param("no entry scanned"));
        }
        Ok(&self.file_info)
    }

    /// The local-header view of the currently open entry.
    pub fn entry_local_info(&self) -> Result<&FileInfo> {
        if self.entry.is_none() {
            return Err(ZipError::Param("no entry open"));
        }
        Ok(&self.local_file_info)
    }

    /// Whether an entry payload is currently open.
    pub fn entry_is_open(&self) -> bool {
        self.entry.is_some()
    }

    /// Whether the entry under the cursor is a directory.
    pub fn entry_is_dir(&self) -> Result<bool> {
        if !self.entry_scanned {
            return Err(ZipError::Param("no entry scanned"));
        }
        Ok(self.file_info.is_dir())
    }

    /// Open the entry under the cursor for reading.
    ///
    /// In raw mode the stored bytes come back verbatim, so an encrypted
    /// or compressed payload can be copied without a password. A
    /// non-raw read of an encrypted entry requires one.
    pub fn entry_read_open(&mut self, raw: bool, password: Option<&str>) -> Result<()> {
        if !self.open_mode.contains(OpenMode::READ) {
            return Err(ZipError::Param("archive not open for reading"));
        }
        if !self.entry_scanned {
            return Err(ZipError::Param("no entry scanned"));
        }
        if self.entry.is_some() {
            return Err(ZipError::Param("an entry is already open"));
        }
        if self.file_info.flag & flags::ENCRYPTED != 0 && password.is_none() && !raw {
            return Err(ZipError::Param("encrypted entry requires a password"));
        }

        let offset = self.file_info.disk_offset + self.disk_offset_shift;
        let storage = self.storage_mut()?;
        storage.seek(SeekFrom::Start(offset))?;
        self.local_file_info = header::read_file_header(storage, true)?;

        let storage = self
            .storage
            .take()
            .ok_or(ZipError::Internal("storage missing"))?;
        match EntryPipeline::open(storage, &self.file_info, Direction::Read, raw, 0, password) {
            Ok(pipeline) => {
                self.entry = Some(pipeline);
                Ok(())
            }
            Err((err, storage)) => {
                self.storage = Some(storage);
                Err(err)
            }
        }
    }

    /// Open a new entry for writing.
    ///
    /// The local header goes out immediately; CRC and sizes are zero
    /// there and the real values follow the payload in a data
    /// descriptor. A currently open entry is closed first.
    pub fn entry_write_open(
        &mut self,
        file_info: &FileInfo,
        compress_level: i16,
        raw: bool,
        password: Option<&str>,
    ) -> Result<()> {
        if !self.open_mode.contains(OpenMode::WRITE) {
            return Err(ZipError::Param("archive not open for writing"));
        }
        if file_info.filename.is_empty() {
            return Err(ZipError::Param("entry filename missing"));
        }
        if self.entry.is_some() {
            self.entry_close()?;
        }

        self.file_info = file_info.clone();
        self.file_info.filename_size = 0;
        self.file_info.comment_size = 0;

        if self.file_info.compression_method == CompressionMethod::Deflate as u16 {
            match compress_level {
                8 | 9 => self.file_info.flag |= flags::DEFLATE_MAX,
                2 => self.file_info.flag |= flags::DEFLATE_FAST,
                1 => self.file_info.flag |= flags::DEFLATE_SUPER_FAST,
                _ => {}
            }
        } else if self.file_info.compression_method == CompressionMethod::Lzma as u16 {
            self.file_info.flag |= flags::LZMA_EOS_MARKER;
        }
        self.file_info.flag |= flags::DATA_DESCRIPTOR;
        if password.is_some() {
            self.file_info.flag |= flags::ENCRYPTED;
        }

        if self.file_info.version_madeby == 0 {
            self.file_info.version_madeby = self.version_madeby;
        }
        if self.file_info.aes_version != 0 && self.file_info.aes_encryption_mode == 0 {
            self.file_info.aes_encryption_mode = aes::MODE_256;
        }
        if compress_level == 0 || self.file_info.is_dir() {
            self.file_info.compression_method = CompressionMethod::Store as u16;
        }

        let (disk_number, disk_offset) = {
            let storage = self.storage_mut()?;
            let disk_number = storage.get_prop(StreamProp::DiskNumber).unwrap_or(0);
            (disk_number, storage.tell()?)
        };
        self.file_info.disk_number = disk_number.max(0) as u32;
        self.file_info.disk_offset = disk_offset;
        self.file_info.crc = 0;
        self.file_info.compressed_size = 0;

        {
            let Self {
                storage: Some(storage),
                file_info,
                ..
            } = &mut *self
            else {
                return Err(ZipError::Internal("storage missing"));
            };
            header::write_file_header(&mut **storage, true, file_info)?;
        }
        self.entry_scanned = true;

        let storage = self
            .storage
            .take()
            .ok_or(ZipError::Internal("storage missing"))?;
        match EntryPipeline::open(
            storage,
            &self.file_info,
            Direction::Write,
            raw,
            compress_level,
            password,
        ) {
            Ok(pipeline) => {
                self.entry = Some(pipeline);
                Ok(())
            }
            Err((err, storage)) => {
                self.storage = Some(storage);
                Err(err)
            }
        }
    }

    /// Read payload bytes from the open entry.
    pub fn entry_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(pipeline) = self.entry.as_mut() else {
            return Err(ZipError::Param("no entry open"));
        };
        // Nothing stored, nothing to read; zero-length entries have no
        // payload bytes even when encrypted framing would say otherwise.
        if self.file_info.compressed_size == 0 && !self.open_mode.contains(OpenMode::WRITE) {
            return Ok(0);
        }
        pipeline.read(buf)
    }

    /// Read the whole payload of the open entry.
    pub fn entry_read_to_end(&mut self, out: &mut Vec<u8>) -> Result<u64> {
        let mut buf = [0u8; 4096];
        let mut total = 0u64;
        loop {
            let n = self.entry_read(&mut buf)?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&buf[..n]);
            total += n as u64;
        }
    }

    /// Write payload bytes to the open entry.
    pub fn entry_write(&mut self, buf: &[u8]) -> Result<usize> {
        let Some(pipeline) = self.entry.as_mut() else {
            return Err(ZipError::Param("no entry open"));
        };
        pipeline.write(buf)
    }

    /// Close the open entry.
    ///
    /// Reading: a fully drained payload is checked against the stored
    /// CRC (AE-2 entries rely on their authentication code instead).
    /// Writing: the data descriptor goes out and a central record is
    /// staged with the now-known totals.
    pub fn entry_close(&mut self) -> Result<()> {
        self.entry_close_raw(0, 0)
    }

    /// Close the open entry, supplying totals for a raw-mode write.
    ///
    /// Raw payloads bypass the CRC tap and the transforms, so the
    /// caller must state the original uncompressed size and CRC for the
    /// records; both are ignored outside raw write mode.
    pub fn entry_close_raw(&mut self, uncompressed_size: u64, crc: u32) -> Result<()> {
        let mut pipeline = self
            .entry
            .take()
            .ok_or(ZipError::Param("no entry open"))?;

        let finish_result = pipeline.finish();

        let raw = pipeline.is_raw();
        let compressed_size = pipeline.compressed_total();
        let (uncompressed_size, crc) = if raw {
            (uncompressed_size, crc)
        } else {
            (pipeline.uncompressed_total(), pipeline.crc())
        };

        // The storage stream comes back to the handle even when the
        // pipeline failed to finalise.
        self.storage = Some(pipeline.into_storage());
        finish_result?;

        if !self.open_mode.contains(OpenMode::WRITE) {
            // AE-2 stores no meaningful CRC; the authentication code
            // already vouched for the payload.
            if !raw
                && self.file_info.aes_version != aes::VERSION_AE2
                && uncompressed_size == self.file_info.uncompressed_size
                && crc != self.file_info.crc
            {
                return Err(ZipError::Crc {
                    expected: self.file_info.crc,
                    actual: crc,
                });
            }
            return Ok(());
        }

        // Descriptor field width was fixed by the size declared when
        // the entry was opened, not the size that materialised.
        let declared_uncompressed = self.file_info.uncompressed_size;
        let storage = self.storage_mut()?;
        storage.write_u32(DATA_DESCRIPTOR_SIGNATURE)?;
        storage.write_u32(crc)?;
        if declared_uncompressed <= u32::MAX as u64 {
            storage.write_u32(compressed_size.min(u32::MAX as u64) as u32)?;
            storage.write_u32(uncompressed_size.min(u32::MAX as u64) as u32)?;
        } else {
            storage.write_u64(compressed_size)?;
            storage.write_u64(uncompressed_size)?;
        }

        self.file_info.crc = crc;
        self.file_info.compressed_size = compressed_size;
        self.file_info.uncompressed_size = uncompressed_size;

        let Self {
            cd_staging: Some(staging),
            file_info,
            ..
        } = &mut *self
        else {
            return Err(ZipError::Internal("central directory staging missing"));
        };
        header::write_file_header(staging, false, file_info)?;

        self.number_entry += 1;
        Ok(())
    }
}
