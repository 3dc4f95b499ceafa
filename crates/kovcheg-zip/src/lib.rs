//! Format-faithful ZIP archive reader/writer.
//!
//! kovcheg-zip parses and emits the PKZIP archive structure - local
//! headers, central directory, classic and ZIP64 end-of-central-directory
//! records - and drives entry payloads through a layered stream stack:
//! CRC-32 tap, compressor, encryptor, storage. It supports:
//!
//! - ZIP64 archives and entries (>4 GiB, >65535 entries)
//! - Store and DEFLATE, plus BZIP2 and LZMA behind cargo features
//! - Traditional PKZIP encryption and WinZip AES (feature `aes-crypto`)
//! - ZIP64, NTFS, UNIX1, and AES extra fields
//! - Append to existing archives, raw (as-stored) entry access
//! - Tolerant reading of archives whose central-directory offsets were
//!   shifted after creation
//!
//! # Example
//!
//! ```no_run
//! use kovcheg_zip::{FileInfo, OpenMode, ZipArchive};
//!
//! let mode = OpenMode::WRITE | OpenMode::CREATE;
//! let mut archive = ZipArchive::open_path("out.zip", mode)?;
//!
//! let info = FileInfo {
//!     filename: "hello.txt".to_string(),
//!     compression_method: kovcheg_zip::CompressionMethod::Deflate as u16,
//!     ..Default::default()
//! };
//! archive.entry_write_open(&info, 6, false, None)?;
//! archive.entry_write(b"hello from kovcheg\n")?;
//! archive.entry_close()?;
//! archive.close()?;
//! # Ok::<(), kovcheg_zip::ZipError>(())
//! ```

mod archive;
mod entry;
mod eocd;
mod error;
mod extra;
mod header;
mod pipeline;

pub mod attrib;
pub mod path;
pub mod record;
pub mod stream;
pub mod time;

pub use archive::ZipArchive;
pub use entry::{aes, flags, CompressionMethod, FileInfo, Zip64Policy};
pub use error::{Result, ZipError};
pub use extra::{field_type, ExtraField, ExtraFields, Zip64Context};
pub use stream::{OpenMode, SeekFrom, Stream, StreamExt, StreamProp};
