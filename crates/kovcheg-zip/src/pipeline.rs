//! Per-entry stream stack.
//!
//! Payload bytes pass through, in order: CRC-32 tap, compressor,
//! encryptor, raw storage. Reads run the same stack in reverse. Each
//! layer owns its base exclusively; the storage stream is borrowed from
//! the archive handle for the entry's duration and handed back when the
//! stack unwinds on entry close.

use std::io::SeekFrom;

use crate::entry::{flags, CompressionMethod, FileInfo};
use crate::error::{Result, ZipError};
use crate::stream::{Crc32Stream, DeflateStream, RawStream, Stream, StreamProp};
use crate::stream::PkcryptStream;
use crate::time;

#[cfg(feature = "aes-crypto")]
use crate::stream::AesStream;
#[cfg(feature = "bzip2")]
use crate::stream::Bzip2Stream;
#[cfg(feature = "lzma")]
use crate::stream::LzmaStream;

/// Which way payload bytes flow through the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// Encryption layer: raw pass-through, ZipCrypto, or WinZip AES.
pub(crate) enum Encryptor<S: Stream> {
    Raw(RawStream<S>),
    Pkcrypt(PkcryptStream<S>),
    #[cfg(feature = "aes-crypto")]
    Aes(AesStream<S>),
}

impl<S: Stream> Encryptor<S> {
    fn into_inner(self) -> S {
        match self {
            Self::Raw(s) => s.into_inner(),
            Self::Pkcrypt(s) => s.into_inner(),
            #[cfg(feature = "aes-crypto")]
            Self::Aes(s) => s.into_inner(),
        }
    }
}

impl<S: Stream> Stream for Encryptor<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Raw(s) => s.read(buf),
            Self::Pkcrypt(s) => s.read(buf),
            #[cfg(feature = "aes-crypto")]
            Self::Aes(s) => s.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self {
            Self::Raw(s) => s.write(buf),
            Self::Pkcrypt(s) => s.write(buf),
            #[cfg(feature = "aes-crypto")]
            Self::Aes(s) => s.write(buf),
        }
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(ZipError::Param("transform layers cannot seek"))
    }

    fn tell(&mut self) -> Result<u64> {
        match self {
            Self::Raw(s) => s.tell(),
            Self::Pkcrypt(s) => s.tell(),
            #[cfg(feature = "aes-crypto")]
            Self::Aes(s) => s.tell(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Self::Raw(s) => s.close(),
            Self::Pkcrypt(s) => s.close(),
            #[cfg(feature = "aes-crypto")]
            Self::Aes(s) => s.close(),
        }
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        match self {
            Self::Raw(s) => s.get_prop(prop),
            Self::Pkcrypt(s) => s.get_prop(prop),
            #[cfg(feature = "aes-crypto")]
            Self::Aes(s) => s.get_prop(prop),
        }
    }

    fn set_prop(&mut self, prop: StreamProp, value: i64) -> Result<()> {
        match self {
            Self::Raw(s) => s.set_prop(prop, value),
            Self::Pkcrypt(s) => s.set_prop(prop, value),
            #[cfg(feature = "aes-crypto")]
            Self::Aes(s) => s.set_prop(prop, value),
        }
    }
}

/// Compression layer: raw pass-through or one of the codecs.
pub(crate) enum Compressor<S: Stream> {
    Raw(RawStream<S>),
    Deflate(DeflateStream<S>),
    #[cfg(feature = "bzip2")]
    Bzip2(Bzip2Stream<S>),
    #[cfg(feature = "lzma")]
    Lzma(LzmaStream<S>),
}

impl<S: Stream> Compressor<S> {
    fn base(&self) -> &S {
        match self {
            Self::Raw(s) => s.base(),
            Self::Deflate(s) => s.base(),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(s) => s.base(),
            #[cfg(feature = "lzma")]
            Self::Lzma(s) => s.base(),
        }
    }

    fn base_mut(&mut self) -> &mut S {
        match self {
            Self::Raw(s) => s.base_mut(),
            Self::Deflate(s) => s.base_mut(),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(s) => s.base_mut(),
            #[cfg(feature = "lzma")]
            Self::Lzma(s) => s.base_mut(),
        }
    }

    fn into_inner(self) -> S {
        match self {
            Self::Raw(s) => s.into_inner(),
            Self::Deflate(s) => s.into_inner(),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(s) => s.into_inner(),
            #[cfg(feature = "lzma")]
            Self::Lzma(s) => s.into_inner(),
        }
    }
}

impl<S: Stream> Stream for Compressor<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Raw(s) => s.read(buf),
            Self::Deflate(s) => s.read(buf),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(s) => s.read(buf),
            #[cfg(feature = "lzma")]
            Self::Lzma(s) => s.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self {
            Self::Raw(s) => s.write(buf),
            Self::Deflate(s) => s.write(buf),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(s) => s.write(buf),
            #[cfg(feature = "lzma")]
            Self::Lzma(s) => s.write(buf),
        }
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        Err(ZipError::Param("transform layers cannot seek"))
    }

    fn tell(&mut self) -> Result<u64> {
        match self {
            Self::Raw(s) => s.tell(),
            Self::Deflate(s) => s.tell(),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(s) => s.tell(),
            #[cfg(feature = "lzma")]
            Self::Lzma(s) => s.tell(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            Self::Raw(s) => s.close(),
            Self::Deflate(s) => s.close(),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(s) => s.close(),
            #[cfg(feature = "lzma")]
            Self::Lzma(s) => s.close(),
        }
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        match self {
            Self::Raw(s) => s.get_prop(prop),
            Self::Deflate(s) => s.get_prop(prop),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(s) => s.get_prop(prop),
            #[cfg(feature = "lzma")]
            Self::Lzma(s) => s.get_prop(prop),
        }
    }

    fn set_prop(&mut self, prop: StreamProp, value: i64) -> Result<()> {
        match self {
            Self::Raw(s) => s.set_prop(prop, value),
            Self::Deflate(s) => s.set_prop(prop, value),
            #[cfg(feature = "bzip2")]
            Self::Bzip2(s) => s.set_prop(prop, value),
            #[cfg(feature = "lzma")]
            Self::Lzma(s) => s.set_prop(prop, value),
        }
    }
}

type Storage = Box<dyn Stream>;
type Stack = Crc32Stream<Compressor<Encryptor<Storage>>>;

/// The live stream stack for one open entry.
pub(crate) struct EntryPipeline {
    stack: Stack,
    encrypted: bool,
    raw: bool,
}

/// ZipCrypto verifier bytes for an entry.
///
/// With a data descriptor the CRC is unknown at encryption time, so the
/// high bytes of the DOS-encoded modification time stand in.
fn pkcrypt_verifiers(file_info: &FileInfo) -> (u8, u8) {
    if file_info.flag & flags::DATA_DESCRIPTOR != 0 {
        let dos_date = time::unix_to_dos(file_info.modified_date);
        (((dos_date >> 16) & 0xff) as u8, ((dos_date >> 8) & 0xff) as u8)
    } else {
        (
            ((file_info.crc >> 16) & 0xff) as u8,
            ((file_info.crc >> 24) & 0xff) as u8,
        )
    }
}

/// Cipher state from the header exchange, before the stack is built.
enum CipherStart {
    None,
    Pkcrypt(crate::stream::pkcrypt::PkcryptState),
    #[cfg(feature = "aes-crypto")]
    Aes(crate::stream::aes::AesState),
}

impl EntryPipeline {
    /// Compose the stack for one entry.
    ///
    /// `storage` must be positioned at the entry payload. Raw mode skips
    /// the compressor in both directions and the encryptor on write. On
    /// failure the storage stream comes back with the error, so the
    /// archive handle stays usable.
    pub(crate) fn open(
        mut storage: Storage,
        file_info: &FileInfo,
        direction: Direction,
        raw: bool,
        compress_level: i16,
        password: Option<&str>,
    ) -> std::result::Result<Self, (ZipError, Storage)> {
        let method = match CompressionMethod::try_from(file_info.compression_method) {
            Ok(CompressionMethod::Aes) | Err(_) => {
                return Err((ZipError::Support("compression method"), storage));
            }
            Ok(method) => method,
        };
        match method {
            CompressionMethod::Store | CompressionMethod::Deflate => {}
            #[cfg(feature = "bzip2")]
            CompressionMethod::Bzip2 => {}
            #[cfg(feature = "lzma")]
            CompressionMethod::Lzma => {}
            #[allow(unreachable_patterns)]
            _ => {
                return Err((
                    ZipError::Support("compression method not compiled in"),
                    storage,
                ))
            }
        }

        let encrypted = file_info.flag & flags::ENCRYPTED != 0;
        let use_crypt = match direction {
            // Raw writes store the caller's bytes verbatim.
            Direction::Write => encrypted && password.is_some() && !raw,
            // Reads decrypt whenever a password is supplied; without one
            // the ciphertext is still readable in raw mode.
            Direction::Read => encrypted && password.is_some(),
        };

        // Header exchange runs against the borrowed storage first, so a
        // wrong password or I/O failure hands the stream back intact.
        let cipher_start = match (use_crypt, password) {
            (true, Some(password)) if file_info.aes_version != 0 => {
                #[cfg(feature = "aes-crypto")]
                {
                    use crate::stream::aes;
                    let mode = file_info.aes_encryption_mode;
                    let started = match direction {
                        Direction::Write => aes::start_write(&mut *storage, password, mode),
                        Direction::Read => aes::start_read(&mut *storage, password, mode),
                    };
                    match started {
                        Ok(state) => CipherStart::Aes(state),
                        Err(err) => return Err((err, storage)),
                    }
                }
                #[cfg(not(feature = "aes-crypto"))]
                {
                    return Err((ZipError::Support("AES encryption not compiled in"), storage));
                }
            }
            (true, Some(password)) => {
                use crate::stream::pkcrypt;
                let (verify1, verify2) = pkcrypt_verifiers(file_info);
                let started = match direction {
                    Direction::Write => {
                        pkcrypt::start_write(&mut *storage, password, verify1, verify2)
                    }
                    Direction::Read => pkcrypt::start_read(&mut *storage, password, verify2),
                };
                match started {
                    Ok(state) => CipherStart::Pkcrypt(state),
                    Err(err) => return Err((err, storage)),
                }
            }
            _ => CipherStart::None,
        };

        let mut encryptor = match cipher_start {
            CipherStart::None => Encryptor::Raw(RawStream::new(storage)),
            CipherStart::Pkcrypt(state) => {
                Encryptor::Pkcrypt(PkcryptStream::resume(storage, state))
            }
            #[cfg(feature = "aes-crypto")]
            CipherStart::Aes(state) => Encryptor::Aes(AesStream::resume(storage, state)),
        };

        if direction == Direction::Read && (raw || method == CompressionMethod::Store || encrypted)
        {
            if let Err(err) =
                encryptor.set_prop(StreamProp::TotalInMax, file_info.compressed_size as i64)
            {
                return Err((err, encryptor.into_inner()));
            }
        }
        let header_size = encryptor.get_prop(StreamProp::HeaderSize).unwrap_or(0);
        let footer_size = encryptor.get_prop(StreamProp::FooterSize).unwrap_or(0);

        let mut compressor = if raw || method == CompressionMethod::Store {
            Compressor::Raw(RawStream::new(encryptor))
        } else {
            match (method, direction) {
                (CompressionMethod::Deflate, Direction::Read) => {
                    Compressor::Deflate(DeflateStream::new_read(encryptor))
                }
                (CompressionMethod::Deflate, Direction::Write) => {
                    Compressor::Deflate(DeflateStream::new_write(encryptor))
                }
                #[cfg(feature = "bzip2")]
                (CompressionMethod::Bzip2, Direction::Read) => {
                    Compressor::Bzip2(Bzip2Stream::new_read(encryptor))
                }
                #[cfg(feature = "bzip2")]
                (CompressionMethod::Bzip2, Direction::Write) => {
                    Compressor::Bzip2(Bzip2Stream::new_write(encryptor))
                }
                #[cfg(feature = "lzma")]
                (CompressionMethod::Lzma, Direction::Read) => {
                    Compressor::Lzma(LzmaStream::new_read(encryptor))
                }
                #[cfg(feature = "lzma")]
                (CompressionMethod::Lzma, Direction::Write) => {
                    Compressor::Lzma(LzmaStream::new_write(encryptor))
                }
                _ => {
                    return Err((
                        ZipError::Support("compression method not compiled in"),
                        encryptor.into_inner(),
                    ))
                }
            }
        };

        let budgets = (|| match direction {
            Direction::Write => {
                compressor.set_prop(StreamProp::CompressLevel, compress_level as i64)
            }
            Direction::Read => {
                if raw || method == CompressionMethod::Store || encrypted {
                    let budget =
                        (file_info.compressed_size as i64 - header_size - footer_size).max(0);
                    compressor.set_prop(StreamProp::TotalInMax, budget)?;
                }
                if method == CompressionMethod::Lzma
                    && file_info.flag & flags::LZMA_EOS_MARKER == 0
                {
                    compressor
                        .set_prop(StreamProp::TotalInMax, file_info.compressed_size as i64)?;
                    compressor
                        .set_prop(StreamProp::TotalOutMax, file_info.uncompressed_size as i64)?;
                }
                Ok(())
            }
        })();
        if let Err(err) = budgets {
            return Err((err, compressor.into_inner().into_inner()));
        }

        Ok(Self {
            stack: Crc32Stream::new(compressor),
            encrypted: use_crypt,
            raw,
        })
    }

    /// Read payload bytes through the stack.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stack.read(buf)
    }

    /// Write payload bytes through the stack.
    pub(crate) fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stack.write(buf)
    }

    /// Whether the pipeline bypasses the transforms.
    pub(crate) fn is_raw(&self) -> bool {
        self.raw
    }

    /// CRC-32 of the plaintext bytes that crossed the tap.
    pub(crate) fn crc(&self) -> u32 {
        self.stack.value()
    }

    /// Plaintext bytes that crossed the tap.
    pub(crate) fn uncompressed_total(&self) -> u64 {
        self.stack
            .get_prop(StreamProp::TotalOut)
            .unwrap_or(0)
            .max(0) as u64
    }

    /// Storage-side bytes for the entry, encryption framing included.
    pub(crate) fn compressed_total(&self) -> u64 {
        let layer: &dyn Stream = if self.encrypted {
            self.stack.base().base()
        } else {
            self.stack.base()
        };
        layer.get_prop(StreamProp::TotalOut).unwrap_or(0).max(0) as u64
    }

    /// Finalise the codec and cipher layers.
    ///
    /// Flushes the compressor tail, then lets the encryptor emit or
    /// verify its trailing framing. The storage stream itself stays
    /// open; the archive still owns its lifecycle.
    pub(crate) fn finish(&mut self) -> Result<()> {
        self.stack.base_mut().close()?;
        self.stack.base_mut().base_mut().close()
    }

    /// Unwind the stack, returning the storage stream.
    pub(crate) fn into_storage(self) -> Storage {
        self.stack.into_inner().into_inner().into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemStream;

    fn open_pipeline(
        storage: Box<dyn Stream>,
        info: &FileInfo,
        direction: Direction,
        level: i16,
        password: Option<&str>,
    ) -> EntryPipeline {
        EntryPipeline::open(storage, info, direction, false, level, password)
            .map_err(|(err, _)| err)
            .unwrap()
    }

    fn stored_info(compressed_size: u64) -> FileInfo {
        FileInfo {
            compression_method: CompressionMethod::Store as u16,
            compressed_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_store_write_then_read() {
        let info = stored_info(0);
        let mut pipeline =
            open_pipeline(Box::new(MemStream::new()), &info, Direction::Write, 0, None);
        pipeline.write(b"hi\n").unwrap();
        pipeline.finish().unwrap();

        assert_eq!(pipeline.crc(), 0xD7D541C2);
        assert_eq!(pipeline.uncompressed_total(), 3);
        assert_eq!(pipeline.compressed_total(), 3);

        let mut storage = pipeline.into_storage();
        storage.seek(SeekFrom::Start(0)).unwrap();

        let info = stored_info(3);
        let mut pipeline = open_pipeline(storage, &info, Direction::Read, 0, None);
        let mut buf = [0u8; 16];
        assert_eq!(pipeline.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"hi\n");
        assert_eq!(pipeline.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_unknown_method_is_support_error() {
        let mut info = stored_info(0);
        info.compression_method = 97; // WavPack, not supported
        let result = EntryPipeline::open(
            Box::new(MemStream::new()),
            &info,
            Direction::Read,
            false,
            0,
            None,
        );
        assert!(matches!(result, Err((ZipError::Support(_), _))));
    }

    #[test]
    fn test_deflate_roundtrip_through_pipeline() {
        let mut info = stored_info(0);
        info.compression_method = CompressionMethod::Deflate as u16;

        let payload = b"pipeline pipeline pipeline pipeline".repeat(20);
        let mut pipeline =
            open_pipeline(Box::new(MemStream::new()), &info, Direction::Write, 6, None);
        pipeline.write(&payload).unwrap();
        pipeline.finish().unwrap();

        let compressed_size = pipeline.compressed_total();
        assert!(compressed_size < payload.len() as u64);
        let crc = pipeline.crc();

        let mut storage = pipeline.into_storage();
        storage.seek(SeekFrom::Start(0)).unwrap();

        let mut info = stored_info(compressed_size);
        info.compression_method = CompressionMethod::Deflate as u16;
        let mut pipeline = open_pipeline(storage, &info, Direction::Read, 0, None);

        let mut out = Vec::new();
        let mut buf = [0u8; 200];
        loop {
            let n = pipeline.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, payload);
        assert_eq!(pipeline.crc(), crc);
    }

    #[cfg(feature = "aes-crypto")]
    #[test]
    fn test_aes_write_framing_counted() {
        let mut info = stored_info(0);
        info.flag = flags::ENCRYPTED;
        info.aes_version = crate::entry::aes::VERSION_AE2;
        info.aes_encryption_mode = crate::entry::aes::MODE_256;

        let mut pipeline = open_pipeline(
            Box::new(MemStream::new()),
            &info,
            Direction::Write,
            0,
            Some("p"),
        );
        pipeline.write(b"sixteen byte msg").unwrap();
        pipeline.finish().unwrap();

        // salt(16) + verifier(2) + payload(16) + mac(10)
        assert_eq!(pipeline.compressed_total(), 44);
        assert_eq!(pipeline.uncompressed_total(), 16);
    }
}
