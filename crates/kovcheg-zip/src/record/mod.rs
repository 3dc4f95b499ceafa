//! Wire-format record structures.
//!
//! Fixed-size portions of the PKZIP records as `#[repr(C, packed)]`
//! structs, parsed and emitted through zerocopy. The 4-byte signature of
//! each record is read and written separately; the structs cover the
//! bytes that follow it.

mod central;
mod eocd;
mod local;

pub use central::CentralFileHeader;
pub use eocd::{Eocd64Locator, Eocd64Record, EocdRecord};
pub use local::LocalFileHeader;

/// Data-descriptor signature (the descriptor itself is freeform: CRC plus
/// two sizes of 4 or 8 bytes each).
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

/// On-disk size of a local header with empty name and extra field.
pub const LOCAL_HEADER_SIZE: usize = 4 + std::mem::size_of::<LocalFileHeader>();

/// On-disk size of a central header with empty variable fields.
pub const CENTRAL_HEADER_SIZE: usize = 4 + std::mem::size_of::<CentralFileHeader>();

/// On-disk size of a classic EOCD with no comment.
pub const EOCD_SIZE: usize = 4 + std::mem::size_of::<EocdRecord>();

/// On-disk size of the ZIP64 EOCD locator.
pub const EOCD64_LOCATOR_SIZE: usize = 4 + std::mem::size_of::<Eocd64Locator>();

/// On-disk size of the fixed portion of the ZIP64 EOCD record.
pub const EOCD64_SIZE: usize = 4 + std::mem::size_of::<Eocd64Record>();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes_match_the_format() {
        assert_eq!(LOCAL_HEADER_SIZE, 30);
        assert_eq!(CENTRAL_HEADER_SIZE, 46);
        assert_eq!(EOCD_SIZE, 22);
        assert_eq!(EOCD64_LOCATOR_SIZE, 20);
        assert_eq!(EOCD64_SIZE, 56);
    }
}
