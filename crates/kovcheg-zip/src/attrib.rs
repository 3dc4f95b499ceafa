//! Cross-system file attribute conversion.
//!
//! The central directory stores external attributes in whatever shape the
//! producing host system uses: MSDOS/Windows flag bits, or a POSIX mode.
//! Readers on the other family need a translation to decide permissions
//! and directory-ness.

use crate::error::{Result, ZipError};

/// Windows attribute bits the codec cares about.
mod win {
    pub const READONLY: u32 = 0x01;
    pub const DIRECTORY: u32 = 0x10;
    pub const NORMAL: u32 = 0x80;
    pub const REPARSE_POINT: u32 = 0x400;
}

/// POSIX mode bits the codec cares about.
mod posix {
    pub const S_IFMT: u32 = 0o170000;
    pub const S_IFDIR: u32 = 0o040000;
    pub const S_IFREG: u32 = 0o100000;
    pub const S_IFLNK: u32 = 0o120000;
}

/// Host system identifiers from the "version made by" high byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostSystem {
    /// MSDOS / FAT family.
    MsDos = 0,
    /// UNIX.
    Unix = 3,
    /// Windows NTFS.
    WindowsNtfs = 10,
    /// macOS.
    Darwin = 19,
}

impl HostSystem {
    /// Decode the host system from a "version made by" field.
    pub fn from_version_madeby(version_madeby: u16) -> Option<Self> {
        match (version_madeby >> 8) as u8 {
            0 => Some(Self::MsDos),
            3 => Some(Self::Unix),
            10 => Some(Self::WindowsNtfs),
            19 => Some(Self::Darwin),
            _ => None,
        }
    }

    fn is_windows_family(self) -> bool {
        matches!(self, Self::MsDos | Self::WindowsNtfs)
    }

    fn is_posix_family(self) -> bool {
        matches!(self, Self::Unix | Self::Darwin)
    }
}

/// Convert attributes between host systems.
///
/// Same-family conversion is the identity. POSIX modes are taken and
/// produced in the low bits; callers working with central-directory
/// external attributes from a POSIX producer shift the mode down from
/// the high 16 bits first.
pub fn convert(src_sys: HostSystem, src_attrib: u32, target_sys: HostSystem) -> Result<u32> {
    if src_sys.is_windows_family() {
        if target_sys.is_windows_family() {
            return Ok(src_attrib);
        }
        if target_sys.is_posix_family() {
            return Ok(win_to_posix(src_attrib));
        }
    } else if src_sys.is_posix_family() {
        if target_sys.is_posix_family() {
            return Ok(src_attrib);
        }
        if target_sys.is_windows_family() {
            return Ok(posix_to_win(src_attrib));
        }
    }

    Err(ZipError::Support("attribute conversion between host systems"))
}

/// Map a POSIX mode to Windows attribute bits.
pub fn posix_to_win(posix_attrib: u32) -> u32 {
    let mut win_attrib = 0;

    // No write or execute bit anywhere but at least one read bit.
    if (posix_attrib & 0o333) == 0 && (posix_attrib & 0o444) != 0 {
        win_attrib |= win::READONLY;
    }

    if (posix_attrib & posix::S_IFDIR) == posix::S_IFDIR {
        win_attrib |= win::DIRECTORY;
    } else if (posix_attrib & posix::S_IFLNK) == posix::S_IFLNK {
        win_attrib |= win::REPARSE_POINT;
    } else {
        win_attrib |= win::NORMAL;
    }

    win_attrib
}

/// Map Windows attribute bits to a POSIX mode.
pub fn win_to_posix(win_attrib: u32) -> u32 {
    let mut posix_attrib = 0o444;

    if (win_attrib & win::READONLY) == 0 {
        posix_attrib |= 0o222;
    }

    if (win_attrib & win::DIRECTORY) == win::DIRECTORY {
        posix_attrib |= posix::S_IFDIR | 0o111;
    } else if (win_attrib & win::REPARSE_POINT) == win::REPARSE_POINT {
        posix_attrib |= posix::S_IFLNK;
    } else {
        posix_attrib |= posix::S_IFREG;
    }

    posix_attrib
}

/// Whether external attributes mark a directory.
///
/// POSIX producers store the mode in the high 16 bits of the external
/// attributes; Windows-family producers use the DOS bits in the low byte.
/// Unknown host systems are never directories by attribute (the trailing
/// slash convention still applies at the entry level).
pub fn is_dir(attrib: u32, version_madeby: u16) -> bool {
    let Some(system) = HostSystem::from_version_madeby(version_madeby) else {
        return false;
    };

    let attrib = if system.is_posix_family() { attrib >> 16 } else { attrib };

    match convert(system, attrib, HostSystem::Unix) {
        Ok(posix_attrib) => (posix_attrib & posix::S_IFMT) == posix::S_IFDIR,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posix_to_win_kinds() {
        assert_eq!(posix_to_win(0o040755) & win::DIRECTORY, win::DIRECTORY);
        assert_eq!(posix_to_win(0o120777) & win::REPARSE_POINT, win::REPARSE_POINT);
        assert_eq!(posix_to_win(0o100644) & win::NORMAL, win::NORMAL);
    }

    #[test]
    fn test_readonly_mapping() {
        // Read bits only, no write/execute: readonly.
        assert_eq!(posix_to_win(0o100444) & win::READONLY, win::READONLY);
        // Writable: not readonly.
        assert_eq!(posix_to_win(0o100644) & win::READONLY, 0);

        // Round back: readonly loses write bits, keeps reads.
        let mode = win_to_posix(win::READONLY | win::NORMAL);
        assert_eq!(mode & 0o222, 0);
        assert_eq!(mode & 0o444, 0o444);
    }

    #[test]
    fn test_roundtrip_preserves_kind() {
        for mode in [0o100644u32, 0o040755, 0o120777] {
            let back = win_to_posix(posix_to_win(mode));
            assert_eq!(back & posix::S_IFMT, mode & posix::S_IFMT, "mode {mode:o}");
        }
    }

    #[test]
    fn test_same_family_is_identity() {
        assert_eq!(
            convert(HostSystem::MsDos, 0x21, HostSystem::WindowsNtfs).unwrap(),
            0x21
        );
        assert_eq!(
            convert(HostSystem::Unix, 0o100644, HostSystem::Darwin).unwrap(),
            0o100644
        );
    }

    #[test]
    fn test_is_dir() {
        // Unix producer: mode in the high 16 bits.
        assert!(is_dir(0o040755 << 16, 3 << 8));
        assert!(!is_dir(0o100644 << 16, 3 << 8));
        // DOS producer: directory bit in the low byte.
        assert!(is_dir(0x10, 0));
        assert!(!is_dir(0x20, 0));
    }
}
