#![forbid(unsafe_code)]
//! Shared vocabulary for ext2scope: unit-carrying newtypes, the parse-layer
//! error, little-endian read helpers, and ext2 layout constants.

pub mod cx;

pub use cx::{Cancelled, Cx};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const EXT2_SUPERBLOCK_OFFSET: usize = 1024;
pub const EXT2_SUPERBLOCK_SIZE: usize = 1024;
pub const EXT2_SUPER_MAGIC: u16 = 0xEF53;

/// Largest accepted `s_log_block_size` (64 KiB blocks).
pub const EXT2_MAX_LOG_BLOCK_SIZE: u32 = 6;

/// Inode record size for revision 0 filesystems.
pub const EXT2_GOOD_OLD_INODE_SIZE: u16 = 128;
/// First non-reserved inode for revision 0 filesystems.
pub const EXT2_GOOD_OLD_FIRST_INO: u32 = 11;
pub const EXT2_GROUP_DESC_SIZE: usize = 32;

// ── Block pointer layout (i_block) ──────────────────────────────────────────

pub const EXT2_NDIR_BLOCKS: usize = 12;
pub const EXT2_IND_BLOCK: usize = EXT2_NDIR_BLOCKS;
pub const EXT2_DIND_BLOCK: usize = EXT2_IND_BLOCK + 1;
pub const EXT2_TIND_BLOCK: usize = EXT2_DIND_BLOCK + 1;
pub const EXT2_N_BLOCKS: usize = EXT2_TIND_BLOCK + 1;

// ── Directory entries ───────────────────────────────────────────────────────

/// Fixed header of a directory record: inode(4) + rec_len(2) + name_len(1) + file_type(1).
pub const EXT2_DIR_ENTRY_HEADER_LEN: usize = 8;
pub const EXT2_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockNumber(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InodeNumber(pub u64);

impl InodeNumber {
    pub const ROOT: Self = Self(2);
}

/// Block group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupNumber(pub u32);

/// Validated block size (must be a power of two in 1024..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a power of two in [1024, 65536].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(1024..=65536).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be power of two in 1024..=65536",
            });
        }
        Ok(Self(value))
    }

    /// Decode `s_log_block_size`, rejecting shifts above
    /// [`EXT2_MAX_LOG_BLOCK_SIZE`].
    pub fn from_log(log_block_size: u32) -> Result<Self, ParseError> {
        if log_block_size > EXT2_MAX_LOG_BLOCK_SIZE {
            return Err(ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "block size shift exceeds 64 KiB",
            });
        }
        Self::new(1024_u32 << log_block_size)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Number of 32-bit block pointers that fit in one indirect block.
    #[must_use]
    pub fn pointers_per_block(self) -> usize {
        self.as_usize() / 4
    }

    /// Convert a block number to a byte offset.
    #[must_use]
    pub fn block_to_byte(self, block: BlockNumber) -> Option<u64> {
        block.0.checked_mul(u64::from(self.0))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8, ParseError> {
    Ok(ensure_slice(data, offset, 1)?[0])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Decode a fixed-width, optionally NUL-terminated label such as
/// `s_volume_name`. A field that fills its whole width has no terminator.
#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_owned()
}

/// `ceil(numerator / denominator)`; `None` when `denominator` is zero.
#[must_use]
pub fn div_ceil_u64(numerator: u64, denominator: u64) -> Option<u64> {
    if denominator == 0 {
        return None;
    }
    Some(numerator.div_ceil(denominator))
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── POSIX file mode constants ────────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Named pipe (FIFO).
pub const S_IFIFO: u16 = 0o010_000;
/// Character device.
pub const S_IFCHR: u16 = 0o020_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Block device.
pub const S_IFBLK: u16 = 0o060_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0o120_000;
/// Socket.
pub const S_IFSOCK: u16 = 0o140_000;

/// Permission, setuid/setgid and sticky bits.
pub const S_IPERM_MASK: u16 = 0o7777;

// ── Group math ──────────────────────────────────────────────────────────────

/// Compute the inode's block group from its inode number.
///
/// Inode numbers are 1-indexed; group assignment uses `(ino - 1) / inodes_per_group`.
/// Callers must have rejected `inodes_per_group == 0` at open time.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // ext2 group count is u32
pub fn inode_to_group(ino: InodeNumber, inodes_per_group: u32) -> GroupNumber {
    GroupNumber(((ino.0.saturating_sub(1)) / u64::from(inodes_per_group)) as u32)
}

/// Compute the index of an inode within its block group.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // modulo by u32 always fits in u32
pub fn inode_index_in_group(ino: InodeNumber, inodes_per_group: u32) -> u32 {
    ((ino.0.saturating_sub(1)) % u64::from(inodes_per_group)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_helpers() {
        let bytes = [0x34_u8, 0x12, 0x78, 0x56, 0xEF, 0xCD, 0xAB, 0x90];
        assert_eq!(read_u8(&bytes, 1).expect("u8"), 0x12);
        assert_eq!(read_le_u16(&bytes, 0).expect("u16"), 0x1234);
        assert_eq!(read_le_u32(&bytes, 0).expect("u32"), 0x5678_1234);
        assert_eq!(read_le_u32(&bytes, 4).expect("u32"), 0x90AB_CDEF);
        assert_eq!(read_fixed::<2>(&bytes, 6).expect("fixed"), [0xAB, 0x90]);
    }

    #[test]
    fn test_read_past_end_reports_shortfall() {
        let bytes = [0_u8; 3];
        assert_eq!(
            read_le_u32(&bytes, 1),
            Err(ParseError::InsufficientData {
                needed: 4,
                offset: 1,
                actual: 2,
            })
        );
        assert!(ensure_slice(&bytes, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_trim_nul_padded() {
        assert_eq!(trim_nul_padded(b"rootfs\0\0\0\0"), "rootfs");
        // Full-width labels carry no terminator.
        assert_eq!(trim_nul_padded(b"0123456789abcdef"), "0123456789abcdef");
        assert_eq!(trim_nul_padded(b"\0\0\0"), "");
    }

    #[test]
    fn test_block_size_from_log() {
        assert_eq!(BlockSize::from_log(0).expect("1k").get(), 1024);
        assert_eq!(BlockSize::from_log(1).expect("2k").get(), 2048);
        assert_eq!(BlockSize::from_log(2).expect("4k").get(), 4096);
        assert_eq!(BlockSize::from_log(6).expect("64k").get(), 65536);
        assert!(BlockSize::from_log(7).is_err());
        assert!(BlockSize::from_log(u32::MAX).is_err());
    }

    #[test]
    fn test_block_size_validation() {
        assert!(BlockSize::new(4096).is_ok());
        assert!(BlockSize::new(3000).is_err());
        assert!(BlockSize::new(512).is_err());
        assert!(BlockSize::new(131_072).is_err());
        assert!(BlockSize::new(0).is_err());
        assert_eq!(BlockSize::new(1024).expect("1k").pointers_per_block(), 256);
    }

    #[test]
    fn test_block_to_byte() {
        let bs = BlockSize::new(1024).expect("1k");
        assert_eq!(bs.block_to_byte(BlockNumber(0)), Some(0));
        assert_eq!(bs.block_to_byte(BlockNumber(5)), Some(5120));
        assert_eq!(bs.block_to_byte(BlockNumber(u64::MAX)), None);
    }

    #[test]
    fn test_inode_group_math() {
        assert_eq!(inode_to_group(InodeNumber(1), 128), GroupNumber(0));
        assert_eq!(inode_to_group(InodeNumber(128), 128), GroupNumber(0));
        assert_eq!(inode_to_group(InodeNumber(129), 128), GroupNumber(1));

        assert_eq!(inode_index_in_group(InodeNumber(1), 128), 0);
        assert_eq!(inode_index_in_group(InodeNumber(2), 128), 1);
        assert_eq!(inode_index_in_group(InodeNumber(129), 128), 0);
    }

    #[test]
    fn test_div_ceil() {
        assert_eq!(div_ceil_u64(0, 8), Some(0));
        assert_eq!(div_ceil_u64(1, 8), Some(1));
        assert_eq!(div_ceil_u64(8, 8), Some(1));
        assert_eq!(div_ceil_u64(9, 8), Some(2));
        assert_eq!(div_ceil_u64(9, 0), None);
    }

    #[test]
    fn test_pointer_layout() {
        assert_eq!(EXT2_IND_BLOCK, 12);
        assert_eq!(EXT2_DIND_BLOCK, 13);
        assert_eq!(EXT2_TIND_BLOCK, 14);
        assert_eq!(EXT2_N_BLOCKS, 15);
    }

    #[test]
    fn test_newtype_display() {
        assert_eq!(InodeNumber::ROOT.to_string(), "2");
        assert_eq!(BlockNumber(77).to_string(), "77");
        assert_eq!(GroupNumber(3).to_string(), "3");
    }
}
