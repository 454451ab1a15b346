#![forbid(unsafe_code)]

use e2s_types::{
    BlockNumber, BlockSize, EXT2_DIR_ENTRY_HEADER_LEN, EXT2_GOOD_OLD_FIRST_INO,
    EXT2_GOOD_OLD_INODE_SIZE, EXT2_GROUP_DESC_SIZE, EXT2_N_BLOCKS, EXT2_SUPER_MAGIC,
    EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE, GroupNumber, InodeNumber, ParseError, S_IFBLK,
    S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK, S_IPERM_MASK, div_ceil_u64,
    inode_index_in_group, inode_to_group, read_fixed, read_le_u16, read_le_u32, read_u8,
    trim_nul_padded,
};
use serde::{Deserialize, Serialize};

// ── ext2 feature flags ─────────────────────────────────────────────────────

/// Compatible feature flags (`s_feature_compat`). Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2CompatFeatures(pub u32);

impl Ext2CompatFeatures {
    pub const DIR_PREALLOC: Self = Self(0x0001);
    pub const IMAGIC_INODES: Self = Self(0x0002);
    pub const HAS_JOURNAL: Self = Self(0x0004);
    pub const EXT_ATTR: Self = Self(0x0008);
    pub const RESIZE_INODE: Self = Self(0x0010);
    pub const DIR_INDEX: Self = Self(0x0020);

    const KNOWN: &[(u32, &'static str)] = &[
        (Self::DIR_PREALLOC.0, "DIR_PREALLOC"),
        (Self::IMAGIC_INODES.0, "IMAGIC_INODES"),
        (Self::HAS_JOURNAL.0, "HAS_JOURNAL"),
        (Self::EXT_ATTR.0, "EXT_ATTR"),
        (Self::RESIZE_INODE.0, "RESIZE_INODE"),
        (Self::DIR_INDEX.0, "DIR_INDEX"),
    ];
}

impl std::fmt::Display for Ext2CompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Incompatible feature flags (`s_feature_incompat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2IncompatFeatures(pub u32);

impl Ext2IncompatFeatures {
    pub const COMPRESSION: Self = Self(0x0001);
    pub const FILETYPE: Self = Self(0x0002);
    pub const RECOVER: Self = Self(0x0004);
    pub const JOURNAL_DEV: Self = Self(0x0008);
    pub const META_BG: Self = Self(0x0010);

    const KNOWN: &[(u32, &'static str)] = &[
        (Self::COMPRESSION.0, "COMPRESSION"),
        (Self::FILETYPE.0, "FILETYPE"),
        (Self::RECOVER.0, "RECOVER"),
        (Self::JOURNAL_DEV.0, "JOURNAL_DEV"),
        (Self::META_BG.0, "META_BG"),
    ];
}

impl std::fmt::Display for Ext2IncompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Read-only compatible feature flags (`s_feature_ro_compat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2RoCompatFeatures(pub u32);

impl Ext2RoCompatFeatures {
    pub const SPARSE_SUPER: Self = Self(0x0001);
    pub const LARGE_FILE: Self = Self(0x0002);
    pub const BTREE_DIR: Self = Self(0x0004);

    const KNOWN: &[(u32, &'static str)] = &[
        (Self::SPARSE_SUPER.0, "SPARSE_SUPER"),
        (Self::LARGE_FILE.0, "LARGE_FILE"),
        (Self::BTREE_DIR.0, "BTREE_DIR"),
    ];
}

impl std::fmt::Display for Ext2RoCompatFeatures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        format_flags(f, self.0, Self::KNOWN)
    }
}

/// Pipe-separated flag names, `(none)` when zero, unknown bits as hex.
fn format_flags(
    f: &mut std::fmt::Formatter<'_>,
    bits: u32,
    known: &[(u32, &'static str)],
) -> std::fmt::Result {
    if bits == 0 {
        return f.write_str("(none)");
    }
    let mut first = true;
    let mut remaining = bits;
    for &(bit, name) in known {
        if remaining & bit != 0 {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(name)?;
            remaining &= !bit;
            first = false;
        }
    }
    if remaining != 0 {
        if !first {
            f.write_str("|")?;
        }
        write!(f, "0x{remaining:X}")?;
    }
    Ok(())
}

// ── Superblock ─────────────────────────────────────────────────────────────

/// Round to two decimal places, the precision every report uses.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `free / total * 100`, rounded to two decimals; 0.0 when `total` is 0.
#[must_use]
#[allow(clippy::cast_precision_loss)] // counts are u32-sized on ext2
pub fn percent_free(free: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(free as f64 / total as f64 * 100.0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Superblock {
    // ── Core geometry ────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub block_size: BlockSize,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    /// Effective inode record size: 128 on revision 0, `s_inode_size` after.
    pub inode_size: u16,
    /// Effective first non-reserved inode: 11 on revision 0, `s_first_ino` after.
    pub first_ino: u32,

    // ── Identity ─────────────────────────────────────────────────────────
    pub magic: u16,
    pub uuid: [u8; 16],
    pub volume_name: String,
    pub last_mounted: String,

    // ── Revision & OS ────────────────────────────────────────────────────
    pub rev_level: u32,
    pub minor_rev_level: u16,
    pub creator_os: u32,

    // ── Features ─────────────────────────────────────────────────────────
    pub feature_compat: Ext2CompatFeatures,
    pub feature_incompat: Ext2IncompatFeatures,
    pub feature_ro_compat: Ext2RoCompatFeatures,

    // ── State & error policy ─────────────────────────────────────────────
    pub state: u16,
    pub errors: u16,
    pub mnt_count: u16,
    pub max_mnt_count: u16,

    // ── Timestamps (seconds since epoch) ─────────────────────────────────
    pub mtime: u32,
    pub wtime: u32,
    pub lastcheck: u32,
}

impl Ext2Superblock {
    /// Parse a superblock from the 1024-byte region at image offset 1024.
    ///
    /// The magic is checked before any other field is interpreted.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < EXT2_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u16(region, 0x38)?;
        if magic != EXT2_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(EXT2_SUPER_MAGIC),
                actual: u64::from(magic),
            });
        }

        let log_block_size = read_le_u32(region, 0x18)?;
        let block_size = BlockSize::from_log(log_block_size)?;

        let rev_level = read_le_u32(region, 0x4C)?;
        let (inode_size, first_ino) = if rev_level == 0 {
            (EXT2_GOOD_OLD_INODE_SIZE, EXT2_GOOD_OLD_FIRST_INO)
        } else {
            (read_le_u16(region, 0x58)?, read_le_u32(region, 0x54)?)
        };

        Ok(Self {
            inodes_count: read_le_u32(region, 0x00)?,
            blocks_count: read_le_u32(region, 0x04)?,
            reserved_blocks_count: read_le_u32(region, 0x08)?,
            free_blocks_count: read_le_u32(region, 0x0C)?,
            free_inodes_count: read_le_u32(region, 0x10)?,
            first_data_block: read_le_u32(region, 0x14)?,
            log_block_size,
            block_size,
            blocks_per_group: read_le_u32(region, 0x20)?,
            inodes_per_group: read_le_u32(region, 0x28)?,
            inode_size,
            first_ino,

            magic,
            uuid: read_fixed::<16>(region, 0x68)?,
            volume_name: trim_nul_padded(&read_fixed::<16>(region, 0x78)?),
            last_mounted: trim_nul_padded(&read_fixed::<64>(region, 0x88)?),

            rev_level,
            minor_rev_level: read_le_u16(region, 0x3E)?,
            creator_os: read_le_u32(region, 0x48)?,

            feature_compat: Ext2CompatFeatures(read_le_u32(region, 0x5C)?),
            feature_incompat: Ext2IncompatFeatures(read_le_u32(region, 0x60)?),
            feature_ro_compat: Ext2RoCompatFeatures(read_le_u32(region, 0x64)?),

            state: read_le_u16(region, 0x3A)?,
            errors: read_le_u16(region, 0x3C)?,
            mnt_count: read_le_u16(region, 0x34)?,
            max_mnt_count: read_le_u16(region, 0x36)?,

            mtime: read_le_u32(region, 0x2C)?,
            wtime: read_le_u32(region, 0x30)?,
            lastcheck: read_le_u32(region, 0x40)?,
        })
    }

    /// Parse the superblock out of a whole in-memory image.
    pub fn parse_from_image(image: &[u8]) -> Result<Self, ParseError> {
        let end = EXT2_SUPERBLOCK_OFFSET + EXT2_SUPERBLOCK_SIZE;
        if image.len() < end {
            return Err(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: EXT2_SUPERBLOCK_OFFSET,
                actual: image.len().saturating_sub(EXT2_SUPERBLOCK_OFFSET),
            });
        }
        Self::parse_superblock_region(&image[EXT2_SUPERBLOCK_OFFSET..end])
    }

    #[must_use]
    pub fn free_blocks_percent(&self) -> f64 {
        percent_free(
            u64::from(self.free_blocks_count),
            u64::from(self.blocks_count),
        )
    }

    #[must_use]
    pub fn free_inodes_percent(&self) -> f64 {
        percent_free(
            u64::from(self.free_inodes_count),
            u64::from(self.inodes_count),
        )
    }

    /// Group count implied by the inode geometry: `ceil(inodes_count / inodes_per_group)`.
    #[must_use]
    pub fn groups_count_by_inodes(&self) -> Option<u32> {
        div_ceil_u64(
            u64::from(self.inodes_count),
            u64::from(self.inodes_per_group),
        )
        .and_then(|n| u32::try_from(n).ok())
    }

    /// Group count implied by the block geometry:
    /// `ceil((blocks_count - first_data_block) / blocks_per_group)`.
    #[must_use]
    pub fn groups_count_by_blocks(&self) -> Option<u32> {
        let data_blocks = self.blocks_count.checked_sub(self.first_data_block)?;
        div_ceil_u64(u64::from(data_blocks), u64::from(self.blocks_per_group))
            .and_then(|n| u32::try_from(n).ok())
    }

    /// Validate field values that every later offset computation relies on.
    pub fn validate_geometry_fields(&self) -> Result<(), ParseError> {
        if self.blocks_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_blocks_per_group",
                reason: "cannot be zero",
            });
        }
        if self.inodes_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_inodes_per_group",
                reason: "cannot be zero",
            });
        }
        if self.first_data_block >= self.blocks_count {
            return Err(ParseError::InvalidField {
                field: "s_first_data_block",
                reason: "not below s_blocks_count",
            });
        }
        if self.inode_size < EXT2_GOOD_OLD_INODE_SIZE {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "must be >= 128",
            });
        }
        if !self.inode_size.is_power_of_two() {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "must be a power of two",
            });
        }
        if u32::from(self.inode_size) > self.block_size.get() {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "inode_size exceeds block_size",
            });
        }
        Ok(())
    }

    /// Full geometry check: field values plus agreement between the inode-
    /// and block-derived group counts.
    pub fn validate_geometry(&self) -> Result<(), ParseError> {
        self.validate_geometry_fields()?;
        let by_inodes = self.groups_count_by_inodes().unwrap_or(0);
        let by_blocks = self.groups_count_by_blocks().unwrap_or(0);
        if by_inodes == 0 {
            return Err(ParseError::InvalidField {
                field: "s_inodes_count",
                reason: "filesystem has no block groups",
            });
        }
        if by_inodes != by_blocks {
            return Err(ParseError::InvalidField {
                field: "s_blocks_per_group",
                reason: "group count from blocks disagrees with group count from inodes",
            });
        }
        Ok(())
    }

    /// First block of the group descriptor table.
    #[must_use]
    pub fn gdt_start_block(&self) -> BlockNumber {
        BlockNumber(u64::from(self.first_data_block) + 1)
    }

    /// Blocks occupied by a descriptor table of `groups` entries.
    #[must_use]
    pub fn gdt_blocks(&self, groups: u32) -> u64 {
        let bytes = u64::from(groups) * EXT2_GROUP_DESC_SIZE as u64;
        bytes.div_ceil(u64::from(self.block_size.get()))
    }

    /// Returns `(group, index_in_group, byte_offset_in_inode_table)`.
    #[must_use]
    pub fn inode_table_offset(&self, ino: InodeNumber) -> (GroupNumber, u32, u64) {
        let group = inode_to_group(ino, self.inodes_per_group);
        let index = inode_index_in_group(ino, self.inodes_per_group);
        let byte_offset = u64::from(index) * u64::from(self.inode_size);
        (group, index, byte_offset)
    }

    #[must_use]
    pub fn creator_os_name(&self) -> &'static str {
        match self.creator_os {
            0 => "Linux",
            1 => "Hurd",
            2 => "Masix",
            3 => "FreeBSD",
            4 => "Lites",
            _ => "Unknown",
        }
    }

    #[must_use]
    pub fn state_name(&self) -> &'static str {
        match self.state {
            1 => "clean",
            2 => "has errors",
            _ => "unknown",
        }
    }

    #[must_use]
    pub fn errors_policy_name(&self) -> &'static str {
        match self.errors {
            1 => "continue",
            2 => "remount read-only",
            3 => "panic",
            _ => "unknown",
        }
    }

    /// UUID in the canonical 8-4-4-4-12 form.
    #[must_use]
    pub fn uuid_string(&self) -> String {
        let u = &self.uuid;
        format!(
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            u[0], u[1], u[2], u[3], u[4], u[5], u[6], u[7], u[8], u[9], u[10], u[11], u[12], u[13],
            u[14], u[15]
        )
    }
}

// ── Group descriptors ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl Ext2GroupDesc {
    /// Parse one 32-byte descriptor.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EXT2_GROUP_DESC_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_GROUP_DESC_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            block_bitmap: read_le_u32(bytes, 0x00)?,
            inode_bitmap: read_le_u32(bytes, 0x04)?,
            inode_table: read_le_u32(bytes, 0x08)?,
            free_blocks_count: read_le_u16(bytes, 0x0C)?,
            free_inodes_count: read_le_u16(bytes, 0x0E)?,
            used_dirs_count: read_le_u16(bytes, 0x10)?,
        })
    }
}

// ── Inodes ─────────────────────────────────────────────────────────────────

/// File type derived from the mode's type nibble.
///
/// Unrecognised nibbles map to `Unknown`; that is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileType {
    #[serde(rename = "regular")]
    Regular,
    #[serde(rename = "directory")]
    Directory,
    #[serde(rename = "symlink")]
    Symlink,
    #[serde(rename = "block device")]
    BlockDevice,
    #[serde(rename = "character device")]
    CharDevice,
    #[serde(rename = "fifo")]
    Fifo,
    #[serde(rename = "socket")]
    Socket,
    #[serde(rename = "unknown")]
    Unknown,
}

impl FileType {
    #[must_use]
    pub fn from_mode(mode: u16) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::Regular,
            S_IFDIR => Self::Directory,
            S_IFLNK => Self::Symlink,
            S_IFBLK => Self::BlockDevice,
            S_IFCHR => Self::CharDevice,
            S_IFIFO => Self::Fifo,
            S_IFSOCK => Self::Socket,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::BlockDevice => "block device",
            Self::CharDevice => "character device",
            Self::Fifo => "fifo",
            Self::Socket => "socket",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Inode {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub links_count: u16,
    /// Allocated 512-byte sectors (`i_blocks`).
    pub blocks: u32,
    pub flags: u32,
    pub generation: u32,
    pub file_acl: u32,

    // ── Timestamps (seconds) ─────────────────────────────────────────────
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,

    /// Raw `i_block`: 12 direct pointers, then single, double, triple indirect.
    pub block: [u32; EXT2_N_BLOCKS],
}

impl Ext2Inode {
    /// Parse an inode record. Requires at least 128 bytes; any extra bytes
    /// of a larger on-disk record are ignored.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let base = usize::from(EXT2_GOOD_OLD_INODE_SIZE);
        if bytes.len() < base {
            return Err(ParseError::InsufficientData {
                needed: base,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mode = read_le_u16(bytes, 0x00)?;
        let uid_lo = u32::from(read_le_u16(bytes, 0x02)?);
        let gid_lo = u32::from(read_le_u16(bytes, 0x18)?);
        let uid_hi = u32::from(read_le_u16(bytes, 0x78)?);
        let gid_hi = u32::from(read_le_u16(bytes, 0x7A)?);

        // i_size_high only carries size bits for regular files; directories
        // reuse the slot as i_dir_acl.
        let size_lo = u64::from(read_le_u32(bytes, 0x04)?);
        let size_hi = if mode & S_IFMT == S_IFREG {
            u64::from(read_le_u32(bytes, 0x6C)?)
        } else {
            0
        };

        let mut block = [0_u32; EXT2_N_BLOCKS];
        for (i, slot) in block.iter_mut().enumerate() {
            *slot = read_le_u32(bytes, 0x28 + i * 4)?;
        }

        Ok(Self {
            mode,
            uid: uid_lo | (uid_hi << 16),
            gid: gid_lo | (gid_hi << 16),
            size: size_lo | (size_hi << 32),
            links_count: read_le_u16(bytes, 0x1A)?,
            blocks: read_le_u32(bytes, 0x1C)?,
            flags: read_le_u32(bytes, 0x20)?,
            generation: read_le_u32(bytes, 0x64)?,
            file_acl: read_le_u32(bytes, 0x68)?,

            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,
            dtime: read_le_u32(bytes, 0x14)?,

            block,
        })
    }

    #[must_use]
    pub fn file_type(&self) -> FileType {
        FileType::from_mode(self.mode)
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// Permission, setuid/setgid and sticky bits (lower 12 bits of mode).
    #[must_use]
    pub fn permission_bits(&self) -> u16 {
        self.mode & S_IPERM_MASK
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Raw 15-slot pointer array, zeros included.
    #[must_use]
    pub fn block_pointers(&self) -> &[u32; EXT2_N_BLOCKS] {
        &self.block
    }

    /// A symlink whose target lives inside `i_block` instead of a data block.
    ///
    /// Such an inode owns no data blocks: `i_blocks` counts at most the
    /// xattr block, which is `block_size / 512` sectors.
    #[must_use]
    pub fn is_fast_symlink(&self, block_size: BlockSize) -> bool {
        if !self.is_symlink() {
            return false;
        }
        let acl_sectors = if self.file_acl == 0 {
            0
        } else {
            block_size.get() >> 9
        };
        self.blocks <= acl_sectors && self.size < (EXT2_N_BLOCKS * 4) as u64
    }

    /// Target of a fast symlink, `None` for every other inode.
    #[must_use]
    pub fn fast_symlink_target(&self, block_size: BlockSize) -> Option<String> {
        if !self.is_fast_symlink(block_size) {
            return None;
        }
        let raw: Vec<u8> = self.block.iter().flat_map(|p| p.to_le_bytes()).collect();
        let len = usize::try_from(self.size).ok()?.min(raw.len());
        Some(String::from_utf8_lossy(&raw[..len]).into_owned())
    }

    /// Whether `i_block` holds block pointers at all.
    ///
    /// Device inodes keep a device number there and fast symlinks keep the
    /// link target; neither may be resolved as pointers.
    #[must_use]
    pub fn has_block_pointers(&self, block_size: BlockSize) -> bool {
        match self.file_type() {
            FileType::Regular | FileType::Directory => true,
            FileType::Symlink => !self.is_fast_symlink(block_size),
            FileType::BlockDevice
            | FileType::CharDevice
            | FileType::Fifo
            | FileType::Socket
            | FileType::Unknown => false,
        }
    }
}

// ── Directory entries ──────────────────────────────────────────────────────

/// File-type hint byte stored in directory entries (FILETYPE feature).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Ext2FileType {
    Unknown = 0,
    RegFile = 1,
    Dir = 2,
    Chrdev = 3,
    Blkdev = 4,
    Fifo = 5,
    Sock = 6,
    Symlink = 7,
}

impl Ext2FileType {
    #[must_use]
    pub fn from_raw(val: u8) -> Self {
        match val {
            1 => Self::RegFile,
            2 => Self::Dir,
            3 => Self::Chrdev,
            4 => Self::Blkdev,
            5 => Self::Fifo,
            6 => Self::Sock,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }
}

/// One directory record, borrowed from its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ext2DirEntryRef<'a> {
    /// Target inode; 0 marks a tombstone.
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: Ext2FileType,
    pub name: &'a [u8],
    /// Byte offset of this record inside its block.
    pub offset: usize,
}

impl Ext2DirEntryRef<'_> {
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.inode == 0
    }

    /// Return the name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(self.name).into_owned()
    }

    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name == b"."
    }

    #[must_use]
    pub fn is_dotdot(&self) -> bool {
        self.name == b".."
    }
}

/// Lazy walk over the records of one directory block.
///
/// Yields every record, tombstones included. Each step checks
/// `rec_len >= 8`, `rec_len % 4 == 0`, `offset + rec_len <= block.len()` and
/// `name_len <= rec_len - 8`; the first violation is yielded as an error and
/// the iterator is fused from then on. [`DirBlockIter::offset`] still points
/// at the offending record afterwards.
#[derive(Debug, Clone)]
pub struct DirBlockIter<'a> {
    block: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> DirBlockIter<'a> {
    #[must_use]
    pub fn new(block: &'a [u8]) -> Self {
        Self {
            block,
            offset: 0,
            done: false,
        }
    }

    /// Offset of the next record to decode (or of the record that failed).
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn fail(&mut self, field: &'static str, reason: &'static str) -> Option<<Self as Iterator>::Item> {
        self.done = true;
        Some(Err(ParseError::InvalidField { field, reason }))
    }
}

impl<'a> Iterator for DirBlockIter<'a> {
    type Item = Result<Ext2DirEntryRef<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.block.len() {
            return None;
        }
        if self.block.len() - self.offset < EXT2_DIR_ENTRY_HEADER_LEN {
            return self.fail("de_rec_len", "truncated entry header at end of block");
        }

        let (inode, rec_len, name_len, file_type_raw) = match decode_header(self.block, self.offset)
        {
            Ok(header) => header,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        let rec = usize::from(rec_len);
        if rec < EXT2_DIR_ENTRY_HEADER_LEN {
            return self.fail("de_rec_len", "directory entry rec_len < 8");
        }
        if rec % 4 != 0 {
            return self.fail("de_rec_len", "directory entry rec_len not 4-byte aligned");
        }
        let entry_end = self.offset + rec;
        if entry_end > self.block.len() {
            return self.fail("de_rec_len", "directory entry extends past block boundary");
        }
        if usize::from(name_len) > rec - EXT2_DIR_ENTRY_HEADER_LEN {
            return self.fail("de_name_len", "name extends past rec_len");
        }

        let name_start = self.offset + EXT2_DIR_ENTRY_HEADER_LEN;
        let entry = Ext2DirEntryRef {
            inode,
            rec_len,
            name_len,
            file_type: Ext2FileType::from_raw(file_type_raw),
            name: &self.block[name_start..name_start + usize::from(name_len)],
            offset: self.offset,
        };
        self.offset = entry_end;
        Some(Ok(entry))
    }
}

impl std::iter::FusedIterator for DirBlockIter<'_> {}

fn decode_header(block: &[u8], offset: usize) -> Result<(u32, u16, u8, u8), ParseError> {
    Ok((
        read_le_u32(block, offset)?,
        read_le_u16(block, offset + 4)?,
        read_u8(block, offset + 6)?,
        read_u8(block, offset + 7)?,
    ))
}

/// Iterate the records of one directory block.
#[must_use]
pub fn iter_dir_block(block: &[u8]) -> DirBlockIter<'_> {
    DirBlockIter::new(block)
}
