#![forbid(unsafe_code)]
//! Read-only ext2 volume queries.
//!
//! [`Ext2Volume`] opens an image, validates the superblock geometry and loads
//! the group descriptor table once. Every query after that decodes inodes and
//! directory blocks fresh from the device; nothing else is cached.
//!
//! ```ignore
//! let cx = Cx::for_request();
//! let vol = Ext2Volume::open(&cx, "disk.img")?;
//! for entry in vol.list_directory(&cx, InodeNumber::ROOT)? {
//!     println!("{} {}", entry.inode, entry.name);
//! }
//! ```

pub mod search;

pub use search::{
    AbandonReason, AbandonedBranch, DEFAULT_MAX_DEPTH, SearchMatch, SearchOptions, SearchReport,
};

use e2s_block::{
    BlockBuf, BlockDevice, ByteBlockDevice, ByteDevice, FileByteDevice, read_superblock_region,
};
use e2s_blockmap::{PointerBounds, data_blocks_for_size, resolve_block_map};
use e2s_error::{E2sError, Result};
use e2s_ondisk::{Ext2FileType, Ext2GroupDesc, Ext2Inode, Ext2Superblock, FileType, iter_dir_block};
use e2s_types::{
    BlockNumber, Cx, EXT2_GROUP_DESC_SIZE, EXT2_N_BLOCKS, GroupNumber, InodeNumber, ParseError,
    inode_to_group,
};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, trace, warn};

/// Block map length used when the caller gives no explicit maximum.
pub const DEFAULT_MAX_BLOCKS: usize = 1024;

#[inline]
pub(crate) fn cx_checkpoint(cx: &Cx) -> Result<()> {
    cx.checkpoint().map_err(|_| E2sError::Cancelled)
}

// ── Open options & geometry ─────────────────────────────────────────────────

/// Options controlling how an image is opened.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Reject images whose inode- and block-derived group counts disagree.
    ///
    /// When `false` the mismatch is logged and the smaller count is used.
    /// Magic and block-size checks always apply.
    pub strict_geometry: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            strict_geometry: true,
        }
    }
}

/// Geometry derived from the superblock at open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ext2Geometry {
    pub block_size: u32,
    pub blocks_count: u32,
    pub first_data_block: u32,
    pub blocks_per_group: u32,
    pub inodes_count: u32,
    pub inodes_per_group: u32,
    /// Effective on-disk inode record size.
    pub inode_size: u16,
    pub groups_count: u32,
    pub gdt_start_block: u64,
    pub gdt_blocks: u64,
}

impl Ext2Geometry {
    fn new(sb: &Ext2Superblock, groups_count: u32) -> Self {
        Self {
            block_size: sb.block_size.get(),
            blocks_count: sb.blocks_count,
            first_data_block: sb.first_data_block,
            blocks_per_group: sb.blocks_per_group,
            inodes_count: sb.inodes_count,
            inodes_per_group: sb.inodes_per_group,
            inode_size: sb.inode_size,
            groups_count,
            gdt_start_block: sb.gdt_start_block().0,
            gdt_blocks: sb.gdt_blocks(groups_count),
        }
    }
}

// ── Query results ───────────────────────────────────────────────────────────

/// Superblock fields plus the derived usage figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuperblockSummary {
    pub volume_name: String,
    pub uuid: String,
    pub magic: u16,
    pub revision: u32,
    pub minor_revision: u16,
    pub creator_os: String,
    pub state: String,
    pub errors_policy: String,
    pub block_size: u32,
    pub log_block_size: u32,
    pub blocks_count: u32,
    pub free_blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_percent: f64,
    pub inodes_count: u32,
    pub free_inodes_count: u32,
    pub free_inodes_percent: f64,
    pub first_data_block: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub groups_count: u32,
    pub inode_size: u16,
    pub first_ino: u32,
    pub mount_count: u16,
    /// Signed on disk; -1 disables the mount-count check.
    pub max_mount_count: i16,
    pub last_mount_time: u32,
    pub last_write_time: u32,
    pub last_check_time: u32,
    pub last_mounted: String,
    pub features_compat: String,
    pub features_incompat: String,
    pub features_ro_compat: String,
}

/// One decoded, non-tombstone directory record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: InodeNumber,
    pub name: Vec<u8>,
    pub file_type: Ext2FileType,
}

impl DirEntry {
    /// Name decoded as UTF-8 with replacement characters.
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    #[must_use]
    pub fn is_dot_or_dotdot(&self) -> bool {
        self.name == b"." || self.name == b".."
    }
}

/// Records of one directory, up to the first damaged record if any.
#[derive(Debug, Default)]
pub struct DirScan {
    pub entries: Vec<DirEntry>,
    /// Why the scan stopped before the end of the directory.
    pub damage: Option<E2sError>,
}

impl DirScan {
    /// The entries if the whole directory was readable, else the damage.
    pub fn into_result(self) -> Result<Vec<DirEntry>> {
        match self.damage {
            Some(err) => Err(err),
            None => Ok(self.entries),
        }
    }
}

/// A directory entry joined with the inode it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirListing {
    pub name: String,
    pub inode: InodeNumber,
    pub size: u64,
    pub file_type: FileType,
    /// Permission bits only (`mode & 0o7777`).
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub links_count: u16,
}

impl DirListing {
    fn new(entry: &DirEntry, inode: &Ext2Inode) -> Self {
        Self {
            name: entry.name_str(),
            inode: entry.inode,
            size: inode.size,
            file_type: inode.file_type(),
            mode: inode.permission_bits(),
            uid: inode.uid,
            gid: inode.gid,
            links_count: inode.links_count,
        }
    }
}

/// Every decoded inode field plus the raw pointer array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InodeInfo {
    pub inode: InodeNumber,
    pub group: u32,
    pub file_type: FileType,
    /// Full `i_mode`, type nibble included.
    pub mode: u16,
    pub permissions: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub links_count: u16,
    /// Allocated 512-byte sectors.
    pub sectors: u32,
    pub flags: u32,
    pub generation: u32,
    pub file_acl: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub raw_block_pointers: [u32; EXT2_N_BLOCKS],
    pub symlink_target: Option<String>,
}

/// Outcome of [`Ext2Volume::query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResult {
    Inode {
        info: InodeInfo,
        blocks: Vec<BlockNumber>,
    },
    Search(SearchReport),
}

// ── Ext2Volume ──────────────────────────────────────────────────────────────

/// An opened ext2 image.
///
/// The superblock and group table are immutable after open, so one volume
/// can serve concurrent queries from several threads.
pub struct Ext2Volume {
    superblock: Ext2Superblock,
    geometry: Ext2Geometry,
    groups: Vec<Ext2GroupDesc>,
    blocks: ByteBlockDevice<Box<dyn ByteDevice>>,
}

impl std::fmt::Debug for Ext2Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ext2Volume")
            .field("volume_name", &self.superblock.volume_name)
            .field("geometry", &self.geometry)
            .field("dev_len", &self.blocks.inner().len_bytes())
            .finish_non_exhaustive()
    }
}

impl Ext2Volume {
    /// Open the image at `path` read-only with default options.
    pub fn open(cx: &Cx, path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(cx, path, &OpenOptions::default())
    }

    pub fn open_with_options(
        cx: &Cx,
        path: impl AsRef<Path>,
        options: &OpenOptions,
    ) -> Result<Self> {
        let dev = FileByteDevice::open(path.as_ref())?;
        Self::from_device(cx, Box::new(dev), options)
    }

    /// Open a volume on an already-opened device.
    pub fn from_device(cx: &Cx, dev: Box<dyn ByteDevice>, options: &OpenOptions) -> Result<Self> {
        let region = read_superblock_region(cx, &*dev)?;
        let superblock = Ext2Superblock::parse_superblock_region(&region)
            .map_err(|e| parse_error_to_e2s(&e))?;
        let groups_count = validated_groups_count(&superblock, options)?;
        let geometry = Ext2Geometry::new(&superblock, groups_count);
        debug!(
            block_size = geometry.block_size,
            blocks_count = geometry.blocks_count,
            inodes_count = geometry.inodes_count,
            groups = geometry.groups_count,
            inode_size = geometry.inode_size,
            "opened ext2 volume"
        );

        let blocks = ByteBlockDevice::new(dev, superblock.block_size);
        let groups = load_group_table(cx, &blocks, &superblock, groups_count)?;
        Ok(Self {
            superblock,
            geometry,
            groups,
            blocks,
        })
    }

    #[must_use]
    pub fn superblock(&self) -> &Ext2Superblock {
        &self.superblock
    }

    #[must_use]
    pub fn geometry(&self) -> &Ext2Geometry {
        &self.geometry
    }

    #[must_use]
    pub fn group_descriptors(&self) -> &[Ext2GroupDesc] {
        &self.groups
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.geometry.block_size
    }

    #[must_use]
    pub fn device_len(&self) -> u64 {
        self.blocks.inner().len_bytes()
    }

    #[must_use]
    pub fn superblock_summary(&self) -> SuperblockSummary {
        let sb = &self.superblock;
        SuperblockSummary {
            volume_name: sb.volume_name.clone(),
            uuid: sb.uuid_string(),
            magic: sb.magic,
            revision: sb.rev_level,
            minor_revision: sb.minor_rev_level,
            creator_os: sb.creator_os_name().to_owned(),
            state: sb.state_name().to_owned(),
            errors_policy: sb.errors_policy_name().to_owned(),
            block_size: sb.block_size.get(),
            log_block_size: sb.log_block_size,
            blocks_count: sb.blocks_count,
            free_blocks_count: sb.free_blocks_count,
            reserved_blocks_count: sb.reserved_blocks_count,
            free_blocks_percent: sb.free_blocks_percent(),
            inodes_count: sb.inodes_count,
            free_inodes_count: sb.free_inodes_count,
            free_inodes_percent: sb.free_inodes_percent(),
            first_data_block: sb.first_data_block,
            blocks_per_group: sb.blocks_per_group,
            inodes_per_group: sb.inodes_per_group,
            groups_count: self.geometry.groups_count,
            inode_size: sb.inode_size,
            first_ino: sb.first_ino,
            mount_count: sb.mnt_count,
            max_mount_count: i16::from_ne_bytes(sb.max_mnt_count.to_ne_bytes()),
            last_mount_time: sb.mtime,
            last_write_time: sb.wtime,
            last_check_time: sb.lastcheck,
            last_mounted: sb.last_mounted.clone(),
            features_compat: sb.feature_compat.to_string(),
            features_incompat: sb.feature_incompat.to_string(),
            features_ro_compat: sb.feature_ro_compat.to_string(),
        }
    }

    // ── Group descriptors & inodes ──────────────────────────────────────

    pub fn group_desc(&self, group: GroupNumber) -> Result<&Ext2GroupDesc> {
        usize::try_from(group.0)
            .ok()
            .and_then(|i| self.groups.get(i))
            .ok_or_else(|| {
                E2sError::OutOfRange(format!(
                    "group {group} beyond loaded group count {}",
                    self.groups.len()
                ))
            })
    }

    /// Locate and decode inode `ino`.
    pub fn read_inode(&self, cx: &Cx, ino: InodeNumber) -> Result<Ext2Inode> {
        if ino.0 == 0 {
            return Err(E2sError::InvalidArgument(
                "inode numbers start at 1".to_owned(),
            ));
        }
        if ino.0 > u64::from(self.superblock.inodes_count) {
            return Err(E2sError::OutOfRange(format!(
                "inode {ino} exceeds inodes_count {}",
                self.superblock.inodes_count
            )));
        }

        let (group, index, within_table) = self.superblock.inode_table_offset(ino);
        let gd = self.group_desc(group)?;
        let offset = self
            .superblock
            .block_size
            .block_to_byte(BlockNumber(u64::from(gd.inode_table)))
            .and_then(|table| table.checked_add(within_table))
            .ok_or_else(|| E2sError::OutOfRange(format!("inode {ino} offset overflows u64")))?;
        trace!(ino = ino.0, group = group.0, index, offset, "read_inode");

        let mut buf = vec![0_u8; usize::from(self.superblock.inode_size)];
        self.blocks.inner().read_exact_at(cx, offset, &mut buf)?;
        Ext2Inode::parse_from_bytes(&buf).map_err(|e| parse_error_to_e2s(&e))
    }

    /// Inode detail for display.
    ///
    /// An unused inode (link count 0) or one that cannot be read is
    /// `NotFound`; bad inode numbers and cancellation pass through.
    pub fn inode_info(&self, cx: &Cx, ino: InodeNumber) -> Result<InodeInfo> {
        let inode = self.read_inode(cx, ino).map_err(|err| match err {
            E2sError::InvalidArgument(_) | E2sError::OutOfRange(_) | E2sError::Cancelled => err,
            other => E2sError::NotFound(format!("inode {ino}: {other}")),
        })?;
        if inode.links_count == 0 {
            return Err(E2sError::NotFound(format!("inode {ino} is not in use")));
        }

        let symlink_target = if inode.is_symlink() {
            match self.read_symlink(cx, ino, &inode) {
                Ok(target) => Some(target),
                Err(E2sError::Cancelled) => return Err(E2sError::Cancelled),
                Err(err) => {
                    warn!(ino = ino.0, error = %err, "unreadable symlink target");
                    None
                }
            }
        } else {
            None
        };

        Ok(InodeInfo {
            inode: ino,
            group: inode_to_group(ino, self.superblock.inodes_per_group).0,
            file_type: inode.file_type(),
            mode: inode.mode,
            permissions: inode.permission_bits(),
            uid: inode.uid,
            gid: inode.gid,
            size: inode.size,
            links_count: inode.links_count,
            sectors: inode.blocks,
            flags: inode.flags,
            generation: inode.generation,
            file_acl: inode.file_acl,
            atime: inode.atime,
            ctime: inode.ctime,
            mtime: inode.mtime,
            dtime: inode.dtime,
            raw_block_pointers: *inode.block_pointers(),
            symlink_target,
        })
    }

    /// Target of a symlink inode, inline or from its first data block.
    pub fn read_symlink(&self, cx: &Cx, ino: InodeNumber, inode: &Ext2Inode) -> Result<String> {
        if !inode.is_symlink() {
            return Err(E2sError::InvalidArgument(format!(
                "inode {ino} is not a symlink"
            )));
        }
        if let Some(target) = inode.fast_symlink_target(self.superblock.block_size) {
            return Ok(target);
        }
        let Some(first) = self.data_blocks(cx, ino, inode, Some(1))?.into_iter().next() else {
            return Ok(String::new());
        };
        let block = self.read_block(cx, first)?.into_inner();
        let len = usize::try_from(inode.size)
            .unwrap_or(usize::MAX)
            .min(block.len());
        Ok(String::from_utf8_lossy(&block[..len]).into_owned())
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    pub fn read_block(&self, cx: &Cx, block: BlockNumber) -> Result<BlockBuf> {
        self.blocks.read_block(cx, block)
    }

    fn pointer_bounds(&self) -> PointerBounds {
        PointerBounds {
            block_size: self.superblock.block_size,
            first_data_block: self.superblock.first_data_block,
            blocks_count: self.superblock.blocks_count,
        }
    }

    /// Data blocks of `inode` in logical order, holes omitted.
    ///
    /// Inodes whose `i_block` does not hold pointers (devices, fast
    /// symlinks) own no blocks.
    pub fn data_blocks(
        &self,
        cx: &Cx,
        ino: InodeNumber,
        inode: &Ext2Inode,
        limit: Option<usize>,
    ) -> Result<Vec<BlockNumber>> {
        if !inode.has_block_pointers(self.superblock.block_size) {
            return Ok(Vec::new());
        }
        let mut read = |block: BlockNumber| self.read_block(cx, block).map(BlockBuf::into_inner);
        resolve_block_map(
            &mut read,
            &self.pointer_bounds(),
            ino,
            inode.block_pointers(),
            limit,
        )
    }

    /// Block map of `ino`, truncated at `max_blocks` entries.
    pub fn block_map(
        &self,
        cx: &Cx,
        ino: InodeNumber,
        max_blocks: usize,
    ) -> Result<Vec<BlockNumber>> {
        let inode = self.read_inode(cx, ino)?;
        let blocks = self.data_blocks(cx, ino, &inode, Some(max_blocks))?;
        debug!(ino = ino.0, blocks = blocks.len(), max_blocks, "block map");
        Ok(blocks)
    }

    // ── Directories ─────────────────────────────────────────────────────

    /// Every non-tombstone record of directory `ino`, `.` and `..` included,
    /// in on-disk order.
    ///
    /// Fails on the first damaged record; [`Ext2Volume::scan_dir`] keeps the
    /// records read before it.
    pub fn read_dir(&self, cx: &Cx, ino: InodeNumber) -> Result<Vec<DirEntry>> {
        self.scan_dir(cx, ino)?.into_result()
    }

    /// Records of directory `ino` up to the first damaged record or
    /// unreadable block.
    ///
    /// Errors that prevent reading anything at all (not a directory, a bad
    /// block map, cancellation) are returned as `Err`.
    pub fn scan_dir(&self, cx: &Cx, ino: InodeNumber) -> Result<DirScan> {
        let inode = self.read_inode(cx, ino)?;
        self.scan_dir_inode(cx, ino, &inode)
    }

    pub(crate) fn read_dir_inode(
        &self,
        cx: &Cx,
        ino: InodeNumber,
        inode: &Ext2Inode,
    ) -> Result<Vec<DirEntry>> {
        self.scan_dir_inode(cx, ino, inode)?.into_result()
    }

    pub(crate) fn scan_dir_inode(
        &self,
        cx: &Cx,
        ino: InodeNumber,
        inode: &Ext2Inode,
    ) -> Result<DirScan> {
        if !inode.is_dir() {
            return Err(E2sError::NotDirectory);
        }
        // Slack blocks past i_size are never directory data.
        let limit = usize::try_from(data_blocks_for_size(inode.size, self.superblock.block_size))
            .unwrap_or(usize::MAX);
        let blocks = self.data_blocks(cx, ino, inode, Some(limit))?;

        let mut scan = DirScan::default();
        for block in blocks {
            let data = match self.read_block(cx, block) {
                Ok(data) => data,
                Err(E2sError::Cancelled) => return Err(E2sError::Cancelled),
                Err(err) => {
                    scan.damage = Some(err);
                    return Ok(scan);
                }
            };
            let mut records = iter_dir_block(data.as_slice());
            while let Some(record) = records.next() {
                let record = match record {
                    Ok(record) => record,
                    Err(e) => {
                        scan.damage = Some(E2sError::CorruptDirectory {
                            inode: ino.0,
                            block: block.0,
                            detail: format!("{e} at offset {}", records.offset()),
                        });
                        return Ok(scan);
                    }
                };
                if record.is_tombstone() {
                    trace!(dir = ino.0, offset = record.offset, "skip tombstone");
                    continue;
                }
                scan.entries.push(DirEntry {
                    inode: InodeNumber(u64::from(record.inode)),
                    name: record.name.to_vec(),
                    file_type: record.file_type,
                });
            }
        }
        Ok(scan)
    }

    /// Directory listing joined with each child's inode.
    ///
    /// Entries whose inode cannot be read are skipped and logged.
    pub fn list_directory(&self, cx: &Cx, ino: InodeNumber) -> Result<Vec<DirListing>> {
        let entries = self.read_dir(cx, ino)?;
        let mut listing = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.read_inode(cx, entry.inode) {
                Ok(child) => listing.push(DirListing::new(&entry, &child)),
                Err(E2sError::Cancelled) => return Err(E2sError::Cancelled),
                Err(err) => warn!(
                    dir = ino.0,
                    child = entry.inode.0,
                    name = %entry.name_str(),
                    error = %err,
                    "skipping unreadable entry"
                ),
            }
        }
        Ok(listing)
    }

    /// Look up `name` in directory `dir`.
    pub fn lookup(
        &self,
        cx: &Cx,
        dir: InodeNumber,
        dir_inode: &Ext2Inode,
        name: &[u8],
    ) -> Result<Option<InodeNumber>> {
        let scan = self.scan_dir_inode(cx, dir, dir_inode)?;
        if let Some(entry) = scan.entries.iter().find(|e| e.name == name) {
            return Ok(Some(entry.inode));
        }
        // Absent from the readable part: the damage decides.
        scan.into_result().map(|_| None)
    }

    /// Resolve an absolute path component by component from the root.
    pub fn resolve_path(&self, cx: &Cx, path: &str) -> Result<(InodeNumber, Ext2Inode)> {
        if !path.starts_with('/') {
            return Err(E2sError::InvalidArgument(format!(
                "path must be absolute: {path:?}"
            )));
        }

        let mut ino = InodeNumber::ROOT;
        let mut inode = self.read_inode(cx, ino)?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !inode.is_dir() {
                return Err(E2sError::NotDirectory);
            }
            ino = self
                .lookup(cx, ino, &inode, component.as_bytes())?
                .ok_or_else(|| E2sError::NotFound(component.to_owned()))?;
            inode = self.read_inode(cx, ino)?;
        }
        Ok((ino, inode))
    }

    /// A term of only ASCII digits is an inode number and yields its detail
    /// and block map; anything else is a name search.
    pub fn query(&self, cx: &Cx, term: &str) -> Result<QueryResult> {
        if !term.is_empty() && term.bytes().all(|b| b.is_ascii_digit()) {
            let ino = term
                .parse::<u64>()
                .map(InodeNumber)
                .map_err(|_| E2sError::InvalidArgument(format!("inode number {term} too large")))?;
            let info = self.inode_info(cx, ino)?;
            let blocks = self.block_map(cx, ino, DEFAULT_MAX_BLOCKS)?;
            return Ok(QueryResult::Inode { info, blocks });
        }
        self.search_by_name(cx, term).map(QueryResult::Search)
    }
}

fn validated_groups_count(sb: &Ext2Superblock, options: &OpenOptions) -> Result<u32> {
    if options.strict_geometry {
        sb.validate_geometry().map_err(|e| parse_error_to_e2s(&e))?;
        return sb.groups_count_by_inodes().ok_or_else(|| {
            E2sError::InvalidFilesystem("group count does not fit u32".to_owned())
        });
    }

    sb.validate_geometry_fields()
        .map_err(|e| parse_error_to_e2s(&e))?;
    let by_inodes = sb.groups_count_by_inodes().unwrap_or(0);
    let by_blocks = sb.groups_count_by_blocks().unwrap_or(0);
    if by_inodes != by_blocks {
        warn!(
            by_inodes,
            by_blocks, "group counts disagree; using the smaller one"
        );
    }
    let groups = by_inodes.min(by_blocks);
    if groups == 0 {
        return Err(E2sError::InvalidFilesystem(
            "filesystem has no block groups".to_owned(),
        ));
    }
    Ok(groups)
}

/// Read `groups_count` descriptors starting at the block after the superblock.
fn load_group_table(
    cx: &Cx,
    blocks: &dyn BlockDevice,
    sb: &Ext2Superblock,
    groups_count: u32,
) -> Result<Vec<Ext2GroupDesc>> {
    let start = sb.gdt_start_block();
    let count = sb.gdt_blocks(groups_count);
    let end = start.0.saturating_add(count);
    if end > blocks.block_count() {
        return Err(E2sError::InvalidFilesystem(format!(
            "group descriptor table (blocks {}..{end}) extends past the image ({} blocks)",
            start.0,
            blocks.block_count()
        )));
    }

    let mut table = Vec::new();
    for block in start.0..end {
        table.extend_from_slice(blocks.read_block(cx, BlockNumber(block))?.as_slice());
    }
    let wanted = usize::try_from(groups_count).unwrap_or(usize::MAX);
    table
        .chunks_exact(EXT2_GROUP_DESC_SIZE)
        .take(wanted)
        .map(|raw| Ext2GroupDesc::parse_from_bytes(raw).map_err(|e| parse_error_to_e2s(&e)))
        .collect()
}

/// Convert a `ParseError` raised while decoding on-disk metadata.
///
/// Format violations (magic, field values) mean the image is not a usable
/// ext2 filesystem; short buffers are plain parse failures.
fn parse_error_to_e2s(e: &ParseError) -> E2sError {
    match e {
        ParseError::InvalidMagic { .. } | ParseError::InvalidField { .. } => {
            E2sError::InvalidFilesystem(e.to_string())
        }
        ParseError::InsufficientData { .. } => E2sError::Parse(e.to_string()),
    }
}
