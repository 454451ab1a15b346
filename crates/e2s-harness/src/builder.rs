//! In-memory ext2 image synthesis.
//!
//! `ImageBuilder` lays out a single-group ext2 volume: superblock, one group
//! descriptor, both bitmaps, the inode table, then data and indirect blocks
//! allocated in inode order. Directory blocks are packed the way `mke2fs`
//! packs them (the last record of each block absorbs the slack). The
//! resulting [`BuiltImage`] remembers where every inode's blocks went so
//! tests can compare a resolved block map against ground truth and patch
//! metadata to produce corrupt images.

use anyhow::{Context, Result, bail, ensure};
use e2s_block::MemoryByteDevice;
use e2s_types::{
    BlockNumber, EXT2_DIND_BLOCK, EXT2_IND_BLOCK, EXT2_N_BLOCKS, EXT2_NAME_LEN, EXT2_NDIR_BLOCKS,
    EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_OFFSET, EXT2_TIND_BLOCK, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT,
    S_IFREG, read_le_u32,
};
use std::collections::BTreeMap;

/// Root directory inode.
pub const ROOT_INO: u32 = 2;

const FIRST_INO: u32 = 11;
const INCOMPAT_FILETYPE: u32 = 0x0002;
const FAST_SYMLINK_MAX: usize = EXT2_N_BLOCKS * 4;
const DEFAULT_TIMESTAMP: u32 = 1_700_000_000;

#[derive(Debug, Clone)]
struct Entry {
    name: Vec<u8>,
    ino: u32,
}

#[derive(Debug, Clone)]
enum Content {
    Dir { parent: u32, entries: Vec<Entry> },
    File { size: u64, present: Option<Vec<u64>> },
    Symlink(String),
    Special,
}

#[derive(Debug, Clone)]
struct PlannedInode {
    mode: u16,
    content: Content,
}

/// Builder for small, valid ext2 images.
///
/// ```ignore
/// let mut b = ImageBuilder::new();
/// let docs = b.mkdir(ROOT_INO, "docs");
/// b.file(docs, "notes.txt", 38);
/// let image = b.build()?;
/// ```
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    block_size: u32,
    blocks_count: u32,
    inodes_count: u32,
    inode_size: u16,
    revision: u32,
    volume_name: String,
    timestamp: u32,
    inodes: BTreeMap<u32, PlannedInode>,
    next_ino: u32,
    errors: Vec<String>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    /// 1 KiB blocks, 1024 blocks, 128 inodes of 128 bytes, revision 1.
    #[must_use]
    pub fn new() -> Self {
        let mut inodes = BTreeMap::new();
        inodes.insert(
            ROOT_INO,
            PlannedInode {
                mode: S_IFDIR | 0o755,
                content: Content::Dir {
                    parent: ROOT_INO,
                    entries: Vec::new(),
                },
            },
        );
        Self {
            block_size: 1024,
            blocks_count: 1024,
            inodes_count: 128,
            inode_size: 128,
            revision: 1,
            volume_name: "e2s-test".to_owned(),
            timestamp: DEFAULT_TIMESTAMP,
            inodes,
            next_ino: FIRST_INO,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub fn blocks_count(mut self, blocks_count: u32) -> Self {
        self.blocks_count = blocks_count;
        self
    }

    #[must_use]
    pub fn inodes_count(mut self, inodes_count: u32) -> Self {
        self.inodes_count = inodes_count;
        self
    }

    /// On-disk inode record size; ignored for revision 0.
    #[must_use]
    pub fn inode_size(mut self, inode_size: u16) -> Self {
        self.inode_size = inode_size;
        self
    }

    #[must_use]
    pub fn revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    #[must_use]
    pub fn volume_name(mut self, name: &str) -> Self {
        name.clone_into(&mut self.volume_name);
        self
    }

    // ── Tree construction ───────────────────────────────────────────────

    pub fn mkdir(&mut self, parent: u32, name: &str) -> u32 {
        let ino = self.new_inode(
            S_IFDIR | 0o755,
            Content::Dir {
                parent,
                entries: Vec::new(),
            },
        );
        self.add_entry(parent, name, ino);
        ino
    }

    /// Regular file of `size` bytes with every block allocated.
    pub fn file(&mut self, parent: u32, name: &str, size: u64) -> u32 {
        let ino = self.new_inode(
            S_IFREG | 0o644,
            Content::File {
                size,
                present: None,
            },
        );
        self.add_entry(parent, name, ino);
        ino
    }

    /// Regular file of `size` bytes where only the `present` logical blocks
    /// are allocated; everything else is a hole.
    pub fn sparse_file(&mut self, parent: u32, name: &str, size: u64, present: &[u64]) -> u32 {
        let mut present = present.to_vec();
        present.sort_unstable();
        present.dedup();
        let ino = self.new_inode(
            S_IFREG | 0o644,
            Content::File {
                size,
                present: Some(present),
            },
        );
        self.add_entry(parent, name, ino);
        ino
    }

    /// Symlink; targets shorter than 60 bytes are stored inline.
    pub fn symlink(&mut self, parent: u32, name: &str, target: &str) -> u32 {
        let ino = self.new_inode(S_IFLNK | 0o777, Content::Symlink(target.to_owned()));
        self.add_entry(parent, name, ino);
        ino
    }

    pub fn fifo(&mut self, parent: u32, name: &str) -> u32 {
        let ino = self.new_inode(S_IFIFO | 0o644, Content::Special);
        self.add_entry(parent, name, ino);
        ino
    }

    /// Extra entry pointing at an existing inode. Pointing a directory entry
    /// at an ancestor produces a cycle.
    pub fn link(&mut self, parent: u32, name: &str, target: u32) {
        self.add_entry(parent, name, target);
    }

    /// Deleted record (inode 0) that still carries a name.
    pub fn tombstone(&mut self, parent: u32, name: &str) {
        self.add_entry(parent, name, 0);
    }

    /// Regular file inode that no directory references (link count 0).
    pub fn orphan(&mut self, size: u64) -> u32 {
        self.new_inode(
            S_IFREG | 0o644,
            Content::File {
                size,
                present: None,
            },
        )
    }

    fn new_inode(&mut self, mode: u16, content: Content) -> u32 {
        let ino = self.next_ino;
        self.next_ino += 1;
        if ino > self.inodes_count {
            self.errors
                .push(format!("inode {ino} exceeds inodes_count {}", self.inodes_count));
        }
        self.inodes.insert(ino, PlannedInode { mode, content });
        ino
    }

    fn add_entry(&mut self, parent: u32, name: &str, ino: u32) {
        if name.is_empty() || name.len() > EXT2_NAME_LEN {
            self.errors
                .push(format!("entry name length {} out of range", name.len()));
            return;
        }
        match self.inodes.get_mut(&parent) {
            Some(PlannedInode {
                content: Content::Dir { entries, .. },
                ..
            }) => entries.push(Entry {
                name: name.as_bytes().to_vec(),
                ino,
            }),
            _ => self
                .errors
                .push(format!("parent inode {parent} is not a directory")),
        }
    }

    // ── Layout ──────────────────────────────────────────────────────────

    fn type_hint(&self, ino: u32) -> u8 {
        let Some(node) = self.inodes.get(&ino) else {
            return 0;
        };
        match node.mode & S_IFMT {
            S_IFREG => 1,
            S_IFDIR => 2,
            S_IFIFO => 5,
            S_IFLNK => 7,
            _ => 0,
        }
    }

    fn link_counts(&self) -> BTreeMap<u32, u16> {
        let mut counts: BTreeMap<u32, u16> = BTreeMap::new();
        for (&ino, node) in &self.inodes {
            if let Content::Dir { parent, entries } = &node.content {
                // "." and this directory's ".."
                *counts.entry(ino).or_default() += 1;
                *counts.entry(*parent).or_default() += 1;
                for entry in entries.iter().filter(|e| e.ino != 0) {
                    *counts.entry(entry.ino).or_default() += 1;
                }
            }
        }
        counts
    }

    fn dir_blocks(&self, ino: u32, parent: u32, entries: &[Entry]) -> Result<Vec<Vec<u8>>> {
        let bs = usize::try_from(self.block_size)?;
        let mut records: Vec<(u32, &[u8], u8)> = vec![(ino, b".", 2), (parent, b"..", 2)];
        records.extend(
            entries
                .iter()
                .map(|e| (e.ino, e.name.as_slice(), self.type_hint(e.ino))),
        );

        let mut blocks = Vec::new();
        let mut block = vec![0_u8; bs];
        let mut offset = 0_usize;
        let mut last = 0_usize;
        for (target, name, hint) in records {
            let need = (8 + name.len()).next_multiple_of(4);
            if offset + need > bs {
                put_u16(&mut block, last + 4, u16::try_from(bs - last)?);
                blocks.push(std::mem::replace(&mut block, vec![0_u8; bs]));
                offset = 0;
            }
            put_u32(&mut block, offset, target);
            put_u16(&mut block, offset + 4, u16::try_from(need)?);
            block[offset + 6] = u8::try_from(name.len())?;
            block[offset + 7] = hint;
            block[offset + 8..offset + 8 + name.len()].copy_from_slice(name);
            last = offset;
            offset += need;
        }
        put_u16(&mut block, last + 4, u16::try_from(bs - last)?);
        blocks.push(block);
        Ok(blocks)
    }

    /// Serialize the image.
    #[allow(clippy::too_many_lines, clippy::cast_possible_truncation)] // i_size is split lo/hi
    pub fn build(&self) -> Result<BuiltImage> {
        ensure!(self.errors.is_empty(), "{}", self.errors.join("; "));
        ensure!(
            matches!(self.block_size, 1024 | 2048 | 4096),
            "unsupported block size {}",
            self.block_size
        );
        let bs = self.block_size;
        let bs_usize = usize::try_from(bs)?;
        let log_block_size = bs.trailing_zeros() - 10;
        let inode_size = if self.revision == 0 {
            128
        } else {
            self.inode_size
        };
        ensure!(
            inode_size >= 128 && inode_size.is_power_of_two() && u32::from(inode_size) <= bs,
            "invalid inode size {inode_size}"
        );

        let first_data_block = u32::from(bs == 1024);
        let gdt_block = first_data_block + 1;
        let block_bitmap = gdt_block + 1;
        let inode_bitmap = gdt_block + 2;
        let inode_table = gdt_block + 3;
        let table_blocks = (self.inodes_count * u32::from(inode_size)).div_ceil(bs);
        let mut alloc = Allocator {
            next: inode_table + table_blocks,
            limit: self.blocks_count,
        };
        ensure!(
            alloc.next < self.blocks_count,
            "metadata does not fit in {} blocks",
            self.blocks_count
        );

        let image_len = usize::try_from(self.blocks_count)? * bs_usize;
        let mut image = vec![0_u8; image_len];
        let links = self.link_counts();
        let ppb = u64::from(bs / 4);
        let mut layout = BTreeMap::new();

        for (&ino, node) in &self.inodes {
            let mut pointers = [0_u32; EXT2_N_BLOCKS];
            let (size, payload): (u64, Vec<(u64, Vec<u8>)>) = match &node.content {
                Content::Dir { parent, entries } => {
                    let blocks = self.dir_blocks(ino, *parent, entries)?;
                    let size = blocks.len() as u64 * u64::from(bs);
                    (size, (0_u64..).zip(blocks).collect())
                }
                Content::File { size, present } => {
                    let logical = present
                        .clone()
                        .unwrap_or_else(|| (0..size.div_ceil(u64::from(bs))).collect());
                    let payload = logical
                        .into_iter()
                        .map(|l| (l, pattern_block(ino, l, bs_usize)))
                        .collect();
                    (*size, payload)
                }
                Content::Symlink(target) if target.len() < FAST_SYMLINK_MAX => {
                    let mut raw = [0_u8; FAST_SYMLINK_MAX];
                    raw[..target.len()].copy_from_slice(target.as_bytes());
                    for (slot, chunk) in pointers.iter_mut().zip(raw.chunks_exact(4)) {
                        *slot = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    }
                    (target.len() as u64, Vec::new())
                }
                Content::Symlink(target) => {
                    ensure!(target.len() < bs_usize, "symlink target longer than a block");
                    let mut block = vec![0_u8; bs_usize];
                    block[..target.len()].copy_from_slice(target.as_bytes());
                    (target.len() as u64, vec![(0, block)])
                }
                Content::Special => (0, Vec::new()),
            };

            let before = alloc.next;
            let mut tables: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
            let mut data_blocks = Vec::with_capacity(payload.len());
            for (logical, bytes) in payload {
                let phys = map_logical(&mut alloc, &mut pointers, &mut tables, ppb, logical)?;
                let start = usize::try_from(phys)? * bs_usize;
                image[start..start + bs_usize].copy_from_slice(&bytes);
                data_blocks.push(phys);
            }
            for (&table, entries) in &tables {
                let start = usize::try_from(table)? * bs_usize;
                for (i, ptr) in entries.iter().enumerate() {
                    put_u32(&mut image, start + i * 4, *ptr);
                }
            }
            let sectors = (alloc.next - before) * (bs / 512);

            let off = usize::try_from(inode_table)? * bs_usize
                + usize::try_from(ino - 1)? * usize::from(inode_size);
            let rec = &mut image[off..off + usize::from(inode_size)];
            put_u16(rec, 0x00, node.mode);
            put_u32(rec, 0x04, size as u32);
            put_u32(rec, 0x08, self.timestamp);
            put_u32(rec, 0x0C, self.timestamp);
            put_u32(rec, 0x10, self.timestamp);
            let link_count = links.get(&ino).copied().unwrap_or(0);
            if link_count == 0 {
                put_u32(rec, 0x14, self.timestamp);
            }
            put_u16(rec, 0x1A, link_count);
            put_u32(rec, 0x1C, sectors);
            for (i, ptr) in pointers.iter().enumerate() {
                put_u32(rec, 0x28 + i * 4, *ptr);
            }
            if node.mode & S_IFMT == S_IFREG {
                put_u32(rec, 0x6C, (size >> 32) as u32);
            }

            layout.insert(
                ino,
                InodeLayout {
                    data_blocks,
                    pointer_blocks: tables.keys().copied().collect(),
                },
            );
        }

        let used_blocks = alloc.next;
        let used_inodes = (self.next_ino - 1).min(self.inodes_count);
        let free_blocks = self.blocks_count - used_blocks;
        let free_inodes = self.inodes_count - used_inodes;
        let dirs = self
            .inodes
            .values()
            .filter(|s| matches!(s.content, Content::Dir { .. }))
            .count();

        // Superblock.
        let sb = &mut image[EXT2_SUPERBLOCK_OFFSET..EXT2_SUPERBLOCK_OFFSET + 1024];
        put_u32(sb, 0x00, self.inodes_count);
        put_u32(sb, 0x04, self.blocks_count);
        put_u32(sb, 0x08, self.blocks_count / 20);
        put_u32(sb, 0x0C, free_blocks);
        put_u32(sb, 0x10, free_inodes);
        put_u32(sb, 0x14, first_data_block);
        put_u32(sb, 0x18, log_block_size);
        put_u32(sb, 0x1C, log_block_size);
        put_u32(sb, 0x20, self.blocks_count - first_data_block);
        put_u32(sb, 0x24, self.blocks_count - first_data_block);
        put_u32(sb, 0x28, self.inodes_count);
        put_u32(sb, 0x2C, self.timestamp);
        put_u32(sb, 0x30, self.timestamp);
        put_u16(sb, 0x34, 3);
        put_u16(sb, 0x36, 0xFFFF);
        put_u16(sb, 0x38, EXT2_SUPER_MAGIC);
        put_u16(sb, 0x3A, 1);
        put_u16(sb, 0x3C, 1);
        put_u32(sb, 0x40, self.timestamp);
        put_u32(sb, 0x4C, self.revision);
        if self.revision >= 1 {
            put_u32(sb, 0x54, FIRST_INO);
            put_u16(sb, 0x58, inode_size);
            put_u32(sb, 0x60, INCOMPAT_FILETYPE);
        }
        for (i, byte) in sb[0x68..0x78].iter_mut().enumerate() {
            *byte = 0xE2_u8.wrapping_add(u8::try_from(i)?);
        }
        let name = self.volume_name.as_bytes();
        let name_len = name.len().min(16);
        sb[0x78..0x78 + name_len].copy_from_slice(&name[..name_len]);

        // Group descriptor.
        let gd = usize::try_from(gdt_block)? * bs_usize;
        put_u32(&mut image, gd, block_bitmap);
        put_u32(&mut image, gd + 4, inode_bitmap);
        put_u32(&mut image, gd + 8, inode_table);
        put_u16(&mut image, gd + 0x0C, u16::try_from(free_blocks)?);
        put_u16(&mut image, gd + 0x0E, u16::try_from(free_inodes)?);
        put_u16(&mut image, gd + 0x10, u16::try_from(dirs)?);

        // Bitmaps: bit i of the block bitmap is block first_data_block + i.
        let bitmap_bits = bs_usize * 8;
        let bb = usize::try_from(block_bitmap)? * bs_usize;
        for i in 0..usize::try_from(used_blocks - first_data_block)?.min(bitmap_bits) {
            image[bb + i / 8] |= 1 << (i % 8);
        }
        let ib = usize::try_from(inode_bitmap)? * bs_usize;
        for i in 0..usize::try_from(used_inodes)?.min(bitmap_bits) {
            image[ib + i / 8] |= 1 << (i % 8);
        }

        Ok(BuiltImage {
            bytes: image,
            block_size: bs,
            inode_table,
            inode_size,
            layout,
        })
    }
}

fn pattern_block(ino: u32, logical: u64, len: usize) -> Vec<u8> {
    let seed = u64::from(ino) * 7 + logical * 13;
    (0..len as u64)
        .map(|i| u8::try_from((seed + i) % 251).map_or(1, |b| b + 1))
        .collect()
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[derive(Debug)]
struct Allocator {
    next: u32,
    limit: u32,
}

impl Allocator {
    fn take(&mut self) -> Result<u32> {
        if self.next >= self.limit {
            bail!("image full: {} blocks", self.limit);
        }
        let block = self.next;
        self.next += 1;
        Ok(block)
    }
}

/// `(i_block slot, indices through the indirect tables)` for a logical block.
fn pointer_path(logical: u64, ppb: u64) -> Result<(usize, Vec<usize>)> {
    let idx = |v: u64| usize::try_from(v).context("pointer index overflow");
    let direct = EXT2_NDIR_BLOCKS as u64;
    if logical < direct {
        return Ok((idx(logical)?, Vec::new()));
    }
    let l = logical - direct;
    if l < ppb {
        return Ok((EXT2_IND_BLOCK, vec![idx(l)?]));
    }
    let l = l - ppb;
    if l < ppb * ppb {
        return Ok((EXT2_DIND_BLOCK, vec![idx(l / ppb)?, idx(l % ppb)?]));
    }
    let l = l - ppb * ppb;
    if l < ppb * ppb * ppb {
        return Ok((
            EXT2_TIND_BLOCK,
            vec![idx(l / (ppb * ppb))?, idx((l / ppb) % ppb)?, idx(l % ppb)?],
        ));
    }
    bail!("logical block {logical} beyond triple-indirect reach")
}

/// Allocate (if needed) the indirect chain for `logical` and its data block.
fn map_logical(
    alloc: &mut Allocator,
    pointers: &mut [u32; EXT2_N_BLOCKS],
    tables: &mut BTreeMap<u32, Vec<u32>>,
    ppb: u64,
    logical: u64,
) -> Result<u32> {
    let (slot, path) = pointer_path(logical, ppb)?;
    let Some((&leaf, interior)) = path.split_last() else {
        pointers[slot] = alloc.take()?;
        return Ok(pointers[slot]);
    };
    let entries_per_table = usize::try_from(ppb)?;
    if pointers[slot] == 0 {
        pointers[slot] = alloc.take()?;
    }
    let mut table = pointers[slot];
    for &index in interior {
        let entries = tables
            .entry(table)
            .or_insert_with(|| vec![0; entries_per_table]);
        if entries[index] == 0 {
            entries[index] = alloc.take()?;
        }
        table = entries[index];
    }
    let entries = tables
        .entry(table)
        .or_insert_with(|| vec![0; entries_per_table]);
    if entries[leaf] == 0 {
        entries[leaf] = alloc.take()?;
    }
    Ok(entries[leaf])
}

/// Where the builder placed one inode's blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InodeLayout {
    /// Data blocks in logical order.
    pub data_blocks: Vec<u32>,
    /// Indirect blocks, ascending.
    pub pointer_blocks: Vec<u32>,
}

/// A serialized image plus the layout needed to verify or damage it.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    bytes: Vec<u8>,
    block_size: u32,
    inode_table: u32,
    inode_size: u16,
    layout: BTreeMap<u32, InodeLayout>,
}

impl BuiltImage {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    #[must_use]
    pub fn into_device(self) -> MemoryByteDevice {
        MemoryByteDevice::new(self.bytes)
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    #[must_use]
    pub fn layout(&self, ino: u32) -> Option<&InodeLayout> {
        self.layout.get(&ino)
    }

    /// Expected block map of `ino`: its data blocks in logical order.
    #[must_use]
    pub fn data_blocks(&self, ino: u32) -> Vec<BlockNumber> {
        self.layout.get(&ino).map_or_else(Vec::new, |l| {
            l.data_blocks
                .iter()
                .map(|b| BlockNumber(u64::from(*b)))
                .collect()
        })
    }

    /// Byte offset of the inode record for `ino`.
    #[must_use]
    pub fn inode_offset(&self, ino: u32) -> usize {
        self.inode_table as usize * self.block_size as usize
            + (ino as usize - 1) * usize::from(self.inode_size)
    }

    /// Byte offset of `block`.
    #[must_use]
    pub fn block_offset(&self, block: u32) -> usize {
        block as usize * self.block_size as usize
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) {
        put_u16(&mut self.bytes, offset, value);
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        put_u32(&mut self.bytes, offset, value);
    }

    /// Overwrite `i_block[slot]` of `ino`.
    pub fn set_block_pointer(&mut self, ino: u32, slot: usize, value: u32) {
        let off = self.inode_offset(ino) + 0x28 + slot * 4;
        self.write_u32(off, value);
    }

    pub fn set_links_count(&mut self, ino: u32, links: u16) {
        let off = self.inode_offset(ino) + 0x1A;
        self.write_u16(off, links);
    }

    /// Overwrite the `rec_len` of the record at `entry_offset` in the first
    /// data block of directory `dir_ino`.
    ///
    /// Does nothing if `dir_ino` has no data block.
    pub fn set_dir_rec_len(&mut self, dir_ino: u32, entry_offset: usize, rec_len: u16) {
        self.set_dir_rec_len_in_block(dir_ino, 0, entry_offset, rec_len);
    }

    /// Like [`BuiltImage::set_dir_rec_len`], in the `index`-th data block.
    pub fn set_dir_rec_len_in_block(
        &mut self,
        dir_ino: u32,
        index: usize,
        entry_offset: usize,
        rec_len: u16,
    ) {
        let Some(block) = self.layout(dir_ino).and_then(|l| l.data_blocks.get(index)) else {
            return;
        };
        let off = self.block_offset(*block) + entry_offset + 4;
        self.write_u16(off, rec_len);
    }

    /// Point `i_file_acl` of `ino` at an xattr block and bump `i_blocks`
    /// by that block's sectors.
    pub fn attach_xattr_block(&mut self, ino: u32, block: u32) {
        let base = self.inode_offset(ino);
        let sectors = read_le_u32(&self.bytes, base + 0x1C).unwrap_or(0);
        let extra = self.block_size >> 9;
        self.write_u32(base + 0x1C, sectors + extra);
        self.write_u32(base + 0x68, block);
    }
}

/// The canonical sample volume:
///
/// ```text
/// /report.txt            5000 bytes
/// /docs/readme.md          19 bytes
/// /docs/archive/notes.txt  38 bytes
/// /media/photo.raw      20480 bytes (crosses into the single-indirect block)
/// /media/empty/
/// /readme-link -> docs/readme.md
/// ```
///
/// 1 KiB blocks, 1024 blocks, 128 inodes.
pub fn sample_image() -> Result<BuiltImage> {
    let mut b = ImageBuilder::new().volume_name("ext2scope");
    let docs = b.mkdir(ROOT_INO, "docs");
    let archive = b.mkdir(docs, "archive");
    b.file(archive, "notes.txt", 38);
    b.file(docs, "readme.md", 19);
    let media = b.mkdir(ROOT_INO, "media");
    b.file(media, "photo.raw", 20 * 1024);
    b.mkdir(media, "empty");
    b.symlink(ROOT_INO, "readme-link", "docs/readme.md");
    b.file(ROOT_INO, "report.txt", 5000);
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(bytes: &[u8], off: usize) -> u16 {
        u16::from_le_bytes([bytes[off], bytes[off + 1]])
    }

    fn u32_at(bytes: &[u8], off: usize) -> u32 {
        u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
    }

    #[test]
    fn superblock_carries_magic_and_geometry() {
        let image = ImageBuilder::new().build().expect("build");
        let sb = EXT2_SUPERBLOCK_OFFSET;
        let bytes = image.bytes();
        assert_eq!(u16_at(bytes, sb + 0x38), EXT2_SUPER_MAGIC);
        assert_eq!(u32_at(bytes, sb), 128);
        assert_eq!(u32_at(bytes, sb + 0x04), 1024);
        assert_eq!(u32_at(bytes, sb + 0x14), 1);
        assert_eq!(bytes.len(), 1024 * 1024);
    }

    #[test]
    fn directory_block_last_record_fills_block() {
        let mut b = ImageBuilder::new();
        b.file(ROOT_INO, "a", 10);
        let image = b.build().expect("build");
        let root = image.layout(ROOT_INO).expect("root layout");
        let block = image.block_offset(root.data_blocks[0]);
        let bytes = image.bytes();

        // ".", "..", "a" at offsets 0, 12, 24.
        assert_eq!(u32_at(bytes, block), ROOT_INO);
        assert_eq!(u16_at(bytes, block + 4), 12);
        assert_eq!(u16_at(bytes, block + 12 + 4), 12);
        assert_eq!(u16_at(bytes, block + 24 + 4), 1024 - 24);
    }

    #[test]
    fn large_directory_spills_into_second_block() {
        let mut b = ImageBuilder::new();
        for i in 0..60 {
            b.file(ROOT_INO, &format!("entry-{i:04}.log"), 1);
        }
        let image = b.build().expect("build");
        assert_eq!(image.layout(ROOT_INO).expect("root").data_blocks.len(), 2);
    }

    #[test]
    fn indirect_blocks_are_allocated_before_their_data() {
        let mut b = ImageBuilder::new();
        let ino = b.file(ROOT_INO, "big", 14 * 1024);
        let image = b.build().expect("build");
        let layout = image.layout(ino).expect("layout");
        assert_eq!(layout.data_blocks.len(), 14);
        assert_eq!(layout.pointer_blocks.len(), 1);
        assert_eq!(layout.pointer_blocks[0] + 1, layout.data_blocks[12]);
    }

    #[test]
    fn sparse_file_uses_double_indirect_chain() {
        let mut b = ImageBuilder::new();
        let ino = b.sparse_file(ROOT_INO, "sparse", 300 * 1024, &[299]);
        let image = b.build().expect("build");
        let layout = image.layout(ino).expect("layout");
        assert_eq!(layout.data_blocks.len(), 1);
        // Double-indirect block plus one single-indirect child.
        assert_eq!(layout.pointer_blocks.len(), 2);
    }

    #[test]
    fn pointer_path_covers_each_level() {
        assert_eq!(pointer_path(0, 256).expect("direct"), (0, vec![]));
        assert_eq!(pointer_path(12, 256).expect("ind"), (EXT2_IND_BLOCK, vec![0]));
        assert_eq!(
            pointer_path(12 + 256 + 257, 256).expect("dind"),
            (EXT2_DIND_BLOCK, vec![1, 1])
        );
        assert_eq!(
            pointer_path(12 + 256 + 256 * 256, 256).expect("tind"),
            (EXT2_TIND_BLOCK, vec![0, 0, 0])
        );
        assert!(pointer_path(u64::MAX, 256).is_err());
    }

    #[test]
    fn link_counts_follow_unix_rules() {
        let mut b = ImageBuilder::new();
        let docs = b.mkdir(ROOT_INO, "docs");
        b.mkdir(docs, "archive");
        let f = b.file(docs, "x", 1);
        b.link(ROOT_INO, "x-again", f);
        let counts = b.link_counts();
        assert_eq!(counts[&ROOT_INO], 3);
        assert_eq!(counts[&docs], 3);
        assert_eq!(counts[&f], 2);
    }

    #[test]
    fn bad_parent_is_reported_at_build() {
        let mut b = ImageBuilder::new();
        let f = b.file(ROOT_INO, "plain", 1);
        b.file(f, "child", 1);
        let err = b.build().expect_err("parent is a file");
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn image_full_is_an_error() {
        let mut b = ImageBuilder::new().blocks_count(64);
        b.file(ROOT_INO, "huge", 200 * 1024);
        assert!(b.build().is_err());
    }
}
