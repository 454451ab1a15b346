#![forbid(unsafe_code)]
//! Block mapping: inode pointer array to ordered data block list.
//!
//! ext2 inodes carry 15 pointers: 12 direct data blocks, then one single-,
//! one double- and one triple-indirect block. Resolution walks them with an
//! explicit work stack, so the traversal depth is fixed at three levels of
//! indirection no matter what the image contains. Zero pointers are holes and
//! are never dereferenced.

use e2s_error::{E2sError, Result};
use e2s_types::{
    BlockNumber, BlockSize, EXT2_DIND_BLOCK, EXT2_IND_BLOCK, EXT2_N_BLOCKS, EXT2_NDIR_BLOCKS,
    EXT2_TIND_BLOCK, InodeNumber, read_le_u32,
};
use tracing::trace;

/// Filesystem bounds every pointer is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerBounds {
    pub block_size: BlockSize,
    pub first_data_block: u32,
    pub blocks_count: u32,
}

impl PointerBounds {
    fn check(&self, ino: InodeNumber, ptr: u32, role: &str) -> Result<()> {
        if ptr >= self.blocks_count {
            return Err(E2sError::CorruptBlockPointer {
                inode: ino.0,
                pointer: u64::from(ptr),
                detail: format!(
                    "{role} pointer beyond blocks_count {}",
                    self.blocks_count
                ),
            });
        }
        if ptr < self.first_data_block {
            return Err(E2sError::CorruptBlockPointer {
                inode: ino.0,
                pointer: u64::from(ptr),
                detail: format!(
                    "{role} pointer below first_data_block {}",
                    self.first_data_block
                ),
            });
        }
        Ok(())
    }
}

/// Number of data blocks a hole-free file of `size` bytes occupies.
#[must_use]
pub fn data_blocks_for_size(size: u64, block_size: BlockSize) -> u64 {
    size.div_ceil(u64::from(block_size.get()))
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Data(u32),
    /// `level` 1 holds data pointers, 2 holds level-1 pointers, 3 holds level-2.
    Indirect { block: u32, level: u8 },
}

/// Resolve an inode's pointer array into its ordered list of data blocks.
///
/// Order is logical file order: the 12 direct slots, then the single-,
/// double- and triple-indirect trees, each expanded depth-first in slot
/// order. `read_block` must return exactly one filesystem block. When
/// `limit` is `Some(n)`, resolution stops (and reads nothing further) once
/// `n` blocks were produced.
pub fn resolve_block_map(
    read_block: &mut dyn FnMut(BlockNumber) -> Result<Vec<u8>>,
    bounds: &PointerBounds,
    ino: InodeNumber,
    pointers: &[u32; EXT2_N_BLOCKS],
    limit: Option<usize>,
) -> Result<Vec<BlockNumber>> {
    let mut out = Vec::new();
    if limit == Some(0) {
        return Ok(out);
    }

    let mut stack = Vec::with_capacity(EXT2_N_BLOCKS);
    stack.push(Frame::Indirect {
        block: pointers[EXT2_TIND_BLOCK],
        level: 3,
    });
    stack.push(Frame::Indirect {
        block: pointers[EXT2_DIND_BLOCK],
        level: 2,
    });
    stack.push(Frame::Indirect {
        block: pointers[EXT2_IND_BLOCK],
        level: 1,
    });
    stack.extend(pointers[..EXT2_NDIR_BLOCKS].iter().rev().map(|p| Frame::Data(*p)));

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Data(0) | Frame::Indirect { block: 0, .. } => {}
            Frame::Data(ptr) => {
                bounds.check(ino, ptr, "data")?;
                out.push(BlockNumber(u64::from(ptr)));
                if limit.is_some_and(|max| out.len() >= max) {
                    break;
                }
            }
            Frame::Indirect { block, level } => {
                bounds.check(ino, block, "indirect")?;
                trace!(ino = ino.0, block, level, "expand indirect block");
                let bytes = read_block(BlockNumber(u64::from(block)))?;
                let children = decode_pointer_block(&bytes, bounds.block_size, ino, block)?;
                for child in children.into_iter().rev() {
                    stack.push(if level == 1 {
                        Frame::Data(child)
                    } else {
                        Frame::Indirect {
                            block: child,
                            level: level - 1,
                        }
                    });
                }
            }
        }
    }

    Ok(out)
}

/// Decode an indirect block as `block_size / 4` little-endian u32 pointers.
fn decode_pointer_block(
    bytes: &[u8],
    block_size: BlockSize,
    ino: InodeNumber,
    block: u32,
) -> Result<Vec<u32>> {
    let count = block_size.pointers_per_block();
    if bytes.len() < count * 4 {
        return Err(E2sError::CorruptBlockPointer {
            inode: ino.0,
            pointer: u64::from(block),
            detail: format!(
                "indirect block short read: {} of {} bytes",
                bytes.len(),
                block_size.get()
            ),
        });
    }
    (0..count)
        .map(|i| read_le_u32(bytes, i * 4).map_err(|e| E2sError::Parse(e.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const BS: u32 = 1024;

    fn bounds() -> PointerBounds {
        PointerBounds {
            block_size: BlockSize::new(BS).expect("bs"),
            first_data_block: 1,
            blocks_count: 100_000,
        }
    }

    /// In-memory pointer blocks; anything not in the map reads as zeros.
    struct Blocks {
        blocks: HashMap<u64, Vec<u8>>,
        reads: Vec<u64>,
    }

    impl Blocks {
        fn new() -> Self {
            Self {
                blocks: HashMap::new(),
                reads: Vec::new(),
            }
        }

        fn set_pointers(&mut self, block: u64, ptrs: &[u32]) {
            let mut bytes = vec![0_u8; BS as usize];
            for (i, p) in ptrs.iter().enumerate() {
                bytes[i * 4..i * 4 + 4].copy_from_slice(&p.to_le_bytes());
            }
            self.blocks.insert(block, bytes);
        }

        fn reader(&mut self) -> impl FnMut(BlockNumber) -> Result<Vec<u8>> + '_ {
            move |b| {
                self.reads.push(b.0);
                Ok(self
                    .blocks
                    .get(&b.0)
                    .cloned()
                    .unwrap_or_else(|| vec![0; BS as usize]))
            }
        }
    }

    fn direct(ptrs: &[u32]) -> [u32; EXT2_N_BLOCKS] {
        let mut out = [0_u32; EXT2_N_BLOCKS];
        out[..ptrs.len()].copy_from_slice(ptrs);
        out
    }

    fn nums(v: &[u64]) -> Vec<BlockNumber> {
        v.iter().copied().map(BlockNumber).collect()
    }

    #[test]
    fn direct_pointers_in_order() {
        let mut blocks = Blocks::new();
        let ptrs = direct(&[40, 41, 42, 43, 44]);
        let map = resolve_block_map(&mut blocks.reader(), &bounds(), InodeNumber(12), &ptrs, None)
            .expect("map");
        assert_eq!(map, nums(&[40, 41, 42, 43, 44]));
        assert!(blocks.reads.is_empty());
    }

    #[test]
    fn holes_are_omitted() {
        let mut blocks = Blocks::new();
        let ptrs = direct(&[40, 0, 42, 0, 44]);
        let map = resolve_block_map(&mut blocks.reader(), &bounds(), InodeNumber(12), &ptrs, None)
            .expect("map");
        assert_eq!(map, nums(&[40, 42, 44]));
    }

    #[test]
    fn single_indirect_follows_direct() {
        let mut blocks = Blocks::new();
        blocks.set_pointers(500, &[600, 601, 0, 602]);
        let mut ptrs = direct(&(100..112).collect::<Vec<_>>());
        ptrs[EXT2_IND_BLOCK] = 500;

        let map = resolve_block_map(&mut blocks.reader(), &bounds(), InodeNumber(12), &ptrs, None)
            .expect("map");
        assert_eq!(map.len(), 15);
        assert_eq!(map[11], BlockNumber(111));
        assert_eq!(&map[12..], &nums(&[600, 601, 602])[..]);
        assert_eq!(blocks.reads, vec![500]);
    }

    #[test]
    fn double_and_triple_indirect_expand_depth_first() {
        let mut blocks = Blocks::new();
        blocks.set_pointers(700, &[710, 720]);
        blocks.set_pointers(710, &[7101, 7102]);
        blocks.set_pointers(720, &[7201]);
        blocks.set_pointers(800, &[810]);
        blocks.set_pointers(810, &[820]);
        blocks.set_pointers(820, &[8201, 8202]);
        let mut ptrs = direct(&[50]);
        ptrs[EXT2_DIND_BLOCK] = 700;
        ptrs[EXT2_TIND_BLOCK] = 800;

        let map = resolve_block_map(&mut blocks.reader(), &bounds(), InodeNumber(12), &ptrs, None)
            .expect("map");
        assert_eq!(map, nums(&[50, 7101, 7102, 7201, 8201, 8202]));
        assert_eq!(blocks.reads, vec![700, 710, 720, 800, 810, 820]);
    }

    #[test]
    fn limit_stops_before_further_reads() {
        let mut blocks = Blocks::new();
        blocks.set_pointers(500, &[600, 601]);
        let mut ptrs = direct(&[40, 41, 42]);
        ptrs[EXT2_IND_BLOCK] = 500;

        let map = resolve_block_map(
            &mut blocks.reader(),
            &bounds(),
            InodeNumber(12),
            &ptrs,
            Some(2),
        )
        .expect("map");
        assert_eq!(map, nums(&[40, 41]));
        assert!(blocks.reads.is_empty());

        let none = resolve_block_map(
            &mut blocks.reader(),
            &bounds(),
            InodeNumber(12),
            &ptrs,
            Some(0),
        )
        .expect("map");
        assert!(none.is_empty());
    }

    #[test]
    fn out_of_range_data_pointer_is_corrupt() {
        let mut blocks = Blocks::new();
        let ptrs = direct(&[40, 200_000]);
        let err = resolve_block_map(&mut blocks.reader(), &bounds(), InodeNumber(13), &ptrs, None)
            .expect_err("corrupt");
        match err {
            E2sError::CorruptBlockPointer { inode, pointer, .. } => {
                assert_eq!(inode, 13);
                assert_eq!(pointer, 200_000);
            }
            other => panic!("expected CorruptBlockPointer, got {other:?}"),
        }
    }

    #[test]
    fn out_of_range_indirect_pointer_is_never_read() {
        let mut blocks = Blocks::new();
        let mut ptrs = direct(&[40]);
        ptrs[EXT2_IND_BLOCK] = 150_000;
        let err = resolve_block_map(&mut blocks.reader(), &bounds(), InodeNumber(13), &ptrs, None)
            .expect_err("corrupt");
        assert!(matches!(err, E2sError::CorruptBlockPointer { .. }));
        assert!(blocks.reads.is_empty());
    }

    #[test]
    fn pointer_below_first_data_block_is_corrupt() {
        let mut blocks = Blocks::new();
        let ptrs = direct(&[40]);
        let strict = PointerBounds {
            first_data_block: 41,
            ..bounds()
        };
        assert!(matches!(
            resolve_block_map(&mut blocks.reader(), &strict, InodeNumber(13), &ptrs, None),
            Err(E2sError::CorruptBlockPointer { pointer: 40, .. })
        ));
    }

    #[test]
    fn reader_errors_propagate() {
        let mut ptrs = direct(&[]);
        ptrs[EXT2_IND_BLOCK] = 500;
        let mut failing = |_b: BlockNumber| -> Result<Vec<u8>> { Err(E2sError::Cancelled) };
        let err = resolve_block_map(&mut failing, &bounds(), InodeNumber(12), &ptrs, None)
            .expect_err("cancel");
        assert!(matches!(err, E2sError::Cancelled));
    }

    #[test]
    fn size_to_block_count() {
        let bs = BlockSize::new(1024).expect("bs");
        assert_eq!(data_blocks_for_size(0, bs), 0);
        assert_eq!(data_blocks_for_size(1, bs), 1);
        assert_eq!(data_blocks_for_size(1024, bs), 1);
        assert_eq!(data_blocks_for_size(5000, bs), 5);
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(64))]

        #[test]
        fn direct_only_maps_preserve_slot_order(
            slots in proptest::collection::vec(0_u32..2000, EXT2_NDIR_BLOCKS),
        ) {
            let mut blocks = Blocks::new();
            let ptrs = direct(&slots);
            let map = resolve_block_map(&mut blocks.reader(), &bounds(), InodeNumber(12), &ptrs, None)
                .expect("map");
            let expected: Vec<BlockNumber> = slots
                .iter()
                .filter(|p| **p != 0)
                .map(|p| BlockNumber(u64::from(*p)))
                .collect();
            proptest::prop_assert_eq!(map, expected);
        }
    }
}
