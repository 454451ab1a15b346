#![forbid(unsafe_code)]
//! On-disk format parsing for ext2 structures.
//!
//! Pure parsing crate with no I/O: byte slices in, typed superblocks,
//! group descriptors, inodes and directory records out.

pub mod ext2;

pub use ext2::{
    DirBlockIter, Ext2CompatFeatures, Ext2DirEntryRef, Ext2FileType, Ext2GroupDesc, Ext2Inode,
    Ext2IncompatFeatures, Ext2RoCompatFeatures, Ext2Superblock, FileType, iter_dir_block,
    percent_free,
};
