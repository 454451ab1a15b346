#![forbid(unsafe_code)]
//! ext2scope public API facade.
//!
//! Re-exports the volume API from `e2s-core` together with the error, id and
//! device types a caller needs to drive it. The CLI depends on this crate
//! only.

pub use e2s_block::{ByteDevice, FileByteDevice, MemoryByteDevice};
pub use e2s_core::*;
pub use e2s_error::{E2sError, Result};
pub use e2s_ondisk::{Ext2Inode, Ext2Superblock, FileType};
pub use e2s_types::{BlockNumber, Cx, InodeNumber};
