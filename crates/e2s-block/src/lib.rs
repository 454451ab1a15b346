#![forbid(unsafe_code)]
//! Read-only block I/O layer.
//!
//! Provides the `ByteDevice` trait for positional reads, a file-backed and an
//! in-memory implementation, and `ByteBlockDevice` which addresses a byte
//! device in filesystem blocks. Every read takes a `&Cx` so a cancelled
//! request stops at the next I/O boundary.

use e2s_error::{E2sError, Result};
use e2s_types::{BlockNumber, BlockSize, Cx, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE};
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

#[inline]
fn cx_checkpoint(cx: &Cx) -> Result<()> {
    cx.checkpoint().map_err(|_| E2sError::Cancelled)
}

/// Range check shared by every device: `[offset, offset + len)` must lie in
/// `[0, device_len)`.
fn check_range(offset: u64, len: usize, device_len: u64) -> Result<()> {
    let end = u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len))
        .ok_or_else(|| {
            E2sError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("read range overflows u64: offset={offset} len={len}"),
            ))
        })?;
    if end > device_len {
        return Err(E2sError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read out of bounds: offset={offset} len={len} device_len={device_len}"),
        )));
    }
    Ok(())
}

/// Owned block buffer.
///
/// Invariant: length == block size of the originating `ByteBlockDevice`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed, read-only device with pread semantics.
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    ///
    /// A range reaching past `len_bytes()` fails with an `Io` error of kind
    /// `UnexpectedEof`; nothing is partially filled.
    fn read_exact_at(&self, cx: &Cx, offset: u64, buf: &mut [u8]) -> Result<()>;
}

impl<T: ByteDevice + ?Sized> ByteDevice for Box<T> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, cx: &Cx, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(cx, offset, buf)
    }
}

impl<T: ByteDevice + ?Sized> ByteDevice for Arc<T> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, cx: &Cx, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(cx, offset, buf)
    }
}

/// File-backed byte device using `pread`-style I/O.
///
/// `FileExt::read_exact_at` does not move a shared seek position, so one
/// handle can serve concurrent queries.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    /// Open `path` read-only. The handle is closed when the last clone drops.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, cx: &Cx, offset: u64, buf: &mut [u8]) -> Result<()> {
        cx_checkpoint(cx)?;
        check_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

/// Byte device over an owned buffer, for synthesized images and fixtures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryByteDevice {
    bytes: Vec<u8>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_exact_at(&self, cx: &Cx, offset: u64, buf: &mut [u8]) -> Result<()> {
        cx_checkpoint(cx)?;
        check_range(offset, buf.len(), self.len_bytes())?;
        // check_range bounds offset by a usize-sized length.
        let start = usize::try_from(offset).map_err(|_| {
            E2sError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "offset does not fit usize",
            ))
        })?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }
}

/// Block-addressed read interface.
pub trait BlockDevice: Send + Sync {
    /// Read one whole block.
    fn read_block(&self, cx: &Cx, block: BlockNumber) -> Result<BlockBuf>;

    /// Block size in bytes.
    fn block_size(&self) -> BlockSize;

    /// Number of complete blocks the backing device holds.
    fn block_count(&self) -> u64;
}

/// Addresses a `ByteDevice` in units of `block_size`.
///
/// A trailing partial block is not addressable; image length need not be
/// block-aligned.
#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_size: BlockSize,
    block_count: u64,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    #[must_use]
    pub fn new(inner: D, block_size: BlockSize) -> Self {
        let block_count = inner.len_bytes() / u64::from(block_size.get());
        Self {
            inner,
            block_size,
            block_count,
        }
    }

    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: ByteDevice> BlockDevice for ByteBlockDevice<D> {
    fn read_block(&self, cx: &Cx, block: BlockNumber) -> Result<BlockBuf> {
        if block.0 >= self.block_count {
            return Err(E2sError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "block out of range: block={} block_count={}",
                    block.0, self.block_count
                ),
            )));
        }
        let offset = self.block_size.block_to_byte(block).ok_or_else(|| {
            E2sError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block offset overflow: block={}", block.0),
            ))
        })?;
        trace!(block = block.0, offset, "read_block");
        let mut buf = vec![0_u8; self.block_size.as_usize()];
        self.inner.read_exact_at(cx, offset, &mut buf)?;
        Ok(BlockBuf::new(buf))
    }

    fn block_size(&self) -> BlockSize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }
}

/// Read the raw 1024-byte superblock region at byte offset 1024.
///
/// This is a byte-range read: the block size is not known until the region
/// has been decoded.
pub fn read_superblock_region(
    cx: &Cx,
    dev: &dyn ByteDevice,
) -> Result<[u8; EXT2_SUPERBLOCK_SIZE]> {
    let mut buf = [0_u8; EXT2_SUPERBLOCK_SIZE];
    dev.read_exact_at(cx, EXT2_SUPERBLOCK_OFFSET as u64, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn memory_device_reads_exact_ranges() {
        let cx = Cx::for_testing();
        let dev = MemoryByteDevice::new(patterned(4096));
        let mut buf = [0_u8; 4];
        dev.read_exact_at(&cx, 10, &mut buf).expect("read");
        assert_eq!(buf, [10, 11, 12, 13]);
    }

    #[test]
    fn memory_device_rejects_reads_past_end() {
        let cx = Cx::for_testing();
        let dev = MemoryByteDevice::new(vec![0; 100]);
        let mut buf = [0_u8; 8];
        let err = dev.read_exact_at(&cx, 96, &mut buf).expect_err("oob");
        match err {
            E2sError::Io(io) => assert_eq!(io.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected Io, got {other:?}"),
        }
        assert!(dev.read_exact_at(&cx, u64::MAX, &mut buf).is_err());
    }

    #[test]
    fn byte_block_device_reads_whole_blocks() {
        let cx = Cx::for_testing();
        let bs = BlockSize::new(1024).expect("bs");
        let dev = ByteBlockDevice::new(MemoryByteDevice::new(patterned(1024 * 4)), bs);
        assert_eq!(dev.block_count(), 4);
        let block = dev.read_block(&cx, BlockNumber(2)).expect("read");
        assert_eq!(block.as_slice().len(), 1024);
        assert_eq!(block.as_slice()[0], (2048 % 251) as u8);
    }

    #[test]
    fn byte_block_device_ignores_trailing_partial_block() {
        let cx = Cx::for_testing();
        let bs = BlockSize::new(1024).expect("bs");
        let dev = ByteBlockDevice::new(MemoryByteDevice::new(vec![0; 1024 * 3 + 100]), bs);
        assert_eq!(dev.block_count(), 3);
        assert!(matches!(
            dev.read_block(&cx, BlockNumber(3)),
            Err(E2sError::Io(_))
        ));
    }

    #[test]
    fn cancelled_context_stops_reads() {
        let cx = Cx::for_testing();
        cx.cancel();
        let dev = MemoryByteDevice::new(vec![0; 4096]);
        let mut buf = [0_u8; 16];
        assert!(matches!(
            dev.read_exact_at(&cx, 0, &mut buf),
            Err(E2sError::Cancelled)
        ));
    }

    #[test]
    fn superblock_region_is_read_at_1024() {
        let cx = Cx::for_testing();
        let mut image = vec![0_u8; 4096];
        image[1024] = 0xAA;
        image[2047] = 0xBB;
        let dev = MemoryByteDevice::new(image);
        let region = read_superblock_region(&cx, &dev).expect("region");
        assert_eq!(region[0], 0xAA);
        assert_eq!(region[1023], 0xBB);
    }

    #[test]
    fn superblock_region_on_tiny_image_is_io_error() {
        let cx = Cx::for_testing();
        let dev = MemoryByteDevice::new(vec![0; 1500]);
        assert!(matches!(
            read_superblock_region(&cx, &dev),
            Err(E2sError::Io(_))
        ));
    }
}
