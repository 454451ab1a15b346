//! A `ByteDevice` wrapper that records every read.

use e2s_block::ByteDevice;
use e2s_error::Result;
use e2s_types::Cx;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRecord {
    pub offset: u64,
    pub len: usize,
}

/// Forwards to `inner` and logs `(offset, len)` of each attempted read.
///
/// Share it through an `Arc` to inspect the log while a volume owns the
/// device.
#[derive(Debug)]
pub struct RecordingDevice<D> {
    inner: D,
    reads: Mutex<Vec<ReadRecord>>,
}

impl<D: ByteDevice> RecordingDevice<D> {
    #[must_use]
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            reads: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn reads(&self) -> Vec<ReadRecord> {
        self.reads.lock().clone()
    }

    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.lock().len()
    }

    pub fn clear(&self) {
        self.reads.lock().clear();
    }

    /// Block numbers of whole-block reads, in read order.
    #[must_use]
    pub fn blocks_read(&self, block_size: u32) -> Vec<u64> {
        let bs = u64::from(block_size);
        self.reads
            .lock()
            .iter()
            .filter(|r| r.len as u64 == bs && r.offset % bs == 0)
            .map(|r| r.offset / bs)
            .collect()
    }
}

impl<D: ByteDevice> ByteDevice for RecordingDevice<D> {
    fn len_bytes(&self) -> u64 {
        self.inner.len_bytes()
    }

    fn read_exact_at(&self, cx: &Cx, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.reads.lock().push(ReadRecord {
            offset,
            len: buf.len(),
        });
        self.inner.read_exact_at(cx, offset, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2s_block::MemoryByteDevice;

    #[test]
    fn records_offsets_and_lengths() {
        let cx = Cx::for_testing();
        let dev = RecordingDevice::new(MemoryByteDevice::new(vec![0; 4096]));
        let mut buf = [0_u8; 1024];
        dev.read_exact_at(&cx, 1024, &mut buf).expect("read");
        let mut small = [0_u8; 32];
        dev.read_exact_at(&cx, 2048 + 64, &mut small).expect("read");

        assert_eq!(dev.read_count(), 2);
        assert_eq!(
            dev.reads()[1],
            ReadRecord {
                offset: 2112,
                len: 32
            }
        );
        assert_eq!(dev.blocks_read(1024), vec![1]);
        dev.clear();
        assert_eq!(dev.read_count(), 0);
    }

    #[test]
    fn failed_reads_are_still_recorded() {
        let cx = Cx::for_testing();
        let dev = RecordingDevice::new(MemoryByteDevice::new(vec![0; 100]));
        let mut buf = [0_u8; 64];
        assert!(dev.read_exact_at(&cx, 80, &mut buf).is_err());
        assert_eq!(dev.read_count(), 1);
    }
}
