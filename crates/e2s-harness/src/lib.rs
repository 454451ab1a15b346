#![forbid(unsafe_code)]
//! Test tooling for ext2scope.
//!
//! - [`ImageBuilder`] synthesizes valid (and, via [`BuiltImage`] patching,
//!   deliberately damaged) ext2 images in memory.
//! - Sparse JSON fixtures store real `mke2fs` images as `{size, writes}`
//!   with only the non-zero byte runs hex-encoded.
//! - [`RecordingDevice`] logs device reads so tests can assert what a query
//!   touched.

pub mod builder;
pub mod recording;

pub use builder::{BuiltImage, ImageBuilder, InodeLayout, ROOT_INO, sample_image};
pub use recording::{ReadRecord, RecordingDevice};

use anyhow::{Context, Result, bail};
use e2s_ondisk::Ext2Superblock;
use e2s_types::{EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Zero runs shorter than this are kept inside a write instead of splitting it.
pub const DEFAULT_FIXTURE_GAP: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseFixture {
    pub size: usize,
    pub writes: Vec<FixtureWrite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureWrite {
    pub offset: usize,
    pub hex: String,
}

impl SparseFixture {
    /// Materialize the full image.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![0_u8; self.size];
        for write in &self.writes {
            let payload = hex::decode(&write.hex)
                .with_context(|| format!("invalid hex at offset {}", write.offset))?;

            let end = write
                .offset
                .checked_add(payload.len())
                .context("fixture offset overflow")?;
            if end > bytes.len() {
                bail!(
                    "fixture write out of bounds: offset={} payload={} size={}",
                    write.offset,
                    payload.len(),
                    bytes.len()
                );
            }

            bytes[write.offset..end].copy_from_slice(&payload);
        }
        Ok(bytes)
    }
}

/// Directory holding the checked-in conformance fixtures.
#[must_use]
pub fn fixture_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .map_or_else(
            || PathBuf::from("conformance/fixtures"),
            |root| root.join("conformance").join("fixtures"),
        )
}

pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;
    fixture.to_bytes()
}

/// Encode the non-zero runs of `image[offset..offset + len]`.
///
/// Runs separated by fewer than `max_gap` zero bytes are merged. The
/// fixture's `size` is the whole image length so offsets stay absolute.
pub fn extract_region(
    image: &[u8],
    offset: usize,
    len: usize,
    max_gap: usize,
) -> Result<SparseFixture> {
    let end = offset.checked_add(len).context("region overflow")?;
    if end > image.len() {
        bail!(
            "region out of bounds: offset={offset} len={len} image={}",
            image.len()
        );
    }

    let region = &image[offset..end];
    let mut writes = Vec::new();
    let mut i = 0;
    while i < region.len() {
        if region[i] == 0 {
            i += 1;
            continue;
        }
        let start = i;
        let mut last = i;
        while i < region.len() {
            if region[i] != 0 {
                last = i;
            } else if i - last > max_gap {
                break;
            }
            i += 1;
        }
        writes.push(FixtureWrite {
            offset: offset + start,
            hex: hex::encode(&region[start..=last]),
        });
    }

    Ok(SparseFixture {
        size: image.len(),
        writes,
    })
}

/// Sparse fixture of a whole image.
pub fn sparse_fixture_from_image(image: &[u8], max_gap: usize) -> Result<SparseFixture> {
    extract_region(image, 0, image.len(), max_gap)
}

/// Sparse fixture holding only the superblock region; fails unless the
/// region decodes as ext2.
pub fn extract_superblock(image: &[u8]) -> Result<SparseFixture> {
    Ext2Superblock::parse_from_image(image).context("image has no ext2 superblock")?;
    extract_region(
        image,
        EXT2_SUPERBLOCK_OFFSET,
        EXT2_SUPERBLOCK_SIZE,
        DEFAULT_FIXTURE_GAP,
    )
}

pub fn validate_ext2_fixture(path: &Path) -> Result<Ext2Superblock> {
    let data = load_sparse_fixture(path)?;
    Ext2Superblock::parse_from_image(&data)
        .with_context(|| format!("failed ext2 parse for fixture {}", path.display()))
}
