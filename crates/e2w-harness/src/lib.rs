#![forbid(unsafe_code)]

pub mod image;

pub use image::{DemoTree, ImageBuilder, demo_image};

use anyhow::{Context, Result, bail};
use e2w_ondisk::{Ext2DirEntry, Ext2GroupDesc, Ext2Inode, Ext2Superblock, parse_dir_block};
use e2w_types::{EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A mostly-zero byte buffer stored as a list of non-zero runs.
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
    /// Encode `bytes`, merging non-zero runs separated by short zero gaps.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        const MAX_GAP: usize = 8;
        let mut writes = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == 0 {
                i += 1;
                continue;
            }
            let start = i;
            let mut last = i;
            while i < bytes.len() && i - last <= MAX_GAP {
                if bytes[i] != 0 {
                    last = i;
                }
                i += 1;
            }
            writes.push(FixtureWrite {
                offset: start,
                hex: hex::encode(&bytes[start..=last]),
            });
            i = last + 1;
        }
        Self {
            size: bytes.len(),
            writes,
        }
    }

    /// Expand into a zero-filled buffer of `size` bytes.
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

pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;
    fixture.to_bytes()
}

/// Cut `len` bytes at `offset` out of an image as a sparse fixture.
pub fn extract_region(image: &[u8], offset: usize, len: usize) -> Result<SparseFixture> {
    let end = offset.checked_add(len).context("region overflow")?;
    let Some(region) = image.get(offset..end) else {
        bail!(
            "region out of bounds: offset={offset} len={len} image={}",
            image.len()
        );
    };
    Ok(SparseFixture::from_bytes(region))
}

/// Extract the 1024-byte superblock region after checking it parses.
pub fn extract_superblock(image: &[u8]) -> Result<SparseFixture> {
    Ext2Superblock::parse_from_image(image).context("image has no ext2 superblock")?;
    extract_region(image, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE)
}

/// Directory holding the checked-in conformance fixtures.
#[must_use]
pub fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("conformance")
        .join("fixtures")
}

pub fn validate_superblock_fixture(path: &Path) -> Result<Ext2Superblock> {
    let data = load_sparse_fixture(path)?;
    Ext2Superblock::parse_superblock_region(&data)
        .with_context(|| format!("failed superblock parse for fixture {}", path.display()))
}

pub fn validate_group_desc_fixture(path: &Path) -> Result<Ext2GroupDesc> {
    let data = load_sparse_fixture(path)?;
    Ext2GroupDesc::parse_from_bytes(&data)
        .with_context(|| format!("failed group desc parse for fixture {}", path.display()))
}

pub fn validate_inode_fixture(path: &Path) -> Result<Ext2Inode> {
    let data = load_sparse_fixture(path)?;
    Ext2Inode::parse_from_bytes(&data)
        .with_context(|| format!("failed inode parse for fixture {}", path.display()))
}

/// Parse a single directory block fixture. `block_no` only labels errors.
pub fn validate_dir_block_fixture(path: &Path, block_no: u32) -> Result<Vec<Ext2DirEntry>> {
    let data = load_sparse_fixture(path)?;
    parse_dir_block(&data, block_no)
        .with_context(|| format!("failed dir block parse for fixture {}", path.display()))
}
