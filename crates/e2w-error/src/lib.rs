#![forbid(unsafe_code)]
//! Error types for E2Walk.
//!
//! # Error Taxonomy
//!
//! E2Walk uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `e2w-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `E2wError` | `e2w-error` (this crate) | Errors surfaced to the CLI and API consumers |
//!
//! A path that does not resolve is **not** an error. Misses are ordinary
//! return values (`None` / `Resolution::NotFound`) because most lookups that
//! miss are legitimate. Only a malformed image, a bad argument or an I/O
//! failure produces an `E2wError`, so "file doesn't exist" and "image is
//! malformed" can never be confused downstream.
//!
//! ## Mapping Policy: ParseError → E2wError
//!
//! `e2w-error` is independent of `e2w-types` to avoid cyclic dependencies.
//! The conversion lives in `e2w-core`:
//!
//! | ParseError Variant | E2wError Variant |
//! |--------------------|------------------|
//! | `InsufficientData` | `OutOfRange { offset, len, image_len }` |
//! | `CorruptDirEntry` | `Corruption { block, detail }` |
//! | `InodeOutOfRange` | `InvalidInode { ino, inodes_count }` |
//! | `InvalidMagic` | `Format(detail)` |
//! | `InvalidField` | `InvalidGeometry` for block size, inode size, inode count and `first_data_block` fields |
//! | `InvalidField` | `OutOfRange { offset: usize::MAX, len: 0, image_len }` for offset overflow |
//! | `InvalidField` | `Format(detail)` otherwise |
//! | `IntegerConversion` | `OutOfRange { offset: usize::MAX, len: 0, image_len }` |
//!
//! ## errno Mapping
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error or `EIO` |
//! | `Corruption` | `EIO` |
//! | `OutOfRange` | `EIO` |
//! | `InvalidInode` | `EINVAL` |
//! | `InvalidPath` | `EINVAL` |
//! | `Format` | `EINVAL` |
//! | `InvalidGeometry` | `EINVAL` |

use thiserror::Error;

/// Unified error type for all E2Walk operations.
#[derive(Debug, Error)]
pub enum E2wError {
    /// Operating system I/O error while loading an image.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata corruption detected inside a known block.
    ///
    /// Raised for directory records whose length is zero, shorter than the
    /// record header, or that cross the end of their block.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u32, detail: String },

    /// A computed byte range falls outside the image buffer.
    #[error("read of {len} bytes at offset {offset} is outside the image ({image_len} bytes)")]
    OutOfRange {
        offset: usize,
        len: usize,
        image_len: usize,
    },

    /// Inode number is 0 or larger than the superblock's inode count.
    #[error("invalid inode number {ino} (inodes_count={inodes_count})")]
    InvalidInode { ino: u32, inodes_count: u32 },

    /// Path argument is not absolute.
    #[error("invalid path {0:?}: must start with '/'")]
    InvalidPath(String),

    /// The image is not an ext2 filesystem (bad magic, unknown revision).
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Block size, inode size or group geometry is out of range.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

impl E2wError {
    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive; adding a variant is a compile error until
    /// its errno is assigned.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } | Self::OutOfRange { .. } => libc::EIO,
            Self::InvalidInode { .. }
            | Self::InvalidPath(_)
            | Self::Format(_)
            | Self::InvalidGeometry(_) => libc::EINVAL,
        }
    }

    /// Whether this error means the image itself is malformed.
    #[must_use]
    pub fn is_image_damage(&self) -> bool {
        matches!(
            self,
            Self::Corruption { .. }
                | Self::OutOfRange { .. }
                | Self::Format(_)
                | Self::InvalidGeometry(_)
        )
    }
}

/// Result alias using `E2wError`.
pub type Result<T> = std::result::Result<T, E2wError>;
