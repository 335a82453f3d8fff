#![forbid(unsafe_code)]
//! Opening ext2 images and resolving absolute paths to inode numbers.
//!
//! [`OpenImage`] wraps a borrowed image buffer together with its parsed
//! superblock. [`PathResolver`] walks a path from the root directory one
//! component at a time through the states of [`ResolveState`]. Parsing
//! failures from `e2w-ondisk` are converted into [`E2wError`] here, at the
//! crate boundary.

use e2w_ondisk::{Ext2ImageReader, ImageView};
use e2w_types::{ParseError, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFREG, S_IFSOCK};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

pub use e2w_error::{E2wError, Result};
pub use e2w_ondisk::{
    Ext2DirEntry, Ext2FileType, Ext2GroupDesc, Ext2Inode, Ext2Superblock, ScanPolicy,
};
pub use e2w_types::{BlockNumber, BlockSize, InodeNumber};

// ── OpenImage API ───────────────────────────────────────────────────────────

/// Options controlling how an image is opened and walked.
///
/// By default the superblock geometry is validated and directory scans stop
/// at the first matching entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Skip geometry validation (revision, inode size, group layout).
    ///
    /// The superblock magic and block size are still checked: nothing can
    /// be addressed without them.
    pub skip_validation: bool,
    /// Tie-break for duplicate names inside one directory block.
    pub scan_policy: ScanPolicy,
}

#[allow(clippy::derivable_impls)]
impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            skip_validation: false,
            scan_policy: ScanPolicy::FirstMatch,
        }
    }
}

/// An ext2 image opened for read-only traversal.
///
/// Borrows the caller's buffer; nothing is copied and nothing is mutated.
#[derive(Debug, Clone)]
pub struct OpenImage<'img> {
    image: ImageView<'img>,
    reader: Ext2ImageReader,
}

impl<'img> OpenImage<'img> {
    /// Open `image` with default options (validation enabled).
    pub fn open(image: &'img [u8]) -> Result<Self> {
        Self::open_with_options(image, &OpenOptions::default())
    }

    pub fn open_with_options(image: &'img [u8], options: &OpenOptions) -> Result<Self> {
        let view = ImageView::new(image);
        let reader = Ext2ImageReader::new(image)
            .map_err(|e| parse_to_e2w_error(&e, view.len()))?
            .with_scan_policy(options.scan_policy);

        if !options.skip_validation {
            reader
                .sb
                .validate_geometry()
                .map_err(|e| parse_to_e2w_error(&e, view.len()))?;
        }

        debug!(
            target: "e2w::open",
            image_len = view.len(),
            block_size = reader.sb.block_size,
            inodes_count = reader.sb.inodes_count,
            rev_level = reader.sb.rev_level,
            inode_size = reader.sb.inode_record_size(),
            validated = !options.skip_validation,
            scan_policy = ?options.scan_policy,
            "image_opened"
        );

        Ok(Self {
            image: view,
            reader,
        })
    }

    #[must_use]
    pub fn superblock(&self) -> &Ext2Superblock {
        &self.reader.sb
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.reader.block_size()
    }

    #[must_use]
    pub fn scan_policy(&self) -> ScanPolicy {
        self.reader.scan_policy
    }

    #[must_use]
    pub fn image_len(&self) -> usize {
        self.image.len()
    }

    fn convert(&self, e: &ParseError) -> E2wError {
        let err = parse_to_e2w_error(e, self.image.len());
        if err.is_image_damage() {
            warn!(target: "e2w::image", error = %err, "image_damage_detected");
        }
        err
    }

    /// Read a whole block by number.
    pub fn read_block(&self, block: BlockNumber) -> Result<&'img [u8]> {
        self.reader
            .read_block(self.image, block)
            .map_err(|e| self.convert(&e))
    }

    pub fn first_group_descriptor(&self) -> Result<Ext2GroupDesc> {
        self.reader
            .first_group_descriptor(self.image)
            .map_err(|e| self.convert(&e))
    }

    /// Read an inode by its 1-based number.
    pub fn read_inode(&self, ino: InodeNumber) -> Result<Ext2Inode> {
        self.reader
            .read_inode(self.image, ino)
            .map_err(|e| self.convert(&e))
    }

    /// Look up one name in the first block of `dir`.
    ///
    /// `Ok(None)` for a miss, including when `dir` is not a directory.
    pub fn find_entry(&self, dir: &Ext2Inode, name: &[u8]) -> Result<Option<InodeNumber>> {
        self.reader
            .find_entry(self.image, dir, name)
            .map_err(|e| self.convert(&e))
    }

    /// List the live entries of directory `ino`.
    pub fn list_dir(&self, ino: InodeNumber) -> Result<Vec<Ext2DirEntry>> {
        let inode = self.read_inode(ino)?;
        if !inode.is_dir() {
            return Err(E2wError::Format(format!("inode {ino} is not a directory")));
        }
        self.reader
            .read_dir_block(self.image, &inode)
            .map_err(|e| self.convert(&e))
    }

    #[must_use]
    pub fn resolver(&self) -> PathResolver<'_, 'img> {
        PathResolver::new(self)
    }

    /// Resolve an absolute path. `Ok(None)` means "not found".
    pub fn resolve(&self, path: &str) -> Result<Option<InodeNumber>> {
        self.resolver().resolve(path)
    }

    /// Resolve a path and decode the inode it lands on.
    pub fn stat(&self, path: &str) -> Result<Option<InodeStat>> {
        match self.resolve(path)? {
            Some(ino) => {
                let inode = self.read_inode(ino)?;
                Ok(Some(InodeStat::from_inode(ino, &inode)))
            }
            None => Ok(None),
        }
    }
}

// ── Path resolution ─────────────────────────────────────────────────────────

/// Why a path did not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum MissReason {
    /// The walk ended on the root directory ("/", "", "/.", "/..").
    RootPath,
    /// Component `name` at `depth` (0-based) is absent from its directory.
    MissingComponent { depth: usize, name: String },
    /// Component `name` at `depth` was looked up under a non-directory.
    NotADirectory { depth: usize, name: String },
}

/// Outcome of a detailed path resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Found { ino: InodeNumber },
    NotFound { miss: MissReason },
}

impl Resolution {
    /// Resolved inode, or `None` on a miss.
    #[must_use]
    pub fn inode(&self) -> Option<InodeNumber> {
        match self {
            Self::Found { ino } => Some(*ino),
            Self::NotFound { .. } => None,
        }
    }

    /// Resolved inode number with 0 standing for "not found".
    #[must_use]
    pub fn raw_inode(&self) -> u32 {
        self.inode().map_or(0, |ino| ino.0)
    }
}

/// States of the path walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveState {
    Root,
    Descending { current: InodeNumber, depth: usize },
    Found(InodeNumber),
    NotFound(MissReason),
}

/// Split an absolute path into its non-empty components.
///
/// The empty string yields no components, like "/". Any other path must
/// start with '/'.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    if !path.is_empty() && !path.starts_with('/') {
        return Err(E2wError::InvalidPath(path.to_owned()));
    }
    Ok(path.split('/').filter(|c| !c.is_empty()).collect())
}

/// Walks a path from the root directory of an [`OpenImage`].
#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'fs, 'img> {
    fs: &'fs OpenImage<'img>,
}

impl<'fs, 'img> PathResolver<'fs, 'img> {
    #[must_use]
    pub fn new(fs: &'fs OpenImage<'img>) -> Self {
        Self { fs }
    }

    /// Resolve `path`, collapsing misses to `None`.
    pub fn resolve(&self, path: &str) -> Result<Option<InodeNumber>> {
        Ok(self.resolve_detailed(path)?.inode())
    }

    /// Resolve `path` and report where a miss happened.
    ///
    /// A walk that ends on the root inode is reported as
    /// `MissReason::RootPath`, never as `Found`.
    pub fn resolve_detailed(&self, path: &str) -> Result<Resolution> {
        let components = split_path(path)?;
        let mut remaining = components.iter().copied();
        let mut state = ResolveState::Root;

        loop {
            state = match state {
                ResolveState::Root => ResolveState::Descending {
                    current: InodeNumber::ROOT,
                    depth: 0,
                },
                ResolveState::Descending { current, depth } => match remaining.next() {
                    Some(name) => self
                        .step(current, depth, name)
                        .inspect_err(|err| {
                            debug!(target: "e2w::resolve", path, depth, error = %err, "resolve_failed");
                        })?,
                    None if current.is_root() => ResolveState::NotFound(MissReason::RootPath),
                    None => ResolveState::Found(current),
                },
                ResolveState::Found(ino) => {
                    debug!(target: "e2w::resolve", path, ino = ino.0, "resolve_found");
                    return Ok(Resolution::Found { ino });
                }
                ResolveState::NotFound(miss) => {
                    debug!(target: "e2w::resolve", path, miss = ?miss, "resolve_miss");
                    return Ok(Resolution::NotFound { miss });
                }
            };
            trace!(target: "e2w::resolve", path, state = ?state, "resolve_transition");
        }
    }

    /// Descend from `current` into component `name`.
    fn step(&self, current: InodeNumber, depth: usize, name: &str) -> Result<ResolveState> {
        let dir = self.fs.read_inode(current)?;
        if !dir.is_dir() {
            return Ok(ResolveState::NotFound(MissReason::NotADirectory {
                depth,
                name: name.to_owned(),
            }));
        }

        Ok(match self.fs.find_entry(&dir, name.as_bytes())? {
            Some(next) => ResolveState::Descending {
                current: next,
                depth: depth + 1,
            },
            None => ResolveState::NotFound(MissReason::MissingComponent {
                depth,
                name: name.to_owned(),
            }),
        })
    }
}

/// Resolve `path` in `image` with default options.
///
/// Returns `Ok(None)` when the path does not name a non-root inode.
pub fn resolve(image: &[u8], path: &str) -> Result<Option<InodeNumber>> {
    OpenImage::open(image)?.resolve(path)
}

/// Resolve `path` in `image` with explicit options.
pub fn resolve_with_options(
    image: &[u8],
    path: &str,
    options: &OpenOptions,
) -> Result<Option<InodeNumber>> {
    OpenImage::open_with_options(image, options)?.resolve(path)
}

// ── Inode attributes ────────────────────────────────────────────────────────

/// File type derived from the inode mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Directory,
    RegularFile,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Unknown,
}

impl FileKind {
    #[must_use]
    pub fn from_inode(inode: &Ext2Inode) -> Self {
        match inode.file_type_mode() {
            S_IFDIR => Self::Directory,
            S_IFREG => Self::RegularFile,
            S_IFLNK => Self::Symlink,
            S_IFCHR => Self::CharDevice,
            S_IFBLK => Self::BlockDevice,
            S_IFIFO => Self::Fifo,
            S_IFSOCK => Self::Socket,
            _ => Self::Unknown,
        }
    }
}

/// Attributes of a resolved inode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeStat {
    pub ino: InodeNumber,
    pub kind: FileKind,
    pub perm: u16,
    pub size: u64,
    pub links: u16,
    pub uid: u32,
    pub gid: u32,
    pub blocks_512: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub first_block: BlockNumber,
}

impl InodeStat {
    #[must_use]
    pub fn from_inode(ino: InodeNumber, inode: &Ext2Inode) -> Self {
        Self {
            ino,
            kind: FileKind::from_inode(inode),
            perm: inode.permission_bits(),
            size: inode.size,
            links: inode.links_count,
            uid: inode.uid,
            gid: inode.gid,
            blocks_512: inode.blocks,
            atime: inode.atime,
            ctime: inode.ctime,
            mtime: inode.mtime,
            first_block: inode.first_block(),
        }
    }
}

// ── Error boundary ──────────────────────────────────────────────────────────

/// Convert a parsing error into the runtime error type.
///
/// `image_len` fills in `E2wError::OutOfRange`, which `ParseError` does not
/// carry.
#[must_use]
pub fn parse_to_e2w_error(e: &ParseError, image_len: usize) -> E2wError {
    match e {
        ParseError::InsufficientData { needed, offset, .. } => E2wError::OutOfRange {
            offset: *offset,
            len: *needed,
            image_len,
        },
        ParseError::CorruptDirEntry {
            block,
            offset,
            field,
            reason,
        } => E2wError::Corruption {
            block: *block,
            detail: format!("{field} at offset {offset}: {reason}"),
        },
        ParseError::InodeOutOfRange { ino, inodes_count } => E2wError::InvalidInode {
            ino: *ino,
            inodes_count: *inodes_count,
        },
        ParseError::InvalidField { field, reason } => {
            if field.contains("block_size")
                || field.contains("inode_size")
                || field.contains("inodes_per_group")
                || field.contains("inodes_count")
                || field.contains("first_data_block")
            {
                E2wError::InvalidGeometry(format!("{field}: {reason}"))
            } else if field.contains("offset") {
                unaddressable(image_len)
            } else {
                E2wError::Format(e.to_string())
            }
        }
        ParseError::InvalidMagic { .. } => E2wError::Format(e.to_string()),
        ParseError::IntegerConversion { .. } => unaddressable(image_len),
    }
}

/// An offset that overflowed or does not fit `usize` lies past any image.
fn unaddressable(image_len: usize) -> E2wError {
    E2wError::OutOfRange {
        offset: usize::MAX,
        len: 0,
        image_len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2w_types::{EXT2_FEATURE_INCOMPAT_FILETYPE, EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_OFFSET};

    const BS: usize = 1024;
    const INODE_TABLE: usize = 3;
    const ROOT_BLOCK: usize = 7;
    const DOCS_BLOCK: usize = 8;
    const DOCS_INO: u32 = 12;
    const README_INO: u32 = 13;
    const GUIDE_INO: u32 = 14;

    fn put_u16(buf: &mut [u8], off: usize, v: u16) {
        buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], off: usize, v: u32) {
        buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_dir_entry(buf: &mut [u8], offset: usize, inode: u32, ft: u8, name: &[u8], rec_len: u16) {
        put_u32(buf, offset, inode);
        put_u16(buf, offset + 4, rec_len);
        buf[offset + 6] = name.len() as u8;
        buf[offset + 7] = ft;
        buf[offset + 8..offset + 8 + name.len()].copy_from_slice(name);
    }

    fn write_inode(image: &mut [u8], ino: u32, mode: u16, size: u32, block0: u32) {
        let base = INODE_TABLE * BS + (ino as usize - 1) * 128;
        put_u16(image, base, mode);
        put_u32(image, base + 0x04, size);
        put_u16(image, base + 0x1A, 1);
        put_u32(image, base + 0x28, block0);
    }

    /// 1 KiB blocks, one group:
    ///
    /// ```text
    /// /
    /// ├── docs/          (inode 12)
    /// │   ├── <deleted old.txt>
    /// │   └── guide.txt  (inode 14)
    /// └── readme.txt     (inode 13)
    /// ```
    fn build_test_image() -> Vec<u8> {
        let mut image = vec![0_u8; 16 * BS];
        let sb = EXT2_SUPERBLOCK_OFFSET;
        put_u32(&mut image, sb, 32);
        put_u32(&mut image, sb + 0x04, 16);
        put_u32(&mut image, sb + 0x14, 1);
        put_u32(&mut image, sb + 0x20, 8192);
        put_u32(&mut image, sb + 0x28, 32);
        put_u16(&mut image, sb + 0x38, EXT2_SUPER_MAGIC);
        put_u32(&mut image, sb + 0x4C, 1);
        put_u32(&mut image, sb + 0x54, 11);
        put_u16(&mut image, sb + 0x58, 128);
        put_u32(&mut image, sb + 0x60, EXT2_FEATURE_INCOMPAT_FILETYPE);

        put_u32(&mut image, 2 * BS + 0x08, INODE_TABLE as u32);

        write_inode(&mut image, 2, 0o040_755, 1024, ROOT_BLOCK as u32);
        write_inode(&mut image, DOCS_INO, 0o040_755, 1024, DOCS_BLOCK as u32);
        write_inode(&mut image, README_INO, 0o100_644, 42, 9);
        write_inode(&mut image, GUIDE_INO, 0o100_600, 7, 10);

        let root = &mut image[ROOT_BLOCK * BS..(ROOT_BLOCK + 1) * BS];
        write_dir_entry(root, 0, 2, 2, b".", 12);
        write_dir_entry(root, 12, 2, 2, b"..", 12);
        write_dir_entry(root, 24, DOCS_INO, 2, b"docs", 12);
        write_dir_entry(root, 36, README_INO, 1, b"readme.txt", 988);

        let docs = &mut image[DOCS_BLOCK * BS..(DOCS_BLOCK + 1) * BS];
        write_dir_entry(docs, 0, DOCS_INO, 2, b".", 12);
        write_dir_entry(docs, 12, 2, 2, b"..", 12);
        write_dir_entry(docs, 24, 0, 1, b"old.txt", 16);
        write_dir_entry(docs, 40, GUIDE_INO, 1, b"guide.txt", 984);

        image
    }

    #[test]
    fn root_path_is_not_found() {
        let image = build_test_image();
        let fs = OpenImage::open(&image).unwrap();
        for path in ["/", "", "//", "/.", "/..", "/docs/..", "/docs/../."] {
            let res = fs.resolver().resolve_detailed(path).unwrap();
            assert_eq!(
                res,
                Resolution::NotFound {
                    miss: MissReason::RootPath
                },
                "path {path:?}"
            );
            assert_eq!(res.raw_inode(), 0);
        }
    }

    #[test]
    fn resolves_nested_paths() {
        let image = build_test_image();
        let fs = OpenImage::open(&image).unwrap();
        assert_eq!(fs.resolve("/docs").unwrap(), Some(InodeNumber(DOCS_INO)));
        assert_eq!(fs.resolve("/docs/").unwrap(), Some(InodeNumber(DOCS_INO)));
        assert_eq!(fs.resolve("/readme.txt").unwrap(), Some(InodeNumber(README_INO)));
        assert_eq!(
            fs.resolve("//docs//guide.txt").unwrap(),
            Some(InodeNumber(GUIDE_INO))
        );
        assert_eq!(fs.resolve("/docs/./guide.txt").unwrap(), Some(InodeNumber(GUIDE_INO)));
    }

    #[test]
    fn entry_after_deleted_record_is_found() {
        let image = build_test_image();
        assert_eq!(
            resolve(&image, "/docs/guide.txt").unwrap(),
            Some(InodeNumber(GUIDE_INO))
        );
        assert_eq!(resolve(&image, "/docs/old.txt").unwrap(), None);
    }

    #[test]
    fn missing_leaf_reports_component() {
        let image = build_test_image();
        let fs = OpenImage::open(&image).unwrap();
        let res = fs.resolver().resolve_detailed("/docs/ghost.txt").unwrap();
        assert_eq!(
            res,
            Resolution::NotFound {
                miss: MissReason::MissingComponent {
                    depth: 1,
                    name: "ghost.txt".into()
                }
            }
        );
        assert_eq!(fs.resolve("/ghost/guide.txt").unwrap(), None);
    }

    #[test]
    fn file_in_the_middle_of_a_path_is_a_miss() {
        let mut image = build_test_image();
        // Corrupting readme.txt's data block would fail a scan; the walk
        // must stop at the mode check before touching it.
        write_dir_entry(&mut image[9 * BS..10 * BS], 0, 5, 1, b"x", 0);
        let fs = OpenImage::open(&image).unwrap();
        let res = fs.resolver().resolve_detailed("/readme.txt/x").unwrap();
        assert_eq!(
            res,
            Resolution::NotFound {
                miss: MissReason::NotADirectory {
                    depth: 1,
                    name: "x".into()
                }
            }
        );
    }

    #[test]
    fn relative_path_is_rejected() {
        let image = build_test_image();
        let err = resolve(&image, "docs/guide.txt").unwrap_err();
        assert!(matches!(err, E2wError::InvalidPath(ref p) if p == "docs/guide.txt"));
        assert_eq!(err.to_errno(), libc::EINVAL);
    }

    #[test]
    fn resolve_is_idempotent() {
        let image = build_test_image();
        let fs = OpenImage::open(&image).unwrap();
        for path in ["/docs/guide.txt", "/nope", "/", "/readme.txt/x"] {
            assert_eq!(fs.resolve(path).unwrap(), fs.resolve(path).unwrap());
        }
    }

    #[test]
    fn root_inode_is_a_directory() {
        let image = build_test_image();
        let fs = OpenImage::open(&image).unwrap();
        let root = fs.read_inode(InodeNumber::ROOT).unwrap();
        assert!(root.is_dir());
        assert_eq!(fs.first_group_descriptor().unwrap().inode_table, 3);
    }

    #[test]
    fn zero_rec_len_is_corruption() {
        let mut image = build_test_image();
        put_u16(&mut image, ROOT_BLOCK * BS + 24 + 4, 0);
        let err = resolve(&image, "/readme.txt").unwrap_err();
        match err {
            E2wError::Corruption { block, ref detail } => {
                assert_eq!(block, ROOT_BLOCK as u32);
                assert!(detail.contains("rec_len is zero"), "{detail}");
            }
            other => panic!("expected Corruption, got {other:?}"),
        }
        assert_eq!(err.to_errno(), libc::EIO);
    }

    #[test]
    fn truncated_image_is_out_of_range() {
        let mut image = build_test_image();
        image.truncate(ROOT_BLOCK * BS);
        let err = resolve(&image, "/docs").unwrap_err();
        assert!(
            matches!(
                err,
                E2wError::OutOfRange {
                    offset: 7168,
                    len: 1024,
                    image_len: 7168,
                }
            ),
            "{err:?}"
        );
    }

    #[test]
    fn dangling_entry_inode_is_invalid_inode() {
        let mut image = build_test_image();
        put_u32(&mut image, DOCS_BLOCK * BS + 40, 99);
        let err = resolve(&image, "/docs/guide.txt/deeper").unwrap_err();
        assert!(matches!(
            err,
            E2wError::InvalidInode {
                ino: 99,
                inodes_count: 32
            }
        ));
        // The final component is never read, so a dangling leaf still resolves.
        assert_eq!(resolve(&image, "/docs/guide.txt").unwrap(), Some(InodeNumber(99)));
    }

    #[test]
    fn bad_magic_is_format_error() {
        let mut image = build_test_image();
        put_u16(&mut image, EXT2_SUPERBLOCK_OFFSET + 0x38, 0);
        let err = OpenImage::open(&image).unwrap_err();
        assert!(matches!(err, E2wError::Format(_)));
    }

    #[test]
    fn skip_validation_opens_odd_geometry() {
        let mut image = build_test_image();
        put_u16(&mut image, EXT2_SUPERBLOCK_OFFSET + 0x58, 200);
        let err = OpenImage::open(&image).unwrap_err();
        assert!(matches!(err, E2wError::InvalidGeometry(_)), "{err:?}");

        let opts = OpenOptions {
            skip_validation: true,
            ..OpenOptions::default()
        };
        let fs = OpenImage::open_with_options(&image, &opts).unwrap();
        assert_eq!(fs.superblock().inode_size, 200);
    }

    #[test]
    fn scan_policy_breaks_duplicate_ties() {
        let mut image = build_test_image();
        let root = &mut image[ROOT_BLOCK * BS..(ROOT_BLOCK + 1) * BS];
        write_dir_entry(root, 36, README_INO, 1, b"readme.txt", 20);
        write_dir_entry(root, 56, README_INO, 2, b"docs", 968);

        assert_eq!(resolve(&image, "/docs").unwrap(), Some(InodeNumber(DOCS_INO)));
        let opts = OpenOptions {
            scan_policy: ScanPolicy::LastMatch,
            ..OpenOptions::default()
        };
        assert_eq!(
            resolve_with_options(&image, "/docs", &opts).unwrap(),
            Some(InodeNumber(README_INO))
        );
    }

    #[test]
    fn stat_and_list() {
        let image = build_test_image();
        let fs = OpenImage::open(&image).unwrap();
        let stat = fs.stat("/readme.txt").unwrap().unwrap();
        assert_eq!(stat.ino, InodeNumber(README_INO));
        assert_eq!(stat.kind, FileKind::RegularFile);
        assert_eq!(stat.perm, 0o644);
        assert_eq!(stat.size, 42);
        assert!(fs.stat("/missing").unwrap().is_none());

        let names: Vec<String> = fs
            .list_dir(InodeNumber(DOCS_INO))
            .unwrap()
            .iter()
            .map(Ext2DirEntry::name_str)
            .collect();
        assert_eq!(names, vec![".", "..", "guide.txt"]);
        assert!(matches!(
            fs.list_dir(InodeNumber(README_INO)),
            Err(E2wError::Format(_))
        ));
    }

    #[test]
    fn split_path_drops_empty_segments() {
        assert_eq!(split_path("/a//b/").unwrap(), vec!["a", "b"]);
        assert!(split_path("").unwrap().is_empty());
        assert!(split_path("/").unwrap().is_empty());
        assert!(split_path("a").is_err());
    }

    #[test]
    fn resolution_serializes_with_tags() {
        let found = Resolution::Found {
            ino: InodeNumber(12),
        };
        let json = serde_json::to_value(&found).unwrap();
        assert_eq!(json["status"], "found");
        let miss = Resolution::NotFound {
            miss: MissReason::RootPath,
        };
        let json = serde_json::to_value(&miss).unwrap();
        assert_eq!(json["miss"]["reason"], "root_path");
    }

    #[test]
    fn open_image_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<OpenImage<'static>>();
        assert_send_sync::<Resolution>();
    }

    #[test]
    fn parse_to_e2w_error_mappings() {
        let e = parse_to_e2w_error(
            &ParseError::InsufficientData {
                needed: 128,
                offset: 4096,
                actual: 0,
            },
            4096,
        );
        assert!(matches!(
            e,
            E2wError::OutOfRange {
                offset: 4096,
                len: 128,
                image_len: 4096
            }
        ));

        let e = parse_to_e2w_error(
            &ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "block size exceeds 64 KiB",
            },
            0,
        );
        assert!(matches!(e, E2wError::InvalidGeometry(_)));

        let e = parse_to_e2w_error(
            &ParseError::InvalidField {
                field: "s_rev_level",
                reason: "unknown revision level",
            },
            0,
        );
        assert!(matches!(e, E2wError::Format(_)));

        let e = parse_to_e2w_error(
            &ParseError::InvalidMagic {
                expected: 0xEF53,
                actual: 0,
            },
            0,
        );
        assert!(matches!(e, E2wError::Format(_)));

        let e = parse_to_e2w_error(
            &ParseError::InodeOutOfRange {
                ino: 0,
                inodes_count: 32,
            },
            0,
        );
        assert!(matches!(e, E2wError::InvalidInode { ino: 0, .. }));

        let e = parse_to_e2w_error(
            &ParseError::IntegerConversion {
                field: "byte_offset",
            },
            0,
        );
        assert!(matches!(
            e,
            E2wError::OutOfRange {
                offset: usize::MAX,
                image_len: 0,
                ..
            }
        ));
    }

    #[test]
    fn offset_overflow_is_out_of_range() {
        let e = parse_to_e2w_error(
            &ParseError::InvalidField {
                field: "byte_offset",
                reason: "overflow computing record offset",
            },
            2048,
        );
        assert!(matches!(
            e,
            E2wError::OutOfRange {
                offset: usize::MAX,
                len: 0,
                image_len: 2048
            }
        ));
        assert!(e.is_image_damage());

        let e = parse_to_e2w_error(
            &ParseError::InvalidField {
                field: "offset",
                reason: "overflow",
            },
            2048,
        );
        assert!(matches!(e, E2wError::OutOfRange { image_len: 2048, .. }));
    }
}
