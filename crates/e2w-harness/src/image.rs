#![forbid(unsafe_code)]

//! Synthetic single-group ext2 images.
//!
//! Layout produced by [`ImageBuilder::build`]:
//!
//! | Block | Contents |
//! |-------|----------|
//! | 0 | boot block (1 KiB blocks) / boot + superblock (larger blocks) |
//! | 1 | superblock (1 KiB blocks only) |
//! | `gd` | group descriptor table (`1024 / block_size + 1`) |
//! | `gd + 1` | block bitmap |
//! | `gd + 2` | inode bitmap |
//! | `gd + 3 ..` | inode table |
//! | after table | one data block per directory or non-empty file |

use anyhow::{Result, bail, ensure};
use e2w::InodeNumber;
use e2w_types::{
    EXT2_DIR_ENTRY_HEADER_LEN, EXT2_FEATURE_INCOMPAT_FILETYPE, EXT2_GOOD_OLD_INODE_SIZE,
    EXT2_GOOD_OLD_REV, EXT2_MIN_BLOCK_SIZE, EXT2_NAME_LEN, EXT2_SUPER_MAGIC,
    EXT2_SUPERBLOCK_OFFSET, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG,
};
use std::collections::BTreeMap;

const FIRST_USER_INO: u32 = 11;

/// File type byte written into directory entries.
pub const FT_REG_FILE: u8 = 1;
pub const FT_DIR: u8 = 2;
pub const FT_SYMLINK: u8 = 7;

#[derive(Debug, Clone)]
struct RawEntry {
    inode: u32,
    file_type: u8,
    name: Vec<u8>,
}

#[derive(Debug, Clone)]
struct PendingInode {
    mode: u16,
    links: u16,
    contents: Vec<u8>,
    /// Directory entries, in on-disk order. Empty for non-directories.
    entries: Vec<RawEntry>,
}

impl PendingInode {
    fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    fn needs_block(&self) -> bool {
        self.is_dir() || (self.mode & S_IFMT == S_IFREG && !self.contents.is_empty())
    }
}

/// Builder for a small ext2 image with a single block group.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    block_size: u32,
    inodes_count: u32,
    rev_level: u32,
    inode_size: u16,
    volume_name: String,
    inodes: BTreeMap<u32, PendingInode>,
    next_ino: u32,
}

impl ImageBuilder {
    /// Start an image with `block_size`-byte blocks and an empty root.
    #[must_use]
    pub fn new(block_size: u32) -> Self {
        let mut inodes = BTreeMap::new();
        inodes.insert(
            InodeNumber::ROOT.0,
            PendingInode {
                mode: S_IFDIR | 0o755,
                links: 2,
                contents: Vec::new(),
                entries: vec![
                    RawEntry {
                        inode: InodeNumber::ROOT.0,
                        file_type: FT_DIR,
                        name: b".".to_vec(),
                    },
                    RawEntry {
                        inode: InodeNumber::ROOT.0,
                        file_type: FT_DIR,
                        name: b"..".to_vec(),
                    },
                ],
            },
        );
        Self {
            block_size,
            inodes_count: 32,
            rev_level: 1,
            inode_size: EXT2_GOOD_OLD_INODE_SIZE,
            volume_name: String::from("e2w-test"),
            inodes,
            next_ino: FIRST_USER_INO,
        }
    }

    #[must_use]
    pub fn inodes_count(mut self, inodes_count: u32) -> Self {
        self.inodes_count = inodes_count;
        self
    }

    /// Revision 0 images ignore `inode_size` and use 128-byte records.
    #[must_use]
    pub fn rev_level(mut self, rev_level: u32) -> Self {
        self.rev_level = rev_level;
        self
    }

    #[must_use]
    pub fn inode_size(mut self, inode_size: u16) -> Self {
        self.inode_size = inode_size;
        self
    }

    #[must_use]
    pub fn volume_name(mut self, name: &str) -> Self {
        self.volume_name = name.to_owned();
        self
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    fn alloc_inode(&mut self, node: PendingInode) -> Result<InodeNumber> {
        let ino = self.next_ino;
        ensure!(
            ino <= self.inodes_count,
            "inode table full ({} inodes)",
            self.inodes_count
        );
        self.next_ino += 1;
        self.inodes.insert(ino, node);
        Ok(InodeNumber(ino))
    }

    fn dir_mut(&mut self, dir: InodeNumber) -> Result<&mut PendingInode> {
        match self.inodes.get_mut(&dir.0) {
            Some(node) if node.is_dir() => Ok(node),
            Some(_) => bail!("inode {dir} is not a directory"),
            None => bail!("inode {dir} does not exist"),
        }
    }

    /// Append a raw entry to `parent` without allocating an inode.
    ///
    /// Use it for hard links, duplicate names and dangling entries.
    pub fn link(
        &mut self,
        parent: InodeNumber,
        name: &str,
        target: u32,
        file_type: u8,
    ) -> Result<()> {
        ensure!(
            !name.is_empty() && name.len() <= EXT2_NAME_LEN,
            "bad name {name:?}"
        );
        self.dir_mut(parent)?.entries.push(RawEntry {
            inode: target,
            file_type,
            name: name.as_bytes().to_vec(),
        });
        Ok(())
    }

    /// Append an unused (inode 0) record named `name` to `parent`.
    pub fn add_deleted_entry(&mut self, parent: InodeNumber, name: &str) -> Result<()> {
        self.link(parent, name, 0, FT_REG_FILE)
    }

    pub fn mkdir(&mut self, parent: InodeNumber, name: &str) -> Result<InodeNumber> {
        self.dir_mut(parent)?;
        let ino = self.alloc_inode(PendingInode {
            mode: S_IFDIR | 0o755,
            links: 2,
            contents: Vec::new(),
            entries: Vec::new(),
        })?;
        if let Some(node) = self.inodes.get_mut(&ino.0) {
            node.entries = vec![
                RawEntry {
                    inode: ino.0,
                    file_type: FT_DIR,
                    name: b".".to_vec(),
                },
                RawEntry {
                    inode: parent.0,
                    file_type: FT_DIR,
                    name: b"..".to_vec(),
                },
            ];
        }
        self.link(parent, name, ino.0, FT_DIR)?;
        self.dir_mut(parent)?.links += 1;
        Ok(ino)
    }

    /// Create a regular file. Contents must fit in one block.
    pub fn create_file(
        &mut self,
        parent: InodeNumber,
        name: &str,
        contents: &[u8],
    ) -> Result<InodeNumber> {
        ensure!(
            contents.len() <= self.block_size as usize,
            "file contents larger than one block"
        );
        self.dir_mut(parent)?;
        let ino = self.alloc_inode(PendingInode {
            mode: S_IFREG | 0o644,
            links: 1,
            contents: contents.to_vec(),
            entries: Vec::new(),
        })?;
        self.link(parent, name, ino.0, FT_REG_FILE)?;
        Ok(ino)
    }

    /// Create a fast symlink (target stored in `i_block`).
    pub fn symlink(&mut self, parent: InodeNumber, name: &str, target: &str) -> Result<InodeNumber> {
        ensure!(target.len() <= 60, "fast symlink target longer than 60 bytes");
        self.dir_mut(parent)?;
        let ino = self.alloc_inode(PendingInode {
            mode: S_IFLNK | 0o777,
            links: 1,
            contents: target.as_bytes().to_vec(),
            entries: Vec::new(),
        })?;
        self.link(parent, name, ino.0, FT_SYMLINK)?;
        Ok(ino)
    }

    fn record_size(&self) -> u32 {
        if self.rev_level == EXT2_GOOD_OLD_REV {
            u32::from(EXT2_GOOD_OLD_INODE_SIZE)
        } else {
            u32::from(self.inode_size)
        }
    }

    /// Good-old revision images carry no FILETYPE feature.
    fn has_filetype(&self) -> bool {
        self.rev_level != EXT2_GOOD_OLD_REV
    }

    /// Serialize the image.
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(&self) -> Result<Vec<u8>> {
        let bs = self.block_size;
        ensure!(
            bs.is_power_of_two() && (EXT2_MIN_BLOCK_SIZE..=65536).contains(&bs),
            "unsupported block size {bs}"
        );
        let bsz = bs as usize;

        let gd_block = EXT2_MIN_BLOCK_SIZE / bs + 1;
        let block_bitmap = gd_block + 1;
        let inode_bitmap = gd_block + 2;
        let inode_table = gd_block + 3;
        let table_blocks = (self.inodes_count * self.record_size()).div_ceil(bs);
        let first_data = inode_table + table_blocks;

        // Assign one data block per inode that needs one, in inode order.
        let mut data_blocks = BTreeMap::new();
        let mut next_block = first_data;
        for (&ino, node) in &self.inodes {
            if node.needs_block() {
                data_blocks.insert(ino, next_block);
                next_block += 1;
            }
        }
        let blocks_count = next_block;
        ensure!(blocks_count <= bs * 8, "image exceeds one block group");

        let mut image = vec![0_u8; blocks_count as usize * bsz];

        // Superblock.
        let used_dirs = self.inodes.values().filter(|s| s.is_dir()).count() as u16;
        let free_inodes = self.inodes_count.saturating_sub(self.next_ino - 1);
        let sb = EXT2_SUPERBLOCK_OFFSET;
        put_u32(&mut image, sb, self.inodes_count);
        put_u32(&mut image, sb + 0x04, blocks_count);
        put_u32(&mut image, sb + 0x0C, 0);
        put_u32(&mut image, sb + 0x10, free_inodes);
        put_u32(&mut image, sb + 0x14, u32::from(bs == EXT2_MIN_BLOCK_SIZE));
        put_u32(&mut image, sb + 0x18, bs.trailing_zeros() - 10);
        put_u32(&mut image, sb + 0x1C, bs.trailing_zeros() - 10);
        put_u32(&mut image, sb + 0x20, bs * 8);
        put_u32(&mut image, sb + 0x24, bs * 8);
        put_u32(&mut image, sb + 0x28, self.inodes_count);
        put_u16(&mut image, sb + 0x36, u16::MAX);
        put_u16(&mut image, sb + 0x38, EXT2_SUPER_MAGIC);
        put_u16(&mut image, sb + 0x3A, 1);
        put_u16(&mut image, sb + 0x3C, 1);
        put_u32(&mut image, sb + 0x4C, self.rev_level);
        if self.rev_level != EXT2_GOOD_OLD_REV {
            put_u32(&mut image, sb + 0x54, FIRST_USER_INO);
            put_u16(&mut image, sb + 0x58, self.inode_size);
            put_u32(&mut image, sb + 0x60, EXT2_FEATURE_INCOMPAT_FILETYPE);
        }
        let name = self.volume_name.as_bytes();
        let name_len = name.len().min(16);
        image[sb + 0x78..sb + 0x78 + name_len].copy_from_slice(&name[..name_len]);

        // Group descriptor 0.
        let gd = gd_block as usize * bsz;
        put_u32(&mut image, gd, block_bitmap);
        put_u32(&mut image, gd + 0x04, inode_bitmap);
        put_u32(&mut image, gd + 0x08, inode_table);
        put_u16(&mut image, gd + 0x0E, free_inodes as u16);
        put_u16(&mut image, gd + 0x10, used_dirs);

        // Bitmaps: every block up to blocks_count and every inode below next_ino.
        let first_data_block = u32::from(bs == EXT2_MIN_BLOCK_SIZE);
        let bb = block_bitmap as usize * bsz;
        for block in first_data_block..blocks_count {
            set_bit(&mut image[bb..bb + bsz], (block - first_data_block) as usize);
        }
        let ib = inode_bitmap as usize * bsz;
        for ino in 1..self.next_ino {
            set_bit(&mut image[ib..ib + bsz], (ino - 1) as usize);
        }

        // Inode table and data blocks.
        let table = inode_table as usize * bsz;
        let record = self.record_size() as usize;
        for (&ino, node) in &self.inodes {
            let off = table + (ino as usize - 1) * record;
            put_u16(&mut image, off, node.mode);
            put_u16(&mut image, off + 0x1A, node.links);

            if let Some(&block) = data_blocks.get(&ino) {
                let size = if node.is_dir() {
                    bs
                } else {
                    node.contents.len() as u32
                };
                put_u32(&mut image, off + 0x04, size);
                put_u32(&mut image, off + 0x1C, bs / 512);
                put_u32(&mut image, off + 0x28, block);

                let start = block as usize * bsz;
                let data = &mut image[start..start + bsz];
                if node.is_dir() {
                    write_dir_block(data, &node.entries, ino, self.has_filetype())?;
                } else {
                    data[..node.contents.len()].copy_from_slice(&node.contents);
                }
            } else {
                // Fast symlink or empty file: bytes live in i_block.
                put_u32(&mut image, off + 0x04, node.contents.len() as u32);
                image[off + 0x28..off + 0x28 + node.contents.len()].copy_from_slice(&node.contents);
            }
        }

        Ok(image)
    }
}

/// Pack entries into one block; the last record absorbs the slack.
#[allow(clippy::cast_possible_truncation)]
fn write_dir_block(
    block: &mut [u8],
    entries: &[RawEntry],
    ino: u32,
    filetype: bool,
) -> Result<()> {
    let mut offset = 0_usize;
    for (i, entry) in entries.iter().enumerate() {
        let min_len = (EXT2_DIR_ENTRY_HEADER_LEN + entry.name.len()).next_multiple_of(4);
        let rec_len = if i + 1 == entries.len() {
            block.len() - offset
        } else {
            min_len
        };
        ensure!(
            offset + min_len <= block.len(),
            "directory inode {ino} does not fit in one block"
        );
        // 64 KiB blocks store a full-block record length as 65535.
        let on_disk = u16::try_from(rec_len).unwrap_or(u16::MAX);
        put_u32(block, offset, entry.inode);
        put_u16(block, offset + 4, on_disk);
        block[offset + 6] = entry.name.len() as u8;
        if filetype {
            block[offset + 7] = entry.file_type;
        }
        block[offset + 8..offset + 8 + entry.name.len()].copy_from_slice(&entry.name);
        offset += rec_len;
    }
    Ok(())
}

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn set_bit(bitmap: &mut [u8], bit: usize) {
    bitmap[bit / 8] |= 1 << (bit % 8);
}

/// Paths and inode numbers of the tree built by [`demo_image`].
#[derive(Debug, Clone, Copy)]
pub struct DemoTree {
    pub etc: InodeNumber,
    pub passwd: InodeNumber,
    pub docs: InodeNumber,
    pub guide: InodeNumber,
    pub readme: InodeNumber,
    pub link: InodeNumber,
}

/// Build the standard demo tree:
///
/// ```text
/// /
/// ├── etc/
/// │   └── passwd
/// ├── docs/
/// │   ├── <deleted draft.txt>
/// │   └── guide.txt
/// ├── readme.txt
/// └── link -> /etc/passwd
/// ```
pub fn demo_image(block_size: u32) -> Result<(Vec<u8>, DemoTree)> {
    let mut builder = ImageBuilder::new(block_size).volume_name("e2w-demo");
    let root = InodeNumber::ROOT;
    let etc = builder.mkdir(root, "etc")?;
    let passwd = builder.create_file(etc, "passwd", b"root:x:0:0::/root:/bin/sh\n")?;
    let docs = builder.mkdir(root, "docs")?;
    builder.add_deleted_entry(docs, "draft.txt")?;
    let guide = builder.create_file(docs, "guide.txt", b"read the manual\n")?;
    let readme = builder.create_file(root, "readme.txt", b"hello, ext2\n")?;
    let link = builder.symlink(root, "link", "/etc/passwd")?;
    let image = builder.build()?;
    Ok((
        image,
        DemoTree {
            etc,
            passwd,
            docs,
            guide,
            readme,
            link,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use e2w::{Ext2FileType, FileKind, OpenImage};

    #[test]
    fn demo_image_opens_at_all_block_sizes() {
        for bs in [1024, 2048, 4096] {
            let (image, tree) = demo_image(bs).expect("demo image");
            let fs = OpenImage::open(&image).expect("open");
            assert_eq!(fs.block_size().get(), bs);
            assert_eq!(fs.resolve("/etc/passwd").unwrap(), Some(tree.passwd));
            assert_eq!(fs.resolve("/docs/guide.txt").unwrap(), Some(tree.guide));
            assert_eq!(fs.resolve("/docs/draft.txt").unwrap(), None);
        }
    }

    #[test]
    fn superblock_and_descriptor_agree_with_layout() {
        let (image, _) = demo_image(1024).unwrap();
        let fs = OpenImage::open(&image).unwrap();
        let sb = fs.superblock();
        assert_eq!(sb.first_data_block, 1);
        assert_eq!(sb.volume_name, "e2w-demo");
        assert_eq!(sb.group_desc_block().0, 2);
        let gd = fs.first_group_descriptor().unwrap();
        assert_eq!(gd.block_bitmap, 3);
        assert_eq!(gd.inode_bitmap, 4);
        assert_eq!(gd.inode_table, 5);
        assert_eq!(gd.used_dirs_count, 3);
    }

    #[test]
    fn symlink_is_stored_inline() {
        let (image, tree) = demo_image(4096).unwrap();
        let fs = OpenImage::open(&image).unwrap();
        let inode = fs.read_inode(tree.link).unwrap();
        assert!(inode.is_symlink());
        assert_eq!(inode.size, 11);
        let stat = fs.stat("/link").unwrap().unwrap();
        assert_eq!(stat.kind, FileKind::Symlink);
    }

    #[test]
    fn rev0_uses_128_byte_records() {
        let mut builder = ImageBuilder::new(1024).rev_level(0).inode_size(256);
        let file = builder
            .create_file(InodeNumber::ROOT, "a", b"x")
            .unwrap();
        let image = builder.build().unwrap();
        let fs = OpenImage::open(&image).unwrap();
        assert_eq!(fs.superblock().inode_record_size(), 128);
        assert!(!fs.superblock().has_filetype());
        assert_eq!(fs.resolve("/a").unwrap(), Some(file));
        let entries = fs.list_dir(InodeNumber::ROOT).unwrap();
        assert!(
            entries
                .iter()
                .all(|e| e.file_type == Ext2FileType::Unknown)
        );
    }

    #[test]
    fn larger_inode_records() {
        let mut builder = ImageBuilder::new(2048).inode_size(256);
        let dir = builder.mkdir(InodeNumber::ROOT, "d").unwrap();
        let file = builder.create_file(dir, "f", b"data").unwrap();
        let image = builder.build().unwrap();
        assert_eq!(e2w::resolve(&image, "/d/f").unwrap(), Some(file));
    }

    #[test]
    fn full_inode_table_is_an_error() {
        let mut builder = ImageBuilder::new(1024).inodes_count(12);
        builder.mkdir(InodeNumber::ROOT, "a").unwrap();
        builder.mkdir(InodeNumber::ROOT, "b").unwrap();
        assert!(builder.mkdir(InodeNumber::ROOT, "c").is_err());
    }

    #[test]
    fn overfull_directory_is_rejected() {
        let mut builder = ImageBuilder::new(1024).inodes_count(256);
        for i in 0..100 {
            builder
                .create_file(InodeNumber::ROOT, &format!("file-{i:04}"), b"")
                .unwrap();
        }
        assert!(builder.build().is_err());
    }
}
