#![forbid(unsafe_code)]

use crate::dir::{Ext2DirEntry, ScanPolicy, iter_dir_block};
use crate::image::{ImageView, block_offset};
use e2w_types::{
    BlockNumber, BlockSize, ByteOffset, EXT2_DYNAMIC_REV, EXT2_FEATURE_INCOMPAT_FILETYPE,
    EXT2_GOOD_OLD_INODE_SIZE, EXT2_GOOD_OLD_REV, EXT2_GROUP_DESC_SIZE, EXT2_MIN_BLOCK_SIZE,
    EXT2_N_BLOCKS, EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE, InodeNumber,
    ParseError, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG, ensure_slice, read_fixed, read_le_u16,
    read_le_u32, trim_nul_padded,
};
use serde::{Deserialize, Serialize};

/// First non-reserved inode on revision 0 images.
const EXT2_GOOD_OLD_FIRST_INO: u32 = 11;

// ── Superblock ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Superblock {
    // ── Core geometry ────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,

    // ── Identity ─────────────────────────────────────────────────────────
    pub magic: u16,
    pub uuid: [u8; 16],
    pub volume_name: String,
    pub last_mounted: String,

    // ── Revision & OS ────────────────────────────────────────────────────
    pub rev_level: u32,
    pub minor_rev_level: u16,
    pub creator_os: u32,

    // ── Dynamic revision fields ──────────────────────────────────────────
    pub first_ino: u32,
    pub inode_size: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,

    // ── State ────────────────────────────────────────────────────────────
    pub state: u16,
    pub errors: u16,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub mtime: u32,
    pub wtime: u32,
}

impl Ext2Superblock {
    /// Parse an ext2 superblock from a 1024-byte superblock region.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < EXT2_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u16(region, 0x38)?;
        if magic != EXT2_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(EXT2_SUPER_MAGIC),
                actual: u64::from(magic),
            });
        }

        let log_block_size = read_le_u32(region, 0x18)?;
        let block_size = BlockSize::from_log(log_block_size)?.get();

        Ok(Self {
            inodes_count: read_le_u32(region, 0x00)?,
            blocks_count: read_le_u32(region, 0x04)?,
            reserved_blocks_count: read_le_u32(region, 0x08)?,
            free_blocks_count: read_le_u32(region, 0x0C)?,
            free_inodes_count: read_le_u32(region, 0x10)?,
            first_data_block: read_le_u32(region, 0x14)?,
            log_block_size,
            block_size,
            blocks_per_group: read_le_u32(region, 0x20)?,
            inodes_per_group: read_le_u32(region, 0x28)?,

            magic,
            uuid: read_fixed::<16>(region, 0x68)?,
            volume_name: trim_nul_padded(&read_fixed::<16>(region, 0x78)?),
            last_mounted: trim_nul_padded(&read_fixed::<64>(region, 0x88)?),

            rev_level: read_le_u32(region, 0x4C)?,
            minor_rev_level: read_le_u16(region, 0x3E)?,
            creator_os: read_le_u32(region, 0x48)?,

            first_ino: read_le_u32(region, 0x54)?,
            inode_size: read_le_u16(region, 0x58)?,
            feature_compat: read_le_u32(region, 0x5C)?,
            feature_incompat: read_le_u32(region, 0x60)?,
            feature_ro_compat: read_le_u32(region, 0x64)?,

            state: read_le_u16(region, 0x3A)?,
            errors: read_le_u16(region, 0x3C)?,
            mnt_count: read_le_u16(region, 0x34)?,
            max_mnt_count: read_le_u16(region, 0x36)?,
            mtime: read_le_u32(region, 0x2C)?,
            wtime: read_le_u32(region, 0x30)?,
        })
    }

    /// Parse the superblock at its fixed offset in a full image.
    ///
    /// Uses the literal 1024-byte offset: the block size is not known yet.
    pub fn parse_from_image(image: &[u8]) -> Result<Self, ParseError> {
        let region = ensure_slice(image, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE)?;
        Self::parse_superblock_region(region)
    }

    /// Validated block size. Always succeeds for a parsed superblock.
    pub fn block_size(&self) -> Result<BlockSize, ParseError> {
        BlockSize::new(self.block_size)
    }

    /// Size in bytes of one inode table record.
    ///
    /// Revision 0 images always use 128-byte records; dynamic revision
    /// images store the size in `s_inode_size`.
    #[must_use]
    pub fn inode_record_size(&self) -> u16 {
        if self.rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_INODE_SIZE
        } else {
            self.inode_size
        }
    }

    /// First inode number available to regular files.
    #[must_use]
    pub fn first_non_reserved_ino(&self) -> u32 {
        if self.rev_level == EXT2_GOOD_OLD_REV {
            EXT2_GOOD_OLD_FIRST_INO
        } else {
            self.first_ino
        }
    }

    /// Whether directory entries carry a file type byte.
    #[must_use]
    pub fn has_filetype(&self) -> bool {
        self.rev_level >= EXT2_DYNAMIC_REV
            && (self.feature_incompat & EXT2_FEATURE_INCOMPAT_FILETYPE) != 0
    }

    /// Block holding the (single) group descriptor table.
    ///
    /// It is the block right after the one containing the superblock:
    /// block 2 for 1 KiB blocks, block 1 for anything larger.
    #[must_use]
    pub fn group_desc_block(&self) -> BlockNumber {
        BlockNumber(EXT2_MIN_BLOCK_SIZE / self.block_size + 1)
    }

    /// Validate the geometry this reader relies on.
    ///
    /// Checks the revision, the inode record size, the first data block and
    /// the single-group layout assumption.
    pub fn validate_geometry(&self) -> Result<(), ParseError> {
        if self.rev_level > EXT2_DYNAMIC_REV {
            return Err(ParseError::InvalidField {
                field: "s_rev_level",
                reason: "unknown revision level",
            });
        }

        let expected_first_data_block = u32::from(self.block_size == EXT2_MIN_BLOCK_SIZE);
        if self.first_data_block != expected_first_data_block {
            return Err(ParseError::InvalidField {
                field: "s_first_data_block",
                reason: "must be 1 for 1 KiB blocks and 0 otherwise",
            });
        }

        let inode_size = self.inode_record_size();
        if inode_size < EXT2_GOOD_OLD_INODE_SIZE
            || !inode_size.is_power_of_two()
            || u32::from(inode_size) > self.block_size
        {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "must be a power of two between 128 and block_size",
            });
        }

        if self.inodes_count == 0 {
            return Err(ParseError::InvalidField {
                field: "s_inodes_count",
                reason: "must be non-zero",
            });
        }
        if self.inodes_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_inodes_per_group",
                reason: "must be non-zero",
            });
        }
        if self.inodes_count > self.inodes_per_group {
            return Err(ParseError::InvalidField {
                field: "s_inodes_per_group",
                reason: "image has more than one block group",
            });
        }

        Ok(())
    }
}

// ── Group descriptor ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl Ext2GroupDesc {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EXT2_GROUP_DESC_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_GROUP_DESC_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            block_bitmap: read_le_u32(bytes, 0x00)?,
            inode_bitmap: read_le_u32(bytes, 0x04)?,
            inode_table: read_le_u32(bytes, 0x08)?,
            free_blocks_count: read_le_u16(bytes, 0x0C)?,
            free_inodes_count: read_le_u16(bytes, 0x0E)?,
            used_dirs_count: read_le_u16(bytes, 0x10)?,
        })
    }

    #[must_use]
    pub fn inode_table_block(&self) -> BlockNumber {
        BlockNumber(self.inode_table)
    }
}

// ── Inode ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Inode {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub links_count: u16,
    /// Allocated 512-byte sectors.
    pub blocks: u32,
    pub flags: u32,
    pub generation: u32,
    pub file_acl: u32,

    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,

    /// `i_block`: 12 direct pointers followed by the indirect slots.
    pub block: [u32; EXT2_N_BLOCKS],
}

impl Ext2Inode {
    /// Parse an ext2 inode from the first 128 bytes of its record.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let base = usize::from(EXT2_GOOD_OLD_INODE_SIZE);
        if bytes.len() < base {
            return Err(ParseError::InsufficientData {
                needed: base,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mut block = [0_u32; EXT2_N_BLOCKS];
        for (i, slot) in block.iter_mut().enumerate() {
            *slot = read_le_u32(bytes, 0x28 + i * 4)?;
        }

        let mode = read_le_u16(bytes, 0x00)?;
        let size_lo = u64::from(read_le_u32(bytes, 0x04)?);
        // i_size_high only extends regular files; directories reuse it as i_dir_acl.
        let size_hi = if mode & S_IFMT == S_IFREG {
            u64::from(read_le_u32(bytes, 0x6C)?)
        } else {
            0
        };

        let uid_lo = u32::from(read_le_u16(bytes, 0x02)?);
        let gid_lo = u32::from(read_le_u16(bytes, 0x18)?);
        let uid_hi = u32::from(read_le_u16(bytes, 0x78)?);
        let gid_hi = u32::from(read_le_u16(bytes, 0x7A)?);

        Ok(Self {
            mode,
            uid: uid_lo | (uid_hi << 16),
            gid: gid_lo | (gid_hi << 16),
            size: size_lo | (size_hi << 32),
            links_count: read_le_u16(bytes, 0x1A)?,
            blocks: read_le_u32(bytes, 0x1C)?,
            flags: read_le_u32(bytes, 0x20)?,
            generation: read_le_u32(bytes, 0x64)?,
            file_acl: read_le_u32(bytes, 0x68)?,

            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,
            dtime: read_le_u32(bytes, 0x14)?,

            block,
        })
    }

    /// Extract the file type bits from the mode field.
    #[must_use]
    pub fn file_type_mode(&self) -> u16 {
        self.mode & S_IFMT
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type_mode() == S_IFDIR
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.file_type_mode() == S_IFREG
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.file_type_mode() == S_IFLNK
    }

    /// Permission bits (lower 12 bits of mode).
    #[must_use]
    pub fn permission_bits(&self) -> u16 {
        self.mode & 0o7777
    }

    /// First direct data block (`i_block[0]`).
    #[must_use]
    pub fn first_block(&self) -> BlockNumber {
        BlockNumber(self.block[0])
    }
}

// ── High-level image reader ─────────────────────────────────────────────────

/// Parsed context for reading ext2 structures from an image.
///
/// Caches the superblock so that repeated lookups do not re-derive the block
/// size. The free functions at the bottom of this module re-parse it on
/// every call instead.
#[derive(Debug, Clone)]
pub struct Ext2ImageReader {
    pub sb: Ext2Superblock,
    pub scan_policy: ScanPolicy,
    block_size: BlockSize,
}

impl Ext2ImageReader {
    /// Create a reader by parsing the superblock from `image`.
    pub fn new(image: &[u8]) -> Result<Self, ParseError> {
        let sb = Ext2Superblock::parse_from_image(image)?;
        let block_size = sb.block_size()?;
        Ok(Self {
            sb,
            scan_policy: ScanPolicy::default(),
            block_size,
        })
    }

    #[must_use]
    pub fn with_scan_policy(mut self, scan_policy: ScanPolicy) -> Self {
        self.scan_policy = scan_policy;
        self
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.block_size
    }

    #[must_use]
    pub fn block_offset(&self, block: BlockNumber) -> ByteOffset {
        block_offset(self.block_size, block)
    }

    /// Read a whole block by number.
    pub fn read_block<'a>(
        &self,
        image: ImageView<'a>,
        block: BlockNumber,
    ) -> Result<&'a [u8], ParseError> {
        image.block(self.block_size, block)
    }

    /// Read descriptor 0 of the group descriptor table.
    pub fn first_group_descriptor(&self, image: ImageView<'_>) -> Result<Ext2GroupDesc, ParseError> {
        let bytes = image.slice(
            self.block_offset(self.sb.group_desc_block()),
            EXT2_GROUP_DESC_SIZE,
        )?;
        Ext2GroupDesc::parse_from_bytes(bytes)
    }

    /// Read an inode by its 1-based number.
    pub fn read_inode(
        &self,
        image: ImageView<'_>,
        ino: InodeNumber,
    ) -> Result<Ext2Inode, ParseError> {
        let Some(index) = ino.table_index().filter(|_| ino.0 <= self.sb.inodes_count) else {
            return Err(ParseError::InodeOutOfRange {
                ino: ino.0,
                inodes_count: self.sb.inodes_count,
            });
        };

        let gd = self.first_group_descriptor(image)?;
        let record_size = self.sb.inode_record_size();
        let within = u64::from(index) * u64::from(record_size);
        let bytes = image.slice_in_block(
            self.block_size,
            gd.inode_table_block(),
            within,
            usize::from(record_size),
        )?;
        Ext2Inode::parse_from_bytes(bytes)
    }

    /// Read the first data block of a directory inode.
    fn first_dir_block<'a>(
        &self,
        image: ImageView<'a>,
        dir: &Ext2Inode,
    ) -> Result<&'a [u8], ParseError> {
        let block = dir.first_block();
        if block.0 == 0 {
            return Err(ParseError::CorruptDirEntry {
                block: 0,
                offset: 0,
                field: "i_block[0]",
                reason: "directory has no data block",
            });
        }
        self.read_block(image, block)
    }

    /// Look up `name` in the first data block of `dir`.
    ///
    /// A non-directory inode is a defined miss (`Ok(None)`), not an error.
    pub fn find_entry(
        &self,
        image: ImageView<'_>,
        dir: &Ext2Inode,
        name: &[u8],
    ) -> Result<Option<InodeNumber>, ParseError> {
        if !dir.is_dir() {
            return Ok(None);
        }
        let block = self.first_dir_block(image, dir)?;
        iter_dir_block(block, dir.block[0])
            .with_filetype(self.sb.has_filetype())
            .find_name(name, self.scan_policy)
    }

    /// List the live entries of the first data block of `dir`.
    pub fn read_dir_block(
        &self,
        image: ImageView<'_>,
        dir: &Ext2Inode,
    ) -> Result<Vec<Ext2DirEntry>, ParseError> {
        if !dir.is_dir() {
            return Err(ParseError::InvalidField {
                field: "i_mode",
                reason: "inode is not a directory",
            });
        }
        let block = self.first_dir_block(image, dir)?;
        iter_dir_block(block, dir.block[0])
            .with_filetype(self.sb.has_filetype())
            .map(|entry| entry.map(|e| e.to_owned()))
            .collect()
    }
}

// ── Layered free-function API ───────────────────────────────────────────────

/// Decode the superblock at byte offset 1024.
pub fn read_superblock(image: &[u8]) -> Result<Ext2Superblock, ParseError> {
    Ext2Superblock::parse_from_image(image)
}

/// Block size of the image: `1024 << s_log_block_size`.
pub fn block_size(image: &[u8]) -> Result<BlockSize, ParseError> {
    read_superblock(image)?.block_size()
}

/// Descriptor 0 of the group descriptor table.
pub fn first_group_descriptor(image: &[u8]) -> Result<Ext2GroupDesc, ParseError> {
    Ext2ImageReader::new(image)?.first_group_descriptor(ImageView::new(image))
}

/// Read an inode by its 1-based number.
pub fn read_inode(image: &[u8], ino: InodeNumber) -> Result<Ext2Inode, ParseError> {
    Ext2ImageReader::new(image)?.read_inode(ImageView::new(image), ino)
}

/// Look up `name` in the first data block of `dir`, first match wins.
pub fn find_entry(
    image: &[u8],
    dir: &Ext2Inode,
    name: &[u8],
) -> Result<Option<InodeNumber>, ParseError> {
    Ext2ImageReader::new(image)?.find_entry(ImageView::new(image), dir, name)
}
