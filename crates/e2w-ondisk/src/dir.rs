#![forbid(unsafe_code)]

use e2w_types::{
    EXT2_DIR_ENTRY_HEADER_LEN, InodeNumber, ParseError, read_le_u16, read_le_u32, read_u8,
};
use serde::{Deserialize, Serialize};

/// How a directory scan settles on an answer when a name occurs twice.
///
/// A conformant ext2 directory never holds duplicate names, so the two
/// policies only differ on damaged images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPolicy {
    /// Stop at the first live entry whose name matches.
    #[default]
    FirstMatch,
    /// Scan the whole block; the last matching entry wins.
    LastMatch,
}

/// ext2 file type byte from directory entries (FILETYPE feature).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Ext2FileType {
    Unknown = 0,
    RegFile = 1,
    Dir = 2,
    Chrdev = 3,
    Blkdev = 4,
    Fifo = 5,
    Sock = 6,
    Symlink = 7,
}

impl Ext2FileType {
    #[must_use]
    pub fn from_raw(val: u8) -> Self {
        match val {
            1 => Self::RegFile,
            2 => Self::Dir,
            3 => Self::Chrdev,
            4 => Self::Blkdev,
            5 => Self::Fifo,
            6 => Self::Sock,
            7 => Self::Symlink,
            _ => Self::Unknown,
        }
    }

    /// Single-character tag in `ls -l` style.
    #[must_use]
    pub fn tag(self) -> char {
        match self {
            Self::Unknown => '?',
            Self::RegFile => '-',
            Self::Dir => 'd',
            Self::Chrdev => 'c',
            Self::Blkdev => 'b',
            Self::Fifo => 'p',
            Self::Sock => 's',
            Self::Symlink => 'l',
        }
    }
}

/// A parsed ext2 directory entry (`ext2_dir_entry_2`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2DirEntry {
    pub inode: u32,
    pub rec_len: u32,
    pub name_len: u8,
    pub file_type: Ext2FileType,
    pub name: Vec<u8>,
}

impl Ext2DirEntry {
    /// Return the name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    #[must_use]
    pub fn inode_number(&self) -> InodeNumber {
        InodeNumber(self.inode)
    }

    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name == b"."
    }

    #[must_use]
    pub fn is_dotdot(&self) -> bool {
        self.name == b".."
    }
}

/// A borrowed directory entry (zero-copy reference into the block buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ext2DirEntryRef<'a> {
    pub inode: u32,
    pub rec_len: u32,
    pub name_len: u8,
    pub file_type: Ext2FileType,
    pub name: &'a [u8],
}

impl Ext2DirEntryRef<'_> {
    #[must_use]
    pub fn to_owned(&self) -> Ext2DirEntry {
        Ext2DirEntry {
            inode: self.inode,
            rec_len: self.rec_len,
            name_len: self.name_len,
            file_type: self.file_type,
            name: self.name.to_vec(),
        }
    }

    /// Exact match: same length and same bytes, no case folding.
    #[must_use]
    pub fn name_matches(&self, target: &[u8]) -> bool {
        usize::from(self.name_len) == target.len() && self.name == target
    }
}

/// Decode `rec_len` from its on-disk value.
///
/// 64 KiB blocks cannot store a full-block record length in 16 bits; the
/// kernel writes 65535 instead, which decodes to 65536 only for that block
/// size. Zero stays zero so the scanner can reject it.
fn rec_len_from_disk(raw: u16, block_len: usize) -> u32 {
    if raw == u16::MAX && block_len == 65536 {
        65536
    } else {
        u32::from(raw)
    }
}

/// Iterator over the live entries of one directory block.
///
/// Deleted entries (inode 0) are skipped but still advance the cursor by
/// their own `rec_len`. A malformed record ends the iteration with a single
/// `ParseError::CorruptDirEntry`.
///
/// Byte 7 of a record is the file type only on images with the FILETYPE
/// feature. Without it the name length is 16 bits wide and byte 7 is its
/// high byte, which must be zero for a name of at most 255 bytes.
pub struct DirBlockIter<'a> {
    block: &'a [u8],
    block_no: u32,
    offset: usize,
    filetype: bool,
    done: bool,
}

impl<'a> DirBlockIter<'a> {
    /// `block_no` is only used to label corruption errors.
    #[must_use]
    pub fn new(block: &'a [u8], block_no: u32) -> Self {
        Self {
            block,
            block_no,
            offset: 0,
            filetype: true,
            done: false,
        }
    }

    /// Whether records carry a file type byte (`EXT2_FEATURE_INCOMPAT_FILETYPE`).
    #[must_use]
    pub fn with_filetype(mut self, filetype: bool) -> Self {
        self.filetype = filetype;
        self
    }

    /// Find `name` among the remaining live entries.
    ///
    /// Malformed records fail the scan even after a match when the policy
    /// keeps scanning.
    pub fn find_name(
        self,
        name: &[u8],
        policy: ScanPolicy,
    ) -> Result<Option<InodeNumber>, ParseError> {
        let mut found = None;
        for entry in self {
            let entry = entry?;
            if entry.name_matches(name) {
                found = Some(InodeNumber(entry.inode));
                if policy == ScanPolicy::FirstMatch {
                    break;
                }
            }
        }
        Ok(found)
    }

    fn corrupt(&mut self, field: &'static str, reason: &'static str) -> ParseError {
        self.done = true;
        ParseError::CorruptDirEntry {
            block: self.block_no,
            offset: self.offset,
            field,
            reason,
        }
    }

    fn read_header(&self) -> Result<(u32, u32, u8, u8), ParseError> {
        let inode = read_le_u32(self.block, self.offset)?;
        let rec_len = rec_len_from_disk(read_le_u16(self.block, self.offset + 4)?, self.block.len());
        let name_len = read_u8(self.block, self.offset + 6)?;
        let type_or_len_hi = read_u8(self.block, self.offset + 7)?;
        Ok((inode, rec_len, name_len, type_or_len_hi))
    }
}

impl<'a> Iterator for DirBlockIter<'a> {
    type Item = Result<Ext2DirEntryRef<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.offset >= self.block.len() {
                return None;
            }

            let header_end = self.offset + EXT2_DIR_ENTRY_HEADER_LEN;
            if header_end > self.block.len() {
                return Some(Err(
                    self.corrupt("de_header", "record header crosses block boundary")
                ));
            }

            let (inode, rec_len, name_len, type_or_len_hi) = match self.read_header() {
                Ok(header) => header,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if rec_len == 0 {
                return Some(Err(self.corrupt("de_rec_len", "rec_len is zero")));
            }
            if (rec_len as usize) < EXT2_DIR_ENTRY_HEADER_LEN {
                return Some(Err(
                    self.corrupt("de_rec_len", "rec_len shorter than record header")
                ));
            }

            let entry_end = self.offset + rec_len as usize;
            if entry_end > self.block.len() {
                return Some(Err(
                    self.corrupt("de_rec_len", "record crosses block boundary")
                ));
            }

            if inode == 0 {
                self.offset = entry_end;
                continue;
            }

            if !self.filetype && type_or_len_hi != 0 {
                return Some(Err(self.corrupt("de_name_len", "name longer than 255 bytes")));
            }
            let name_end = header_end + usize::from(name_len);
            if name_end > entry_end {
                return Some(Err(self.corrupt("de_name_len", "name extends past rec_len")));
            }

            let entry = Ext2DirEntryRef {
                inode,
                rec_len,
                name_len,
                file_type: if self.filetype {
                    Ext2FileType::from_raw(type_or_len_hi)
                } else {
                    Ext2FileType::Unknown
                },
                name: &self.block[header_end..name_end],
            };
            self.offset = entry_end;
            return Some(Ok(entry));
        }
    }
}

/// Create an iterator over the live entries of a directory block.
#[must_use]
pub fn iter_dir_block(block: &[u8], block_no: u32) -> DirBlockIter<'_> {
    DirBlockIter::new(block, block_no)
}

/// Parse all live entries of a directory block.
pub fn parse_dir_block(block: &[u8], block_no: u32) -> Result<Vec<Ext2DirEntry>, ParseError> {
    iter_dir_block(block, block_no)
        .map(|entry| entry.map(|e| e.to_owned()))
        .collect()
}

/// Find `name` among the live entries of a directory block.
///
/// Returns the matching inode number, or `None` when the block holds no
/// such entry.
pub fn scan_dir_block(
    block: &[u8],
    block_no: u32,
    name: &[u8],
    policy: ScanPolicy,
) -> Result<Option<InodeNumber>, ParseError> {
    iter_dir_block(block, block_no).find_name(name, policy)
}
