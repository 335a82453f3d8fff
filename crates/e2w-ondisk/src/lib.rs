#![forbid(unsafe_code)]
//! On-disk format parsing for ext2 structures.
//!
//! Pure parsing crate: no I/O, no logging. Decodes byte slices of an
//! in-memory image into the superblock, the first group descriptor, inode
//! records and directory blocks. Every read is bounds-checked against the
//! image and fails with a `ParseError` instead of panicking.

pub mod dir;
pub mod ext2;
pub mod image;

pub use dir::{
    DirBlockIter, Ext2DirEntry, Ext2DirEntryRef, Ext2FileType, ScanPolicy, iter_dir_block,
    parse_dir_block, scan_dir_block,
};
pub use ext2::{
    Ext2GroupDesc, Ext2ImageReader, Ext2Inode, Ext2Superblock, block_size, find_entry,
    first_group_descriptor, read_inode, read_superblock,
};
pub use image::{ImageView, block_offset};
