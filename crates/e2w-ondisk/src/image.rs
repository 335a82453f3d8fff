#![forbid(unsafe_code)]

use e2w_types::{BlockNumber, BlockSize, ByteOffset, ParseError, ensure_slice};

/// Byte offset of `block` for an image with `block_size`-byte blocks.
///
/// Block 0 starts at the beginning of the image.
#[must_use]
pub fn block_offset(block_size: BlockSize, block: BlockNumber) -> ByteOffset {
    block_size.block_to_byte(block)
}

/// Borrowed, bounds-checked view over a filesystem image.
///
/// The view never copies the image. Every accessor validates
/// `offset + len <= image.len()` and reports `ParseError::InsufficientData`
/// instead of reading past the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageView<'a> {
    bytes: &'a [u8],
}

impl<'a> ImageView<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Borrow `len` bytes starting at byte `offset`.
    pub fn slice(&self, offset: ByteOffset, len: usize) -> Result<&'a [u8], ParseError> {
        let start = offset.to_usize()?;
        ensure_slice(self.bytes, start, len)
    }

    /// Borrow `len` bytes at `within` bytes past the start of `block`.
    pub fn slice_in_block(
        &self,
        block_size: BlockSize,
        block: BlockNumber,
        within: u64,
        len: usize,
    ) -> Result<&'a [u8], ParseError> {
        let offset =
            block_offset(block_size, block)
                .checked_add(within)
                .ok_or(ParseError::InvalidField {
                    field: "byte_offset",
                    reason: "overflow computing record offset",
                })?;
        self.slice(offset, len)
    }

    /// Borrow one whole block.
    pub fn block(&self, block_size: BlockSize, block: BlockNumber) -> Result<&'a [u8], ParseError> {
        self.slice(block_offset(block_size, block), block_size.as_usize())
    }
}

impl<'a> From<&'a [u8]> for ImageView<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for ImageView<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Self::new(bytes.as_slice())
    }
}
