#![forbid(unsafe_code)]
//! Shared vocabulary types for ChronoFS.
//!
//! Geometry constants, unit-carrying index newtypes, and the little-endian
//! byte-parsing helpers used by the on-disk codec.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Bytes of payload per block.
pub const BLOCK_SIZE: usize = 4096;

/// Number of inode slots in the metadata table.
pub const MAX_FILES: usize = 16;

/// Maximum filename length in bytes, including the trailing NUL of the
/// on-disk representation.
pub const MAX_FILENAME_LENGTH: usize = 64;

/// Index of a block within the block array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockIndex(pub u32);

impl BlockIndex {
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Index of an inode slot within the inode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeIndex(pub u32);

impl InodeIndex {
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Open-file handle: an index into the runtime descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fd(pub u32);

impl Fd {
    #[must_use]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// 1-based version number within a single file's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionNumber(pub u32);

impl fmt::Display for BlockIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated image geometry: logical capacity and derived block count.
///
/// Images created with different `(disk_size, BLOCK_SIZE, MAX_FILES)` tuples
/// are incompatible; the geometry must match between open and close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    disk_size: u64,
    total_blocks: u32,
}

impl Geometry {
    /// Derive geometry from a logical capacity in bytes.
    ///
    /// The capacity must hold at least one block; the trailing partial block
    /// of a non-multiple capacity is unusable and ignored.
    pub fn new(disk_size: u64) -> Result<Self, ParseError> {
        let total = disk_size / BLOCK_SIZE as u64;
        if total == 0 {
            return Err(ParseError::InvalidField {
                field: "disk_size",
                reason: "capacity smaller than one block",
            });
        }
        let total_blocks = u32::try_from(total).map_err(|_| ParseError::IntegerConversion {
            field: "total_blocks",
        })?;
        Ok(Self {
            disk_size,
            total_blocks,
        })
    }

    #[must_use]
    pub fn disk_size(self) -> u64 {
        self.disk_size
    }

    #[must_use]
    pub fn total_blocks(self) -> u32 {
        self.total_blocks
    }

    /// Whether `block` addresses a slot inside this image.
    #[must_use]
    pub fn contains(self, block: BlockIndex) -> bool {
        block.0 < self.total_blocks
    }

    /// Number of blocks needed to hold `bytes` of content.
    #[must_use]
    pub fn blocks_for(self, bytes: u64) -> u64 {
        bytes.div_ceil(BLOCK_SIZE as u64)
    }
}

/// Structural errors raised while decoding an image file.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

/// Decode a NUL-padded fixed-width name buffer into a `String`.
///
/// The bytes before the first NUL must be valid UTF-8.
pub fn decode_nul_padded_name(bytes: &[u8]) -> Result<String, ParseError> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end])
        .map(ToOwned::to_owned)
        .map_err(|_| ParseError::InvalidField {
            field: "name",
            reason: "not valid UTF-8",
        })
}

/// Narrow a `u64` to `usize` with an explicit error path.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}
