#![forbid(unsafe_code)]
//! On-disk image format.
//!
//! A ChronoFS image is a single flat binary file: the packed inode table
//! followed by the packed block array. There is no header, magic, version, or
//! checksum; images from different `(disk_size, BLOCK_SIZE, MAX_FILES)`
//! tuples are incompatible. All integers are little-endian.
//!
//! # Format Overview
//!
//! ```text
//! Image file:
//! +---------------------------+
//! | Inode record × MAX_FILES  |  (variable)
//! +---------------------------+
//! | Block record × blocks     |  (fixed width each)
//! +---------------------------+
//!
//! Inode record:
//! +------------------+----------+
//! | in_use           | 1 byte   | 0 or 1
//! | name             | 64 bytes | NUL-padded UTF-8
//! | first_block      | 4 bytes  | u32::MAX = none
//! | size             | 8 bytes  |
//! | version_count    | 4 bytes  |
//! +------------------+----------+
//! | For each version:           |
//! |   version_number | 4 bytes  |
//! |   timestamp_len  | 2 bytes  |
//! |   timestamp      | N bytes  | UTF-8
//! |   size           | 8 bytes  |
//! |   block_index    | 4 bytes  | u32::MAX = none
//! |   delta_start    | 8 bytes  |
//! |   delta_size     | 8 bytes  |
//! |   prev_version   | 4 bytes  |
//! +------------------+----------+
//!
//! Block record:
//! +------------------+----------+
//! | in_use           | 1 byte   | 0 or 1
//! | next             | 4 bytes  | u32::MAX = none
//! | ref_count        | 4 bytes  |
//! | data             | 4096 B   |
//! +------------------+----------+
//! ```
//!
//! # Invariants round-tripped by the codec
//!
//! - Version numbers within an inode are dense: `1..=version_count`.
//! - An in-use inode's `first_block` and `size` equal those of its latest
//!   version (or `none`/0 when no version exists yet).
//! - Every block reference is either the `none` sentinel or in range for the
//!   image geometry.

use cfs_types::{
    BLOCK_SIZE, BlockIndex, Geometry, MAX_FILENAME_LENGTH, MAX_FILES, ParseError,
    decode_nul_padded_name, ensure_slice, read_le_u16, read_le_u32, read_le_u64, u64_to_usize,
};
use serde::{Deserialize, Serialize};

/// On-disk sentinel for "no block" in `next`, `first_block`, `block_index`.
pub const NO_BLOCK: u32 = u32::MAX;

/// One entry of a file's version log, recorded per successful write.
///
/// Each version owns a complete chain holding the full content of the file at
/// that point; `delta_start`/`delta_size` only describe the byte window that
/// differed from the previous version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// 1-based, strictly increasing within an inode.
    pub version_number: u32,
    /// Local wall-clock stamp of the write, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
    /// Total bytes of this version.
    pub size: u64,
    /// Head of this version's chain.
    pub block_index: Option<BlockIndex>,
    /// First byte that differed from the previous version.
    pub delta_start: u64,
    /// Length of the differing window; never stored as 0.
    pub delta_size: u64,
    /// The preceding version number, or 0 for the first version.
    pub prev_version: u32,
}

/// One slot of the fixed-size inode table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub in_use: bool,
    pub name: String,
    /// Head of the current (latest) version's chain.
    pub first_block: Option<BlockIndex>,
    /// Byte length of the current version.
    pub size: u64,
    /// Version log, oldest first.
    pub versions: Vec<VersionInfo>,
}

impl Inode {
    /// An unused slot.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            in_use: false,
            name: String::new(),
            first_block: None,
            size: 0,
            versions: Vec::new(),
        }
    }

    /// Number of recorded versions.
    #[must_use]
    pub fn version_count(&self) -> u32 {
        u32::try_from(self.versions.len()).unwrap_or(u32::MAX)
    }
}

impl Default for Inode {
    fn default() -> Self {
        Self::empty()
    }
}

/// One slot of the block array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// True iff owned by some version chain.
    pub in_use: bool,
    /// Next block of the chain, if any.
    pub next: Option<BlockIndex>,
    /// Number of version chains whose reachable set includes this block.
    pub ref_count: u32,
    /// Payload; always `BLOCK_SIZE` bytes.
    pub data: Vec<u8>,
}

impl Block {
    /// A zeroed, unused block.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            in_use: false,
            next: None,
            ref_count: 0,
            data: vec![0_u8; BLOCK_SIZE],
        }
    }

    /// Drop ownership state without touching the payload.
    pub fn clear_link(&mut self) {
        self.in_use = false;
        self.next = None;
    }

    /// Reset the whole slot, payload included.
    pub fn reset(&mut self) {
        self.in_use = false;
        self.next = None;
        self.ref_count = 0;
        self.data.fill(0);
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::zeroed()
    }
}

fn encode_opt_index(index: Option<BlockIndex>) -> u32 {
    index.map_or(NO_BLOCK, |b| b.0)
}

fn decode_opt_index(
    raw: u32,
    geometry: Geometry,
    field: &'static str,
) -> Result<Option<BlockIndex>, ParseError> {
    if raw == NO_BLOCK {
        return Ok(None);
    }
    let block = BlockIndex(raw);
    if !geometry.contains(block) {
        return Err(ParseError::InvalidField {
            field,
            reason: "block index out of range",
        });
    }
    Ok(Some(block))
}

// ── Encode ──────────────────────────────────────────────────────────────────

fn encode_version(version: &VersionInfo, out: &mut Vec<u8>) {
    out.extend_from_slice(&version.version_number.to_le_bytes());
    let ts = version.timestamp.as_bytes();
    let ts_len = u16::try_from(ts.len()).unwrap_or(u16::MAX);
    out.extend_from_slice(&ts_len.to_le_bytes());
    out.extend_from_slice(&ts[..usize::from(ts_len)]);
    out.extend_from_slice(&version.size.to_le_bytes());
    out.extend_from_slice(&encode_opt_index(version.block_index).to_le_bytes());
    out.extend_from_slice(&version.delta_start.to_le_bytes());
    out.extend_from_slice(&version.delta_size.to_le_bytes());
    out.extend_from_slice(&version.prev_version.to_le_bytes());
}

fn encode_inode(inode: &Inode, out: &mut Vec<u8>) {
    out.push(u8::from(inode.in_use));
    let mut name = [0_u8; MAX_FILENAME_LENGTH];
    let bytes = inode.name.as_bytes();
    let len = bytes.len().min(MAX_FILENAME_LENGTH - 1);
    name[..len].copy_from_slice(&bytes[..len]);
    out.extend_from_slice(&name);
    out.extend_from_slice(&encode_opt_index(inode.first_block).to_le_bytes());
    out.extend_from_slice(&inode.size.to_le_bytes());
    out.extend_from_slice(&inode.version_count().to_le_bytes());
    for version in &inode.versions {
        encode_version(version, out);
    }
}

fn encode_block(block: &Block, out: &mut Vec<u8>) {
    out.push(u8::from(block.in_use));
    out.extend_from_slice(&encode_opt_index(block.next).to_le_bytes());
    out.extend_from_slice(&block.ref_count.to_le_bytes());
    debug_assert_eq!(block.data.len(), BLOCK_SIZE);
    out.extend_from_slice(&block.data);
}

/// Serialize the inode table and block array into image bytes.
#[must_use]
pub fn encode_image(inodes: &[Inode], blocks: &[Block]) -> Vec<u8> {
    let mut out = Vec::with_capacity(blocks.len() * (BLOCK_SIZE + 9));
    for inode in inodes {
        encode_inode(inode, &mut out);
    }
    for block in blocks {
        encode_block(block, &mut out);
    }
    out
}

// ── Decode ──────────────────────────────────────────────────────────────────

fn decode_flag(data: &[u8], offset: usize, field: &'static str) -> Result<bool, ParseError> {
    let byte = ensure_slice(data, offset, 1)?[0];
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(ParseError::InvalidField {
            field,
            reason: "flag byte is neither 0 nor 1",
        }),
    }
}

fn decode_version(
    data: &[u8],
    offset: &mut usize,
    geometry: Geometry,
) -> Result<VersionInfo, ParseError> {
    let version_number = read_le_u32(data, *offset)?;
    *offset += 4;
    let ts_len = usize::from(read_le_u16(data, *offset)?);
    *offset += 2;
    let ts_bytes = ensure_slice(data, *offset, ts_len)?;
    let timestamp = std::str::from_utf8(ts_bytes)
        .map_err(|_| ParseError::InvalidField {
            field: "timestamp",
            reason: "not valid UTF-8",
        })?
        .to_owned();
    *offset += ts_len;
    let size = read_le_u64(data, *offset)?;
    *offset += 8;
    let block_index = decode_opt_index(read_le_u32(data, *offset)?, geometry, "block_index")?;
    *offset += 4;
    let delta_start = read_le_u64(data, *offset)?;
    *offset += 8;
    let delta_size = read_le_u64(data, *offset)?;
    *offset += 8;
    let prev_version = read_le_u32(data, *offset)?;
    *offset += 4;

    Ok(VersionInfo {
        version_number,
        timestamp,
        size,
        block_index,
        delta_start,
        delta_size,
        prev_version,
    })
}

fn decode_inode(
    data: &[u8],
    offset: &mut usize,
    geometry: Geometry,
) -> Result<Inode, ParseError> {
    let in_use = decode_flag(data, *offset, "inode.in_use")?;
    *offset += 1;
    let name_bytes = ensure_slice(data, *offset, MAX_FILENAME_LENGTH)?;
    if name_bytes[MAX_FILENAME_LENGTH - 1] != 0 {
        return Err(ParseError::InvalidField {
            field: "name",
            reason: "missing NUL terminator",
        });
    }
    let name = decode_nul_padded_name(name_bytes)?;
    *offset += MAX_FILENAME_LENGTH;
    let first_block = decode_opt_index(read_le_u32(data, *offset)?, geometry, "first_block")?;
    *offset += 4;
    let size = read_le_u64(data, *offset)?;
    *offset += 8;
    let version_count = read_le_u32(data, *offset)?;
    *offset += 4;

    let count = u64_to_usize(u64::from(version_count), "version_count")?;
    let mut versions = Vec::with_capacity(count.min(1024));
    for expected in 1..=version_count {
        let version = decode_version(data, offset, geometry)?;
        if version.version_number != expected {
            return Err(ParseError::InvalidField {
                field: "version_number",
                reason: "version log is not dense 1..=version_count",
            });
        }
        versions.push(version);
    }

    let inode = Inode {
        in_use,
        name,
        first_block,
        size,
        versions,
    };

    if inode.in_use {
        match inode.versions.last() {
            Some(latest) => {
                if inode.first_block != latest.block_index || inode.size != latest.size {
                    return Err(ParseError::InvalidField {
                        field: "first_block",
                        reason: "inode head disagrees with latest version",
                    });
                }
            }
            None => {
                if inode.first_block.is_some() || inode.size != 0 {
                    return Err(ParseError::InvalidField {
                        field: "first_block",
                        reason: "versionless inode must be empty",
                    });
                }
            }
        }
    } else if !inode.versions.is_empty() {
        return Err(ParseError::InvalidField {
            field: "version_count",
            reason: "unused slot carries versions",
        });
    }

    Ok(inode)
}

fn decode_block(
    data: &[u8],
    offset: &mut usize,
    geometry: Geometry,
) -> Result<Block, ParseError> {
    let in_use = decode_flag(data, *offset, "block.in_use")?;
    *offset += 1;
    let next = decode_opt_index(read_le_u32(data, *offset)?, geometry, "next")?;
    *offset += 4;
    let ref_count = read_le_u32(data, *offset)?;
    *offset += 4;
    let payload = ensure_slice(data, *offset, BLOCK_SIZE)?.to_vec();
    *offset += BLOCK_SIZE;

    Ok(Block {
        in_use,
        next,
        ref_count,
        data: payload,
    })
}

/// Parse a whole image back into its inode table and block array.
///
/// The block array length is taken from `geometry`; trailing bytes after the
/// last block record are rejected.
pub fn decode_image(
    data: &[u8],
    geometry: Geometry,
) -> Result<(Vec<Inode>, Vec<Block>), ParseError> {
    let mut offset = 0;

    let mut inodes = Vec::with_capacity(MAX_FILES);
    for _ in 0..MAX_FILES {
        inodes.push(decode_inode(data, &mut offset, geometry)?);
    }

    let total = geometry.total_blocks() as usize;
    let mut blocks = Vec::with_capacity(total);
    for _ in 0..total {
        blocks.push(decode_block(data, &mut offset, geometry)?);
    }

    if offset != data.len() {
        return Err(ParseError::InvalidField {
            field: "image",
            reason: "trailing bytes after block array",
        });
    }

    Ok((inodes, blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> Geometry {
        Geometry::new(64 * BLOCK_SIZE as u64).expect("geometry")
    }

    fn fresh_image() -> (Vec<Inode>, Vec<Block>) {
        let inodes = vec![Inode::empty(); MAX_FILES];
        let blocks = vec![Block::zeroed(); 64];
        (inodes, blocks)
    }

    fn sample_version(n: u32, head: u32, size: u64) -> VersionInfo {
        VersionInfo {
            version_number: n,
            timestamp: "2026-08-02 10:15:00".to_owned(),
            size,
            block_index: Some(BlockIndex(head)),
            delta_start: 0,
            delta_size: size,
            prev_version: n - 1,
        }
    }

    #[test]
    fn fresh_image_round_trips() {
        let (inodes, blocks) = fresh_image();
        let bytes = encode_image(&inodes, &blocks);
        let (decoded_inodes, decoded_blocks) =
            decode_image(&bytes, geometry()).expect("decode");
        assert_eq!(decoded_inodes, inodes);
        assert_eq!(decoded_blocks, blocks);
    }

    #[test]
    fn populated_image_round_trips() {
        let (mut inodes, mut blocks) = fresh_image();

        blocks[3] = Block {
            in_use: true,
            next: Some(BlockIndex(7)),
            ref_count: 1,
            data: {
                let mut d = vec![0_u8; BLOCK_SIZE];
                d[..5].copy_from_slice(b"hello");
                d
            },
        };
        blocks[7] = Block {
            in_use: true,
            next: None,
            ref_count: 1,
            data: vec![0xAB; BLOCK_SIZE],
        };

        inodes[0] = Inode {
            in_use: true,
            name: "journal.log".to_owned(),
            first_block: Some(BlockIndex(3)),
            size: 5000,
            versions: vec![sample_version(1, 3, 5000)],
        };

        let bytes = encode_image(&inodes, &blocks);
        let (decoded_inodes, decoded_blocks) =
            decode_image(&bytes, geometry()).expect("decode");
        assert_eq!(decoded_inodes, inodes);
        assert_eq!(decoded_blocks, blocks);
    }

    #[test]
    fn multi_version_inode_round_trips() {
        let (mut inodes, blocks) = fresh_image();
        inodes[2] = Inode {
            in_use: true,
            name: "a".to_owned(),
            first_block: Some(BlockIndex(9)),
            size: 12,
            versions: vec![
                sample_version(1, 4, 20),
                VersionInfo {
                    delta_start: 3,
                    delta_size: 2,
                    ..sample_version(2, 9, 12)
                },
            ],
        };
        let bytes = encode_image(&inodes, &blocks);
        let (decoded, _) = decode_image(&bytes, geometry()).expect("decode");
        assert_eq!(decoded[2], inodes[2]);
        assert_eq!(decoded[2].version_count(), 2);
    }

    #[test]
    fn truncated_image_is_rejected() {
        let (inodes, blocks) = fresh_image();
        let bytes = encode_image(&inodes, &blocks);
        let err = decode_image(&bytes[..bytes.len() - 1], geometry()).unwrap_err();
        assert!(matches!(err, ParseError::InsufficientData { .. }));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let (inodes, blocks) = fresh_image();
        let mut bytes = encode_image(&inodes, &blocks);
        bytes.push(0);
        let err = decode_image(&bytes, geometry()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { field: "image", .. }));
    }

    #[test]
    fn sparse_version_numbering_is_rejected() {
        let (mut inodes, blocks) = fresh_image();
        inodes[0] = Inode {
            in_use: true,
            name: "gap".to_owned(),
            first_block: Some(BlockIndex(1)),
            size: 1,
            versions: vec![sample_version(1, 2, 1), sample_version(3, 1, 1)],
        };
        let bytes = encode_image(&inodes, &blocks);
        let err = decode_image(&bytes, geometry()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::InvalidField {
                field: "version_number",
                ..
            }
        ));
    }

    #[test]
    fn head_mismatch_is_rejected() {
        let (mut inodes, blocks) = fresh_image();
        inodes[0] = Inode {
            in_use: true,
            name: "skew".to_owned(),
            first_block: Some(BlockIndex(5)),
            size: 1,
            versions: vec![sample_version(1, 2, 1)],
        };
        let bytes = encode_image(&inodes, &blocks);
        assert!(decode_image(&bytes, geometry()).is_err());
    }

    #[test]
    fn out_of_range_next_link_is_rejected() {
        let (inodes, mut blocks) = fresh_image();
        blocks[0].in_use = true;
        blocks[0].next = Some(BlockIndex(1000));
        blocks[0].ref_count = 1;
        let bytes = encode_image(&inodes, &blocks);
        let err = decode_image(&bytes, geometry()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { field: "next", .. }));
    }

    #[test]
    fn no_block_sentinel_survives_round_trip() {
        assert_eq!(encode_opt_index(None), NO_BLOCK);
        assert_eq!(decode_opt_index(NO_BLOCK, geometry(), "next").unwrap(), None);
        assert_eq!(
            decode_opt_index(63, geometry(), "next").unwrap(),
            Some(BlockIndex(63))
        );
        assert!(decode_opt_index(64, geometry(), "next").is_err());
    }

    #[test]
    fn flag_bytes_other_than_zero_and_one_are_rejected() {
        let (inodes, blocks) = fresh_image();
        let mut bytes = encode_image(&inodes, &blocks);
        bytes[0] = 2;
        assert!(decode_image(&bytes, geometry()).is_err());
    }
}
