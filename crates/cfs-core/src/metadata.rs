//! Serializable metadata snapshots for diagnostics.
//!
//! A snapshot captures the whole image's bookkeeping, per-file version logs
//! plus block-usage totals, in a shape the host CLI can print or emit as
//! JSON.

use cfs_ondisk::VersionInfo;
use serde::Serialize;

/// Snapshot of a single version-log entry, with its chain length resolved.
#[derive(Debug, Clone, Serialize)]
pub struct VersionMetadata {
    pub version_number: u32,
    pub timestamp: String,
    pub size: u64,
    pub block_index: Option<u32>,
    pub delta_start: u64,
    pub delta_size: u64,
    pub prev_version: u32,
    /// Blocks visited walking the chain to its terminator.
    pub chain_blocks: u32,
}

impl VersionMetadata {
    #[must_use]
    pub fn from_version(info: &VersionInfo, chain_blocks: u32) -> Self {
        Self {
            version_number: info.version_number,
            timestamp: info.timestamp.clone(),
            size: info.size,
            block_index: info.block_index.map(|b| b.0),
            delta_start: info.delta_start,
            delta_size: info.delta_size,
            prev_version: info.prev_version,
            chain_blocks,
        }
    }
}

/// Snapshot of one in-use file.
#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub version_count: u32,
    pub first_block: Option<u32>,
    pub versions: Vec<VersionMetadata>,
}

/// Snapshot of a free run for diagnostics output.
#[derive(Debug, Clone, Serialize)]
pub struct FreeRunMetadata {
    pub start: u32,
    pub count: u32,
}

/// Whole-image metadata snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ImageMetadata {
    pub disk_size: u64,
    pub block_size: u64,
    pub total_blocks: u32,
    pub blocks_in_use: u64,
    pub free_blocks: u64,
    /// `BLOCK_SIZE` × number of in-use blocks.
    pub total_memory_usage: u64,
    pub files: Vec<FileMetadata>,
    pub free_runs: Vec<FreeRunMetadata>,
}
