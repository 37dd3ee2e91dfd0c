#![forbid(unsafe_code)]
//! Error types for ChronoFS.
//!
//! Defines `CfsError` and a `Result<T>` alias used throughout the workspace.

use cfs_types::{BlockIndex, Fd, ParseError, VersionNumber};
use thiserror::Error;

/// Unified error type for all ChronoFS operations.
#[derive(Debug, Error)]
pub enum CfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid image format: {0}")]
    Format(#[from] ParseError),

    #[error("invalid file handle {fd}")]
    InvalidHandle { fd: Fd },

    #[error("handle {fd} references an unused inode slot")]
    MissingInode { fd: Fd },

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("file already exists: {0}")]
    AlreadyExists(String),

    #[error("filename too long: {len} bytes (limit {max} including NUL)")]
    NameTooLong { len: usize, max: usize },

    #[error("filename contains a NUL byte")]
    InvalidName,

    #[error("inode table full")]
    NoFreeInode,

    #[error("file descriptor table full")]
    NoFreeHandle,

    #[error("no free blocks left in image")]
    OutOfSpace,

    #[error("handle {fd} is not open for writing")]
    NotWritable { fd: Fd },

    #[error("corrupt block chain at block {block}: {detail}")]
    CorruptChain { block: BlockIndex, detail: String },

    #[error("version {requested} out of range (history holds 1..={max})")]
    VersionOutOfRange {
        requested: VersionNumber,
        max: u32,
    },
}

/// Result alias using `CfsError`.
pub type Result<T> = std::result::Result<T, CfsError>;
