//! Integrity check over a live filesystem instance.
//!
//! Walks the same structures the engine mutates and reports every violation
//! of the storage invariants. A healthy image yields no findings; the check
//! never mutates state.

use crate::CowFs;
use cfs_types::BLOCK_SIZE;
use serde::Serialize;
use std::fmt;

/// Category of an integrity violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckKind {
    /// Free runs out of order, overlapping, or not coalesced.
    FreeListShape,
    /// A block is neither free nor in use, or both at once.
    Partition,
    /// `ref_count > 0` disagrees with reachability from version heads.
    Refcount,
    /// Version numbers are not dense `1..=version_count`, or prev links skew.
    VersionLog,
    /// Inode head/size disagree with the latest version.
    InodeHead,
    /// A version chain is broken, cyclic, or too short for its size.
    Chain,
    /// Two in-use inodes share a filename.
    Namespace,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FreeListShape => "free-list-shape",
            Self::Partition => "partition",
            Self::Refcount => "refcount",
            Self::VersionLog => "version-log",
            Self::InodeHead => "inode-head",
            Self::Chain => "chain",
            Self::Namespace => "namespace",
        };
        f.write_str(name)
    }
}

/// One integrity violation.
#[derive(Debug, Clone, Serialize)]
pub struct CheckFinding {
    pub kind: CheckKind,
    pub detail: String,
}

impl fmt::Display for CheckFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.detail)
    }
}

pub(crate) fn run(fs: &CowFs) -> Vec<CheckFinding> {
    let mut findings = Vec::new();
    let total = fs.geometry().total_blocks() as usize;
    let blocks = fs.store().blocks();

    // Free-list shape: ascending, coalesced, in range.
    let runs = fs.free_runs();
    for pair in runs.windows(2) {
        if pair[0].start >= pair[1].start {
            findings.push(CheckFinding {
                kind: CheckKind::FreeListShape,
                detail: format!(
                    "runs out of order: ({}, {}) before ({}, {})",
                    pair[0].start, pair[0].count, pair[1].start, pair[1].count
                ),
            });
        }
        if pair[0].end() >= pair[1].start && pair[0].start < pair[1].start {
            findings.push(CheckFinding {
                kind: CheckKind::FreeListShape,
                detail: format!(
                    "runs touch or overlap: ({}, {}) and ({}, {})",
                    pair[0].start, pair[0].count, pair[1].start, pair[1].count
                ),
            });
        }
    }

    // Partition: every block is exactly one of {free-listed, in-use}.
    let mut on_free_list = vec![false; total];
    for run in runs {
        for index in run.start..run.end().min(total as u32) {
            on_free_list[index as usize] = true;
        }
        if run.end() > total as u32 {
            findings.push(CheckFinding {
                kind: CheckKind::FreeListShape,
                detail: format!("run ({}, {}) leaves the image", run.start, run.count),
            });
        }
    }
    for (index, block) in blocks.iter().enumerate() {
        match (block.in_use, on_free_list[index]) {
            (true, true) => findings.push(CheckFinding {
                kind: CheckKind::Partition,
                detail: format!("block {index} is in use and on the free list"),
            }),
            (false, false) => findings.push(CheckFinding {
                kind: CheckKind::Partition,
                detail: format!("block {index} is neither in use nor on the free list"),
            }),
            _ => {}
        }
    }

    // Reachability: walk every version chain of every in-use inode.
    let mut reachable = vec![false; total];
    for inode in fs.inodes().slots().iter().filter(|i| i.in_use) {
        for version in &inode.versions {
            let mut cursor = version.block_index;
            let mut visited = 0_usize;
            while let Some(index) = cursor {
                let Some(block) = blocks.get(index.as_usize()) else {
                    findings.push(CheckFinding {
                        kind: CheckKind::Chain,
                        detail: format!(
                            "{}: v{} chain leaves the image at block {index}",
                            inode.name, version.version_number
                        ),
                    });
                    break;
                };
                reachable[index.as_usize()] = true;
                visited += 1;
                if visited > total {
                    findings.push(CheckFinding {
                        kind: CheckKind::Chain,
                        detail: format!(
                            "{}: v{} chain does not terminate",
                            inode.name, version.version_number
                        ),
                    });
                    break;
                }
                cursor = block.next;
            }
        }
    }
    for (index, block) in blocks.iter().enumerate() {
        let counted = block.ref_count > 0;
        if counted != reachable[index] {
            findings.push(CheckFinding {
                kind: CheckKind::Refcount,
                detail: format!(
                    "block {index}: ref_count {} but {}",
                    block.ref_count,
                    if reachable[index] {
                        "reachable from a version head"
                    } else {
                        "unreachable"
                    }
                ),
            });
        }
        if counted && !block.in_use {
            findings.push(CheckFinding {
                kind: CheckKind::Refcount,
                detail: format!("block {index}: referenced but not marked in use"),
            });
        }
    }

    // Version logs and inode heads.
    for inode in fs.inodes().slots().iter().filter(|i| i.in_use) {
        for (pos, version) in inode.versions.iter().enumerate() {
            let expected = pos as u32 + 1;
            if version.version_number != expected {
                findings.push(CheckFinding {
                    kind: CheckKind::VersionLog,
                    detail: format!(
                        "{}: version at position {pos} is numbered {}",
                        inode.name, version.version_number
                    ),
                });
            }
            if version.prev_version != pos as u32 {
                findings.push(CheckFinding {
                    kind: CheckKind::VersionLog,
                    detail: format!(
                        "{}: v{} points at prev {}",
                        inode.name, version.version_number, version.prev_version
                    ),
                });
            }
            if let Some(head) = version.block_index {
                match fs.store().chain_len(head) {
                    Ok(len) => {
                        let needed = fs.geometry().blocks_for(version.size) as usize;
                        if len != needed {
                            findings.push(CheckFinding {
                                kind: CheckKind::Chain,
                                detail: format!(
                                    "{}: v{} holds {len} blocks for {} bytes (expected {needed})",
                                    inode.name, version.version_number, version.size
                                ),
                            });
                        }
                    }
                    Err(error) => findings.push(CheckFinding {
                        kind: CheckKind::Chain,
                        detail: format!(
                            "{}: v{} chain walk failed: {error}",
                            inode.name, version.version_number
                        ),
                    }),
                }
            } else if version.size != 0 {
                findings.push(CheckFinding {
                    kind: CheckKind::Chain,
                    detail: format!(
                        "{}: v{} declares {} bytes without a chain",
                        inode.name, version.version_number, version.size
                    ),
                });
            }
        }

        match inode.versions.last() {
            Some(latest) => {
                if inode.first_block != latest.block_index || inode.size != latest.size {
                    findings.push(CheckFinding {
                        kind: CheckKind::InodeHead,
                        detail: format!(
                            "{}: head/size disagree with v{}",
                            inode.name, latest.version_number
                        ),
                    });
                }
            }
            None => {
                if inode.first_block.is_some() || inode.size != 0 {
                    findings.push(CheckFinding {
                        kind: CheckKind::InodeHead,
                        detail: format!("{}: versionless file is not empty", inode.name),
                    });
                }
            }
        }
    }

    // Accounting identity (trivial by construction, kept as a tripwire).
    let usage = fs.get_total_memory_usage();
    if usage != fs.store().blocks_in_use() * BLOCK_SIZE as u64 {
        findings.push(CheckFinding {
            kind: CheckKind::Partition,
            detail: format!("memory usage {usage} disagrees with in-use block count"),
        });
    }

    // Filenames of in-use inodes are pairwise distinct.
    let slots = fs.inodes().slots();
    for (i, a) in slots.iter().enumerate().filter(|(_, s)| s.in_use) {
        for b in slots.iter().skip(i + 1).filter(|s| s.in_use) {
            if a.name == b.name {
                findings.push(CheckFinding {
                    kind: CheckKind::Namespace,
                    detail: format!("duplicate filename: {}", a.name),
                });
            }
        }
    }

    findings
}
