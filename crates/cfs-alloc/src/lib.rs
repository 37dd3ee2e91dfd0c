#![forbid(unsafe_code)]
//! Free-space management for the block array.
//!
//! Free space is tracked as maximal runs of contiguous free block indices,
//! kept in strictly ascending address order. Allocation is best-fit: the
//! smallest run that satisfies the request wins, ties broken by lowest
//! address. Releasing a run re-inserts it at its address-ordered position and
//! coalesces with touching neighbors, so the list never holds two adjacent
//! runs.
//!
//! ## Invariants
//!
//! 1. Runs are ordered by `start`, non-overlapping, every `count > 0`.
//! 2. No two runs touch (`a.start + a.count < b.start` for neighbors).
//! 3. The run set and the allocated block set partition the block range.

use cfs_types::BlockIndex;
use tracing::trace;

/// A maximal contiguous run of free block indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRun {
    /// First free block of the run.
    pub start: u32,
    /// Number of free blocks in the run.
    pub count: u32,
}

impl FreeRun {
    /// One past the last block of the run.
    #[must_use]
    pub fn end(self) -> u32 {
        self.start + self.count
    }
}

/// Address-ordered list of free runs over a block array.
#[derive(Debug, Clone, Default)]
pub struct FreeList {
    runs: Vec<FreeRun>,
}

impl FreeList {
    /// An empty list (no free space).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A list covering the whole array `[0, total_blocks)` as one run.
    ///
    /// Valid only for a freshly created image; a recovered image must use
    /// [`FreeList::rebuild`] instead.
    #[must_use]
    pub fn new_full(total_blocks: u32) -> Self {
        let mut list = Self::new();
        if total_blocks > 0 {
            list.runs.push(FreeRun {
                start: 0,
                count: total_blocks,
            });
        }
        list
    }

    /// Rebuild the list from a per-block usage scan.
    ///
    /// `in_use` yields one flag per block in ascending index order; each
    /// maximal run of `false` becomes a free run. The result is coalesced by
    /// construction.
    pub fn rebuild(in_use: impl IntoIterator<Item = bool>) -> Self {
        let mut list = Self::new();
        let mut open: Option<FreeRun> = None;

        for (index, used) in in_use.into_iter().enumerate() {
            let index = u32::try_from(index).unwrap_or(u32::MAX);
            if used {
                if let Some(run) = open.take() {
                    list.runs.push(run);
                }
            } else {
                match &mut open {
                    Some(run) => run.count += 1,
                    None => open = Some(FreeRun { start: index, count: 1 }),
                }
            }
        }
        if let Some(run) = open {
            list.runs.push(run);
        }

        trace!(
            target: "cfs::alloc",
            runs = list.runs.len(),
            free_blocks = list.free_blocks(),
            "free_list_rebuilt"
        );
        list
    }

    /// The runs in ascending address order.
    #[must_use]
    pub fn runs(&self) -> &[FreeRun] {
        &self.runs
    }

    /// Total number of free blocks.
    #[must_use]
    pub fn free_blocks(&self) -> u64 {
        self.runs.iter().map(|r| u64::from(r.count)).sum()
    }

    /// Whether `block` is currently on the free list.
    #[must_use]
    pub fn contains(&self, block: BlockIndex) -> bool {
        self.runs
            .iter()
            .any(|r| r.start <= block.0 && block.0 < r.end())
    }

    /// Index into `runs` of the best-fit run for `need` blocks.
    ///
    /// Best fit means the smallest `count >= need`; ties resolve to the
    /// lowest `start` because the scan walks in address order. A perfect fit
    /// short-circuits the scan.
    #[must_use]
    pub fn find_best_fit(&self, need: u32) -> Option<usize> {
        if need == 0 {
            return None;
        }
        let mut best: Option<(usize, u32)> = None;
        for (idx, run) in self.runs.iter().enumerate() {
            if run.count < need {
                continue;
            }
            if run.count == need {
                return Some(idx);
            }
            if best.is_none_or(|(_, count)| run.count < count) {
                best = Some((idx, run.count));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Allocate `need` contiguous blocks using best fit.
    ///
    /// The chosen run is split: its first `need` blocks become allocated and
    /// the suffix (if any) stays on the list in place.
    pub fn allocate(&mut self, need: u32) -> Option<BlockIndex> {
        let idx = self.find_best_fit(need)?;
        let run = &mut self.runs[idx];
        let start = run.start;
        run.start += need;
        run.count -= need;
        if run.count == 0 {
            self.runs.remove(idx);
        }
        trace!(target: "cfs::alloc", start, need, "blocks_allocated");
        Some(BlockIndex(start))
    }

    /// Allocate a single block.
    pub fn allocate_block(&mut self) -> Option<BlockIndex> {
        self.allocate(1)
    }

    /// Return the run `[start, start + count)` to the list.
    ///
    /// The run is inserted at its address-ordered position and merged with
    /// the predecessor and successor when their ranges touch.
    pub fn release(&mut self, start: BlockIndex, count: u32) {
        if count == 0 {
            return;
        }
        let start = start.0;
        let pos = self.runs.partition_point(|r| r.start < start);
        self.runs.insert(pos, FreeRun { start, count });
        self.coalesce_around(pos);
        trace!(target: "cfs::alloc", start, count, "blocks_released");
    }

    /// Return a single block to the list.
    pub fn release_block(&mut self, block: BlockIndex) {
        self.release(block, 1);
    }

    /// Merge every pair of touching neighbors until stable.
    ///
    /// `release` already maintains the invariant locally; this full pass is
    /// the sweep run at the end of garbage collection.
    pub fn coalesce(&mut self) {
        let mut merged: Vec<FreeRun> = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            match merged.last_mut() {
                Some(prev) if prev.end() == run.start => prev.count += run.count,
                _ => merged.push(run),
            }
        }
        self.runs = merged;
    }

    fn coalesce_around(&mut self, pos: usize) {
        // Merge the inserted run into its predecessor first, then absorb the
        // successor if it now touches.
        let mut pos = pos;
        if pos > 0 && self.runs[pos - 1].end() == self.runs[pos].start {
            self.runs[pos - 1].count += self.runs[pos].count;
            self.runs.remove(pos);
            pos -= 1;
        }
        if pos + 1 < self.runs.len() && self.runs[pos].end() == self.runs[pos + 1].start {
            self.runs[pos].count += self.runs[pos + 1].count;
            self.runs.remove(pos + 1);
        }
    }
}
