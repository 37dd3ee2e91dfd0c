#![forbid(unsafe_code)]
//! ChronoFS engine: a single-file disk image storing small files with full
//! per-write version history under a copy-on-write block layout.
//!
//! Every successful write produces a new immutable version holding the full
//! content in a fresh chain of blocks; prior versions stay readable until
//! they are rolled back. Blocks are reference-counted, freed eagerly when
//! their last owner lets go, and swept back by the garbage collector.
//!
//! The engine is single-threaded and synchronous: callers needing
//! concurrency must serialize externally.

mod check;
mod delta;
mod metadata;
mod store;
mod table;

pub use check::{CheckFinding, CheckKind};
pub use delta::{Delta, find_delta};
pub use metadata::{FileMetadata, FreeRunMetadata, ImageMetadata, VersionMetadata};
pub use store::BlockStore;
pub use table::{FileHandle, FileMode, HandleTable, InodeTable};

pub use cfs_alloc::{FreeList, FreeRun};
pub use cfs_error::{CfsError, Result};
pub use cfs_ondisk::{Block, Inode, VersionInfo};
pub use cfs_types::{
    BLOCK_SIZE, BlockIndex, Fd, Geometry, InodeIndex, MAX_FILENAME_LENGTH, MAX_FILES,
    VersionNumber,
};

use chrono::Local;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// Point-in-time status of an open handle's file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub is_open: bool,
    pub is_modified: bool,
    pub current_size: u64,
    pub current_version: u32,
}

impl FileStatus {
    fn closed() -> Self {
        Self {
            is_open: false,
            is_modified: false,
            current_size: 0,
            current_version: 0,
        }
    }
}

/// The filesystem instance: inode table, block array, free list, and handle
/// table, bound to one image file.
#[derive(Debug)]
pub struct CowFs {
    path: PathBuf,
    geometry: Geometry,
    store: BlockStore,
    inodes: InodeTable,
    handles: HandleTable,
    closed: bool,
}

impl CowFs {
    /// Open the image at `path` with a logical capacity of `disk_size` bytes.
    ///
    /// An existing image is loaded wholesale and its free list rebuilt by
    /// scanning unused blocks; a missing image is created, initialized to
    /// empty slots, and written out immediately.
    pub fn open_image(path: impl AsRef<Path>, disk_size: u64) -> Result<Self> {
        let geometry = Geometry::new(disk_size)?;
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            let bytes = fs::read(&path)?;
            let (slots, blocks) = cfs_ondisk::decode_image(&bytes, geometry)?;
            let fs = Self {
                path,
                geometry,
                store: BlockStore::recover(geometry, blocks),
                inodes: InodeTable::from_slots(slots),
                handles: HandleTable::new(),
                closed: false,
            };
            info!(
                target: "cfs::image",
                path = %fs.path.display(),
                total_blocks = geometry.total_blocks(),
                free_blocks = fs.store.free_blocks(),
                "image_loaded"
            );
            Ok(fs)
        } else {
            let fs = Self {
                path,
                geometry,
                store: BlockStore::new_empty(geometry),
                inodes: InodeTable::new(),
                handles: HandleTable::new(),
                closed: false,
            };
            fs.save()?;
            info!(
                target: "cfs::image",
                path = %fs.path.display(),
                total_blocks = geometry.total_blocks(),
                "image_created"
            );
            Ok(fs)
        }
    }

    /// Rewrite the inode table and block array to the image file.
    ///
    /// The image is written to a sibling temp file and renamed into place so
    /// a crash mid-write leaves the previous image intact.
    pub fn save(&self) -> Result<()> {
        let bytes = cfs_ondisk::encode_image(self.inodes.slots(), self.store.blocks());
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        debug!(target: "cfs::image", bytes = bytes.len(), "image_saved");
        Ok(())
    }

    /// Persist and consume the instance.
    pub fn close(mut self) -> Result<()> {
        self.save()?;
        self.closed = true;
        Ok(())
    }

    #[must_use]
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn store(&self) -> &BlockStore {
        &self.store
    }

    pub(crate) fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    /// The free runs in ascending address order.
    #[must_use]
    pub fn free_runs(&self) -> &[FreeRun] {
        self.store.free_runs()
    }

    // ── File operations ─────────────────────────────────────────────────

    /// Create a new file and open it for writing.
    pub fn create(&mut self, name: &str) -> Result<Fd> {
        let inode = self.inodes.claim(name)?;
        match self.handles.allocate(inode, FileMode::Write) {
            Ok(fd) => {
                debug!(target: "cfs::fs", name, fd = fd.0, "file_created");
                Ok(fd)
            }
            Err(error) => {
                // A failed create must leave no trace.
                self.inodes.release(inode);
                Err(error)
            }
        }
    }

    /// Open an existing file.
    pub fn open(&mut self, name: &str, mode: FileMode) -> Result<Fd> {
        let inode = self
            .inodes
            .find(name)
            .ok_or_else(|| CfsError::NotFound(name.to_owned()))?;
        let fd = self.handles.allocate(inode, mode)?;
        debug!(target: "cfs::fs", name, fd = fd.0, ?mode, "file_opened");
        Ok(fd)
    }

    /// Invalidate a handle. Inodes and blocks are untouched.
    pub fn close_fd(&mut self, fd: Fd) -> Result<()> {
        self.handles.close(fd)
    }

    fn inode_of(&self, fd: Fd) -> Result<(InodeIndex, &Inode)> {
        let handle = self.handles.get(fd)?;
        let index = handle.inode;
        let inode = self
            .inodes
            .get(index)
            .filter(|i| i.in_use)
            .ok_or(CfsError::MissingInode { fd })?;
        Ok((index, inode))
    }

    /// Read up to `buf.len()` bytes from the current version, honoring the
    /// handle's byte cursor. Returns 0 at end of file.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let cursor = self.handles.get(fd)?.cursor;
        let (_, inode) = self.inode_of(fd)?;

        if inode.size == 0 {
            return Ok(0);
        }
        let available = inode.size.saturating_sub(cursor);
        if available == 0 {
            return Ok(0);
        }

        let head = inode.first_block.ok_or_else(|| CfsError::CorruptChain {
            block: BlockIndex(0),
            detail: "inode declares content but has no chain head".to_owned(),
        })?;

        let to_read = (buf.len() as u64).min(available) as usize;
        self.store.read_chain(head, cursor, &mut buf[..to_read])?;

        self.handles.get_mut(fd)?.cursor = cursor + to_read as u64;
        trace!(target: "cfs::read", fd = fd.0, bytes = to_read, "read");
        Ok(to_read)
    }

    /// Write `buf` as the file's new content.
    ///
    /// A successful write returns `buf.len()`, including the case where the
    /// content matches the current version exactly; then the write is
    /// accepted as a no-op and no version is recorded. An empty buffer
    /// returns 0 without side effects. A failed write releases any blocks it
    /// provisionally allocated and leaves the file unchanged.
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let handle = self.handles.get(fd)?;
        if handle.mode != FileMode::Write {
            return Err(CfsError::NotWritable { fd });
        }
        let (inode_index, inode) = self.inode_of(fd)?;

        if buf.is_empty() {
            return Ok(0);
        }

        let old_size = inode.size;
        let old_head = inode.first_block;
        let version_count = inode.version_count();

        let delta = if version_count == 0 || old_size == 0 {
            Delta {
                start: 0,
                size: buf.len(),
            }
        } else {
            let head = old_head.ok_or_else(|| CfsError::CorruptChain {
                block: BlockIndex(0),
                detail: "inode declares content but has no chain head".to_owned(),
            })?;
            let mut prior = vec![0_u8; old_size as usize];
            self.store.read_chain(head, 0, &mut prior)?;
            find_delta(&prior, buf)
        };

        if delta.size == 0 {
            // Same content: accept the write without a new version.
            self.handles.get_mut(fd)?.cursor = buf.len() as u64;
            debug!(target: "cfs::write", fd = fd.0, bytes = buf.len(), "write_noop");
            return Ok(buf.len());
        }

        let new_head = self.build_chain(buf)?;
        self.store.increment_chain_refs(new_head);

        let stamp = local_timestamp();
        let inode = self
            .inodes
            .get_mut(inode_index)
            .ok_or(CfsError::MissingInode { fd })?;
        let number = version_count + 1;
        inode.versions.push(VersionInfo {
            version_number: number,
            timestamp: stamp,
            size: buf.len() as u64,
            block_index: Some(new_head),
            delta_start: delta.start as u64,
            delta_size: delta.size as u64,
            prev_version: version_count,
        });
        inode.first_block = Some(new_head);
        inode.size = buf.len() as u64;
        self.handles.get_mut(fd)?.cursor = buf.len() as u64;

        debug!(
            target: "cfs::write",
            fd = fd.0,
            bytes = buf.len(),
            version = number,
            delta_start = delta.start,
            delta_size = delta.size,
            "write_committed"
        );
        Ok(buf.len())
    }

    /// Allocate and fill a fresh chain holding all of `content`.
    ///
    /// On allocation failure the partially built chain is released before
    /// the error propagates.
    fn build_chain(&mut self, content: &[u8]) -> Result<BlockIndex> {
        let mut chunks = content.chunks(BLOCK_SIZE);
        let first = chunks.next().ok_or_else(|| CfsError::CorruptChain {
            block: BlockIndex(0),
            detail: "cannot build a chain for empty content".to_owned(),
        })?;

        let head = self.store.allocate_block()?;
        self.store.fill_block(head, first)?;

        let mut prev = head;
        for chunk in chunks {
            let index = match self.store.allocate_block() {
                Ok(index) => index,
                Err(error) => {
                    warn!(
                        target: "cfs::write",
                        needed = content.len().div_ceil(BLOCK_SIZE),
                        "chain_allocation_failed"
                    );
                    self.store.release_unreferenced_chain(head);
                    return Err(error);
                }
            };
            self.store.fill_block(index, chunk)?;
            self.store.link_blocks(prev, Some(index))?;
            prev = index;
        }
        Ok(head)
    }

    /// Discard every version after `version` and make it current again.
    ///
    /// References held by the discarded versions are dropped, reclaiming
    /// their blocks. Rolling back to the current version is a no-op.
    pub fn rollback_to_version(&mut self, fd: Fd, version: VersionNumber) -> Result<()> {
        let mode = self.handles.get(fd)?.mode;
        let (inode_index, inode) = self.inode_of(fd)?;

        let count = inode.version_count();
        if version.0 == 0 || version.0 > count {
            return Err(CfsError::VersionOutOfRange {
                requested: version,
                max: count,
            });
        }

        let pos = (version.0 - 1) as usize;
        let target = &inode.versions[pos];
        if target.version_number != version.0 {
            return Err(CfsError::CorruptChain {
                block: BlockIndex(0),
                detail: format!("version log holds {} at position {pos}", target.version_number),
            });
        }
        let target_head = target.block_index;
        let target_size = target.size;
        let discarded: Vec<BlockIndex> = inode.versions[pos + 1..]
            .iter()
            .filter_map(|v| v.block_index)
            .collect();

        for head in &discarded {
            self.store.decrement_chain_refs(*head);
        }

        let inode = self
            .inodes
            .get_mut(inode_index)
            .ok_or(CfsError::MissingInode { fd })?;
        inode.versions.truncate(pos + 1);
        inode.first_block = target_head;
        inode.size = target_size;

        let handle = self.handles.get_mut(fd)?;
        handle.cursor = match mode {
            FileMode::Write => target_size,
            FileMode::Read => 0,
        };

        info!(
            target: "cfs::rollback",
            fd = fd.0,
            version = version.0,
            dropped = discarded.len(),
            "rolled_back"
        );
        Ok(())
    }

    /// Sweep unreferenced blocks back onto the free list.
    ///
    /// With eager reclamation the sweep normally finds nothing: it produces no
    /// observable change while the invariants hold, and returns the number
    /// of dormant blocks it recovered.
    pub fn garbage_collect(&mut self) -> u64 {
        let total = self.geometry.total_blocks() as usize;
        let mut used = vec![false; total];

        for inode in self.inodes.slots().iter().filter(|i| i.in_use) {
            for version in &inode.versions {
                let mut cursor = version.block_index;
                let mut visited = 0_usize;
                while let Some(index) = cursor {
                    let Some(block) = self.store.blocks().get(index.as_usize()) else {
                        break;
                    };
                    if block.ref_count > 0 {
                        used[index.as_usize()] = true;
                    }
                    visited += 1;
                    if visited > total {
                        warn!(
                            target: "cfs::gc",
                            file = %inode.name,
                            version = version.version_number,
                            "chain walk exceeded block count"
                        );
                        break;
                    }
                    cursor = block.next;
                }
            }
        }

        let reclaimed = self.store.sweep(&used);
        if reclaimed > 0 {
            info!(target: "cfs::gc", reclaimed, "garbage_collected");
        } else {
            debug!(target: "cfs::gc", "garbage_collect_noop");
        }
        reclaimed
    }

    // ── Introspection ───────────────────────────────────────────────────

    /// Names of all in-use files, in slot order.
    #[must_use]
    pub fn list_files(&self) -> Vec<String> {
        self.inodes
            .slots()
            .iter()
            .filter(|i| i.in_use)
            .map(|i| i.name.clone())
            .collect()
    }

    /// Byte length of the handle's current version.
    pub fn get_file_size(&self, fd: Fd) -> Result<u64> {
        Ok(self.inode_of(fd)?.1.size)
    }

    /// Status of the handle's file; a closed or out-of-range handle reports
    /// `is_open == false` rather than an error.
    #[must_use]
    pub fn get_file_status(&self, fd: Fd) -> FileStatus {
        match self.handles.get(fd) {
            Ok(handle) => match self.inodes.get(handle.inode).filter(|i| i.in_use) {
                Some(inode) => FileStatus {
                    is_open: true,
                    is_modified: handle.mode == FileMode::Write,
                    current_size: inode.size,
                    current_version: inode.version_count(),
                },
                None => FileStatus::closed(),
            },
            Err(_) => FileStatus::closed(),
        }
    }

    /// The handle's version log, oldest first.
    pub fn get_version_history(&self, fd: Fd) -> Result<Vec<VersionInfo>> {
        Ok(self.inode_of(fd)?.1.versions.clone())
    }

    /// Number of recorded versions for the handle's file.
    pub fn get_version_count(&self, fd: Fd) -> Result<u32> {
        Ok(self.inode_of(fd)?.1.version_count())
    }

    /// Sum of payload bytes held by in-use blocks.
    #[must_use]
    pub fn get_total_memory_usage(&self) -> u64 {
        self.store.total_memory_usage()
    }

    /// Serializable snapshot of the whole image's bookkeeping.
    #[must_use]
    pub fn metadata_snapshot(&self) -> ImageMetadata {
        let files = self
            .inodes
            .slots()
            .iter()
            .filter(|i| i.in_use)
            .map(|inode| FileMetadata {
                name: inode.name.clone(),
                size: inode.size,
                version_count: inode.version_count(),
                first_block: inode.first_block.map(|b| b.0),
                versions: inode
                    .versions
                    .iter()
                    .map(|v| {
                        let chain_blocks = v
                            .block_index
                            .and_then(|head| self.store.chain_len(head).ok())
                            .and_then(|len| u32::try_from(len).ok())
                            .unwrap_or(0);
                        VersionMetadata::from_version(v, chain_blocks)
                    })
                    .collect(),
            })
            .collect();

        ImageMetadata {
            disk_size: self.geometry.disk_size(),
            block_size: BLOCK_SIZE as u64,
            total_blocks: self.geometry.total_blocks(),
            blocks_in_use: self.store.blocks_in_use(),
            free_blocks: self.store.free_blocks(),
            total_memory_usage: self.get_total_memory_usage(),
            files,
            free_runs: self
                .free_runs()
                .iter()
                .map(|r| FreeRunMetadata {
                    start: r.start,
                    count: r.count,
                })
                .collect(),
        }
    }

    /// Run the integrity check; a healthy image yields no findings.
    #[must_use]
    pub fn check(&self) -> Vec<CheckFinding> {
        check::run(self)
    }
}

impl Drop for CowFs {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(error) = self.save() {
                warn!(
                    target: "cfs::image",
                    path = %self.path.display(),
                    error = %error,
                    "image save on drop failed"
                );
            }
        }
    }
}

fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DISK_SIZE: u64 = 1024 * 1024;

    fn open_fs(dir: &TempDir) -> CowFs {
        CowFs::open_image(dir.path().join("test.img"), DISK_SIZE).expect("open image")
    }

    fn assert_healthy(fs: &CowFs) {
        let findings = fs.check();
        assert!(findings.is_empty(), "integrity findings: {findings:?}");
    }

    #[test]
    fn create_write_read_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let mut fs = open_fs(&dir);

        let fd = fs.create("greeting").expect("create");
        assert_eq!(fs.write(fd, b"hello").expect("write"), 5);

        let rd = fs.open("greeting", FileMode::Read).expect("open");
        let mut buf = [0_u8; 16];
        assert_eq!(fs.read(rd, &mut buf).expect("read"), 5);
        assert_eq!(&buf[..5], b"hello");
        // Cursor advanced to EOF.
        assert_eq!(fs.read(rd, &mut buf).expect("read at eof"), 0);
        assert_healthy(&fs);
    }

    #[test]
    fn empty_write_is_a_no_op() {
        let dir = TempDir::new().expect("tempdir");
        let mut fs = open_fs(&dir);
        let fd = fs.create("empty").expect("create");
        assert_eq!(fs.write(fd, b"").expect("write"), 0);
        assert_eq!(fs.get_version_count(fd).expect("count"), 0);
        assert_eq!(fs.get_total_memory_usage(), 0);
        assert_healthy(&fs);
    }

    #[test]
    fn duplicate_content_records_no_version() {
        let dir = TempDir::new().expect("tempdir");
        let mut fs = open_fs(&dir);
        let fd = fs.create("stable").expect("create");
        fs.write(fd, b"constant").expect("first write");
        assert_eq!(fs.write(fd, b"constant").expect("repeat write"), 8);
        assert_eq!(fs.get_version_count(fd).expect("count"), 1);
        assert_healthy(&fs);
    }

    #[test]
    fn write_on_read_handle_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let mut fs = open_fs(&dir);
        let fd = fs.create("locked").expect("create");
        fs.write(fd, b"data").expect("write");
        let rd = fs.open("locked", FileMode::Read).expect("open");
        assert!(matches!(
            fs.write(rd, b"nope"),
            Err(CfsError::NotWritable { .. })
        ));
    }

    #[test]
    fn versions_accumulate_and_rollback_restores_content() {
        let dir = TempDir::new().expect("tempdir");
        let mut fs = open_fs(&dir);
        let fd = fs.create("doc").expect("create");
        fs.write(fd, b"first draft").expect("v1");
        fs.write(fd, b"second draft").expect("v2");
        fs.write(fd, b"third draft").expect("v3");
        assert_eq!(fs.get_version_count(fd).expect("count"), 3);

        fs.rollback_to_version(fd, VersionNumber(1)).expect("rollback");
        assert_eq!(fs.get_version_count(fd).expect("count"), 1);

        let rd = fs.open("doc", FileMode::Read).expect("open");
        let mut buf = vec![0_u8; 32];
        let n = fs.read(rd, &mut buf).expect("read");
        assert_eq!(&buf[..n], b"first draft");
        assert_healthy(&fs);
    }

    #[test]
    fn rollback_rejects_out_of_range_versions() {
        let dir = TempDir::new().expect("tempdir");
        let mut fs = open_fs(&dir);
        let fd = fs.create("doc").expect("create");
        fs.write(fd, b"content").expect("write");
        assert!(matches!(
            fs.rollback_to_version(fd, VersionNumber(0)),
            Err(CfsError::VersionOutOfRange { .. })
        ));
        assert!(matches!(
            fs.rollback_to_version(fd, VersionNumber(2)),
            Err(CfsError::VersionOutOfRange { .. })
        ));
    }

    #[test]
    fn rollback_resets_read_cursor_to_start() {
        let dir = TempDir::new().expect("tempdir");
        let mut fs = open_fs(&dir);
        let wd = fs.create("doc").expect("create");
        fs.write(wd, b"abcdef").expect("v1");
        fs.write(wd, b"abcxyz!").expect("v2");

        let rd = fs.open("doc", FileMode::Read).expect("open");
        let mut skip = [0_u8; 3];
        fs.read(rd, &mut skip).expect("advance cursor");

        fs.rollback_to_version(rd, VersionNumber(1)).expect("rollback");
        let mut buf = [0_u8; 8];
        let n = fs.read(rd, &mut buf).expect("read");
        assert_eq!(&buf[..n], b"abcdef");

        // The write handle lands at EOF instead.
        assert_eq!(fs.get_file_status(wd).current_size, 6);
        assert_healthy(&fs);
    }

    #[test]
    fn failed_write_releases_provisional_blocks() {
        let dir = TempDir::new().expect("tempdir");
        // Tiny image: 4 blocks.
        let mut fs =
            CowFs::open_image(dir.path().join("tiny.img"), 4 * BLOCK_SIZE as u64).expect("open");
        let fd = fs.create("big").expect("create");
        fs.write(fd, &vec![1_u8; 3 * BLOCK_SIZE]).expect("fill");

        // 2 more blocks needed, only 1 left: must fail and leave state intact.
        let err = fs.write(fd, &vec![2_u8; 2 * BLOCK_SIZE]).unwrap_err();
        assert!(matches!(err, CfsError::OutOfSpace));
        assert_eq!(fs.get_version_count(fd).expect("count"), 1);
        assert_eq!(fs.get_total_memory_usage(), 3 * BLOCK_SIZE as u64);
        assert_healthy(&fs);

        // The surviving free block is still allocatable.
        let fd2 = fs.create("small").expect("create");
        assert_eq!(fs.write(fd2, b"fits").expect("write"), 4);
        assert_healthy(&fs);
    }

    #[test]
    fn close_persists_and_reopen_recovers() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("persist.img");

        {
            let mut fs = CowFs::open_image(&path, DISK_SIZE).expect("open");
            let fd = fs.create("kept").expect("create");
            fs.write(fd, b"across sessions").expect("write");
            fs.write(fd, b"across sessions, twice").expect("write v2");
            fs.close().expect("close");
        }

        let mut fs = CowFs::open_image(&path, DISK_SIZE).expect("reopen");
        assert_eq!(fs.list_files(), vec!["kept".to_owned()]);
        let fd = fs.open("kept", FileMode::Read).expect("open");
        assert_eq!(fs.get_version_count(fd).expect("count"), 2);
        let mut buf = vec![0_u8; 64];
        let n = fs.read(fd, &mut buf).expect("read");
        assert_eq!(&buf[..n], b"across sessions, twice");
        assert_healthy(&fs);
    }

    #[test]
    fn drop_saves_the_image() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("dropped.img");
        {
            let mut fs = CowFs::open_image(&path, DISK_SIZE).expect("open");
            let fd = fs.create("f").expect("create");
            fs.write(fd, b"saved by drop").expect("write");
        }
        let mut fs = CowFs::open_image(&path, DISK_SIZE).expect("reopen");
        let fd = fs.open("f", FileMode::Read).expect("open");
        let mut buf = [0_u8; 32];
        let n = fs.read(fd, &mut buf).expect("read");
        assert_eq!(&buf[..n], b"saved by drop");
    }

    #[test]
    fn status_reflects_mode_and_version() {
        let dir = TempDir::new().expect("tempdir");
        let mut fs = open_fs(&dir);
        let fd = fs.create("status").expect("create");
        fs.write(fd, b"v1").expect("write");

        let status = fs.get_file_status(fd);
        assert!(status.is_open);
        assert!(status.is_modified);
        assert_eq!(status.current_size, 2);
        assert_eq!(status.current_version, 1);

        fs.close_fd(fd).expect("close");
        assert!(!fs.get_file_status(fd).is_open);
    }

    #[test]
    fn closed_handle_operations_fail() {
        let dir = TempDir::new().expect("tempdir");
        let mut fs = open_fs(&dir);
        let fd = fs.create("gone").expect("create");
        fs.close_fd(fd).expect("close");
        let mut buf = [0_u8; 4];
        assert!(matches!(
            fs.read(fd, &mut buf),
            Err(CfsError::InvalidHandle { .. })
        ));
        assert!(matches!(
            fs.write(fd, b"x"),
            Err(CfsError::InvalidHandle { .. })
        ));
        assert!(fs.get_version_history(fd).is_err());
    }

    #[test]
    fn gc_is_a_no_op_on_a_healthy_image() {
        let dir = TempDir::new().expect("tempdir");
        let mut fs = open_fs(&dir);
        let fd = fs.create("f").expect("create");
        fs.write(fd, b"one").expect("v1");
        fs.write(fd, b"two").expect("v2");

        let usage_before = fs.get_total_memory_usage();
        let runs_before = fs.free_runs().to_vec();
        assert_eq!(fs.garbage_collect(), 0);
        assert_eq!(fs.get_total_memory_usage(), usage_before);
        assert_eq!(fs.free_runs(), runs_before.as_slice());
        assert_healthy(&fs);
    }

    #[test]
    fn version_timestamps_have_the_expected_shape() {
        let dir = TempDir::new().expect("tempdir");
        let mut fs = open_fs(&dir);
        let fd = fs.create("stamped").expect("create");
        fs.write(fd, b"data").expect("write");
        let history = fs.get_version_history(fd).expect("history");
        let stamp = &history[0].timestamp;
        // YYYY-MM-DD HH:MM:SS
        assert_eq!(stamp.len(), 19);
        assert_eq!(stamp.as_bytes()[4], b'-');
        assert_eq!(stamp.as_bytes()[10], b' ');
        assert_eq!(stamp.as_bytes()[13], b':');
    }

    #[test]
    fn metadata_snapshot_tracks_chains() {
        let dir = TempDir::new().expect("tempdir");
        let mut fs = open_fs(&dir);
        let fd = fs.create("meta").expect("create");
        fs.write(fd, &vec![7_u8; BLOCK_SIZE + 1]).expect("write");

        let snapshot = fs.metadata_snapshot();
        assert_eq!(snapshot.total_blocks, 256);
        assert_eq!(snapshot.blocks_in_use, 2);
        assert_eq!(snapshot.files.len(), 1);
        assert_eq!(snapshot.files[0].versions[0].chain_blocks, 2);
        assert_eq!(
            snapshot.free_blocks + snapshot.blocks_in_use,
            u64::from(snapshot.total_blocks)
        );
    }
}
