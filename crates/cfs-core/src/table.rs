//! Inode table and runtime file-descriptor table.

use cfs_error::{CfsError, Result};
use cfs_ondisk::Inode;
use cfs_types::{Fd, InodeIndex, MAX_FILENAME_LENGTH, MAX_FILES};
use serde::Serialize;
use tracing::trace;

/// Access mode of an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileMode {
    Read,
    Write,
}

/// Runtime state of one open handle. Never persisted.
#[derive(Debug, Clone, Copy)]
pub struct FileHandle {
    pub inode: InodeIndex,
    pub mode: FileMode,
    pub cursor: u64,
    pub valid: bool,
}

impl FileHandle {
    fn vacant() -> Self {
        Self {
            inode: InodeIndex(0),
            mode: FileMode::Read,
            cursor: 0,
            valid: false,
        }
    }
}

/// Fixed-size array of inode slots with lookup by name.
#[derive(Debug)]
pub struct InodeTable {
    slots: Vec<Inode>,
}

impl InodeTable {
    /// All slots unused.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![Inode::empty(); MAX_FILES],
        }
    }

    /// Adopt slots recovered from an image.
    #[must_use]
    pub fn from_slots(slots: Vec<Inode>) -> Self {
        debug_assert_eq!(slots.len(), MAX_FILES);
        Self { slots }
    }

    #[must_use]
    pub fn slots(&self) -> &[Inode] {
        &self.slots
    }

    pub fn get(&self, index: InodeIndex) -> Option<&Inode> {
        self.slots.get(index.as_usize())
    }

    pub fn get_mut(&mut self, index: InodeIndex) -> Option<&mut Inode> {
        self.slots.get_mut(index.as_usize())
    }

    /// First in-use slot whose name matches byte-for-byte.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<InodeIndex> {
        self.slots
            .iter()
            .position(|slot| slot.in_use && slot.name == name)
            .map(|idx| InodeIndex(idx as u32))
    }

    /// Claim the first unused slot for a new file named `name`.
    pub fn claim(&mut self, name: &str) -> Result<InodeIndex> {
        if name.as_bytes().contains(&0) {
            return Err(CfsError::InvalidName);
        }
        if name.len() >= MAX_FILENAME_LENGTH {
            return Err(CfsError::NameTooLong {
                len: name.len(),
                max: MAX_FILENAME_LENGTH,
            });
        }
        if self.find(name).is_some() {
            return Err(CfsError::AlreadyExists(name.to_owned()));
        }

        let idx = self
            .slots
            .iter()
            .position(|slot| !slot.in_use)
            .ok_or(CfsError::NoFreeInode)?;

        let slot = &mut self.slots[idx];
        *slot = Inode::empty();
        slot.name = name.to_owned();
        slot.in_use = true;
        trace!(target: "cfs::inode", slot = idx, name, "inode_claimed");
        Ok(InodeIndex(idx as u32))
    }

    /// Return a slot to the unused pool (undo of a failed create).
    pub fn release(&mut self, index: InodeIndex) {
        if let Some(slot) = self.slots.get_mut(index.as_usize()) {
            *slot = Inode::empty();
        }
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-size table mapping open-file handles to (inode, mode, cursor).
#[derive(Debug)]
pub struct HandleTable {
    handles: Vec<FileHandle>,
}

impl HandleTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handles: vec![FileHandle::vacant(); MAX_FILES],
        }
    }

    /// Claim the lowest invalid slot for `inode`, cursor at zero.
    pub fn allocate(&mut self, inode: InodeIndex, mode: FileMode) -> Result<Fd> {
        let idx = self
            .handles
            .iter()
            .position(|h| !h.valid)
            .ok_or(CfsError::NoFreeHandle)?;
        self.handles[idx] = FileHandle {
            inode,
            mode,
            cursor: 0,
            valid: true,
        };
        trace!(target: "cfs::fd", fd = idx, inode = inode.0, "handle_opened");
        Ok(Fd(idx as u32))
    }

    pub fn get(&self, fd: Fd) -> Result<&FileHandle> {
        self.handles
            .get(fd.as_usize())
            .filter(|h| h.valid)
            .ok_or(CfsError::InvalidHandle { fd })
    }

    pub fn get_mut(&mut self, fd: Fd) -> Result<&mut FileHandle> {
        self.handles
            .get_mut(fd.as_usize())
            .filter(|h| h.valid)
            .ok_or(CfsError::InvalidHandle { fd })
    }

    /// Invalidate a handle. Never releases inodes or blocks.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let handle = self.get_mut(fd)?;
        handle.valid = false;
        trace!(target: "cfs::fd", fd = fd.0, "handle_closed");
        Ok(())
    }

    /// Whether `fd` refers to a currently open handle.
    #[must_use]
    pub fn is_open(&self, fd: Fd) -> bool {
        self.handles.get(fd.as_usize()).is_some_and(|h| h.valid)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
