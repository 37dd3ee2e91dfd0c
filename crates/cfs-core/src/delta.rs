//! Change-window detection between two content buffers.
//!
//! The detector reports the byte window of the new buffer that differs from
//! the old one. It is informational: writes always store the full new content
//! as a fresh chain. Its one behavioral role is the no-op shortcut: a window
//! of size zero means the write records no new version.

/// The byte window `[start, start + size)` of the new buffer that differs
/// from the old buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delta {
    pub start: usize,
    pub size: usize,
}

/// Compare `old` and `new` content and locate the changed window.
///
/// A `size` of zero means the new content adds nothing over the old: either
/// the buffers are identical, or the new content is a plain prefix of the old
/// (a pure truncation).
#[must_use]
pub fn find_delta(old: &[u8], new: &[u8]) -> Delta {
    if old.len() == new.len() && old == new {
        return Delta { start: 0, size: 0 };
    }

    let bound = old.len().min(new.len());
    let mut start = 0;
    while start < bound && old[start] == new[start] {
        start += 1;
    }

    // New content is a prefix of the old.
    if start == new.len() && new.len() <= old.len() {
        return Delta { start, size: 0 };
    }

    // Old content is a prefix of the new: the window is the appended tail.
    if start == old.len() && new.len() > old.len() {
        return Delta {
            start,
            size: new.len() - old.len(),
        };
    }

    let max_suffix = bound - start;
    let mut suffix = 0;
    while suffix < max_suffix && old[old.len() - 1 - suffix] == new[new.len() - 1 - suffix] {
        suffix += 1;
    }

    let mut size = (new.len() - start) - suffix;
    if start + size > new.len() {
        size = new.len() - start;
    }
    Delta { start, size }
}
