//! Open-file handles: a private inode copy, an access mode, and a seek
//! pointer behind one per-handle lock.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::inode::Inode;

/// How a file is opened. Decides creation, truncation, and which of
/// read/write are legal on the resulting handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Seek at 0; fails if the name is absent.
    Read,
    /// Seek at 0; truncates existing content; creates the name if absent.
    Write,
    /// Seek at 0; preserves content; creates the name if absent.
    WriteRead,
    /// Seek forced to end-of-file; creates the name if absent.
    Append,
}

impl OpenMode {
    pub fn readable(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::WriteRead)
    }

    pub fn writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    /// Modes that may bind a missing name to a fresh inode.
    pub fn creates(self) -> bool {
        self.writable()
    }

    pub fn truncates(self) -> bool {
        matches!(self, OpenMode::Write)
    }
}

/// Where a seek offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    FromStart,
    FromCurrent,
    FromEnd,
}

#[derive(Debug)]
pub(crate) struct HandleState {
    /// The handle's private inode copy; authoritative for the file's length
    /// and pointers while the handle is open.
    pub inode: Inode,
    pub seek: u32,
    pub share_count: u16,
    /// Append handles force the seek pointer to end-of-file on their first
    /// write.
    pub append_pending: bool,
    pub closed: bool,
}

/// One open-file session. Every operation on the handle (read, write, seek,
/// fsize, close) locks `state` for its whole duration, so concurrent calls on
/// the same handle serialize against each other.
#[derive(Debug)]
pub struct FileHandle {
    inumber: u16,
    mode: OpenMode,
    pub(crate) state: Mutex<HandleState>,
}

impl FileHandle {
    pub(crate) fn new(inumber: u16, mode: OpenMode, inode: Inode) -> Self {
        let seek = if mode == OpenMode::Append {
            inode.length
        } else {
            0
        };
        FileHandle {
            inumber,
            mode,
            state: Mutex::new(HandleState {
                inode,
                seek,
                share_count: 1,
                append_pending: mode == OpenMode::Append,
                closed: false,
            }),
        }
    }

    pub fn inumber(&self) -> u16 {
        self.inumber
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Registers another user of this handle. Every share must be balanced by
    /// its own `FileSystem::close`; only the last close releases the inode.
    pub fn share(handle: &Arc<FileHandle>) -> Arc<FileHandle> {
        handle.state.lock().unwrap().share_count += 1;
        Arc::clone(handle)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap()
    }
}
