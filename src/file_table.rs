//! The set of live open-file handles and the per-inode access arbitration
//! behind `open` and `close`.
//!
//! `falloc` and `ffree` run under one table lock, which makes open/close
//! transitions the only point where concurrent handles to the same inode
//! reconcile. A caller whose requested mode conflicts with the inode's
//! current access parks on the table's condvar until some close makes the
//! inode available again; wake-ups are broadcast.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};

use log::trace;

use crate::block_dev::BlockDevice;
use crate::config::ROOT_INUMBER;
use crate::directory::Directory;
use crate::error::{FsError, Result};
use crate::file::{FileHandle, OpenMode};
use crate::inode::{Inode, InodeState};
use crate::superblock::SuperBlock;

/// In-memory arbitration for one inode. Absence from the map means idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Shared(u32),
    Exclusive,
}

struct TableInner {
    handles: Vec<Arc<FileHandle>>,
    access: HashMap<u16, Access>,
    /// Inodes whose name is already unbound; reclaimed on the last close.
    doomed: HashSet<u16>,
}

pub struct FileTable<D: BlockDevice> {
    device: Arc<D>,
    directory: Arc<Mutex<Directory>>,
    superblock: Arc<Mutex<SuperBlock>>,
    /// Serializes inode-record stores; see `FileSystem` for the lock order.
    imeta: Arc<Mutex<()>>,
    inner: Mutex<TableInner>,
    retry: Condvar,
}

impl<D: BlockDevice> FileTable<D> {
    pub(crate) fn new(
        device: Arc<D>,
        directory: Arc<Mutex<Directory>>,
        superblock: Arc<Mutex<SuperBlock>>,
        imeta: Arc<Mutex<()>>,
    ) -> Self {
        FileTable {
            device,
            directory,
            superblock,
            imeta,
            inner: Mutex::new(TableInner {
                handles: Vec::new(),
                access: HashMap::new(),
                doomed: HashSet::new(),
            }),
            retry: Condvar::new(),
        }
    }

    /// Resolves (or, for writable modes, creates) the named file, applies the
    /// access-mode state machine, and registers a new handle. Blocks while
    /// the requested mode conflicts with the inode's current access.
    pub fn falloc(&self, name: &str, mode: OpenMode) -> Result<Arc<FileHandle>> {
        if name.is_empty() {
            return Err(FsError::InvalidName);
        }
        let mut inner = self.inner.lock().unwrap();
        let (inumber, inode) = loop {
            let resolved = self.directory.lock().unwrap().resolve(name);
            match resolved {
                Some(inumber) => {
                    let admitted = match (mode, inner.access.get(&inumber)) {
                        (OpenMode::Read, None) => true,
                        (OpenMode::Read, Some(Access::Shared(_))) => true,
                        (_, None) => mode.writable(),
                        _ => false,
                    };
                    if !admitted {
                        trace!("open of {name:?} waits on inode {inumber}");
                        inner = self.retry.wait(inner).unwrap();
                        continue;
                    }
                    let inode = self.load_inode(inumber)?;
                    match inner.access.entry(inumber) {
                        Entry::Occupied(mut entry) => match entry.get_mut() {
                            Access::Shared(n) => *n += 1,
                            Access::Exclusive => unreachable!(),
                        },
                        Entry::Vacant(entry) => {
                            entry.insert(if mode == OpenMode::Read {
                                Access::Shared(1)
                            } else {
                                Access::Exclusive
                            });
                        }
                    }
                    break (inumber, inode);
                }
                None if mode.creates() => {
                    let inumber = {
                        let mut dir = self.directory.lock().unwrap();
                        dir.allocate(name).ok_or(FsError::OutOfInodes)?
                    };
                    if inner.access.contains_key(&inumber) {
                        // The first free slot belongs to an inode still being
                        // reclaimed. The name is bound now, so wait and take
                        // the resolve path once the last stale handle closes.
                        trace!("create of {name:?} waits on reclaimed inode {inumber}");
                        inner = self.retry.wait(inner).unwrap();
                        continue;
                    }
                    inner.access.insert(inumber, Access::Exclusive);
                    break (inumber, Inode::new());
                }
                None => return Err(FsError::NotFound),
            }
        };

        let mut inode = inode;
        inode.reference_count += 1;
        inode.state = if mode == OpenMode::Read {
            InodeState::Reading
        } else {
            InodeState::Writing
        };
        if let Err(e) = self.store_inode(&inode, inumber) {
            Self::release_access(&mut inner, inumber);
            return Err(e);
        }

        let handle = Arc::new(FileHandle::new(inumber, mode, inode));
        inner.handles.push(Arc::clone(&handle));
        Ok(handle)
    }

    /// Drops a handle from the open set, persists the inode, and wakes
    /// parked openers if the inode became available. Returns false if the
    /// handle was not registered.
    pub fn ffree(&self, handle: &Arc<FileHandle>) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(pos) = inner.handles.iter().position(|h| Arc::ptr_eq(h, handle)) else {
            return Ok(false);
        };
        inner.handles.remove(pos);
        let inumber = handle.inumber();

        let outcome = self.finish_close(&mut inner, inumber);
        Self::release_access(&mut inner, inumber);
        match inner.access.get(&inumber) {
            None | Some(Access::Shared(_)) => self.retry.notify_all(),
            Some(Access::Exclusive) => {}
        }
        outcome?;
        Ok(true)
    }

    /// Unbinds a name. Reclamation of the inode and its blocks is immediate
    /// when no handle is open, deferred to the last close otherwise.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let inumber = {
            let mut dir = self.directory.lock().unwrap();
            let Some(inumber) = dir.resolve(name) else {
                return Err(FsError::NotFound);
            };
            if inumber == ROOT_INUMBER {
                // slot 0 holds the volume directory itself
                return Err(FsError::InvalidName);
            }
            dir.free(inumber);
            inumber
        };

        if inner.access.contains_key(&inumber) {
            trace!("delete of {name:?} deferred, inode {inumber} has open handles");
            inner.doomed.insert(inumber);
            let mut inode = self.load_inode(inumber)?;
            inode.state = InodeState::ToDelete;
            self.store_inode(&inode, inumber)
        } else {
            let mut inode = self.load_inode(inumber)?;
            self.reclaim_blocks(&mut inode)?;
            self.store_inode(&Inode::new(), inumber)
        }
    }

    /// True iff no handles are open. Precondition for `format`.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().handles.is_empty()
    }

    /// Runs `rebuild` (reformatting the superblock and directory) with the
    /// table locked and verified empty, then resets the arbitration state.
    pub(crate) fn reformat(&self, rebuild: impl FnOnce() -> Result<()>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.handles.is_empty() {
            return Err(FsError::Busy);
        }
        rebuild()?;
        inner.access.clear();
        inner.doomed.clear();
        self.retry.notify_all();
        Ok(())
    }

    fn finish_close(&self, inner: &mut TableInner, inumber: u16) -> Result<()> {
        // The on-disk record is authoritative across open/close transitions;
        // the handle's private copy dies with the handle.
        let mut inode = self.load_inode(inumber)?;
        inode.reference_count = inode.reference_count.saturating_sub(1);
        if inode.reference_count == 0 {
            if inner.doomed.remove(&inumber) {
                trace!("reclaiming deleted inode {inumber} on last close");
                self.reclaim_blocks(&mut inode)?;
                inode = Inode::new();
            } else {
                inode.state = InodeState::Unused;
            }
        }
        self.store_inode(&inode, inumber)
    }

    fn reclaim_blocks(&self, inode: &mut Inode) -> Result<()> {
        let freed = inode.release_all_blocks(&*self.device)?;
        let mut sb = self.superblock.lock().unwrap();
        for block in freed {
            sb.return_block(&*self.device, block as u32)?;
        }
        Ok(())
    }

    fn release_access(inner: &mut TableInner, inumber: u16) {
        let emptied = match inner.access.get_mut(&inumber) {
            Some(Access::Shared(n)) if *n > 1 => {
                *n -= 1;
                false
            }
            Some(_) => true,
            None => false,
        };
        if emptied {
            inner.access.remove(&inumber);
        }
    }

    fn load_inode(&self, inumber: u16) -> Result<Inode> {
        let _region = self.imeta.lock().unwrap();
        Inode::load(&*self.device, inumber)
    }

    fn store_inode(&self, inode: &Inode, inumber: u16) -> Result<()> {
        let _region = self.imeta.lock().unwrap();
        inode.store(&*self.device, inumber)
    }
}
