//! The file-system facade: byte-offset read/write/seek over block storage.

use std::sync::{Arc, Mutex};

use log::warn;

use crate::block_dev::BlockDevice;
use crate::config::*;
use crate::directory::Directory;
use crate::error::{FsError, Result};
use crate::file::{FileHandle, HandleState, OpenMode, SeekOrigin};
use crate::file_table::FileTable;
use crate::inode::{BlockAssignment, Inode};
use crate::superblock::SuperBlock;

/// One mounted volume. All operations take `&self`; concurrency is handled
/// by the handle, table, allocator, and inode-region locks (lock order:
/// table -> directory / inode-region / allocator; the last three never nest).
pub struct FileSystem<D: BlockDevice> {
    device: Arc<D>,
    superblock: Arc<Mutex<SuperBlock>>,
    directory: Arc<Mutex<Directory>>,
    table: FileTable<D>,
    /// Inode stores are read-modify-writes of shared metadata blocks; this
    /// lock keeps stores of neighboring records from losing updates.
    imeta: Arc<Mutex<()>>,
}

impl<D: BlockDevice> FileSystem<D> {
    /// Mounts the volume (formatting it if the device carries no
    /// recognizable one) and loads the name table out of inode 0.
    pub fn mount(device: Arc<D>) -> Result<Self> {
        let superblock = SuperBlock::mount(&*device)?;
        let directory = Arc::new(Mutex::new(Directory::new(superblock.total_inodes as usize)));
        let superblock = Arc::new(Mutex::new(superblock));
        let imeta = Arc::new(Mutex::new(()));
        let table = FileTable::new(
            Arc::clone(&device),
            Arc::clone(&directory),
            Arc::clone(&superblock),
            Arc::clone(&imeta),
        );
        let fs = FileSystem {
            device,
            superblock,
            directory,
            table,
            imeta,
        };
        fs.load_directory()?;
        Ok(fs)
    }

    /// Reformats the volume with `num_files` inodes and rebuilds an empty
    /// name table. Refused while any file is open.
    pub fn format(&self, num_files: u16) -> Result<()> {
        self.table.reformat(|| {
            let formatted = SuperBlock::format(&*self.device, num_files)?;
            let capacity = formatted.total_inodes as usize;
            *self.superblock.lock().unwrap() = formatted;
            *self.directory.lock().unwrap() = Directory::new(capacity);
            Ok(())
        })
    }

    /// Opens `name` in the given mode. Plain write mode releases every block
    /// the file owned and resets its length before the handle is returned.
    pub fn open(&self, name: &str, mode: OpenMode) -> Result<Arc<FileHandle>> {
        let handle = self.table.falloc(name, mode)?;
        if mode.truncates() {
            if let Err(e) = self.truncate(&handle) {
                let _ = self.close(&handle);
                return Err(e);
            }
        }
        Ok(handle)
    }

    /// Releases one share of the handle; the last share frees it through the
    /// file table.
    pub fn close(&self, handle: &Arc<FileHandle>) -> Result<()> {
        {
            let mut state = handle.lock();
            if state.closed {
                return Err(FsError::InvalidHandle);
            }
            state.share_count -= 1;
            if state.share_count > 0 {
                return Ok(());
            }
            state.closed = true;
        }
        self.table.ffree(handle)?;
        Ok(())
    }

    /// Reads from the handle's seek pointer into `buffer`. Returns the bytes
    /// copied, which is short of `buffer.len()` at end-of-file or at a hole.
    pub fn read(&self, handle: &FileHandle, buffer: &mut [u8]) -> Result<usize> {
        if !handle.mode().readable() {
            return Err(FsError::ModeConflict);
        }
        let mut state = handle.lock();
        if state.closed {
            return Err(FsError::InvalidHandle);
        }

        let length = state.inode.length;
        let mut copied = 0;
        while copied < buffer.len() && state.seek < length {
            let Some(block) = state.inode.find_target_block(&*self.device, state.seek)? else {
                // a hole ends the read, it is not an error
                break;
            };
            let mut data = [0u8; BLOCK_SIZE];
            self.device.read_block(block as u32, &mut data)?;

            let offset = state.seek as usize % BLOCK_SIZE;
            let span = (BLOCK_SIZE - offset)
                .min((length - state.seek) as usize)
                .min(buffer.len() - copied);
            buffer[copied..copied + span].copy_from_slice(&data[offset..offset + span]);
            copied += span;
            state.seek += span as u32;
        }
        Ok(copied)
    }

    /// Writes `data` at the handle's seek pointer, allocating blocks as
    /// needed. When allocation fails mid-stream the bytes already written
    /// stay in place: the call returns the partial count if anything landed
    /// and the fault itself otherwise.
    pub fn write(&self, handle: &FileHandle, data: &[u8]) -> Result<usize> {
        if !handle.mode().writable() {
            return Err(FsError::ModeConflict);
        }
        let mut state = handle.lock();
        if state.closed {
            return Err(FsError::InvalidHandle);
        }
        if state.append_pending {
            state.seek = state.inode.length;
            state.append_pending = false;
        }

        let mut written = 0;
        let mut fault = None;
        while written < data.len() {
            let block = match self.block_for_write(&mut state) {
                Ok(Some(block)) => block,
                Ok(None) => {
                    warn!(
                        "write on inode {} aborted after {} bytes: no free blocks",
                        handle.inumber(),
                        written
                    );
                    fault = Some(FsError::OutOfSpace);
                    break;
                }
                Err(e) => {
                    fault = Some(e);
                    break;
                }
            };

            let mut buf = [0u8; BLOCK_SIZE];
            if let Err(e) = self.device.read_block(block as u32, &mut buf) {
                fault = Some(e);
                break;
            }
            let offset = state.seek as usize % BLOCK_SIZE;
            let span = (BLOCK_SIZE - offset).min(data.len() - written);
            buf[offset..offset + span].copy_from_slice(&data[written..written + span]);
            if let Err(e) = self.device.write_block(block as u32, &buf) {
                fault = Some(e);
                break;
            }
            written += span;
            state.seek += span as u32;
        }

        if state.seek > state.inode.length {
            state.inode.length = state.seek;
        }
        self.store_inode(&state.inode, handle.inumber())?;

        match fault {
            Some(e) if written == 0 => Err(e),
            _ => Ok(written),
        }
    }

    /// Moves the handle's seek pointer, clamped into `[0, length]`. The whole
    /// operation is one critical section on the handle.
    pub fn seek(&self, handle: &FileHandle, offset: i32, origin: SeekOrigin) -> Result<u32> {
        let mut state = handle.lock();
        if state.closed {
            return Err(FsError::InvalidHandle);
        }
        let base = match origin {
            SeekOrigin::FromStart => 0,
            SeekOrigin::FromCurrent => state.seek as i64,
            SeekOrigin::FromEnd => state.inode.length as i64,
        };
        let target = (base + offset as i64).clamp(0, state.inode.length as i64);
        state.seek = target as u32;
        Ok(state.seek)
    }

    /// Current size of the handle's file in bytes.
    pub fn fsize(&self, handle: &FileHandle) -> Result<u32> {
        let state = handle.lock();
        if state.closed {
            return Err(FsError::InvalidHandle);
        }
        Ok(state.inode.length)
    }

    /// Unbinds `name`. Reclamation is immediate when the file is not open
    /// and deferred to the last close otherwise.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.table.remove(name)
    }

    /// Serializes the name table into inode 0 and flushes the superblock and
    /// the device.
    pub fn sync(&self) -> Result<()> {
        let handle = self.open("/", OpenMode::Write)?;
        let image = self.directory.lock().unwrap().serialize();
        let outcome = self.write(&handle, &image);
        self.close(&handle)?;
        if outcome? < image.len() {
            return Err(FsError::OutOfSpace);
        }
        self.superblock.lock().unwrap().sync(&*self.device)?;
        self.device.flush()
    }

    /// True iff any handle is currently open.
    pub fn has_open_files(&self) -> bool {
        !self.table.is_empty()
    }

    /// Snapshot of the current volume header.
    pub fn superblock(&self) -> SuperBlock {
        self.superblock.lock().unwrap().clone()
    }

    pub fn device(&self) -> Arc<D> {
        Arc::clone(&self.device)
    }
}

impl<D: BlockDevice> FileSystem<D> {
    /// Reads inode 0's content and rebuilds the in-memory name table from it.
    fn load_directory(&self) -> Result<()> {
        let handle = self.table.falloc("/", OpenMode::Read)?;
        let size = self.fsize(&handle)? as usize;
        let outcome = if size > 0 {
            let mut image = vec![0u8; size];
            self.read(&handle, &mut image).map(|n| {
                self.directory.lock().unwrap().deserialize(&image[..n]);
            })
        } else {
            Ok(())
        };
        self.close(&handle)?;
        outcome
    }

    /// Releases every block the handle's inode owns and zeroes its length.
    fn truncate(&self, handle: &Arc<FileHandle>) -> Result<()> {
        let mut state = handle.lock();
        let freed = state.inode.release_all_blocks(&*self.device)?;
        {
            let mut sb = self.superblock.lock().unwrap();
            for block in freed {
                sb.return_block(&*self.device, block as u32)?;
            }
        }
        state.inode.length = 0;
        state.seek = 0;
        self.store_inode(&state.inode, handle.inumber())
    }

    /// Resolves the block covering the seek pointer, allocating and wiring
    /// in a fresh one (plus the indirection block when the direct slots run
    /// out) if the offset is unmapped. `Ok(None)` means the allocator is
    /// exhausted.
    fn block_for_write(&self, state: &mut HandleState) -> Result<Option<u16>> {
        let seek = state.seek;
        if seek as usize >= MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge);
        }
        if let Some(block) = state.inode.find_target_block(&*self.device, seek)? {
            return Ok(Some(block));
        }

        let mut sb = self.superblock.lock().unwrap();
        let Some(block) = sb.next_free_block(&*self.device)? else {
            return Ok(None);
        };
        let block = block as u16;
        match state.inode.assign_block(&*self.device, seek, block)? {
            BlockAssignment::Assigned => Ok(Some(block)),
            BlockAssignment::NeedsIndirect => {
                let Some(index_block) = sb.next_free_block(&*self.device)? else {
                    sb.return_block(&*self.device, block as u32)?;
                    return Ok(None);
                };
                if !state
                    .inode
                    .attach_indirect_block(&*self.device, index_block as u16)?
                {
                    sb.return_block(&*self.device, index_block)?;
                    sb.return_block(&*self.device, block as u32)?;
                    return Err(FsError::LayoutCorruption);
                }
                match state.inode.assign_block(&*self.device, seek, block)? {
                    BlockAssignment::Assigned => Ok(Some(block)),
                    _ => {
                        sb.return_block(&*self.device, block as u32)?;
                        Err(FsError::LayoutCorruption)
                    }
                }
            }
            BlockAssignment::AlreadyAssigned | BlockAssignment::OutOfOrder => {
                sb.return_block(&*self.device, block as u32)?;
                Err(FsError::LayoutCorruption)
            }
        }
    }

    fn store_inode(&self, inode: &Inode, inumber: u16) -> Result<()> {
        let _region = self.imeta.lock().unwrap();
        inode.store(&*self.device, inumber)
    }
}
