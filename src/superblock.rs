//! Block 0 metadata and the free-block list threaded through it.

use log::debug;

use crate::block_dev::BlockDevice;
use crate::config::*;
use crate::error::{FsError, Result};
use crate::inode::Inode;

/// Volume header stored in block 0. Owns the chain of free blocks: each free
/// block's first four bytes hold the number of the next free block, the last
/// one holds `-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub total_blocks: u32,
    pub total_inodes: u32,
    free_list_head: Option<u32>,
}

/// Number of blocks the packed inode table occupies.
pub fn inode_table_blocks(num_inodes: u16) -> u32 {
    (num_inodes as u32).div_ceil(INODES_PER_BLOCK as u32)
}

impl SuperBlock {
    /// Reads block 0 and adopts the stored header when it matches the device.
    /// A fresh device, a resized image, or garbage metadata all get
    /// reformatted with the default inode count.
    pub fn mount(device: &impl BlockDevice) -> Result<Self> {
        let mut buf = [0u8; BLOCK_SIZE];
        device.read_block(SUPERBLOCK_ID, &mut buf)?;
        let total_blocks = i32::from_be_bytes(buf[0..4].try_into().unwrap());
        let total_inodes = i32::from_be_bytes(buf[4..8].try_into().unwrap());
        let free_list_head = i32::from_be_bytes(buf[8..12].try_into().unwrap());

        if total_blocks == device.num_blocks() as i32 && total_inodes > 0 && free_list_head >= 2 {
            return Ok(SuperBlock {
                total_blocks: total_blocks as u32,
                total_inodes: total_inodes as u32,
                free_list_head: Some(free_list_head as u32),
            });
        }
        debug!("no recognizable volume on the device, formatting");
        Self::format(device, DEFAULT_NUM_INODES)
    }

    /// Writes a fresh inode table and links every remaining block into the
    /// free list, then persists the header.
    pub fn format(device: &impl BlockDevice, num_inodes: u16) -> Result<Self> {
        let total_blocks = device.num_blocks() as u32;
        if total_blocks as usize > MAX_DEVICE_BLOCKS {
            return Err(FsError::OutOfBounds);
        }
        if num_inodes == 0 {
            return Err(FsError::OutOfBounds);
        }
        let head = inode_table_blocks(num_inodes) + 1;
        if head >= total_blocks {
            // the volume must hold at least one data block past the inode table
            return Err(FsError::OutOfSpace);
        }

        let blank = Inode::new();
        for inumber in 0..num_inodes {
            blank.store(device, inumber)?;
        }

        let mut buf = [0u8; BLOCK_SIZE];
        for block in head..total_blocks {
            let next: i32 = if block + 1 < total_blocks {
                (block + 1) as i32
            } else {
                -1
            };
            buf[0..4].copy_from_slice(&next.to_be_bytes());
            device.write_block(block, &buf)?;
        }

        let sb = SuperBlock {
            total_blocks,
            total_inodes: num_inodes as u32,
            free_list_head: Some(head),
        };
        sb.sync(device)?;
        debug!(
            "formatted volume: {} blocks, {} inodes, free list starts at block {}",
            total_blocks, num_inodes, head
        );
        Ok(sb)
    }

    /// Pops the head of the free list, or `None` when the list is exhausted
    /// or its head points outside the data region.
    pub fn next_free_block(&mut self, device: &impl BlockDevice) -> Result<Option<u32>> {
        let Some(head) = self.free_list_head else {
            return Ok(None);
        };
        if head < 2 || head >= self.total_blocks {
            return Ok(None);
        }
        let mut buf = [0u8; BLOCK_SIZE];
        device.read_block(head, &mut buf)?;
        let next = i32::from_be_bytes(buf[0..4].try_into().unwrap());
        self.free_list_head = (next >= 0).then_some(next as u32);
        // hand out clean blocks so the chain pointer never leaks into file data
        device.write_block(head, &[0u8; BLOCK_SIZE])?;
        Ok(Some(head))
    }

    /// Pushes a block back onto the front of the free list. O(1), LIFO.
    /// The caller must not return a block twice.
    pub fn return_block(&mut self, device: &impl BlockDevice, block: u32) -> Result<()> {
        if block < 2 || block >= self.total_blocks {
            return Err(FsError::InvalidBlockId);
        }
        let next: i32 = match self.free_list_head {
            Some(head) => head as i32,
            None => -1,
        };
        let mut buf = [0u8; BLOCK_SIZE];
        buf[0..4].copy_from_slice(&next.to_be_bytes());
        device.write_block(block, &buf)?;
        self.free_list_head = Some(block);
        Ok(())
    }

    /// Writes the three header integers back to block 0.
    pub fn sync(&self, device: &impl BlockDevice) -> Result<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[0..4].copy_from_slice(&(self.total_blocks as i32).to_be_bytes());
        buf[4..8].copy_from_slice(&(self.total_inodes as i32).to_be_bytes());
        let head: i32 = match self.free_list_head {
            Some(head) => head as i32,
            None => -1,
        };
        buf[8..12].copy_from_slice(&head.to_be_bytes());
        device.write_block(SUPERBLOCK_ID, &buf)
    }

    pub fn free_list_head(&self) -> Option<u32> {
        self.free_list_head
    }

    /// Walks the free chain without consuming it and counts its links.
    /// Bails out at `total_blocks` hops if the chain ever loops.
    pub fn free_block_count(&self, device: &impl BlockDevice) -> Result<u32> {
        let mut count = 0;
        let mut cursor = self.free_list_head;
        let mut buf = [0u8; BLOCK_SIZE];
        while let Some(block) = cursor {
            if block < 2 || block >= self.total_blocks || count >= self.total_blocks {
                return Err(FsError::LayoutCorruption);
            }
            count += 1;
            device.read_block(block, &mut buf)?;
            let next = i32::from_be_bytes(buf[0..4].try_into().unwrap());
            cursor = (next >= 0).then_some(next as u32);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_inode_table_blocks() {
        assert_eq!(inode_table_blocks(1), 1);
        assert_eq!(inode_table_blocks(16), 1);
        assert_eq!(inode_table_blocks(17), 2);
        assert_eq!(inode_table_blocks(64), 4);
    }
}
