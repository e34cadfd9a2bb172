//! Fixed 32-byte inode records and their direct/indirect block addressing.

use crate::block_dev::BlockDevice;
use crate::config::*;
use crate::error::{FsError, Result};

/// Access flag persisted in the inode's `state` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InodeState {
    #[default]
    Unused,
    Used,
    Reading,
    Writing,
    /// Name already unbound; reclaim the record once the last handle closes.
    ToDelete,
}

impl InodeState {
    fn to_disk(self) -> i16 {
        match self {
            InodeState::Unused => 0,
            InodeState::Used => 1,
            InodeState::Reading => 2,
            InodeState::Writing => 3,
            InodeState::ToDelete => 4,
        }
    }

    fn from_disk(raw: i16) -> Self {
        match raw {
            1 => InodeState::Used,
            2 => InodeState::Reading,
            3 => InodeState::Writing,
            4 => InodeState::ToDelete,
            _ => InodeState::Unused,
        }
    }
}

/// Outcome of wiring a data block into an inode's addressing scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAssignment {
    Assigned,
    /// The slot covering this offset already holds a block.
    AlreadyAssigned,
    /// The offset lands in the indirect range but no indirection block is
    /// attached yet.
    NeedsIndirect,
    /// A direct slot may only be filled once every lower slot is filled.
    OutOfOrder,
}

/// One file's on-disk record: byte length, open-handle count, access state,
/// eleven direct block pointers and one indirection block pointer.
///
/// Records are packed 16 per block starting at block 1. An unassigned pointer
/// is `-1` on disk and `None` here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub length: u32,
    pub reference_count: u16,
    pub state: InodeState,
    pub direct: [Option<u16>; NUM_DIRECT_PTRS],
    pub indirect: Option<u16>,
}

fn decode_ptr(bytes: &[u8]) -> Option<u16> {
    let raw = i16::from_be_bytes(bytes[0..2].try_into().unwrap());
    (raw >= 0).then_some(raw as u16)
}

fn encode_ptr(ptr: Option<u16>) -> [u8; 2] {
    match ptr {
        Some(block) => (block as i16).to_be_bytes(),
        None => (-1i16).to_be_bytes(),
    }
}

impl Default for Inode {
    fn default() -> Self {
        Self::new()
    }
}

impl Inode {
    pub fn new() -> Self {
        Inode {
            length: 0,
            reference_count: 0,
            state: InodeState::Unused,
            direct: [None; NUM_DIRECT_PTRS],
            indirect: None,
        }
    }

    /// Metadata block and in-block byte offset holding record `inumber`.
    fn location(inumber: u16) -> (u32, usize) {
        (
            1 + inumber as u32 / INODES_PER_BLOCK as u32,
            (inumber as usize % INODES_PER_BLOCK) * INODE_SIZE,
        )
    }

    pub fn load(device: &impl BlockDevice, inumber: u16) -> Result<Self> {
        let (block, offset) = Self::location(inumber);
        let mut buf = [0u8; BLOCK_SIZE];
        device.read_block(block, &mut buf)?;
        let rec = &buf[offset..offset + INODE_SIZE];

        let length = i32::from_be_bytes(rec[0..4].try_into().unwrap()).max(0) as u32;
        let reference_count = i16::from_be_bytes(rec[4..6].try_into().unwrap()).max(0) as u16;
        let state = InodeState::from_disk(i16::from_be_bytes(rec[6..8].try_into().unwrap()));
        let mut direct = [None; NUM_DIRECT_PTRS];
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = decode_ptr(&rec[8 + 2 * i..]);
        }
        let indirect = decode_ptr(&rec[8 + 2 * NUM_DIRECT_PTRS..]);

        Ok(Inode {
            length,
            reference_count,
            state,
            direct,
            indirect,
        })
    }

    /// Writes this record into its slot of the owning metadata block,
    /// leaving the 15 sibling records in the block untouched.
    pub fn store(&self, device: &impl BlockDevice, inumber: u16) -> Result<()> {
        let (block, offset) = Self::location(inumber);
        let mut buf = [0u8; BLOCK_SIZE];
        device.read_block(block, &mut buf)?;

        let rec = &mut buf[offset..offset + INODE_SIZE];
        rec[0..4].copy_from_slice(&(self.length as i32).to_be_bytes());
        rec[4..6].copy_from_slice(&(self.reference_count as i16).to_be_bytes());
        rec[6..8].copy_from_slice(&self.state.to_disk().to_be_bytes());
        for (i, slot) in self.direct.iter().enumerate() {
            rec[8 + 2 * i..10 + 2 * i].copy_from_slice(&encode_ptr(*slot));
        }
        let at = 8 + 2 * NUM_DIRECT_PTRS;
        rec[at..at + 2].copy_from_slice(&encode_ptr(self.indirect));

        device.write_block(block, &buf)
    }

    /// Resolves the data block covering `offset`, or `None` when the slot is
    /// unassigned or the indirection block is missing.
    pub fn find_target_block(&self, device: &impl BlockDevice, offset: u32) -> Result<Option<u16>> {
        let index = offset as usize / BLOCK_SIZE;
        if index < NUM_DIRECT_PTRS {
            return Ok(self.direct[index]);
        }
        let Some(indirect) = self.indirect else {
            return Ok(None);
        };
        let index = index - NUM_DIRECT_PTRS;
        if index >= PTRS_PER_INDIRECT {
            return Ok(None);
        }
        let mut buf = [0u8; BLOCK_SIZE];
        device.read_block(indirect as u32, &mut buf)?;
        Ok(decode_ptr(&buf[index * 2..]))
    }

    /// Wires `block` in as the data block covering `offset`. Direct slots are
    /// only mutated in memory (the caller persists the record); indirect
    /// slots are written through to the indirection block immediately.
    pub fn assign_block(
        &mut self,
        device: &impl BlockDevice,
        offset: u32,
        block: u16,
    ) -> Result<BlockAssignment> {
        let index = offset as usize / BLOCK_SIZE;
        if index < NUM_DIRECT_PTRS {
            if self.direct[index].is_some() {
                return Ok(BlockAssignment::AlreadyAssigned);
            }
            if index > 0 && self.direct[index - 1].is_none() {
                return Ok(BlockAssignment::OutOfOrder);
            }
            self.direct[index] = Some(block);
            return Ok(BlockAssignment::Assigned);
        }

        let index = index - NUM_DIRECT_PTRS;
        if index >= PTRS_PER_INDIRECT {
            return Err(FsError::FileTooLarge);
        }
        let Some(indirect) = self.indirect else {
            return Ok(BlockAssignment::NeedsIndirect);
        };
        let mut buf = [0u8; BLOCK_SIZE];
        device.read_block(indirect as u32, &mut buf)?;
        let at = index * 2;
        if decode_ptr(&buf[at..]).is_some() {
            return Ok(BlockAssignment::AlreadyAssigned);
        }
        buf[at..at + 2].copy_from_slice(&encode_ptr(Some(block)));
        device.write_block(indirect as u32, &buf)?;
        Ok(BlockAssignment::Assigned)
    }

    /// Registers `block` as the indirection block. Succeeds only once all
    /// direct slots are filled and no indirection block is attached yet; the
    /// block is initialized to all-unassigned pointers.
    pub fn attach_indirect_block(&mut self, device: &impl BlockDevice, block: u16) -> Result<bool> {
        if self.indirect.is_some() || self.direct.iter().any(|slot| slot.is_none()) {
            return Ok(false);
        }
        let mut buf = [0u8; BLOCK_SIZE];
        for chunk in buf.chunks_exact_mut(2) {
            chunk.copy_from_slice(&(-1i16).to_be_bytes());
        }
        device.write_block(block as u32, &buf)?;
        self.indirect = Some(block);
        Ok(true)
    }

    /// Detaches every block this inode addresses (direct blocks, blocks
    /// referenced through the indirection block, and the indirection block
    /// itself) and returns the lot for the caller to hand back to the
    /// allocator.
    pub fn release_all_blocks(&mut self, device: &impl BlockDevice) -> Result<Vec<u16>> {
        let mut freed: Vec<u16> = self.direct.iter_mut().filter_map(|slot| slot.take()).collect();
        if let Some(indirect) = self.indirect.take() {
            let mut buf = [0u8; BLOCK_SIZE];
            device.read_block(indirect as u32, &mut buf)?;
            for chunk in buf.chunks_exact(2) {
                if let Some(block) = decode_ptr(chunk) {
                    freed.push(block);
                }
            }
            freed.push(indirect);
        }
        Ok(freed)
    }
}
