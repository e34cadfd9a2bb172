pub const BLOCK_SIZE: usize = 512;
pub const SUPERBLOCK_ID: u32 = 0; // Block ID for the superblock
pub const ROOT_INUMBER: u16 = 0; // Inode number of "/", holder of the directory table

pub const INODE_SIZE: usize = 32;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE; // 16

pub const NUM_DIRECT_PTRS: usize = 11; // Number of direct pointers in an inode
pub const PTRS_PER_INDIRECT: usize = BLOCK_SIZE / 2; // 2-byte pointers per indirection block
pub const MAX_FILE_SIZE: usize = (NUM_DIRECT_PTRS + PTRS_PER_INDIRECT) * BLOCK_SIZE;

pub const MAX_NAME_LEN: usize = 30; // Maximum characters of a directory name
pub const NAME_CHAR_STRIDE: usize = 2; // Bytes per character in the serialized name region

pub const DEFAULT_NUM_INODES: u16 = 64; // Inode count when formatting an unrecognizable volume

// Block pointers are 2-byte signed integers on disk, which caps the device size.
pub const MAX_DEVICE_BLOCKS: usize = i16::MAX as usize;
