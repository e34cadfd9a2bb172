//! Tau is a tiny single-volume, inode-based file system: the storage core of
//! a small threaded teaching OS. One flat namespace, eleven direct pointers
//! plus one indirection block per file, and a superblock-driven free list.
//! No permissions, no journaling, no directory hierarchy.
//!
//! Volume layout (512-byte blocks):
//! - Block 0: superblock (total blocks, total inodes, free-list head)
//! - Blocks 1..: packed inode table, 16 records of 32 bytes per block
//! - Remaining blocks: file data, indirection blocks, and the free list
//!   (each free block's first four bytes name the next free block)
//! - The name table itself is persisted as the file content of inode 0
//!
//! Tau's layers (from bottom to top):
//! 1. Block Device: abstraction for the raw device.       | User implemented (hardware-specific)
//! 2. SuperBlock: volume header and free-block allocator. | Fs implemented
//! 3. Inode: per-file length, state, block addressing.    | Fs implemented
//! 4. Directory: flat name -> inode-number table.         | Fs implemented
//! 5. FileTable: open handles and per-inode arbitration.  | Fs implemented
//! 6. FileSystem: byte-stream read/write/seek facade.     | Fs implemented

mod block_dev;
mod config;
mod directory;
mod error;
mod file;
mod file_table;
mod fs;
mod inode;
mod superblock;

pub use block_dev::BlockDevice;
pub use config::*;
pub use directory::Directory;
pub use error::FsError as Error;
pub use error::{FsError, Result};
pub use file::{FileHandle, OpenMode, SeekOrigin};
pub use file_table::FileTable;
pub use fs::FileSystem;
pub use inode::{BlockAssignment, Inode, InodeState};
pub use superblock::{SuperBlock, inode_table_blocks};
