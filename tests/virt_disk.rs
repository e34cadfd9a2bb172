#![allow(unused)]

mod common;

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use rand::RngCore;
use tau::{BLOCK_SIZE, BlockDevice, FileSystem, FsError, OpenMode, Result};

const DISK_BLOCKS: usize = 128;

/// A volume image file on the host, one seek+IO per block.
pub struct VirtDisk {
    file: Mutex<File>,
    num_blocks: usize,
}

impl VirtDisk {
    pub fn open(path: &std::path::Path, num_blocks: usize) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len((num_blocks * BLOCK_SIZE) as u64)?;
        Ok(VirtDisk {
            file: Mutex::new(file),
            num_blocks,
        })
    }
}

impl BlockDevice for VirtDisk {
    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn read_block(&self, block_id: u32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        if block_id as usize >= self.num_blocks {
            return Err(FsError::InvalidBlockId);
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(block_id as u64 * BLOCK_SIZE as u64))
            .and_then(|_| file.read_exact(buf))
            .map_err(|_| FsError::ReadError)
    }

    fn write_block(&self, block_id: u32, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        if block_id as usize >= self.num_blocks {
            return Err(FsError::InvalidBlockId);
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(block_id as u64 * BLOCK_SIZE as u64))
            .and_then(|_| file.write_all(buf))
            .map_err(|_| FsError::WriteError)
    }

    fn flush(&self) -> Result<()> {
        self.file
            .lock()
            .unwrap()
            .sync_all()
            .map_err(|_| FsError::WriteError)
    }
}

#[test]
fn disk_format_write_remount() {
    let path = env::temp_dir().join("tau_virt_disk.img");
    let mut payload = vec![0u8; 3000];
    rand::thread_rng().fill_bytes(&mut payload);

    {
        let disk = Arc::new(VirtDisk::open(&path, DISK_BLOCKS).unwrap());
        let fs = FileSystem::mount(disk).unwrap();
        fs.format(32).unwrap();

        let handle = fs.open("image.bin", OpenMode::Write).unwrap();
        assert_eq!(fs.write(&handle, &payload).unwrap(), payload.len());
        fs.close(&handle).unwrap();
        fs.sync().unwrap();
    }

    // a fresh mount of the image must find the file and its content
    {
        let disk = Arc::new(VirtDisk::open(&path, DISK_BLOCKS).unwrap());
        let fs = FileSystem::mount(disk).unwrap();
        let sb = fs.superblock();
        log!("remounted volume header: {:?}", sb);
        assert_eq!(sb.total_blocks as usize, DISK_BLOCKS);
        assert_eq!(sb.total_inodes, 32);

        let handle = fs.open("image.bin", OpenMode::Read).unwrap();
        assert_eq!(fs.fsize(&handle).unwrap(), 3000);
        let mut back = vec![0u8; 3000];
        assert_eq!(fs.read(&handle, &mut back).unwrap(), 3000);
        assert_eq!(back, payload);
        fs.close(&handle).unwrap();
    }

    let _ = fs::remove_file(&path);
}
