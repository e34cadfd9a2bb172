//! Host-side volume formatter: creates an image file and lays a fresh tau
//! volume onto it.

use std::error::Error;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex};

use clap::Parser;
use log::info;
use tau::{BLOCK_SIZE, BlockDevice, FileSystem, FsError, OpenMode};

#[derive(Parser)]
#[command(about = "Create and format a tau volume image")]
struct Cli {
    /// Path of the image file to create or overwrite
    image: PathBuf,

    /// Volume size in 512-byte blocks
    #[arg(long, default_value_t = 1000)]
    blocks: u32,

    /// Number of inodes, i.e. the maximum file count
    #[arg(long, default_value_t = 64)]
    files: u16,
}

/// A volume image on the host file system, one seek+IO per block.
struct BlockFile {
    file: Mutex<File>,
    num_blocks: usize,
}

impl BlockDevice for BlockFile {
    fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    fn read_block(&self, block_id: u32, buf: &mut [u8; BLOCK_SIZE]) -> tau::Result<()> {
        if block_id as usize >= self.num_blocks {
            return Err(FsError::InvalidBlockId);
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(block_id as u64 * BLOCK_SIZE as u64))
            .and_then(|_| file.read_exact(buf))
            .map_err(|_| FsError::ReadError)
    }

    fn write_block(&self, block_id: u32, buf: &[u8; BLOCK_SIZE]) -> tau::Result<()> {
        if block_id as usize >= self.num_blocks {
            return Err(FsError::InvalidBlockId);
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(block_id as u64 * BLOCK_SIZE as u64))
            .and_then(|_| file.write_all(buf))
            .map_err(|_| FsError::WriteError)
    }

    fn flush(&self) -> tau::Result<()> {
        self.file
            .lock()
            .unwrap()
            .sync_all()
            .map_err(|_| FsError::WriteError)
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&cli.image)?;
    file.set_len(cli.blocks as u64 * BLOCK_SIZE as u64)?;

    let device = Arc::new(BlockFile {
        file: Mutex::new(file),
        num_blocks: cli.blocks as usize,
    });

    // mount formats the blank image with defaults; reformat to the requested
    // inode count and persist the (empty) name table
    let fs = FileSystem::mount(Arc::clone(&device))?;
    fs.format(cli.files)?;
    fs.sync()?;

    let sb = fs.superblock();
    let free = sb.free_block_count(&*device)?;
    info!("volume image written to {}", cli.image.display());
    println!(
        "{}: {} blocks, {} inodes, {} free data blocks (free list head {:?})",
        cli.image.display(),
        sb.total_blocks,
        sb.total_inodes,
        free,
        sb.free_list_head(),
    );

    // sanity: the root directory must resolve on a re-mount
    let fs = FileSystem::mount(device)?;
    let root = fs.open("/", OpenMode::Read)?;
    fs.close(&root)?;

    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("mkfs: {e}");
        process::exit(1);
    }
}
