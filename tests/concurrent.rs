#![allow(unused)]

mod common;

use std::sync::Arc;
use std::sync::Barrier;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use common::RamDisk;
use tau::{BLOCK_SIZE, FileSystem, FsError, OpenMode, SeekOrigin};

fn fresh_fs(blocks: usize, inodes: u16) -> FileSystem<RamDisk> {
    let fs = FileSystem::mount(Arc::new(RamDisk::new(blocks))).unwrap();
    fs.format(inodes).unwrap();
    fs
}

fn put_file(fs: &FileSystem<RamDisk>, name: &str, content: &[u8]) {
    let handle = fs.open(name, OpenMode::Write).unwrap();
    assert_eq!(fs.write(&handle, content).unwrap(), content.len());
    fs.close(&handle).unwrap();
}

#[test]
fn test_concurrent_readers_do_not_block() {
    let fs = fresh_fs(64, 16);
    put_file(&fs, "shared", b"read by everyone");

    // both threads must hold their read handle at the barrier at the same
    // time; if the second open blocked, the barrier would never be passed
    let barrier = Barrier::new(2);
    thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|| {
                let handle = fs.open("shared", OpenMode::Read).unwrap();
                barrier.wait();
                let mut buf = vec![0u8; 16];
                assert_eq!(fs.read(&handle, &mut buf).unwrap(), 16);
                assert_eq!(&buf, b"read by everyone");
                fs.close(&handle).unwrap();
            });
        }
    });
    assert!(!fs.has_open_files());
}

#[test]
fn test_writer_waits_for_reader() {
    let fs = fresh_fs(64, 16);
    put_file(&fs, "contended", b"original");

    let reader = fs.open("contended", OpenMode::Read).unwrap();
    let writer_opened = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            let writer = fs.open("contended", OpenMode::Write).unwrap();
            writer_opened.store(true, Ordering::SeqCst);
            assert_eq!(fs.write(&writer, b"replaced").unwrap(), 8);
            fs.close(&writer).unwrap();
        });

        thread::sleep(Duration::from_millis(200));
        assert!(
            !writer_opened.load(Ordering::SeqCst),
            "write-mode open must wait for the read handle to close"
        );
        fs.close(&reader).unwrap();
    });
    assert!(writer_opened.load(Ordering::SeqCst));

    let handle = fs.open("contended", OpenMode::Read).unwrap();
    let mut buf = vec![0u8; 8];
    assert_eq!(fs.read(&handle, &mut buf).unwrap(), 8);
    assert_eq!(&buf, b"replaced");
    fs.close(&handle).unwrap();
}

#[test]
fn test_reader_waits_for_writer() {
    let fs = fresh_fs(64, 16);
    put_file(&fs, "contended", b"draft");

    let writer = fs.open("contended", OpenMode::WriteRead).unwrap();
    let reader_opened = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            let reader = fs.open("contended", OpenMode::Read).unwrap();
            reader_opened.store(true, Ordering::SeqCst);
            fs.close(&reader).unwrap();
        });

        thread::sleep(Duration::from_millis(200));
        assert!(
            !reader_opened.load(Ordering::SeqCst),
            "read-mode open must wait for the write handle to close"
        );
        fs.close(&writer).unwrap();
    });
    assert!(reader_opened.load(Ordering::SeqCst));
}

#[test]
fn test_appenders_serialize() {
    let fs = fresh_fs(64, 16);
    put_file(&fs, "tally", b"");

    const WRITERS: usize = 8;
    let fs = &fs;
    thread::scope(|s| {
        for i in 0..WRITERS {
            s.spawn(move || {
                let handle = fs.open("tally", OpenMode::Append).unwrap();
                assert_eq!(fs.write(&handle, &[i as u8]).unwrap(), 1);
                fs.close(&handle).unwrap();
            });
        }
    });

    // every appender landed exactly one byte at the then-current end
    let handle = fs.open("tally", OpenMode::Read).unwrap();
    assert_eq!(fs.fsize(&handle).unwrap() as usize, WRITERS);
    let mut buf = vec![0u8; WRITERS];
    assert_eq!(fs.read(&handle, &mut buf).unwrap(), WRITERS);
    let mut seen = buf.clone();
    seen.sort_unstable();
    assert_eq!(seen, (0..WRITERS as u8).collect::<Vec<_>>());
    fs.close(&handle).unwrap();
}

#[test]
fn test_racing_creates_bind_one_inode() {
    let fs = fresh_fs(64, 16);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let handle = fs.open("minted", OpenMode::WriteRead).unwrap();
                assert_eq!(fs.write(&handle, b"z").unwrap(), 1);
                fs.close(&handle).unwrap();
            });
        }
    });

    let handle = fs.open("minted", OpenMode::Read).unwrap();
    assert_eq!(fs.fsize(&handle).unwrap(), 1);
    fs.close(&handle).unwrap();

    // exactly one directory entry was minted for the name
    fs.delete("minted").unwrap();
    assert_eq!(fs.delete("minted").unwrap_err(), FsError::NotFound);
}
