//! Scratch-image builder for tests: formats the canonical 1024-block image
//! (200 inodes, 30 log blocks) the same way the filesystem creator does.
//! That means a superblock, a root directory with "." and "..", and bitmap
//! bits covering the metadata regions, the root's data block, and the log.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::image::Image;
use crate::fs::{
    name_bytes, DInode, Dirent, SuperBlock, BPB, BSIZE, DIRENT_SIZE, IPB, ROOTINO, T_DIR,
};

pub const FSSIZE: u32 = 1024;
pub const NINODES: u32 = 200;
pub const NLOG: u32 = 30;

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

pub struct TestImage {
    path: PathBuf,
}

impl TestImage {
    pub fn open(&self) -> Image {
        Image::open(&self.path).unwrap()
    }
}

impl Drop for TestImage {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn set_bit(data: &mut [u8], bitmap_start: u32, b: u32) {
    let byte = bitmap_start as usize * BSIZE + (b / 8) as usize;
    data[byte] |= 1 << (b % 8);
}

pub fn mkimg() -> TestImage {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let path = env::temp_dir().join(format!("opfs-test-{}-{id}.img", process::id()));

    let ni = NINODES / IPB + 1;
    let nm = FSSIZE / BPB + 1;
    let d = 2 + ni + nm;
    let nd = FSSIZE - (d + NLOG);
    let mut data = vec![0u8; FSSIZE as usize * BSIZE];

    let sb = SuperBlock {
        size: FSSIZE,
        nblocks: nd,
        ninodes: NINODES,
        nlog: NLOG,
    };
    data[BSIZE..BSIZE + 16].copy_from_slice(bytemuck::bytes_of(&sb));

    // Root directory: inode 1, one data block holding "." and "..".
    let mut root = DInode {
        file_type: T_DIR,
        major: 0,
        minor: 0,
        nlink: 1,
        size: 2 * DIRENT_SIZE as u32,
        addrs: [0; 13],
    };
    root.addrs[0] = d;
    let islot = (2 + ROOTINO / IPB) as usize * BSIZE + (ROOTINO % IPB) as usize * 64;
    data[islot..islot + 64].copy_from_slice(bytemuck::bytes_of(&root));

    for (i, name) in [b".".as_slice(), b"..".as_slice()].iter().enumerate() {
        let de = Dirent {
            inum: ROOTINO as u16,
            name: name_bytes(name),
        };
        let off = d as usize * BSIZE + i * DIRENT_SIZE;
        data[off..off + DIRENT_SIZE].copy_from_slice(bytemuck::bytes_of(&de));
    }

    let bitmap_start = 2 + ni;
    for b in 0..=d {
        set_bit(&mut data, bitmap_start, b);
    }
    for b in FSSIZE - NLOG..FSSIZE {
        set_bit(&mut data, bitmap_start, b);
    }

    fs::write(&path, &data).unwrap();
    TestImage { path }
}
