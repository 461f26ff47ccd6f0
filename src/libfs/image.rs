//! Write-through view of a filesystem image.
//!
//! The image file is mapped shared read/write, so every store lands in the
//! page cache immediately and reaches the file when the mapping is dropped.
//! Inodes are addressed as `(image, inode number)` pairs throughout the
//! crate; the typed accessors here turn a number into a view of the on-disk
//! record.

use std::fs::File;
use std::io;
use std::mem;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr;
use std::slice;

use crate::error::{FsError, Result};
use crate::fs::{DInode, SuperBlock, BPB, BSIZE, IPB, ROOTINO};

/// Shared read/write mapping of the whole image file.
struct Mapping {
    ptr: *mut u8,
    len: usize,
}

impl Mapping {
    fn new(file: &File, len: usize) -> io::Result<Mapping> {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(Mapping {
            ptr: ptr as *mut u8,
            len,
        })
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

pub struct Image {
    map: Mapping,
    // Held so the descriptor outlives the mapping; dropped after `map`.
    _file: File,
}

impl Image {
    /// Maps an existing image read/write and sanity-checks the superblock
    /// against the file, so later block arithmetic cannot run off the map.
    pub fn open(path: &Path) -> Result<Image> {
        let file = File::options().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < 2 * BSIZE {
            return Err(FsError::Corrupt(format!(
                "{}: too small for a filesystem image",
                path.display()
            )));
        }
        let map = Mapping::new(&file, len)?;
        let img = Image { map, _file: file };

        let sb = *img.sb();
        if sb.size as usize * BSIZE > len {
            return Err(FsError::Corrupt(format!(
                "{}: superblock claims {} blocks but the file holds {}",
                path.display(),
                sb.size,
                len / BSIZE
            )));
        }
        if sb.ninodes <= ROOTINO {
            return Err(FsError::Corrupt(format!(
                "{}: no room for the root inode",
                path.display()
            )));
        }
        Ok(img)
    }

    pub fn sb(&self) -> &SuperBlock {
        bytemuck::from_bytes(&self.map.as_slice()[BSIZE..BSIZE + mem::size_of::<SuperBlock>()])
    }

    // Derived geometry. Region boundaries follow the layout diagram in fs.rs.

    /// Ni: number of inode blocks.
    pub fn ninode_blocks(&self) -> u32 {
        self.sb().ninodes / IPB + 1
    }

    /// Nm: number of bitmap blocks.
    pub fn nbitmap_blocks(&self) -> u32 {
        self.sb().size / BPB + 1
    }

    /// First bitmap block number.
    pub fn bitmap_start(&self) -> u32 {
        2 + self.ninode_blocks()
    }

    /// First data block number.
    pub fn data_start(&self) -> u32 {
        2 + self.ninode_blocks() + self.nbitmap_blocks()
    }

    /// First log block number.
    pub fn log_start(&self) -> u32 {
        self.sb().size - self.sb().nlog
    }

    /// Block holding inode `inum`.
    pub fn inode_block(&self, inum: u32) -> u32 {
        2 + inum / IPB
    }

    /// Bitmap block holding the bit for block `b`.
    pub fn bitmap_block(&self, b: u32) -> u32 {
        self.bitmap_start() + b / BPB
    }

    /// Immutable view of block `b`. Out-of-range block numbers are a
    /// programmer error and panic.
    pub fn block(&self, b: u32) -> &[u8] {
        assert!(b < self.sb().size, "block {b} out of range");
        &self.map.as_slice()[b as usize * BSIZE..(b as usize + 1) * BSIZE]
    }

    /// Mutable view of block `b`; stores write through to the image file.
    pub fn block_mut(&mut self, b: u32) -> &mut [u8] {
        assert!(b < self.sb().size, "block {b} out of range");
        &mut self.map.as_mut_slice()[b as usize * BSIZE..(b as usize + 1) * BSIZE]
    }

    /// On-disk record of inode `inum`. The number must have been validated
    /// (see `inode::iget`).
    pub fn dinode(&self, inum: u32) -> &DInode {
        let bn = self.inode_block(inum);
        let off = (inum % IPB) as usize * mem::size_of::<DInode>();
        bytemuck::from_bytes(&self.block(bn)[off..off + mem::size_of::<DInode>()])
    }

    pub fn dinode_mut(&mut self, inum: u32) -> &mut DInode {
        let bn = self.inode_block(inum);
        let off = (inum % IPB) as usize * mem::size_of::<DInode>();
        bytemuck::from_bytes_mut(&mut self.block_mut(bn)[off..off + mem::size_of::<DInode>()])
    }

    /// Block `b` viewed as an indirect block: an array of block numbers.
    pub fn indirect(&self, b: u32) -> &[u32] {
        bytemuck::cast_slice(self.block(b))
    }

    pub fn indirect_mut(&mut self, b: u32) -> &mut [u32] {
        bytemuck::cast_slice_mut(self.block_mut(b))
    }
}

#[cfg(test)]
mod tests {
    use crate::fs::{BSIZE, T_DIR};
    use crate::testimg;

    #[test]
    fn geometry_of_canonical_image() {
        let t = testimg::mkimg();
        let img = t.open();
        let sb = img.sb();
        assert_eq!(sb.size, 1024);
        assert_eq!(sb.ninodes, 200);
        assert_eq!(sb.nlog, 30);
        assert_eq!(img.ninode_blocks(), 26);
        assert_eq!(img.nbitmap_blocks(), 1);
        assert_eq!(img.bitmap_start(), 28);
        assert_eq!(img.data_start(), 29);
        assert_eq!(img.log_start(), 994);
        assert_eq!(sb.nblocks, 1024 - (2 + 26 + 1 + 30));
    }

    #[test]
    fn root_inode_well_formed() {
        let t = testimg::mkimg();
        let img = t.open();
        let root = img.dinode(1);
        assert_eq!(root.file_type, T_DIR);
        assert_eq!(root.nlink, 1);
        assert_eq!(root.size, 32);
        assert_eq!(root.addrs[0], img.data_start());
    }

    #[test]
    fn stores_write_through() {
        let t = testimg::mkimg();
        {
            let mut img = t.open();
            let b = img.data_start() + 5;
            img.block_mut(b)[0] = 0xa5;
        }
        let img = t.open();
        let b = img.data_start() + 5;
        assert_eq!(img.block(b)[0], 0xa5);
        assert_eq!(img.block(b).len(), BSIZE);
    }
}
