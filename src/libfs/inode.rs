//! Inode table and byte-level file I/O.
//!
//! An inode handle is just its number; every operation takes the image it
//! lives in alongside. `bmap` grows the file's block footprint on demand, so
//! callers must only ask for offsets they intend to use.

use crate::alloc::{balloc, bfree, valid_data_block};
use crate::error::{FsError, Result};
use crate::image::Image;
use crate::fs::{BSIZE, MAXFILESIZE, NDIRECT, NINDIRECT, T_DEV};

use bytemuck::Zeroable;

// ceiling(x / y) where y > 0
fn divceil(x: u32, y: u32) -> u32 {
    if x == 0 {
        0
    } else {
        (x - 1) / y + 1
    }
}

/// Validates an inode number read from the image. Inode 0 is reserved as the
/// "empty directory slot" marker.
pub fn iget(img: &Image, inum: u32) -> Result<u32> {
    if inum > 0 && inum < img.sb().ninodes {
        Ok(inum)
    } else {
        log::error!("iget: {inum}: invalid inode number");
        Err(FsError::InvalidArgument(format!(
            "iget: {inum}: invalid inode number"
        )))
    }
}

/// Allocates a free inode, zeroing its record and setting its type.
pub fn ialloc(img: &mut Image, file_type: u16) -> Result<u32> {
    for inum in 1..img.sb().ninodes {
        let ip = img.dinode_mut(inum);
        if ip.file_type == 0 {
            *ip = Zeroable::zeroed();
            ip.file_type = file_type;
            return Ok(inum);
        }
    }
    Err(FsError::Exhausted("ialloc: cannot allocate".to_string()))
}

/// Marks inode `inum` free. Inconsistent states are tolerated with warnings.
pub fn ifree(img: &mut Image, inum: u32) -> Result<()> {
    iget(img, inum)?;
    let ip = img.dinode_mut(inum);
    if ip.file_type == 0 {
        log::warn!("ifree: inode #{inum} is already freed");
    }
    if ip.nlink > 0 {
        log::warn!("ifree: nlink of inode #{inum} is not zero");
    }
    ip.file_type = 0;
    Ok(())
}

/// Returns the data block number holding the `n`-th block of the file,
/// allocating direct, indirect, and indirect-slot blocks as needed.
pub fn bmap(img: &mut Image, inum: u32, n: u32) -> Result<u32> {
    if (n as usize) < NDIRECT {
        let addr = img.dinode(inum).addrs[n as usize];
        if addr != 0 {
            return Ok(addr);
        }
        let addr = balloc(img)?;
        img.dinode_mut(inum).addrs[n as usize] = addr;
        return Ok(addr);
    }
    let k = n as usize - NDIRECT;
    if k >= NINDIRECT {
        return Err(FsError::IoBounds(format!("bmap: {n}: invalid index number")));
    }
    let mut iaddr = img.dinode(inum).addrs[NDIRECT];
    if iaddr == 0 {
        iaddr = balloc(img)?;
        img.dinode_mut(inum).addrs[NDIRECT] = iaddr;
    }
    let addr = img.indirect(iaddr)[k];
    if addr != 0 {
        return Ok(addr);
    }
    let addr = balloc(img)?;
    img.indirect_mut(iaddr)[k] = addr;
    Ok(addr)
}

/// Reads up to `buf.len()` bytes at `off`, clamped to the file size. Returns
/// the byte count actually read, which falls short only when the block walk
/// hits an invalid block number.
pub fn iread(img: &mut Image, inum: u32, buf: &mut [u8], off: u32) -> Result<usize> {
    let ip = img.dinode(inum);
    if ip.file_type == T_DEV {
        return Err(FsError::WrongType(format!("inode #{inum}: device file")));
    }
    let size = ip.size;
    let mut n = buf.len() as u32;
    if off > size || off.checked_add(n).is_none() {
        return Err(FsError::IoBounds(format!(
            "inode #{inum}: read at {off}+{n} past size {size}"
        )));
    }
    if off + n > size {
        n = size - off;
    }
    let mut t = 0;
    let mut off = off;
    while t < n {
        let b = bmap(img, inum, off / BSIZE as u32)?;
        if !valid_data_block(img, b) {
            log::error!("iread: {b}: invalid data block");
            break;
        }
        let boff = (off % BSIZE as u32) as usize;
        let m = (n - t).min((BSIZE - boff) as u32);
        buf[t as usize..(t + m) as usize]
            .copy_from_slice(&img.block(b)[boff..boff + m as usize]);
        t += m;
        off += m;
    }
    Ok(t as usize)
}

/// Writes `buf` at `off`, growing the file as needed but never past
/// `MAXFILESIZE`. Writing may not leave a gap beyond the current size.
pub fn iwrite(img: &mut Image, inum: u32, buf: &[u8], off: u32) -> Result<usize> {
    let ip = img.dinode(inum);
    if ip.file_type == T_DEV {
        return Err(FsError::WrongType(format!("inode #{inum}: device file")));
    }
    let size = ip.size;
    let n = buf.len() as u32;
    if off > size || off.checked_add(n).is_none() {
        return Err(FsError::IoBounds(format!(
            "inode #{inum}: write at {off}+{n} past size {size}"
        )));
    }
    if off + n > MAXFILESIZE {
        return Err(FsError::Capacity(format!(
            "inode #{inum}: write at {off}+{n} exceeds the maximum file size"
        )));
    }
    let mut t = 0;
    let mut off = off;
    while t < n {
        let b = bmap(img, inum, off / BSIZE as u32)?;
        if !valid_data_block(img, b) {
            log::error!("iwrite: {b}: invalid data block");
            break;
        }
        let boff = (off % BSIZE as u32) as usize;
        let m = (n - t).min((BSIZE - boff) as u32);
        img.block_mut(b)[boff..boff + m as usize]
            .copy_from_slice(&buf[t as usize..(t + m) as usize]);
        t += m;
        off += m;
    }
    let ip = img.dinode_mut(inum);
    if t > 0 && off > ip.size {
        ip.size = off;
    }
    Ok(t as usize)
}

/// Truncates the file to `size` bytes: shrinking frees the blocks past the
/// new end, growing zero-fills the gap.
pub fn itruncate(img: &mut Image, inum: u32, size: u32) -> Result<()> {
    let ip = img.dinode(inum);
    if ip.file_type == T_DEV {
        return Err(FsError::WrongType(format!("inode #{inum}: device file")));
    }
    if size > MAXFILESIZE {
        return Err(FsError::Capacity(format!(
            "inode #{inum}: {size} exceeds the maximum file size"
        )));
    }
    let old = ip.size;
    if size < old {
        let n = divceil(old, BSIZE as u32); // used blocks
        let k = divceil(size, BSIZE as u32); // blocks to keep
        let nd = n.min(NDIRECT as u32);
        let kd = k.min(NDIRECT as u32);
        for i in kd..nd {
            let addr = img.dinode(inum).addrs[i as usize];
            let _ = bfree(img, addr);
            img.dinode_mut(inum).addrs[i as usize] = 0;
        }
        if n > NDIRECT as u32 {
            let iaddr = img.dinode(inum).addrs[NDIRECT];
            if iaddr == 0 {
                return Err(FsError::Corrupt(format!(
                    "itruncate: inode #{inum}: indirect block missing"
                )));
            }
            let ni = n - NDIRECT as u32; // used indirect slots
            let ki = k.saturating_sub(NDIRECT as u32); // slots to keep
            for i in ki..ni {
                let addr = img.indirect(iaddr)[i as usize];
                let _ = bfree(img, addr);
                img.indirect_mut(iaddr)[i as usize] = 0;
            }
            if ki == 0 {
                let _ = bfree(img, iaddr);
                img.dinode_mut(inum).addrs[NDIRECT] = 0;
            }
        }
    } else {
        let gap = size - old;
        let mut t = 0;
        let mut off = old;
        while t < gap {
            let b = bmap(img, inum, off / BSIZE as u32)?;
            let boff = (off % BSIZE as u32) as usize;
            let m = (gap - t).min((BSIZE - boff) as u32);
            img.block_mut(b)[boff..boff + m as usize].fill(0);
            t += m;
            off += m;
        }
    }
    img.dinode_mut(inum).size = size;
    Ok(())
}
