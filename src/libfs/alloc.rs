//! Bitmap-backed data block allocator.

use crate::error::{FsError, Result};
use crate::image::Image;
use crate::fs::BPB;

/// Checks if `b` is a valid data block number.
pub fn valid_data_block(img: &Image, b: u32) -> bool {
    let d = img.data_start();
    d <= b && b < d + img.sb().nblocks
}

/// Allocates a new data block and returns its block number. The block is
/// zero-filled and its bitmap bit set.
pub fn balloc(img: &mut Image) -> Result<u32> {
    let size = img.sb().size;
    let mut base = 0;
    while base < size {
        let bn = img.bitmap_block(base);
        let mut found = None;
        {
            let bp = img.block(bn);
            for bi in 0..BPB {
                if base + bi >= size {
                    break;
                }
                if bp[(bi / 8) as usize] & (1 << (bi % 8)) == 0 {
                    found = Some(bi);
                    break;
                }
            }
        }
        if let Some(bi) = found {
            let b = base + bi;
            img.block_mut(bn)[(bi / 8) as usize] |= 1 << (bi % 8);
            // Bits for the boot, super, inode, bitmap, and log regions are
            // expected to be set already; a clear one there means the bitmap
            // itself is damaged.
            if !valid_data_block(img, b) {
                return Err(FsError::Corrupt(format!(
                    "balloc: {b}: invalid data block number"
                )));
            }
            img.block_mut(b).fill(0);
            return Ok(b);
        }
        base += BPB;
    }
    Err(FsError::Exhausted("balloc: no free blocks".to_string()))
}

/// Frees the block specified by `b`. Freeing an already-free block is
/// tolerated with a warning.
pub fn bfree(img: &mut Image, b: u32) -> Result<()> {
    if !valid_data_block(img, b) {
        log::error!("bfree: {b}: invalid data block number");
        return Err(FsError::InvalidArgument(format!(
            "bfree: {b}: invalid data block number"
        )));
    }
    let bn = img.bitmap_block(b);
    let bi = b % BPB;
    let m = 1u8 << (bi % 8);
    let byte = &mut img.block_mut(bn)[(bi / 8) as usize];
    if *byte & m == 0 {
        log::warn!("bfree: {b}: already freed block");
    }
    *byte &= !m;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testimg;

    #[test]
    fn first_fit_allocation() {
        let t = testimg::mkimg();
        let mut img = t.open();
        // The root directory occupies the first data block.
        let b = balloc(&mut img).unwrap();
        assert_eq!(b, img.data_start() + 1);
        assert!(valid_data_block(&img, b));
        assert!(img.block(b).iter().all(|&x| x == 0));
        let b2 = balloc(&mut img).unwrap();
        assert_eq!(b2, b + 1);
    }

    #[test]
    fn freed_blocks_are_reused() {
        let t = testimg::mkimg();
        let mut img = t.open();
        let b = balloc(&mut img).unwrap();
        let _ = balloc(&mut img).unwrap();
        bfree(&mut img, b).unwrap();
        assert_eq!(balloc(&mut img).unwrap(), b);
    }

    #[test]
    fn bfree_rejects_meta_blocks() {
        let t = testimg::mkimg();
        let mut img = t.open();
        assert!(matches!(bfree(&mut img, 1), Err(FsError::InvalidArgument(_))));
        let log = img.log_start();
        assert!(matches!(bfree(&mut img, log), Err(FsError::InvalidArgument(_))));
    }

    #[test]
    fn double_free_is_tolerated() {
        let t = testimg::mkimg();
        let mut img = t.open();
        let b = balloc(&mut img).unwrap();
        bfree(&mut img, b).unwrap();
        bfree(&mut img, b).unwrap();
    }

    #[test]
    fn allocation_exhaustion_is_fatal() {
        let t = testimg::mkimg();
        let mut img = t.open();
        let nd = img.sb().nblocks;
        // One data block is already taken by the root directory.
        for _ in 0..nd - 1 {
            balloc(&mut img).unwrap();
        }
        let err = balloc(&mut img).unwrap_err();
        assert!(matches!(err, FsError::Exhausted(_)));
        assert!(err.is_fatal());
    }
}
