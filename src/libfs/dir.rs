//! Directory operations and multi-component path resolution.
//!
//! A directory file is a dense array of `Dirent` records manipulated through
//! `iread`/`iwrite`, one record at a time. A record with `inum == 0` is a
//! free slot; its name bytes are zero, so lookups must never be given an
//! empty component.

use crate::error::{FsError, Result};
use crate::image::Image;
use crate::inode::{ialloc, ifree, iget, iread, itruncate, iwrite};
use crate::path::skipelem;
use crate::fs::{name_bytes, name_matches, Dirent, DIRENT_SIZE, T_DEV, T_DIR};

/// Reads the directory entry at byte offset `off` of directory `dp`.
pub(crate) fn read_dirent(img: &mut Image, dp: u32, off: u32) -> Result<Dirent> {
    let mut buf = [0u8; DIRENT_SIZE];
    let n = iread(img, dp, &mut buf, off)?;
    if n != DIRENT_SIZE {
        return Err(FsError::IoBounds(format!(
            "directory #{dp}: truncated entry at offset {off}"
        )));
    }
    Ok(bytemuck::pod_read_unaligned(&buf))
}

fn write_dirent(img: &mut Image, dp: u32, off: u32, de: &Dirent) -> Result<()> {
    let n = iwrite(img, dp, bytemuck::bytes_of(de), off)?;
    if n != DIRENT_SIZE {
        return Err(FsError::IoBounds(format!(
            "directory #{dp}: short entry write at offset {off}"
        )));
    }
    Ok(())
}

/// Searches directory `dp` for `name`. Returns the entry's inode number and
/// byte offset, or `None` if the name is absent.
pub fn dlookup(img: &mut Image, dp: u32, name: &[u8]) -> Result<Option<(u32, u32)>> {
    debug_assert_eq!(img.dinode(dp).file_type, T_DIR);
    let size = img.dinode(dp).size;
    let mut off = 0;
    while off < size {
        let de = read_dirent(img, dp, off)?;
        if name_matches(&de.name, name) {
            let ip = iget(img, de.inum as u32)?;
            return Ok(Some((ip, off)));
        }
        off += DIRENT_SIZE as u32;
    }
    Ok(None)
}

/// Adds an entry `name -> ip` to directory `dp`, reusing the first free slot
/// or appending at the end. Any link except a directory's own "." bumps the
/// target's link count.
pub fn daddent(img: &mut Image, dp: u32, name: &[u8], ip: u32) -> Result<()> {
    let size = img.dinode(dp).size;
    let mut off = 0;
    while off < size {
        let de = read_dirent(img, dp, off)?;
        if de.inum == 0 {
            break;
        }
        if name_matches(&de.name, name) {
            return Err(FsError::AlreadyExists(format!(
                "daddent: {}: exists",
                String::from_utf8_lossy(name)
            )));
        }
        off += DIRENT_SIZE as u32;
    }
    let de = Dirent {
        inum: ip as u16,
        name: name_bytes(name),
    };
    write_dirent(img, dp, off, &de)?;
    if name != b".".as_slice() {
        img.dinode_mut(ip).nlink += 1;
    }
    Ok(())
}

/// Re-points the ".." entry of directory `cdir` at directory `pdir` and
/// credits the new parent with the back-link.
pub fn dmkparlink(img: &mut Image, pdir: u32, cdir: u32) -> Result<()> {
    if img.dinode(pdir).file_type != T_DIR {
        return Err(FsError::WrongType(format!(
            "dmkparlink: {pdir}: not a directory"
        )));
    }
    if img.dinode(cdir).file_type != T_DIR {
        return Err(FsError::WrongType(format!(
            "dmkparlink: {cdir}: not a directory"
        )));
    }
    let (_, off) = dlookup(img, cdir, b"..")?.ok_or_else(|| {
        FsError::Corrupt(format!("dmkparlink: directory #{cdir}: no \"..\" entry"))
    })?;
    let de = Dirent {
        inum: pdir as u16,
        name: name_bytes(b".."),
    };
    write_dirent(img, cdir, off, &de)?;
    img.dinode_mut(pdir).nlink += 1;
    Ok(())
}

/// A directory is empty when only its "." and ".." slots are in use.
pub fn emptydir(img: &mut Image, dp: u32) -> Result<bool> {
    let size = img.dinode(dp).size;
    let mut nent = 0;
    let mut off = 0;
    while off < size {
        if read_dirent(img, dp, off)?.inum != 0 {
            nent += 1;
        }
        off += DIRENT_SIZE as u32;
    }
    Ok(nent == 2)
}

/// Resolves `path` starting from directory `rp`. An empty path (or one made
/// of separators only) names `rp` itself. `None` means some component did
/// not resolve.
pub fn ilookup(img: &mut Image, rp: u32, path: &str) -> Result<Option<u32>> {
    let mut rp = rp;
    let mut path = path;
    loop {
        debug_assert_eq!(img.dinode(rp).file_type, T_DIR);
        let (name, rest) = skipelem(path);
        if name.is_empty() {
            return Ok(Some(rp));
        }
        let Some((ip, _)) = dlookup(img, rp, name)? else {
            return Ok(None);
        };
        if rest.is_empty() {
            return Ok(Some(ip));
        }
        if img.dinode(ip).file_type != T_DIR {
            log::error!("ilookup: {}: not a directory", String::from_utf8_lossy(name));
            return Ok(None);
        }
        rp = ip;
        path = rest;
    }
}

/// Creates `path` below directory `rp` as a fresh inode of `file_type`,
/// installing "." and ".." when a directory is born. Returns the new inode
/// and its parent directory.
pub fn icreat(img: &mut Image, rp: u32, path: &str, file_type: u16) -> Result<(u32, u32)> {
    let mut rp = rp;
    let mut path = path;
    loop {
        debug_assert_eq!(img.dinode(rp).file_type, T_DIR);
        let (name, rest) = skipelem(path);
        if name.is_empty() {
            return Err(FsError::InvalidArgument(
                "icreat: empty file name".to_string(),
            ));
        }
        let found = dlookup(img, rp, name)?;
        if rest.is_empty() {
            if found.is_some() {
                return Err(FsError::AlreadyExists(format!(
                    "icreat: {}: file exists",
                    String::from_utf8_lossy(name)
                )));
            }
            let ip = ialloc(img, file_type)?;
            daddent(img, rp, name, ip)?;
            if file_type == T_DIR {
                daddent(img, ip, b".", ip)?;
                daddent(img, ip, b"..", rp)?;
            }
            return Ok((ip, rp));
        }
        match found {
            Some((ip, _)) if img.dinode(ip).file_type == T_DIR => {
                rp = ip;
                path = rest;
            }
            _ => {
                return Err(FsError::NotFound(format!(
                    "icreat: {}: no such directory",
                    String::from_utf8_lossy(name)
                )))
            }
        }
    }
}

/// Unlinks `path` relative to directory `rp`: the entry is zeroed, link
/// counts are settled, and an inode dropping to zero links is truncated
/// (devices excepted) and freed.
pub fn iunlink(img: &mut Image, rp: u32, path: &str) -> Result<()> {
    let mut rp = rp;
    let mut path = path;
    loop {
        debug_assert_eq!(img.dinode(rp).file_type, T_DIR);
        let (name, rest) = skipelem(path);
        if name.is_empty() {
            return Err(FsError::InvalidArgument(
                "iunlink: empty file name".to_string(),
            ));
        }
        let found = dlookup(img, rp, name)?;
        if let Some((ip, off)) = found {
            if rest.is_empty() {
                if name == b".".as_slice() || name == b"..".as_slice() {
                    return Err(FsError::InvalidArgument(
                        "iunlink: cannot unlink \".\" or \"..\"".to_string(),
                    ));
                }
                let zero = [0u8; DIRENT_SIZE];
                let n = iwrite(img, rp, &zero, off)?;
                if n != DIRENT_SIZE {
                    return Err(FsError::IoBounds(format!(
                        "iunlink: directory #{rp}: short entry write"
                    )));
                }
                // A child directory's ".." holds a link on its parent.
                if img.dinode(ip).file_type == T_DIR {
                    if let Some((parent, _)) = dlookup(img, ip, b"..")? {
                        if parent == rp {
                            img.dinode_mut(rp).nlink -= 1;
                        }
                    }
                }
                img.dinode_mut(ip).nlink -= 1;
                let (nlink, file_type) = {
                    let d = img.dinode(ip);
                    (d.nlink, d.file_type)
                };
                if nlink == 0 {
                    if file_type != T_DEV {
                        itruncate(img, ip, 0)?;
                    }
                    ifree(img, ip)?;
                }
                return Ok(());
            }
        }
        match found {
            Some((ip, _)) if img.dinode(ip).file_type == T_DIR => {
                rp = ip;
                path = rest;
            }
            _ => {
                return Err(FsError::NotFound(format!(
                    "iunlink: {}: no such directory",
                    String::from_utf8_lossy(name)
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{DIRSIZ, ROOTINO, T_FILE};
    use crate::testimg;

    #[test]
    fn daddent_appends_and_rejects_duplicates() {
        let t = testimg::mkimg();
        let mut img = t.open();
        let f = ialloc(&mut img, T_FILE).unwrap();
        daddent(&mut img, ROOTINO, b"a", f).unwrap();
        assert_eq!(img.dinode(ROOTINO).size, 48); // ".", "..", "a"
        assert_eq!(img.dinode(f).nlink, 1);
        assert!(matches!(
            daddent(&mut img, ROOTINO, b"a", f),
            Err(FsError::AlreadyExists(_))
        ));
        let (found, off) = dlookup(&mut img, ROOTINO, b"a").unwrap().unwrap();
        assert_eq!(found, f);
        assert_eq!(off, 32);
    }

    #[test]
    fn daddent_reuses_holes() {
        let t = testimg::mkimg();
        let mut img = t.open();
        let f1 = ialloc(&mut img, T_FILE).unwrap();
        let f2 = ialloc(&mut img, T_FILE).unwrap();
        daddent(&mut img, ROOTINO, b"a", f1).unwrap();
        daddent(&mut img, ROOTINO, b"b", f2).unwrap();
        iunlink(&mut img, ROOTINO, "a").unwrap();
        // The hole left by "a" is reused, not appended after "b".
        let f3 = ialloc(&mut img, T_FILE).unwrap();
        daddent(&mut img, ROOTINO, b"c", f3).unwrap();
        let (_, off) = dlookup(&mut img, ROOTINO, b"c").unwrap().unwrap();
        assert_eq!(off, 32);
        assert_eq!(img.dinode(ROOTINO).size, 64);
    }

    #[test]
    fn dlookup_misses_cleanly() {
        let t = testimg::mkimg();
        let mut img = t.open();
        assert!(dlookup(&mut img, ROOTINO, b"nope").unwrap().is_none());
        let (dot, _) = dlookup(&mut img, ROOTINO, b".").unwrap().unwrap();
        let (dotdot, _) = dlookup(&mut img, ROOTINO, b"..").unwrap().unwrap();
        assert_eq!(dot, ROOTINO);
        assert_eq!(dotdot, ROOTINO);
    }

    #[test]
    fn icreat_builds_nested_directories() {
        let t = testimg::mkimg();
        let mut img = t.open();
        let (a, parent) = icreat(&mut img, ROOTINO, "/a", T_DIR).unwrap();
        assert_eq!(parent, ROOTINO);
        // A fresh directory carries only the link from its parent's entry;
        // "." is deliberately uncounted, and the parent gains one via "..".
        assert_eq!(img.dinode(a).nlink, 1);
        assert_eq!(img.dinode(ROOTINO).nlink, 2);
        assert_eq!(img.dinode(a).size, 32);
        let (sub, p2) = icreat(&mut img, ROOTINO, "/a/sub", T_DIR).unwrap();
        assert_eq!(p2, a);
        assert_eq!(img.dinode(a).nlink, 2);
        let (dot, _) = dlookup(&mut img, sub, b".").unwrap().unwrap();
        let (dotdot, _) = dlookup(&mut img, sub, b"..").unwrap().unwrap();
        assert_eq!(dot, sub);
        assert_eq!(dotdot, a);
    }

    #[test]
    fn icreat_refuses_existing_and_missing_parents() {
        let t = testimg::mkimg();
        let mut img = t.open();
        icreat(&mut img, ROOTINO, "/a", T_FILE).unwrap();
        assert!(matches!(
            icreat(&mut img, ROOTINO, "/a", T_FILE),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(
            icreat(&mut img, ROOTINO, "/no/file", T_FILE),
            Err(FsError::NotFound(_))
        ));
        assert!(matches!(
            icreat(&mut img, ROOTINO, "/", T_FILE),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn ilookup_walks_and_rejects_file_components() {
        let t = testimg::mkimg();
        let mut img = t.open();
        let (a, _) = icreat(&mut img, ROOTINO, "/a", T_DIR).unwrap();
        let (f, _) = icreat(&mut img, ROOTINO, "/a/f", T_FILE).unwrap();
        assert_eq!(ilookup(&mut img, ROOTINO, "/a/f").unwrap(), Some(f));
        assert_eq!(ilookup(&mut img, ROOTINO, "a//f").unwrap(), Some(f));
        assert_eq!(ilookup(&mut img, ROOTINO, "/").unwrap(), Some(ROOTINO));
        assert_eq!(ilookup(&mut img, ROOTINO, "").unwrap(), Some(ROOTINO));
        assert_eq!(ilookup(&mut img, ROOTINO, "/a/").unwrap(), Some(a));
        assert_eq!(ilookup(&mut img, ROOTINO, "/a/g").unwrap(), None);
        // A file used as an intermediate component fails the walk.
        assert_eq!(ilookup(&mut img, ROOTINO, "/a/f/x").unwrap(), None);
    }

    #[test]
    fn long_names_are_clipped_consistently() {
        let t = testimg::mkimg();
        let mut img = t.open();
        let long = "abcdefghijklmnop"; // 16 bytes, clipped to 14 on disk
        let (f, _) = icreat(&mut img, ROOTINO, long, T_FILE).unwrap();
        let clipped = &long[..DIRSIZ];
        assert_eq!(ilookup(&mut img, ROOTINO, clipped).unwrap(), Some(f));
        assert_eq!(ilookup(&mut img, ROOTINO, long).unwrap(), Some(f));
    }

    #[test]
    fn unlink_file_settles_links_and_blocks() {
        let t = testimg::mkimg();
        let mut img = t.open();
        let (f, _) = icreat(&mut img, ROOTINO, "/f", T_FILE).unwrap();
        iwrite(&mut img, f, &[9u8; 600], 0).unwrap();
        daddent(&mut img, ROOTINO, b"g", f).unwrap();
        assert_eq!(img.dinode(f).nlink, 2);
        iunlink(&mut img, ROOTINO, "/f").unwrap();
        // Still reachable through the second name.
        assert_eq!(img.dinode(f).nlink, 1);
        assert_eq!(img.dinode(f).file_type, T_FILE);
        assert_eq!(ilookup(&mut img, ROOTINO, "/f").unwrap(), None);
        iunlink(&mut img, ROOTINO, "/g").unwrap();
        assert_eq!(img.dinode(f).file_type, 0);
        assert!(img.dinode(f).addrs.iter().all(|&a| a == 0));
    }

    #[test]
    fn unlink_directory_releases_parent_link() {
        let t = testimg::mkimg();
        let mut img = t.open();
        let (a, _) = icreat(&mut img, ROOTINO, "/a", T_DIR).unwrap();
        assert_eq!(img.dinode(ROOTINO).nlink, 2);
        iunlink(&mut img, ROOTINO, "/a").unwrap();
        assert_eq!(img.dinode(ROOTINO).nlink, 1);
        assert_eq!(img.dinode(a).file_type, 0);
    }

    #[test]
    fn unlink_refuses_dot_names() {
        let t = testimg::mkimg();
        let mut img = t.open();
        icreat(&mut img, ROOTINO, "/a", T_DIR).unwrap();
        assert!(matches!(
            iunlink(&mut img, ROOTINO, "/a/."),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            iunlink(&mut img, ROOTINO, "/a/.."),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            iunlink(&mut img, ROOTINO, "/missing"),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn emptydir_sees_through_holes() {
        let t = testimg::mkimg();
        let mut img = t.open();
        let (a, _) = icreat(&mut img, ROOTINO, "/a", T_DIR).unwrap();
        assert!(emptydir(&mut img, a).unwrap());
        icreat(&mut img, ROOTINO, "/a/f", T_FILE).unwrap();
        assert!(!emptydir(&mut img, a).unwrap());
        iunlink(&mut img, ROOTINO, "/a/f").unwrap();
        // The zeroed slot keeps the directory size at 48 but it is empty.
        assert_eq!(img.dinode(a).size, 48);
        assert!(emptydir(&mut img, a).unwrap());
    }

    #[test]
    fn dmkparlink_moves_the_back_link() {
        let t = testimg::mkimg();
        let mut img = t.open();
        let (a, _) = icreat(&mut img, ROOTINO, "/a", T_DIR).unwrap();
        let (b, _) = icreat(&mut img, ROOTINO, "/b", T_DIR).unwrap();
        let (c, _) = icreat(&mut img, ROOTINO, "/a/c", T_DIR).unwrap();
        assert_eq!(img.dinode(a).nlink, 2);
        let before = img.dinode(b).nlink;
        dmkparlink(&mut img, b, c).unwrap();
        assert_eq!(img.dinode(b).nlink, before + 1);
        let (parent, _) = dlookup(&mut img, c, b"..").unwrap().unwrap();
        assert_eq!(parent, b);
        // The old parent's count is the unlink path's concern, not ours.
        assert_eq!(img.dinode(a).nlink, 2);
        let f = ialloc(&mut img, T_FILE).unwrap();
        assert!(matches!(
            dmkparlink(&mut img, f, c),
            Err(FsError::WrongType(_))
        ));
    }
}
