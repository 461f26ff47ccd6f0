//! The editor's commands.
//!
//! Every command resolves paths from the root directory and reports through
//! `FsError`; the binary turns that into stderr text and an exit status.
//! `get` and `put` are generic over their byte sink/source so the streaming
//! loops can be exercised without real standard streams.

use std::io::{Read, Write};

use crate::dir::{daddent, dlookup, dmkparlink, emptydir, icreat, ilookup, iunlink, read_dirent};
use crate::error::{FsError, Result};
use crate::image::Image;
use crate::inode::{iget, iread, itruncate, iwrite};
use crate::path::splitpath;
use crate::fs::{
    typename, BSIZE, BUFSIZE, DIRENT_SIZE, DIRSIZ, IPB, MAXFILESIZE, NDIRECT, ROOTINO, T_DEV,
    T_DIR, T_FILE,
};

/// Prints the region layout and usage counters of the whole image.
pub fn diskinfo(img: &Image) -> Result<()> {
    let sb = *img.sb();
    let ni = img.ninode_blocks();
    let nm = img.nbitmap_blocks();
    let nd = sb.nblocks;
    let nl = sb.nlog;

    println!(
        "total blocks: {} ({} bytes)",
        sb.size,
        sb.size as u64 * BSIZE as u64
    );
    println!(
        "inode blocks: #2-#{} ({} blocks, {} inodes)",
        ni + 1,
        ni,
        sb.ninodes
    );
    println!("bitmap blocks: #{}-#{} ({} blocks)", ni + 2, ni + nm + 1, nm);
    println!(
        "data blocks: #{}-#{} ({} blocks)",
        ni + nm + 2,
        ni + nm + nd + 1,
        nd
    );
    println!(
        "log blocks: #{}-#{} ({} blocks)",
        ni + nm + nd + 2,
        ni + nm + nd + nl + 1,
        nl
    );
    println!("maximum file size (bytes): {}", MAXFILESIZE);

    let mut used = 0;
    for b in img.bitmap_start()..img.data_start() {
        used += img.block(b).iter().map(|x| x.count_ones()).sum::<u32>();
    }
    println!("# of used blocks: {used}");

    let (mut ndirs, mut nfiles, mut ndevs) = (0u32, 0u32, 0u32);
    for inum in 0..ni * IPB {
        match img.dinode(inum).file_type {
            T_DIR => ndirs += 1,
            T_FILE => nfiles += 1,
            T_DEV => ndevs += 1,
            _ => {}
        }
    }
    println!(
        "# of used inodes: {} (dirs: {}, files: {}, devs: {})",
        ndirs + nfiles + ndevs,
        ndirs,
        nfiles,
        ndevs
    );
    Ok(())
}

/// Prints one inode's metadata and the blocks it reaches.
pub fn info(img: &mut Image, path: &str) -> Result<()> {
    let ip = ilookup(img, ROOTINO, path)?.ok_or_else(|| {
        FsError::NotFound(format!("info: no such file or directory: {path}"))
    })?;
    let d = *img.dinode(ip);
    println!("inode: {ip}");
    println!("type: {} ({})", d.file_type, typename(d.file_type));
    println!("nlink: {}", d.nlink);
    println!("size: {}", d.size);
    if d.size > 0 {
        print!("data blocks:");
        let mut bcount = 0;
        for i in 0..NDIRECT {
            if d.addrs[i] == 0 {
                break;
            }
            print!(" {}", d.addrs[i]);
            bcount += 1;
        }
        let iaddr = d.addrs[NDIRECT];
        if iaddr != 0 {
            print!(" {iaddr}");
            bcount += 1;
            for &b in img.indirect(iaddr) {
                if b == 0 {
                    break;
                }
                print!(" {b}");
                bcount += 1;
            }
        }
        println!();
        println!("# of data blocks: {bcount}");
    }
    Ok(())
}

fn display_name(name: &[u8; DIRSIZ]) -> String {
    let len = name.iter().position(|&c| c == 0).unwrap_or(DIRSIZ);
    String::from_utf8_lossy(&name[..len]).into_owned()
}

/// Lists a directory's live entries, or the file itself for a non-directory.
pub fn ls(img: &mut Image, path: &str) -> Result<()> {
    let ip = ilookup(img, ROOTINO, path)?.ok_or_else(|| {
        FsError::NotFound(format!("ls: {path}: no such file or directory"))
    })?;
    if img.dinode(ip).file_type == T_DIR {
        let size = img.dinode(ip).size;
        let mut off = 0;
        while off < size {
            let de = read_dirent(img, ip, off)?;
            off += DIRENT_SIZE as u32;
            if de.inum == 0 {
                continue;
            }
            let p = iget(img, de.inum as u32)?;
            let d = img.dinode(p);
            println!(
                "{} {} {} {}",
                display_name(&de.name),
                d.file_type,
                de.inum,
                d.size
            );
        }
    } else {
        let d = img.dinode(ip);
        println!("{} {} {} {}", path, d.file_type, ip, d.size);
    }
    Ok(())
}

/// Copies a file's bytes out of the image.
pub fn get(img: &mut Image, path: &str, out: &mut impl Write) -> Result<()> {
    let ip = ilookup(img, ROOTINO, path)?.ok_or_else(|| {
        FsError::NotFound(format!("get: no such file or directory: {path}"))
    })?;
    let size = img.dinode(ip).size;
    let mut buf = [0u8; BUFSIZE];
    let mut off = 0;
    while off < size {
        let n = iread(img, ip, &mut buf, off)?;
        out.write_all(&buf[..n])?;
        off += BUFSIZE as u32;
    }
    Ok(())
}

// Reads until `buf` is full or the source is exhausted.
fn read_full(input: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        let m = input.read(&mut buf[n..])?;
        if m == 0 {
            break;
        }
        n += m;
    }
    Ok(n)
}

/// Streams `input` into a file at `path`, creating it as a regular file or
/// truncating an existing one. Input beyond the maximum file size is
/// dropped.
pub fn put(img: &mut Image, path: &str, input: &mut impl Read) -> Result<()> {
    let ip = match ilookup(img, ROOTINO, path)? {
        None => icreat(img, ROOTINO, path, T_FILE)?.0,
        Some(ip) => {
            if img.dinode(ip).file_type != T_FILE {
                return Err(FsError::WrongType(format!(
                    "put: {path}: directory or device"
                )));
            }
            itruncate(img, ip, 0)?;
            ip
        }
    };
    let mut buf = [0u8; BUFSIZE];
    let mut off = 0;
    while off < MAXFILESIZE {
        let n = read_full(input, &mut buf)?;
        let written = iwrite(img, ip, &buf[..n], off)?;
        if written != n {
            return Err(FsError::IoBounds(format!("put: {path}: write error")));
        }
        if n < BUFSIZE {
            break;
        }
        off += BUFSIZE as u32;
    }
    Ok(())
}

/// Removes a non-directory path.
pub fn rm(img: &mut Image, path: &str) -> Result<()> {
    let ip = ilookup(img, ROOTINO, path)?.ok_or_else(|| {
        FsError::NotFound(format!("rm: {path}: no such file or directory"))
    })?;
    if img.dinode(ip).file_type == T_DIR {
        return Err(FsError::WrongType(format!("rm: {path}: a directory")));
    }
    iunlink(img, ROOTINO, path)
}

/// Copies a regular file to a new or existing destination; an existing
/// directory destination receives a file named after the source.
pub fn cp(img: &mut Image, spath: &str, dpath: &str) -> Result<()> {
    let sip = ilookup(img, ROOTINO, spath)?.ok_or_else(|| {
        FsError::NotFound(format!("cp: {spath}: no such file or directory"))
    })?;
    if img.dinode(sip).file_type != T_FILE {
        return Err(FsError::WrongType(format!(
            "cp: {spath}: directory or device file"
        )));
    }

    let (ddir, dname) = splitpath(dpath);
    let dip = match ilookup(img, ROOTINO, dpath)? {
        None => {
            if dname.is_empty() {
                return Err(FsError::NotFound(format!("cp: {dpath}: no such directory")));
            }
            let ddip = ilookup(img, ROOTINO, ddir)?.ok_or_else(|| {
                FsError::NotFound(format!("cp: {ddir}: no such directory"))
            })?;
            if img.dinode(ddip).file_type != T_DIR {
                return Err(FsError::WrongType(format!("cp: {ddir}: not a directory")));
            }
            icreat(img, ddip, dname, T_FILE)?.0
        }
        Some(dip) => match img.dinode(dip).file_type {
            T_DIR => {
                let (_, sname) = splitpath(spath);
                icreat(img, dip, sname, T_FILE)?.0
            }
            T_FILE => {
                itruncate(img, dip, 0)?;
                dip
            }
            _ => return Err(FsError::WrongType(format!("cp: {dpath}: device file"))),
        },
    };

    let size = img.dinode(sip).size;
    let mut buf = [0u8; BUFSIZE];
    let mut off = 0;
    while off < size {
        let n = iread(img, sip, &mut buf, off)?;
        let written = iwrite(img, dip, &buf[..n], off)?;
        if written != n {
            return Err(FsError::IoBounds(format!("cp: {dpath}: write error")));
        }
        off += BUFSIZE as u32;
    }
    Ok(())
}

/// Moves or renames a file or directory. Overwriting is only allowed for
/// matching types, and an overwritten directory must be empty. Directory
/// moves re-point the child's ".." after the source entry is gone.
pub fn mv(img: &mut Image, spath: &str, dpath: &str) -> Result<()> {
    let sip = ilookup(img, ROOTINO, spath)?.ok_or_else(|| {
        FsError::NotFound(format!("mv: {spath}: no such file or directory"))
    })?;
    if sip == ROOTINO {
        return Err(FsError::InvalidArgument(format!(
            "mv: {spath}: root directory"
        )));
    }

    let (ddir, dname) = splitpath(dpath);
    match ilookup(img, ROOTINO, dpath)? {
        Some(dip) => match img.dinode(dip).file_type {
            T_DIR => {
                let (_, sname) = splitpath(spath);
                match dlookup(img, dip, sname.as_bytes())? {
                    Some((ip, _)) => match img.dinode(ip).file_type {
                        T_DIR => {
                            // Replace an empty directory.
                            if img.dinode(sip).file_type != T_DIR {
                                return Err(FsError::WrongType(format!(
                                    "mv: {spath}: not a directory"
                                )));
                            }
                            if !emptydir(img, ip)? {
                                return Err(FsError::NotEmpty(format!(
                                    "mv: {ddir}{sname}: not empty"
                                )));
                            }
                            iunlink(img, dip, sname)?;
                            daddent(img, dip, sname.as_bytes(), sip)?;
                            iunlink(img, ROOTINO, spath)?;
                            dmkparlink(img, dip, sip)?;
                            Ok(())
                        }
                        T_FILE => {
                            // Replace an existing file.
                            if img.dinode(sip).file_type != T_FILE {
                                return Err(FsError::WrongType(format!(
                                    "mv: {spath}: directory or device"
                                )));
                            }
                            iunlink(img, dip, sname)?;
                            daddent(img, dip, sname.as_bytes(), sip)?;
                            iunlink(img, ROOTINO, spath)?;
                            Ok(())
                        }
                        _ => Err(FsError::WrongType(format!("mv: {dpath}: device"))),
                    },
                    None => {
                        daddent(img, dip, sname.as_bytes(), sip)?;
                        iunlink(img, ROOTINO, spath)?;
                        if img.dinode(sip).file_type == T_DIR {
                            dmkparlink(img, dip, sip)?;
                        }
                        Ok(())
                    }
                }
            }
            T_FILE => {
                if img.dinode(sip).file_type != T_FILE {
                    return Err(FsError::WrongType(format!("mv: {spath}: not a file")));
                }
                iunlink(img, ROOTINO, dpath)?;
                let pip = ilookup(img, ROOTINO, ddir)?.ok_or_else(|| {
                    FsError::Corrupt(format!("mv: {ddir}: no such directory"))
                })?;
                if img.dinode(pip).file_type != T_DIR {
                    return Err(FsError::Corrupt(format!("mv: {ddir}: not a directory")));
                }
                daddent(img, pip, dname.as_bytes(), sip)?;
                iunlink(img, ROOTINO, spath)?;
                Ok(())
            }
            _ => Err(FsError::WrongType(format!("mv: {dpath}: device"))),
        },
        None => {
            if dname.is_empty() {
                return Err(FsError::NotFound(format!("mv: {dpath}: no such directory")));
            }
            let pip = ilookup(img, ROOTINO, ddir)?.ok_or_else(|| {
                FsError::NotFound(format!("mv: {ddir}: no such directory"))
            })?;
            if img.dinode(pip).file_type != T_DIR {
                return Err(FsError::WrongType(format!("mv: {ddir}: not a directory")));
            }
            daddent(img, pip, dname.as_bytes(), sip)?;
            iunlink(img, ROOTINO, spath)?;
            if img.dinode(sip).file_type == T_DIR {
                dmkparlink(img, pip, sip)?;
            }
            Ok(())
        }
    }
}

/// Hard-links a regular file. Linking at an existing directory places the
/// link inside it under the source's base name.
pub fn ln(img: &mut Image, spath: &str, dpath: &str) -> Result<()> {
    let sip = ilookup(img, ROOTINO, spath)?.ok_or_else(|| {
        FsError::NotFound(format!("ln: {spath}: no such file or directory"))
    })?;
    if img.dinode(sip).file_type != T_FILE {
        return Err(FsError::WrongType(format!(
            "ln: {spath}: is a directory or a device"
        )));
    }

    let (ddir, dname) = splitpath(dpath);
    let mut dip = ilookup(img, ROOTINO, ddir)?.ok_or_else(|| {
        FsError::NotFound(format!("ln: {ddir}: no such directory"))
    })?;
    if img.dinode(dip).file_type != T_DIR {
        return Err(FsError::WrongType(format!("ln: {ddir}: not a directory")));
    }
    let mut name = dname;
    if dname.is_empty() {
        name = splitpath(spath).1;
        if dlookup(img, dip, name.as_bytes())?.is_some() {
            return Err(FsError::AlreadyExists(format!(
                "ln: {ddir}/{name}: file exists"
            )));
        }
    } else if let Some((ip, _)) = dlookup(img, dip, dname.as_bytes())? {
        if img.dinode(ip).file_type != T_DIR {
            return Err(FsError::AlreadyExists(format!(
                "ln: {ddir}/{dname}: file exists"
            )));
        }
        name = splitpath(spath).1;
        dip = ip;
    }
    daddent(img, dip, name.as_bytes(), sip)
}

/// Creates a directory; the path must not already resolve.
pub fn mkdir(img: &mut Image, path: &str) -> Result<()> {
    if ilookup(img, ROOTINO, path)?.is_some() {
        return Err(FsError::AlreadyExists(format!("mkdir: {path}: file exists")));
    }
    icreat(img, ROOTINO, path, T_DIR)?;
    Ok(())
}

/// Removes an empty directory.
pub fn rmdir(img: &mut Image, path: &str) -> Result<()> {
    let ip = ilookup(img, ROOTINO, path)?.ok_or_else(|| {
        FsError::NotFound(format!("rmdir: {path}: no such file or directory"))
    })?;
    if img.dinode(ip).file_type != T_DIR {
        return Err(FsError::WrongType(format!("rmdir: {path}: not a directory")));
    }
    if !emptydir(img, ip)? {
        return Err(FsError::NotEmpty(format!(
            "rmdir: {path}: non-empty directory"
        )));
    }
    iunlink(img, ROOTINO, path)
}
