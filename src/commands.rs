//! Shell commands
//!
//! Output goes to any `core::fmt::Write` sink, normally the bootloader
//! console. A failed console write is reported as an I/O error.

use alloc::string::String;
use alloc::vec;
use core::fmt::{self, Write};

use bootfs_vfs::path::Path;
use bootfs_vfs::{FileStat, FileType, Vfs, VfsError, VfsResult};
use log::debug;

/// Read size for `cat`
const CAT_CHUNK: usize = 4096;

fn console(_: fmt::Error) -> VfsError {
    VfsError::IoError
}

fn type_name(file_type: FileType) -> &'static str {
    match file_type {
        FileType::Regular => "regular file",
        FileType::Directory => "directory",
        FileType::Symlink => "symbolic link",
        FileType::BlockDevice => "block device",
        FileType::CharDevice => "character device",
        FileType::Fifo => "fifo",
        FileType::Socket => "socket",
        FileType::Unknown => "unknown",
    }
}

/// `drwxr-xr-x` style mode string
pub fn mode_string(st: &FileStat) -> String {
    let mut s = String::with_capacity(10);
    s.push(st.file_type.tag());
    for shift in [6u32, 3, 0] {
        let bits = (st.mode >> shift) & 7;
        s.push(if bits & 4 != 0 { 'r' } else { '-' });
        s.push(if bits & 2 != 0 { 'w' } else { '-' });
        s.push(if bits & 1 != 0 { 'x' } else { '-' });
    }
    s
}

fn entry_line(out: &mut dyn Write, st: &FileStat, name: &str, target: Option<&str>) -> fmt::Result {
    if st.is_dir() {
        write!(out, "<DIR>      {}", name)?;
    } else {
        write!(out, "{:>10} {}", st.size, name)?;
    }
    if let Some(target) = target {
        write!(out, " -> {}", target)?;
    }
    writeln!(out)
}

/// List a directory, or describe a single file
///
/// Entries are sorted by name. Directories show `<DIR>`, everything else
/// its size; symlinks are not followed and show their target.
pub fn ls(vfs: &Vfs, path: &str, out: &mut dyn Write) -> VfsResult<()> {
    let st = vfs.stat(path)?;
    if !st.is_dir() {
        return entry_line(out, &st, path, None).map_err(console);
    }

    let mut entries = vfs.readdir(path)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let dir = Path::new(path);
    for entry in &entries {
        let full = dir.join(&entry.name);
        match vfs.lstat(full.as_str()) {
            Ok(st) => {
                let target = if st.is_symlink() {
                    vfs.readlink(full.as_str()).ok()
                } else {
                    None
                };
                entry_line(out, &st, &entry.name, target.as_deref()).map_err(console)?;
            }
            Err(e) => {
                debug!("ls: {}: {}", full.as_str(), e);
                writeln!(out, "{:>10} {}", "?", entry.name).map_err(console)?;
            }
        }
    }
    Ok(())
}

/// Copy a file to the console, returning the number of bytes read
///
/// Invalid UTF-8 is shown as U+FFFD.
pub fn cat(vfs: &Vfs, path: &str, out: &mut dyn Write) -> VfsResult<u64> {
    let mut file = vfs.open(path)?;
    let mut buf = vec![0u8; CAT_CHUNK];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_str(&String::from_utf8_lossy(&buf[..n])).map_err(console)?;
        total += n as u64;
    }
    Ok(total)
}

fn write_stat(out: &mut dyn Write, path: &str, st: &FileStat, target: Option<&str>) -> fmt::Result {
    match target {
        Some(target) => writeln!(out, "  File: {} -> {}", path, target)?,
        None => writeln!(out, "  File: {}", path)?,
    }
    writeln!(
        out,
        "  Size: {:<10} Blocks: {:<8} IO Block: {:<6} {}",
        st.size,
        st.blocks,
        st.blksize,
        type_name(st.file_type)
    )?;
    writeln!(out, " Inode: {:<10} Links: {}", st.inode, st.nlink)?;
    writeln!(
        out,
        "Access: ({:04o}/{})  Uid: {}  Gid: {}",
        st.permissions(),
        mode_string(st),
        st.uid,
        st.gid
    )?;
    writeln!(out, "Modify: {}", st.mtime)
}

/// Describe `path` itself; a symlink is not followed
pub fn stat(vfs: &Vfs, path: &str, out: &mut dyn Write) -> VfsResult<()> {
    let st = vfs.lstat(path)?;
    let target = if st.is_symlink() { Some(vfs.readlink(path)?) } else { None };
    write_stat(out, path, &st, target.as_deref()).map_err(console)
}

/// Print a symlink target
pub fn readlink(vfs: &Vfs, path: &str, out: &mut dyn Write) -> VfsResult<()> {
    let target = vfs.readlink(path)?;
    writeln!(out, "{}", target).map_err(console)
}
