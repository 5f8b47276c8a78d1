//! bootfs Virtual File System
//!
//! Provides a unified, read-only interface over the boot filesystems
//! (UBIFS, NFSv3).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │      Boot scripts / shell commands   │
//! └──────────────────┬───────────────────┘
//!                    │ open/read/opendir/readlink
//! ┌──────────────────▼───────────────────┐
//! │              VFS Layer               │
//! │  - Mount table                       │
//! │  - Path and symlink resolution       │
//! └──────────────────┬───────────────────┘
//!                    │ Filesystem trait
//! ┌──────────────────┴───────────────────┐
//! │      UBIFS       │       NFSv3       │
//! └──────────────────┴───────────────────┘
//! ```
//!
//! Drivers never follow symlinks themselves. Closing a file or directory
//! is dropping its handle.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use log::{debug, warn};
use spin::Mutex;

pub mod error;
pub mod file;
pub mod mount;
pub mod path;
pub mod symlink;

pub use error::{VfsError, VfsResult};
pub use file::{FileStat, FileType};
pub use mount::{MountPoint, MountTable};
pub use path::{normalize, Path};
pub use symlink::{ResolveOptions, ResolvedPath, SymlinkResolver, SymlinkTarget, MAX_SYMLINK_DEPTH};

/// Maximum path length
pub const MAX_PATH: usize = 4096;

/// Maximum filename length
pub const MAX_FILENAME: usize = 255;

/// Maximum number of mount points
pub const MAX_MOUNTS: usize = 16;

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name
    pub name: String,
    /// Entry type (`Unknown` if the filesystem does not record it)
    pub file_type: FileType,
    /// Inode number (filesystem-specific)
    pub inode: u64,
}

/// Filesystem trait - implemented by every filesystem driver
pub trait Filesystem: Send + Sync {
    /// Driver name (`ubifs`, `nfs`)
    fn name(&self) -> &'static str;

    /// Open a file for reading
    fn open(&self, path: &str) -> VfsResult<Box<dyn FileOperations>>;

    /// Attributes of `path`; a final symlink is not followed
    fn stat(&self, path: &str) -> VfsResult<FileStat>;

    /// Open a directory for listing
    fn opendir(&self, path: &str) -> VfsResult<Box<dyn DirOperations>>;

    /// Target of the symlink at `path`
    fn readlink(&self, path: &str) -> VfsResult<String>;

    /// Get filesystem statistics
    fn statfs(&self) -> VfsResult<FsStats>;

    /// Kernel command line arguments that mount this filesystem as root
    fn linux_rootarg(&self) -> VfsResult<String> {
        Err(VfsError::NotSupported)
    }

    /// Called once when the mount table entry goes away
    ///
    /// Open handles may still be alive afterwards.
    fn unmount(&self) -> VfsResult<()> {
        Ok(())
    }

    /// Read entire file contents (convenience method)
    fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let mut file = self.open(path)?;
        let stat = file.stat()?;
        let mut buffer = vec![0u8; stat.size as usize];
        let mut done = 0;
        while done < buffer.len() {
            match file.read(&mut buffer[done..])? {
                0 => break,
                n => done += n,
            }
        }
        buffer.truncate(done);
        Ok(buffer)
    }
}

/// File operations trait - returned by Filesystem::open
///
/// Dropping the handle closes the file.
pub trait FileOperations: Send + Sync {
    /// Read at the current position, advancing it
    fn read(&mut self, buffer: &mut [u8]) -> VfsResult<usize>;

    /// Move the position (lseek)
    fn seek(&mut self, offset: i64, whence: SeekFrom) -> VfsResult<u64>;

    /// Get current position
    fn tell(&self) -> u64;

    /// Get file statistics
    fn stat(&self) -> VfsResult<FileStat>;
}

/// Directory listing handle - returned by Filesystem::opendir
///
/// Dropping the handle closes the directory.
pub trait DirOperations: Send + Sync {
    /// Next entry, `None` once the listing is complete
    fn readdir(&mut self) -> VfsResult<Option<DirEntry>>;
}

/// Seek origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    /// From start of file
    Start,
    /// From current position
    Current,
    /// From end of file
    End,
}

/// New position for an lseek on a file of `size` bytes at `pos`
///
/// Seeking past the end is allowed; reads there return 0.
pub fn seek_position(pos: u64, size: u64, offset: i64, whence: SeekFrom) -> VfsResult<u64> {
    let base = match whence {
        SeekFrom::Start => 0,
        SeekFrom::Current => pos,
        SeekFrom::End => size,
    };
    let target = if offset >= 0 {
        base.checked_add(offset as u64)
    } else {
        base.checked_sub(offset.unsigned_abs())
    };
    target.ok_or(VfsError::InvalidArgument)
}

/// Filesystem statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStats {
    /// Total blocks
    pub total_blocks: u64,
    /// Free blocks
    pub free_blocks: u64,
    /// Block size
    pub block_size: u32,
    /// Total inodes
    pub total_inodes: u64,
    /// Free inodes
    pub free_inodes: u64,
    /// Maximum filename length
    pub max_name_len: u32,
}

/// Global VFS instance
static VFS: Mutex<Option<Vfs>> = Mutex::new(None);

/// Virtual File System manager
#[derive(Default)]
pub struct Vfs {
    mounts: MountTable,
}

impl Vfs {
    pub fn new() -> Self {
        Vfs {
            mounts: MountTable::new(),
        }
    }

    // ========== Mounts ==========

    /// Mount a filesystem at a path
    pub fn mount(&mut self, path: &str, fstype: &str, source: &str, fs: Box<dyn Filesystem>) -> VfsResult<()> {
        self.mounts.mount(path, fstype, source, fs)
    }

    /// Unmount a filesystem
    pub fn unmount(&mut self, path: &str) -> VfsResult<()> {
        let mp = self.mounts.unmount(path)?;
        if let Err(e) = mp.filesystem.unmount() {
            warn!("vfs: {} ({}) did not unmount cleanly: {}", mp.path, mp.fstype, e);
        }
        Ok(())
    }

    /// List all path mounts
    pub fn list_mounts(&self) -> &[MountPoint] {
        self.mounts.list()
    }

    // ========== Resolution ==========

    /// Resolve path to filesystem and relative path, no symlinks followed
    fn resolve(&self, path: &str) -> VfsResult<(&dyn Filesystem, String)> {
        self.mounts.resolve(path)
    }

    /// Resolve `path` to a symlink-free absolute path
    ///
    /// Components are checked one at a time. A symlink found in an
    /// intermediate component (or in the last one, with
    /// `follow_final`) is replaced by its target and resolution restarts
    /// from there. Components after a missing one are not examined.
    pub fn canonicalize(&self, path: &str, options: ResolveOptions) -> VfsResult<ResolvedPath> {
        if path.len() > MAX_PATH {
            return Err(VfsError::NameTooLong);
        }
        let mut resolver = SymlinkResolver::new();
        let mut pending: VecDeque<String> = path::components(path).into_iter().map(String::from).collect();
        let mut current = Path::new("/");

        while let Some(component) = pending.pop_front() {
            match component.as_str() {
                "." => continue,
                ".." => {
                    current = current.parent();
                    continue;
                }
                _ => {}
            }
            if component.len() > MAX_FILENAME {
                return Err(VfsError::NameTooLong);
            }
            let candidate = current.join(&component);
            let is_final = pending.is_empty();
            let follow = if is_final {
                options.follow_final
            } else {
                options.follow_symlinks
            };
            // Directories leading to a mount point need not exist below it
            if !follow || self.mounts.is_mount_ancestor(candidate.as_str()) {
                current = candidate;
                continue;
            }

            let (fs, rel) = self.resolve(candidate.as_str())?;
            let stat = fs.stat(&rel)?;
            if !stat.is_symlink() {
                current = candidate;
                continue;
            }

            resolver.enter()?;
            let target = SymlinkTarget::new(&fs.readlink(&rel)?);
            let spliced = target.resolve(current.as_str());
            debug!("vfs: {} -> {}", candidate, spliced);
            for part in spliced.components().into_iter().rev() {
                pending.push_front(String::from(part));
            }
            current = Path::new("/");
        }

        Ok(ResolvedPath {
            path: String::from(current.as_str()),
            symlinks_followed: resolver.depth(),
        })
    }

    fn resolve_following(&self, path: &str, options: ResolveOptions) -> VfsResult<(&dyn Filesystem, String)> {
        let resolved = self.canonicalize(path, options)?;
        self.resolve(&resolved.path)
    }

    /// Open a file, following symlinks
    pub fn open(&self, path: &str) -> VfsResult<Box<dyn FileOperations>> {
        let (fs, rel) = self.resolve_following(path, ResolveOptions::default())?;
        fs.open(&rel)
    }

    /// Get file statistics, following symlinks
    pub fn stat(&self, path: &str) -> VfsResult<FileStat> {
        let (fs, rel) = self.resolve_following(path, ResolveOptions::default())?;
        fs.stat(&rel)
    }

    /// Get file statistics of a symlink itself
    pub fn lstat(&self, path: &str) -> VfsResult<FileStat> {
        let (fs, rel) = self.resolve_following(path, ResolveOptions::no_follow_final())?;
        fs.stat(&rel)
    }

    /// Open a directory, following symlinks
    pub fn opendir(&self, path: &str) -> VfsResult<Box<dyn DirOperations>> {
        let (fs, rel) = self.resolve_following(path, ResolveOptions::default())?;
        fs.opendir(&rel)
    }

    /// Read directory entries
    pub fn readdir(&self, path: &str) -> VfsResult<Vec<DirEntry>> {
        let mut dir = self.opendir(path)?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.readdir()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Read a symlink target
    pub fn readlink(&self, path: &str) -> VfsResult<String> {
        let (fs, rel) = self.resolve_following(path, ResolveOptions::no_follow_final())?;
        fs.readlink(&rel)
    }

    /// Filesystem statistics of the mount holding `path`
    pub fn statfs(&self, path: &str) -> VfsResult<FsStats> {
        let (fs, _) = self.resolve(path)?;
        fs.statfs()
    }

    /// Kernel root arguments for the filesystem mounted at `path`
    pub fn linux_rootarg(&self, path: &str) -> VfsResult<String> {
        let (fs, _) = self.resolve(path)?;
        fs.linux_rootarg()
    }
}

/// Initialize the global VFS
pub fn init() {
    let mut vfs = VFS.lock();
    *vfs = Some(Vfs::new());
}

/// Get a reference to the global VFS
pub fn vfs() -> spin::MutexGuard<'static, Option<Vfs>> {
    VFS.lock()
}

fn with_vfs<T>(f: impl FnOnce(&mut Vfs) -> VfsResult<T>) -> VfsResult<T> {
    let mut vfs = VFS.lock();
    match vfs.as_mut() {
        Some(v) => f(v),
        None => Err(VfsError::NotInitialized),
    }
}

/// Mount a filesystem at a path
pub fn mount(path: &str, fstype: &str, source: &str, fs: Box<dyn Filesystem>) -> VfsResult<()> {
    with_vfs(|v| v.mount(path, fstype, source, fs))
}

/// Unmount the filesystem at a path
pub fn unmount(path: &str) -> VfsResult<()> {
    with_vfs(|v| v.unmount(path))
}

/// Open a file
pub fn open(path: &str) -> VfsResult<Box<dyn FileOperations>> {
    with_vfs(|v| v.open(path))
}

/// Get file statistics
pub fn stat(path: &str) -> VfsResult<FileStat> {
    with_vfs(|v| v.stat(path))
}

/// Get file statistics without following a final symlink
pub fn lstat(path: &str) -> VfsResult<FileStat> {
    with_vfs(|v| v.lstat(path))
}

/// Open a directory
pub fn opendir(path: &str) -> VfsResult<Box<dyn DirOperations>> {
    with_vfs(|v| v.opendir(path))
}

/// Read directory entries
pub fn readdir(path: &str) -> VfsResult<Vec<DirEntry>> {
    with_vfs(|v| v.readdir(path))
}

/// Read a symlink target
pub fn readlink(path: &str) -> VfsResult<String> {
    with_vfs(|v| v.readlink(path))
}
