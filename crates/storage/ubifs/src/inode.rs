//! Inode cache
//!
//! Inodes are looked up through the index on first use and kept in a
//! table keyed by inode number. Handles are `Arc`s and the table counts
//! how many of them are out; `release` gives one back. An inode whose
//! count drops to zero stays cached (the media is read-only, so it can
//! never go stale within a mount) but becomes evictable.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::warn;

use crate::error::{CorruptNode, CorruptReason};
use crate::node::{InodeFlags, InodeNode, Timestamp};

// File type bits of `mode`
pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// Inode type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl FileKind {
    /// Type from the `S_IFMT` bits of a mode
    pub fn from_mode(mode: u32) -> Option<Self> {
        Some(match mode & S_IFMT {
            S_IFREG => FileKind::Regular,
            S_IFDIR => FileKind::Directory,
            S_IFLNK => FileKind::Symlink,
            S_IFBLK => FileKind::BlockDevice,
            S_IFCHR => FileKind::CharDevice,
            S_IFIFO => FileKind::Fifo,
            S_IFSOCK => FileKind::Socket,
            _ => return None,
        })
    }

    /// Type from the `type` byte of a directory entry node
    pub fn from_itype(itype: u8) -> Option<Self> {
        Some(match itype {
            0 => FileKind::Regular,
            1 => FileKind::Directory,
            2 => FileKind::Symlink,
            3 => FileKind::BlockDevice,
            4 => FileKind::CharDevice,
            5 => FileKind::Fifo,
            6 => FileKind::Socket,
            _ => return None,
        })
    }

    /// Directory entry `type` byte
    pub fn itype(self) -> u8 {
        match self {
            FileKind::Regular => 0,
            FileKind::Directory => 1,
            FileKind::Symlink => 2,
            FileKind::BlockDevice => 3,
            FileKind::CharDevice => 4,
            FileKind::Fifo => 5,
            FileKind::Socket => 6,
        }
    }

    /// `S_IFMT` bits
    pub fn mode_bits(self) -> u32 {
        match self {
            FileKind::Regular => S_IFREG,
            FileKind::Directory => S_IFDIR,
            FileKind::Symlink => S_IFLNK,
            FileKind::BlockDevice => S_IFBLK,
            FileKind::CharDevice => S_IFCHR,
            FileKind::Fifo => S_IFIFO,
            FileKind::Socket => S_IFSOCK,
        }
    }
}

/// Decoded inode attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub number: u64,
    pub kind: FileKind,
    /// Full mode including permission bits
    pub mode: u32,
    pub size: u64,
    /// Nodes of this inode with a sequence number at or below this are stale
    pub creat_sqnum: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
    pub flags: InodeFlags,
    pub xattr_cnt: u32,
    pub compr_type: u16,
    /// Symlink target or device number; empty for most inodes
    pub inline_data: Vec<u8>,
}

impl Inode {
    pub fn from_node(node: InodeNode) -> Result<Self, CorruptNode> {
        let kind = FileKind::from_mode(node.mode).ok_or(CorruptNode::new(CorruptReason::BadMode(node.mode)))?;
        Ok(Inode {
            number: node.key.inum,
            kind,
            mode: node.mode,
            size: node.size,
            creat_sqnum: node.creat_sqnum,
            nlink: node.nlink,
            uid: node.uid,
            gid: node.gid,
            atime: node.atime,
            mtime: node.mtime,
            ctime: node.ctime,
            flags: node.flags,
            xattr_cnt: node.xattr_cnt,
            compr_type: node.compr_type,
            inline_data: node.data,
        })
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }

    /// Permission bits
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// Shared handle to a cached inode
pub type InodeRef = Arc<Inode>;

struct Slot {
    inode: InodeRef,
    refs: usize,
}

/// Reference-counted inode table
#[derive(Default)]
pub struct InodeCache {
    slots: BTreeMap<u64, Slot>,
}

impl InodeCache {
    pub fn new() -> Self {
        InodeCache { slots: BTreeMap::new() }
    }

    /// Take a reference to inode `inum`, loading it with `load` on a miss
    pub fn get<E>(&mut self, inum: u64, load: impl FnOnce(u64) -> Result<Inode, E>) -> Result<InodeRef, E> {
        if let Some(slot) = self.slots.get_mut(&inum) {
            slot.refs += 1;
            return Ok(slot.inode.clone());
        }
        let inode = Arc::new(load(inum)?);
        self.slots.insert(inum, Slot { inode: inode.clone(), refs: 1 });
        Ok(inode)
    }

    /// Give back a reference taken with `get`
    pub fn release(&mut self, inode: InodeRef) {
        match self.slots.get_mut(&inode.number) {
            Some(slot) if slot.refs > 0 => slot.refs -= 1,
            Some(_) => warn!("ubifs: unbalanced release of inode {}", inode.number),
            None => warn!("ubifs: release of uncached inode {}", inode.number),
        }
    }

    /// Outstanding references to `inum`, `None` if not cached
    pub fn refcount(&self, inum: u64) -> Option<usize> {
        self.slots.get(&inum).map(|s| s.refs)
    }

    /// Cached with no outstanding references
    pub fn is_evictable(&self, inum: u64) -> bool {
        self.refcount(inum) == Some(0)
    }

    /// Number of cached inodes
    pub fn cached(&self) -> usize {
        self.slots.len()
    }

    /// Number of cached inodes without outstanding references
    pub fn evictable(&self) -> usize {
        self.slots.values().filter(|s| s.refs == 0).count()
    }

    /// Drop every unreferenced inode, returning how many were dropped
    pub fn evict_unreferenced(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, s| s.refs > 0);
        before - self.slots.len()
    }

    /// Forget everything (unmount)
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
