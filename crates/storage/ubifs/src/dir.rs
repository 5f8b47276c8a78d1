//! Path resolution and directory iteration
//!
//! UBIFS stores no `.` or `..` entries, and neither are synthesized here.
//! Entries of a directory are keyed by `(dir inode, DENT, hash(name))`, so
//! a listing comes out in hash order, and ties (hash collisions) in name
//! order.

use alloc::string::String;
use alloc::vec::Vec;

use bootfs_driver_traits::VolumeDevice;
use log::{debug, warn};

use crate::error::Error;
use crate::inode::{FileKind, InodeRef};
use crate::key::Key;
use crate::mount::Ubifs;
use crate::{MAX_NLEN, ROOT_INO};

/// One directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name (invalid UTF-8 replaced)
    pub name: String,
    pub inode_number: u64,
    /// Type recorded in the entry; `None` if the byte is out of range
    pub kind: Option<FileKind>,
}

/// Open directory
///
/// Holds a reference to the directory inode until passed to
/// [`Ubifs::closedir`]. The position is only meaningful to the mount that
/// created it.
pub struct DirCursor {
    mount: u32,
    dir: InodeRef,
    key: Key,
    name: Option<Vec<u8>>,
    done: bool,
}

impl DirCursor {
    /// Inode number of the directory being listed
    pub fn inode_number(&self) -> u64 {
        self.dir.number
    }

    /// Start over from the first entry
    pub fn rewind(&mut self) {
        self.key = Key::lowest_dent(self.dir.number);
        self.name = None;
        self.done = false;
    }
}

impl<V: VolumeDevice> Ubifs<V> {
    /// Resolve a slash separated path to an inode
    ///
    /// Empty components are ignored, so `""`, `"/"` and `"//"` all name the
    /// root directory. Symlinks are not followed. The returned reference
    /// must be given back with [`Ubifs::release`].
    pub fn resolve(&mut self, path: &str) -> Result<InodeRef, Error> {
        let mut current = self.iget(ROOT_INO)?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            match self.lookup_child(&current, component) {
                Ok(child) => {
                    self.release(current);
                    current = child;
                }
                Err(e) => {
                    self.release(current);
                    return Err(e);
                }
            }
        }
        Ok(current)
    }

    /// Look `name` up in directory `dir`
    fn lookup_child(&mut self, dir: &InodeRef, name: &str) -> Result<InodeRef, Error> {
        if name.len() > MAX_NLEN {
            return Err(Error::NameTooLong);
        }
        if !dir.is_dir() {
            return Err(Error::NotADirectory);
        }
        let key = Key::dent(dir.number, self.info.key_hash.hash(name.as_bytes()));
        let dent = self
            .tnc
            .lookup_name(&mut self.volume, &key, name.as_bytes(), dir.creat_sqnum)?
            .ok_or(Error::NotFound)?;
        debug!("ubifs: {} -> inode {}", name, dent.inum);
        self.iget(dent.inum)
    }

    /// Open the directory at `path` for listing
    pub fn opendir(&mut self, path: &str) -> Result<DirCursor, Error> {
        let dir = self.resolve(path)?;
        if !dir.is_dir() {
            self.release(dir);
            return Err(Error::NotADirectory);
        }
        Ok(DirCursor {
            mount: self.id,
            key: Key::lowest_dent(dir.number),
            dir,
            name: None,
            done: false,
        })
    }

    /// Next entry of an open directory, `None` once all have been returned
    pub fn readdir(&mut self, cursor: &mut DirCursor) -> Result<Option<DirEntry>, Error> {
        if cursor.mount != self.id {
            return Err(Error::InvalidArgument);
        }
        if cursor.done {
            return Ok(None);
        }
        let next = self
            .tnc
            .next_entry(&mut self.volume, &cursor.key, cursor.name.as_deref(), cursor.dir.creat_sqnum)?;
        match next {
            None => {
                cursor.done = true;
                Ok(None)
            }
            Some(dent) => {
                debug!("ubifs: readdir {} feeds inode {}", cursor.dir.number, dent.inum);
                let entry = DirEntry {
                    name: String::from_utf8_lossy(&dent.name).into_owned(),
                    inode_number: dent.inum,
                    kind: FileKind::from_itype(dent.itype),
                };
                cursor.key = dent.key;
                cursor.name = Some(dent.name);
                Ok(Some(entry))
            }
        }
    }

    /// Close a directory opened with `opendir`
    pub fn closedir(&mut self, cursor: DirCursor) {
        if cursor.mount != self.id {
            warn!("ubifs: closing a directory of mount {} on mount {}", cursor.mount, self.id);
            return;
        }
        self.release(cursor.dir);
    }
}
