//! File reads
//!
//! A file is a sequence of 4 KiB blocks, each stored as at most one data
//! node keyed `(inode, DATA, block)`. A block without a data node is a
//! hole and reads as zeros. The last block may decompress to less than
//! 4 KiB; the rest of it reads as zeros too.
//!
//! Each open file caches the last decompressed block, which makes
//! sequential reads in small chunks cost one index walk per block.

use alloc::vec;
use alloc::vec::Vec;

use bootfs_driver_traits::VolumeDevice;
use log::{debug, error, warn};

use crate::error::{CorruptNode, CorruptReason, Error, IoError};
use crate::inode::InodeRef;
use crate::key::Key;
use crate::mount::Ubifs;
use crate::{BLOCK_SHIFT, BLOCK_SIZE};

/// An open file
///
/// Holds a reference to the inode until passed to [`Ubifs::close`].
pub struct OpenFile {
    mount: u32,
    inode: InodeRef,
    cached_block: Option<u32>,
    block: Vec<u8>,
}

impl OpenFile {
    pub fn inode(&self) -> &InodeRef {
        &self.inode
    }

    pub fn size(&self) -> u64 {
        self.inode.size
    }

    /// Block currently held in the read cache
    pub fn cached_block(&self) -> Option<u32> {
        self.cached_block
    }
}

impl<V: VolumeDevice> Ubifs<V> {
    /// Open the file at `path`
    pub fn open(&mut self, path: &str) -> Result<OpenFile, Error> {
        let inode = self.resolve(path)?;
        if inode.is_dir() {
            self.release(inode);
            return Err(Error::IsADirectory);
        }
        Ok(OpenFile {
            mount: self.id,
            inode,
            cached_block: None,
            block: vec![0u8; BLOCK_SIZE],
        })
    }

    /// Close a file opened with `open`
    ///
    /// A file from another mount is dropped without touching this
    /// mount's inode cache.
    pub fn close(&mut self, file: OpenFile) {
        if file.mount != self.id {
            warn!("ubifs: closing a file of mount {} on mount {}", file.mount, self.id);
            return;
        }
        self.release(file.inode);
    }

    /// Read up to `buf.len()` bytes at `offset`
    ///
    /// Returns the number of bytes copied, which is short only at end of
    /// file, and 0 at or past it. A file opened by another mount is
    /// `InvalidArgument`.
    pub fn read(&mut self, file: &mut OpenFile, offset: u64, buf: &mut [u8]) -> Result<usize, Error> {
        if file.mount != self.id {
            return Err(Error::InvalidArgument);
        }
        let size = file.inode.size;
        if offset >= size || buf.is_empty() {
            return Ok(0);
        }
        let len = (size - offset).min(buf.len() as u64) as usize;

        let mut done = 0;
        while done < len {
            let pos = offset + done as u64;
            let block = u32::try_from(pos >> BLOCK_SHIFT).map_err(|_| Error::InvalidArgument)?;
            let in_block = (pos as usize) & (BLOCK_SIZE - 1);
            self.fill_block(file, block)?;
            let n = (BLOCK_SIZE - in_block).min(len - done);
            buf[done..done + n].copy_from_slice(&file.block[in_block..in_block + n]);
            done += n;
        }
        Ok(done)
    }

    /// Make `file.block` hold block `block`
    fn fill_block(&mut self, file: &mut OpenFile, block: u32) -> Result<(), Error> {
        if file.cached_block == Some(block) {
            return Ok(());
        }
        // A failed read must not leave the old block looking valid
        file.cached_block = None;

        let inum = file.inode.number;
        let node = match self.tnc.lookup(&mut self.volume, &Key::data(inum, block))? {
            Some(node) => node,
            None => {
                debug!("ubifs: hole at block {} of inode {}", block, inum);
                file.block.fill(0);
                file.cached_block = Some(block);
                return Ok(());
            }
        };

        let sqnum = node.sqnum();
        let dn = node.into_data().map_err(CorruptNode::new)?;
        if sqnum <= file.inode.creat_sqnum {
            warn!(
                "ubifs: stale data node (block {}, inode {}): sqnum {} <= {}",
                block, inum, sqnum, file.inode.creat_sqnum
            );
            file.block.fill(0);
            file.cached_block = Some(block);
            return Ok(());
        }

        let n = match self.codecs.decompress(dn.compr_type, &dn.data, &mut file.block) {
            Ok(n) => n,
            Err(e) => {
                error!("ubifs: bad data node (block {}, inode {}): {}", block, inum, e);
                return Err(IoError::Decompress(e).into());
            }
        };
        if n != dn.size as usize {
            error!(
                "ubifs: bad data node (block {}, inode {}): {} bytes decompressed, {} declared",
                block, inum, n, dn.size
            );
            return Err(CorruptNode::new(CorruptReason::SizeMismatch {
                expected: dn.size,
                actual: n as u32,
            })
            .into());
        }
        file.block[n..].fill(0);
        file.cached_block = Some(block);
        Ok(())
    }
}
