//! Tree navigator
//!
//! The index is a B+tree of index nodes stored on flash. Internal nodes
//! hold sorted `(key, LEB, offset, length)` branches; the branches of a
//! level 0 index node point at leaf nodes (inode, dentry, data).
//!
//! Lookups binary-search each level and descend. Range scans keep a
//! cursor (the path from the root down to a level 0 branch) and step it
//! forward through the leaves in key order.
//!
//! Index nodes are cached by position. Leaves are not: they are read,
//! checked and handed to the caller.
//!
//! Several directory entries may share a key when their names hash to the
//! same value. Such runs of equal keys may span index nodes and are not
//! sorted by name, so every lookup by name scans the whole run.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use bootfs_driver_traits::{VolumeDevice, VolumeDeviceExt};
use log::{debug, error, warn};

use crate::error::{CorruptNode, CorruptReason, IoError};
use crate::key::Key;
use crate::node::{self, Branch, DentNode, IndexNode, Node, CH_SZ, NODE_ALIGN};

/// Default number of index nodes kept in memory
pub const DEFAULT_CACHE_LIMIT: usize = 1024;

/// Position of the index root, from the master node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootRef {
    pub lnum: u32,
    pub offs: u32,
    pub len: u32,
}

/// Path from the root to one level 0 branch
struct Cursor {
    path: Vec<(Arc<IndexNode>, usize)>,
}

impl Cursor {
    fn branch(&self) -> Option<Branch> {
        let (node, idx) = self.path.last()?;
        node.branches.get(*idx).copied()
    }
}

/// Index walker with an index node cache
pub struct Tnc {
    root: RootRef,
    leb_size: u32,
    leb_cnt: u32,
    cache: BTreeMap<(u32, u32), Arc<IndexNode>>,
    cache_limit: usize,
}

impl Tnc {
    pub fn new(root: RootRef, leb_size: u32, leb_cnt: u32, cache_limit: usize) -> Self {
        Tnc {
            root,
            leb_size,
            leb_cnt,
            cache: BTreeMap::new(),
            cache_limit: cache_limit.max(1),
        }
    }

    /// Number of index nodes currently cached
    pub fn cached_index_nodes(&self) -> usize {
        self.cache.len()
    }

    /// Drop all cached index nodes
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    // ========================================================================
    // Node access
    // ========================================================================

    fn check_position(&self, lnum: u32, offs: u32, len: u32) -> Result<(), CorruptNode> {
        let inside = lnum < self.leb_cnt
            && (len as usize) >= CH_SZ
            && offs as usize % NODE_ALIGN == 0
            && offs.checked_add(len).map_or(false, |end| end <= self.leb_size);
        if inside {
            Ok(())
        } else {
            Err(CorruptNode::new(CorruptReason::BadBranch { lnum, offs, len }))
        }
    }

    fn read_node<V: VolumeDevice + ?Sized>(&self, vol: &mut V, lnum: u32, offs: u32, len: u32) -> Result<Node, IoError> {
        self.check_position(lnum, offs, len)?;
        let buf = vol.read_leb_vec(lnum, offs, len)?;
        let node = node::decode(&buf).map_err(|e| e.at(lnum, offs))?;
        if node.header.len != len {
            return Err(CorruptNode::new(CorruptReason::BadLength(node.header.len)).at(lnum, offs).into());
        }
        Ok(node)
    }

    fn read_index<V: VolumeDevice + ?Sized>(
        &mut self,
        vol: &mut V,
        lnum: u32,
        offs: u32,
        len: u32,
        level: Option<u16>,
    ) -> Result<Arc<IndexNode>, IoError> {
        if let Some(cached) = self.cache.get(&(lnum, offs)) {
            return Ok(cached.clone());
        }
        let idx = self
            .read_node(vol, lnum, offs, len)?
            .into_index()
            .map_err(|r| CorruptNode::new(r).at(lnum, offs))?;
        if let Some(expected) = level {
            if idx.level != expected {
                let err = CorruptNode::new(CorruptReason::BadLevel { expected, found: idx.level }).at(lnum, offs);
                error!("ubifs: {}", err);
                return Err(err.into());
            }
        }
        if self.cache.len() >= self.cache_limit {
            debug!("ubifs: index cache full ({} nodes), dropping it", self.cache.len());
            self.cache.clear();
        }
        let idx = Arc::new(idx);
        self.cache.insert((lnum, offs), idx.clone());
        Ok(idx)
    }

    fn read_root<V: VolumeDevice + ?Sized>(&mut self, vol: &mut V) -> Result<Arc<IndexNode>, IoError> {
        let RootRef { lnum, offs, len } = self.root;
        self.read_index(vol, lnum, offs, len, None)
    }

    fn read_child<V: VolumeDevice + ?Sized>(
        &mut self,
        vol: &mut V,
        parent: &IndexNode,
        idx: usize,
    ) -> Result<Arc<IndexNode>, IoError> {
        let b = parent.branches[idx];
        self.read_index(vol, b.lnum, b.offs, b.len, Some(parent.level - 1))
    }

    /// Read the leaf a level 0 branch points at
    fn read_leaf<V: VolumeDevice + ?Sized>(&self, vol: &mut V, branch: &Branch) -> Result<Node, IoError> {
        let node = self.read_node(vol, branch.lnum, branch.offs, branch.len)?;
        if node.key() != Some(branch.key) {
            let err = CorruptNode::new(CorruptReason::KeyMismatch).at(branch.lnum, branch.offs);
            error!("ubifs: {} (branch key {})", err, branch.key);
            return Err(err.into());
        }
        Ok(node)
    }

    // ========================================================================
    // Cursor movement
    // ========================================================================

    /// Position a cursor on the first level 0 branch with key >= `key`
    ///
    /// Returns `None` when every key in the tree is smaller.
    fn lower_bound<V: VolumeDevice + ?Sized>(&mut self, vol: &mut V, key: &Key) -> Result<Option<Cursor>, IoError> {
        let mut cursor = Cursor { path: Vec::new() };
        let mut node = self.read_root(vol)?;
        loop {
            let pos = node.branches.partition_point(|b| b.key < *key);
            if node.level == 0 {
                let past_end = pos == node.branches.len();
                cursor.path.push((node, pos));
                if past_end && !self.step(vol, &mut cursor)? {
                    return Ok(None);
                }
                return Ok(Some(cursor));
            }
            // Keys equal to the target may still sit at the end of the
            // previous child
            let idx = pos.saturating_sub(1);
            let child = self.read_child(vol, &node, idx)?;
            cursor.path.push((node, idx));
            node = child;
        }
    }

    /// Move the cursor to the next level 0 branch
    ///
    /// Returns `false` (and leaves the cursor empty) past the last leaf.
    fn step<V: VolumeDevice + ?Sized>(&mut self, vol: &mut V, cursor: &mut Cursor) -> Result<bool, IoError> {
        loop {
            match cursor.path.last_mut() {
                None => return Ok(false),
                Some((node, idx)) => {
                    if *idx + 1 < node.branches.len() {
                        *idx += 1;
                        break;
                    }
                }
            }
            cursor.path.pop();
        }
        // Descend to the leftmost leaf below the new branch
        loop {
            let (node, idx) = match cursor.path.last() {
                Some((node, idx)) => (node.clone(), *idx),
                None => return Ok(false),
            };
            if node.level == 0 {
                return Ok(true);
            }
            let child = self.read_child(vol, &node, idx)?;
            cursor.path.push((child, 0));
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Exact lookup
    ///
    /// For entry keys shared by several names this returns one of them;
    /// use [`Tnc::lookup_name`] to resolve a name.
    pub fn lookup<V: VolumeDevice + ?Sized>(&mut self, vol: &mut V, key: &Key) -> Result<Option<Node>, IoError> {
        let cursor = match self.lower_bound(vol, key)? {
            Some(c) => c,
            None => return Ok(None),
        };
        match cursor.branch() {
            Some(b) if b.key == *key => Ok(Some(self.read_leaf(vol, &b)?)),
            _ => Ok(None),
        }
    }

    /// Find the entry named `name` among all entries with key `key`
    ///
    /// Entries with a sequence number at or below `min_sqnum` are stale and
    /// ignored.
    pub fn lookup_name<V: VolumeDevice + ?Sized>(
        &mut self,
        vol: &mut V,
        key: &Key,
        name: &[u8],
        min_sqnum: u64,
    ) -> Result<Option<DentNode>, IoError> {
        let mut cursor = match self.lower_bound(vol, key)? {
            Some(c) => c,
            None => return Ok(None),
        };
        let mut candidates = 0;
        while let Some(b) = cursor.branch() {
            if b.key != *key {
                break;
            }
            let node = self.read_leaf(vol, &b)?;
            let sqnum = node.sqnum();
            let dent = node.into_dent().map_err(|r| CorruptNode::new(r).at(b.lnum, b.offs))?;
            candidates += 1;
            if dent.name == name {
                if sqnum <= min_sqnum {
                    warn!("ubifs: skipping stale entry {:?} at {}:{}", DisplayName(&dent.name), b.lnum, b.offs);
                } else {
                    return Ok(Some(dent));
                }
            }
            if !self.step(vol, &mut cursor)? {
                break;
            }
        }
        if candidates > 1 {
            debug!("ubifs: {} entries share key {}", candidates, key);
        }
        Ok(None)
    }

    /// Smallest entry strictly after `(after, name_hint)`
    ///
    /// With no hint this is the smallest entry with key >= `after`. With a
    /// hint, entries with key == `after` qualify only if their name sorts
    /// after the hint. Within a run of equal keys the smallest name wins.
    /// The scan never leaves the inode and key type of `after`. Entries with
    /// a sequence number at or below `min_sqnum` are skipped.
    pub fn next_entry<V: VolumeDevice + ?Sized>(
        &mut self,
        vol: &mut V,
        after: &Key,
        name_hint: Option<&[u8]>,
        min_sqnum: u64,
    ) -> Result<Option<DentNode>, IoError> {
        let mut cursor = match self.lower_bound(vol, after)? {
            Some(c) => c,
            None => return Ok(None),
        };
        loop {
            let group = match cursor.branch() {
                Some(b) if b.key.same_range(after) => b.key,
                _ => return Ok(None),
            };
            let hint = if group == *after { name_hint } else { None };

            let mut best: Option<DentNode> = None;
            let mut more = true;
            while let Some(b) = cursor.branch() {
                if b.key != group {
                    break;
                }
                let node = self.read_leaf(vol, &b)?;
                let sqnum = node.sqnum();
                let dent = node.into_dent().map_err(|r| CorruptNode::new(r).at(b.lnum, b.offs))?;
                if sqnum <= min_sqnum {
                    warn!("ubifs: skipping stale entry {:?} at {}:{}", DisplayName(&dent.name), b.lnum, b.offs);
                } else {
                    let after_hint = hint.map_or(true, |h| dent.name.as_slice() > h);
                    let smaller = best.as_ref().map_or(true, |cur| dent.name < cur.name);
                    if after_hint && smaller {
                        best = Some(dent);
                    }
                }
                if !self.step(vol, &mut cursor)? {
                    more = false;
                    break;
                }
            }

            if best.is_some() || !more {
                return Ok(best);
            }
        }
    }
}

/// Debug formatting of a raw entry name
struct DisplayName<'a>(&'a [u8]);

impl core::fmt::Debug for DisplayName<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match core::str::from_utf8(self.0) {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}
