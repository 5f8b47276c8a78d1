//! Synthetic UBIFS images
//!
//! [`ImageBuilder`] lays out a bit-exact volume in memory: superblock in
//! LEB 0, master nodes in LEBs 1 and 2, leaf nodes from LEB 3 onwards
//! followed by the index, built bottom-up with a configurable fanout.
//! There is no log, LPT or orphan area; the reader never looks at them.
//!
//! The node encoders are public so tests can craft single nodes too.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use bootfs_driver_traits::RamVolume;

use crate::compress::Compression;
use crate::inode::{FileKind, S_IFDIR, S_IFLNK, S_IFREG};
use crate::key::{Key, KeyHash};
use crate::node::{
    Branch, NodeType, BRANCH_WITH_KEY_SZ, CH_SZ, DATA_NODE_SZ, DENT_NODE_SZ, IDX_NODE_SZ, INO_NODE_SZ,
    MST_NODE_SZ, NODE_ALIGN, SB_NODE_SZ,
};
use crate::{BLOCK_SIZE, NODE_MAGIC, ROOT_INO};

/// Timestamp written into every inode
pub const IMAGE_TIME: u64 = 1_600_000_000;

// ============================================================================
// Node encoders
// ============================================================================

fn put16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn put64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Recompute the CRC of a node whose length field is already set
pub fn finish_node(node: &mut [u8]) {
    let len = u32::from_le_bytes([node[16], node[17], node[18], node[19]]) as usize;
    let crc = crate::crc32(&node[8..len]);
    put32(node, 4, crc);
}

fn start_node(node_type: NodeType, sqnum: u64, fixed_len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; fixed_len];
    put32(&mut buf, 0, NODE_MAGIC);
    put64(&mut buf, 8, sqnum);
    buf[20] = node_type as u8;
    buf
}

fn seal(mut buf: Vec<u8>) -> Vec<u8> {
    let len = buf.len() as u32;
    put32(&mut buf, 16, len);
    finish_node(&mut buf);
    buf
}

fn put_key(buf: &mut [u8], off: usize, key: &Key) {
    buf[off..off + 8].copy_from_slice(&key.encode());
}

/// Attributes of an inode to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeSpec {
    pub mode: u32,
    pub size: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub flags: u32,
    pub compr_type: u16,
    /// Inline data (symlink target)
    pub data: Vec<u8>,
    /// Defaults to the sequence number of the inode node
    pub creat_sqnum: Option<u64>,
}

impl InodeSpec {
    pub fn dir() -> Self {
        InodeSpec {
            mode: S_IFDIR | 0o755,
            size: INO_NODE_SZ as u64,
            nlink: 2,
            uid: 0,
            gid: 0,
            flags: 0,
            compr_type: 0,
            data: Vec::new(),
            creat_sqnum: None,
        }
    }

    pub fn file(size: u64) -> Self {
        InodeSpec {
            mode: S_IFREG | 0o644,
            size,
            nlink: 1,
            ..InodeSpec::dir()
        }
    }

    pub fn symlink(target: &[u8]) -> Self {
        InodeSpec {
            mode: S_IFLNK | 0o777,
            size: target.len() as u64,
            nlink: 1,
            data: target.to_vec(),
            ..InodeSpec::dir()
        }
    }

    /// Device, FIFO or socket inode
    pub fn special(kind: FileKind) -> Self {
        InodeSpec {
            mode: kind.mode_bits() | 0o600,
            size: 0,
            nlink: 1,
            ..InodeSpec::dir()
        }
    }

    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_mode(self.mode)
    }
}

pub fn encode_inode(sqnum: u64, inum: u64, spec: &InodeSpec) -> Vec<u8> {
    let mut buf = start_node(NodeType::Inode, sqnum, INO_NODE_SZ);
    put_key(&mut buf, CH_SZ, &Key::inode(inum));
    put64(&mut buf, 40, spec.creat_sqnum.unwrap_or(sqnum));
    put64(&mut buf, 48, spec.size);
    put64(&mut buf, 56, IMAGE_TIME);
    put64(&mut buf, 64, IMAGE_TIME);
    put64(&mut buf, 72, IMAGE_TIME);
    put32(&mut buf, 92, spec.nlink);
    put32(&mut buf, 96, spec.uid);
    put32(&mut buf, 100, spec.gid);
    put32(&mut buf, 104, spec.mode);
    put32(&mut buf, 108, spec.flags);
    put32(&mut buf, 112, spec.data.len() as u32);
    put16(&mut buf, 132, spec.compr_type);
    buf.extend_from_slice(&spec.data);
    seal(buf)
}

pub fn encode_dent(sqnum: u64, key: Key, inum: u64, itype: u8, name: &[u8]) -> Vec<u8> {
    let node_type = if key.key_type == crate::key::KeyType::Xent {
        NodeType::Xent
    } else {
        NodeType::Dent
    };
    let mut buf = start_node(node_type, sqnum, DENT_NODE_SZ);
    put_key(&mut buf, CH_SZ, &key);
    put64(&mut buf, 40, inum);
    buf[49] = itype;
    put16(&mut buf, 50, name.len() as u16);
    buf.extend_from_slice(name);
    buf.push(0);
    seal(buf)
}

pub fn encode_data(sqnum: u64, key: Key, payload: &[u8], compr_type: u16, size: u32) -> Vec<u8> {
    let mut buf = start_node(NodeType::Data, sqnum, DATA_NODE_SZ);
    put_key(&mut buf, CH_SZ, &key);
    put32(&mut buf, 40, size);
    put16(&mut buf, 44, compr_type);
    buf.extend_from_slice(payload);
    seal(buf)
}

pub fn encode_index(sqnum: u64, level: u16, branches: &[Branch]) -> Vec<u8> {
    let mut buf = start_node(NodeType::Index, sqnum, IDX_NODE_SZ + branches.len() * BRANCH_WITH_KEY_SZ);
    put16(&mut buf, 24, branches.len() as u16);
    put16(&mut buf, 26, level);
    for (i, b) in branches.iter().enumerate() {
        let off = IDX_NODE_SZ + i * BRANCH_WITH_KEY_SZ;
        put32(&mut buf, off, b.lnum);
        put32(&mut buf, off + 4, b.offs);
        put32(&mut buf, off + 8, b.len);
        put_key(&mut buf, off + 12, &b.key);
    }
    seal(buf)
}

/// Compress one block with a real encoder
///
/// ZSTD has no encoder here; the block is returned as is.
pub fn compress_block(compression: Compression, block: &[u8]) -> Vec<u8> {
    match compression {
        Compression::None | Compression::Zstd => block.to_vec(),
        Compression::Lzo => lzokay_native::compress(block)
            .unwrap_or_else(|_| crate::compress::lzo::compress_literals(block)),
        Compression::Zlib => miniz_oxide::deflate::compress_to_vec(block, 6),
    }
}

/// Payload and tag a block is stored with
///
/// Like mkfs.ubifs, a block that does not shrink is stored uncompressed,
/// which keeps every data node within `48 + 4096` bytes.
pub fn pack_block(compression: Compression, block: &[u8]) -> (Vec<u8>, Compression) {
    let payload = compress_block(compression, block);
    match compression {
        Compression::Lzo | Compression::Zlib if payload.len() >= block.len() => (block.to_vec(), Compression::None),
        _ => (payload, compression),
    }
}

// ============================================================================
// Image builder
// ============================================================================

struct InodeEntry {
    sqnum: u64,
    spec: InodeSpec,
}

struct Leaf {
    key: Key,
    bytes: Vec<u8>,
}

/// Builds a UBIFS volume image in memory
pub struct ImageBuilder {
    leb_size: u32,
    min_io_size: u32,
    fanout: usize,
    key_hash: KeyHash,
    compression: Compression,
    fmt_version: u32,
    ro_compat_version: u32,
    dirty: bool,
    master_copies: u32,
    sqnum: u64,
    next_inum: u64,
    inodes: BTreeMap<u64, InodeEntry>,
    leaves: Vec<Leaf>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    /// Empty volume with a root directory
    pub fn new() -> Self {
        let mut builder = ImageBuilder {
            leb_size: 64 * 1024,
            min_io_size: 8,
            fanout: 8,
            key_hash: KeyHash::R5,
            compression: Compression::None,
            fmt_version: 4,
            ro_compat_version: 0,
            dirty: false,
            master_copies: 1,
            sqnum: 0,
            next_inum: ROOT_INO,
            inodes: BTreeMap::new(),
            leaves: Vec::new(),
        };
        builder.new_inode(InodeSpec::dir());
        builder
    }

    pub fn leb_size(mut self, leb_size: u32) -> Self {
        self.leb_size = leb_size;
        self
    }

    pub fn min_io_size(mut self, min_io_size: u32) -> Self {
        self.min_io_size = min_io_size;
        self
    }

    /// Branches per index node (at least 2)
    pub fn fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout.max(2);
        self
    }

    pub fn key_hash(mut self, key_hash: KeyHash) -> Self {
        self.key_hash = key_hash;
        self
    }

    /// Compression for files added with [`ImageBuilder::add_file`]
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn format_version(mut self, fmt_version: u32, ro_compat_version: u32) -> Self {
        self.fmt_version = fmt_version;
        self.ro_compat_version = ro_compat_version;
        self
    }

    /// Mark the master node as not cleanly unmounted
    pub fn dirty(mut self, dirty: bool) -> Self {
        self.dirty = dirty;
        self
    }

    /// Write `n` commits worth of master nodes; only the last is valid
    pub fn master_copies(mut self, n: u32) -> Self {
        self.master_copies = n.max(1);
        self
    }

    fn next_sqnum(&mut self) -> u64 {
        self.sqnum += 1;
        self.sqnum
    }

    fn new_inode(&mut self, mut spec: InodeSpec) -> u64 {
        let inum = self.next_inum;
        self.next_inum += 1;
        let sqnum = self.next_sqnum();
        spec.creat_sqnum = Some(spec.creat_sqnum.unwrap_or(sqnum));
        self.inodes.insert(inum, InodeEntry { sqnum, spec });
        inum
    }

    fn creat_sqnum(&self, inum: u64) -> u64 {
        self.inodes
            .get(&inum)
            .and_then(|e| e.spec.creat_sqnum)
            .unwrap_or_else(|| panic!("inode {} not in image", inum))
    }

    fn push_dent(&mut self, sqnum: u64, parent: u64, name: &str, inum: u64, itype: u8) {
        let key = Key::dent(parent, self.key_hash.hash(name.as_bytes()));
        let bytes = encode_dent(sqnum, key, inum, itype, name.as_bytes());
        self.leaves.push(Leaf { key, bytes });
    }

    /// Add an inode and its entry in `parent`
    pub fn add_inode(&mut self, parent: u64, name: &str, spec: InodeSpec) -> u64 {
        let itype = spec.kind().map_or(0, FileKind::itype);
        let inum = self.new_inode(spec);
        self.link(parent, name, inum, itype);
        inum
    }

    /// Add another entry for an existing inode
    pub fn link(&mut self, parent: u64, name: &str, inum: u64, itype: u8) {
        let sqnum = self.next_sqnum();
        self.push_dent(sqnum, parent, name, inum, itype);
    }

    pub fn mkdir(&mut self, parent: u64, name: &str) -> u64 {
        self.add_inode(parent, name, InodeSpec::dir())
    }

    pub fn add_symlink(&mut self, parent: u64, name: &str, target: &str) -> u64 {
        self.add_inode(parent, name, InodeSpec::symlink(target.as_bytes()))
    }

    /// Regular file compressed with the builder's default compression
    pub fn add_file(&mut self, parent: u64, name: &str, data: &[u8]) -> u64 {
        let compression = self.compression;
        self.add_file_with(parent, name, data, compression)
    }

    pub fn add_file_with(&mut self, parent: u64, name: &str, data: &[u8], compression: Compression) -> u64 {
        let mut spec = InodeSpec::file(data.len() as u64);
        spec.compr_type = compression as u16;
        let inum = self.add_inode(parent, name, spec);
        for (block, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
            self.add_block(inum, block as u32, chunk, compression);
        }
        inum
    }

    /// Regular file of `size` bytes where only the listed blocks have data
    pub fn add_sparse_file(&mut self, parent: u64, name: &str, size: u64, blocks: &[(u32, &[u8])]) -> u64 {
        let inum = self.add_inode(parent, name, InodeSpec::file(size));
        let compression = self.compression;
        for (block, data) in blocks {
            self.add_block(inum, *block, data, compression);
        }
        inum
    }

    /// One data node, compressed if that makes it smaller
    pub fn add_block(&mut self, inum: u64, block: u32, data: &[u8], compression: Compression) {
        let (payload, stored) = pack_block(compression, data);
        self.add_data_node(inum, block, &payload, stored as u16, data.len() as u32);
    }

    /// Data node with an arbitrary payload and declared size
    pub fn add_data_node(&mut self, inum: u64, block: u32, payload: &[u8], compr_type: u16, size: u32) {
        let sqnum = self.next_sqnum();
        let key = Key::data(inum, block);
        let bytes = encode_data(sqnum, key, payload, compr_type, size);
        self.leaves.push(Leaf { key, bytes });
    }

    /// Entry older than its directory, as left behind by a deleted and
    /// recreated directory
    pub fn add_stale_dent(&mut self, parent: u64, name: &str, inum: u64, itype: u8) {
        let sqnum = self.creat_sqnum(parent);
        self.push_dent(sqnum, parent, name, inum, itype);
    }

    /// Data node older than its inode
    pub fn add_stale_block(&mut self, inum: u64, block: u32, data: &[u8]) {
        let sqnum = self.creat_sqnum(inum);
        let key = Key::data(inum, block);
        let bytes = encode_data(sqnum, key, data, Compression::None as u16, data.len() as u32);
        self.leaves.push(Leaf { key, bytes });
    }

    /// Lay out the volume
    pub fn build(mut self) -> Image {
        let leb_size = self.leb_size as usize;
        let inodes = core::mem::take(&mut self.inodes);
        for (inum, entry) in &inodes {
            let key = Key::inode(*inum);
            self.leaves.push(Leaf {
                key,
                bytes: encode_inode(entry.sqnum, *inum, &entry.spec),
            });
        }
        self.leaves.sort_by_key(|l| l.key);

        let mut writer = Writer::new(leb_size);
        let mut leaves = Vec::with_capacity(self.leaves.len());
        let mut branches = Vec::with_capacity(self.leaves.len());
        for leaf in &self.leaves {
            let (lnum, offs) = writer.place(&leaf.bytes);
            leaves.push((leaf.key, lnum as usize * leb_size + offs as usize, leaf.bytes.len()));
            branches.push(Branch {
                lnum,
                offs,
                len: leaf.bytes.len() as u32,
                key: leaf.key,
            });
        }

        // Index levels, bottom-up
        let mut level = 0u16;
        let root = loop {
            let mut parents = Vec::new();
            for chunk in branches.chunks(self.fanout) {
                let sqnum = self.next_sqnum();
                let bytes = encode_index(sqnum, level, chunk);
                let (lnum, offs) = writer.place(&bytes);
                parents.push(Branch {
                    lnum,
                    offs,
                    len: bytes.len() as u32,
                    key: chunk[0].key,
                });
            }
            if parents.len() == 1 {
                break parents[0];
            }
            branches = parents;
            level += 1;
        };

        let mut lebs = writer.finish();
        let leb_cnt = lebs.len() as u32;

        let sb_sqnum = self.next_sqnum();
        let sb = self.encode_superblock(sb_sqnum, leb_cnt);
        lebs[0][..sb.len()].copy_from_slice(&sb);

        let step = (MST_NODE_SZ as u32).div_ceil(self.min_io_size.max(1)) * self.min_io_size.max(1);
        for copy in 0..self.master_copies {
            let last = copy + 1 == self.master_copies;
            // Earlier commits point at an index that no longer exists
            let root = if last {
                root
            } else {
                Branch { lnum: leb_cnt + 7, ..root }
            };
            let sqnum = self.next_sqnum();
            let mst = self.encode_master(sqnum, copy as u64 + 1, &root);
            for lnum in 1..=2 {
                let offs = (copy * step) as usize;
                lebs[lnum][offs..offs + mst.len()].copy_from_slice(&mst);
            }
        }

        Image {
            data: lebs.concat(),
            leb_size: self.leb_size,
            min_io_size: self.min_io_size,
            leaves,
        }
    }

    fn encode_superblock(&self, sqnum: u64, leb_cnt: u32) -> Vec<u8> {
        let mut buf = start_node(NodeType::Superblock, sqnum, SB_NODE_SZ);
        buf[26] = self.key_hash.as_u8();
        buf[27] = 0;
        put32(&mut buf, 32, self.min_io_size);
        put32(&mut buf, 36, self.leb_size);
        put32(&mut buf, 40, leb_cnt);
        put32(&mut buf, 44, leb_cnt);
        put64(&mut buf, 48, self.leb_size as u64);
        put32(&mut buf, 68, 1);
        put32(&mut buf, 72, self.fanout as u32);
        put32(&mut buf, 80, self.fmt_version);
        put16(&mut buf, 84, self.compression as u16);
        put32(&mut buf, 104, 1_000_000_000);
        buf[108..124].copy_from_slice(b"bootfs-testimage");
        put32(&mut buf, 124, self.ro_compat_version);
        seal(buf)
    }

    fn encode_master(&self, sqnum: u64, cmt_no: u64, root: &Branch) -> Vec<u8> {
        let mut buf = start_node(NodeType::Master, sqnum, MST_NODE_SZ);
        put64(&mut buf, 24, self.next_inum - 1);
        put64(&mut buf, 32, cmt_no);
        put32(&mut buf, 40, if self.dirty { 1 } else { 0 });
        put32(&mut buf, 48, root.lnum);
        put32(&mut buf, 52, root.offs);
        put32(&mut buf, 56, root.len);
        put32(&mut buf, 164, 0);
        seal(buf)
    }
}

/// Appends nodes to the main area, never splitting a node across LEBs
struct Writer {
    lebs: Vec<Vec<u8>>,
    offs: usize,
    leb_size: usize,
}

impl Writer {
    fn new(leb_size: usize) -> Self {
        // Superblock, two master LEBs, first main LEB
        Writer {
            lebs: vec![vec![0xFF; leb_size]; 4],
            offs: 0,
            leb_size,
        }
    }

    fn place(&mut self, node: &[u8]) -> (u32, u32) {
        assert!(node.len() <= self.leb_size, "node larger than a LEB");
        if self.offs + node.len() > self.leb_size {
            self.lebs.push(vec![0xFF; self.leb_size]);
            self.offs = 0;
        }
        let lnum = self.lebs.len() - 1;
        let offs = self.offs;
        self.lebs[lnum][offs..offs + node.len()].copy_from_slice(node);
        self.offs = (offs + node.len()).div_ceil(NODE_ALIGN) * NODE_ALIGN;
        (lnum as u32, offs as u32)
    }

    fn finish(self) -> Vec<Vec<u8>> {
        self.lebs
    }
}

/// A built volume image
#[derive(Debug, Clone)]
pub struct Image {
    data: Vec<u8>,
    leb_size: u32,
    min_io_size: u32,
    /// Leaf key, absolute offset, length
    leaves: Vec<(Key, usize, usize)>,
}

impl Image {
    pub fn volume(&self) -> RamVolume {
        RamVolume::new(self.data.clone(), self.leb_size, self.min_io_size)
    }

    pub fn into_volume(self) -> RamVolume {
        RamVolume::new(self.data, self.leb_size, self.min_io_size)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn leb_size(&self) -> u32 {
        self.leb_size
    }

    pub fn min_io_size(&self) -> u32 {
        self.min_io_size
    }

    pub fn leb_count(&self) -> u32 {
        (self.data.len() / self.leb_size as usize) as u32
    }

    /// Image offset of the first leaf node with `key`
    pub fn leaf_offset(&self, key: &Key) -> Option<usize> {
        self.leaves.iter().find(|(k, _, _)| k == key).map(|(_, off, _)| *off)
    }

    /// Number of leaf nodes written
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }
}
