//! On-flash node decoding
//!
//! Every UBIFS node starts with the same 24-byte common header:
//!
//! ```text
//! 0   le32 magic      0x06101831
//! 4   le32 crc        CRC-32 of bytes 8..len
//! 8   le64 sqnum      global sequence number
//! 16  le32 len        full node length including the header
//! 20  u8   node_type
//! 21  u8   group_type
//! 22  u8   padding[2]
//! ```
//!
//! Decoding is a pure function over a byte slice. The header is checked
//! first (magic, length bounds, CRC), then the type-specific payload is
//! parsed and validated. No field is trusted before the CRC matches.

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::error::{CorruptNode, CorruptReason};
use crate::key::{Key, KeyType, MAX_KEY_LEN};
use crate::{BLOCK_SIZE, MAX_INO_DATA, MAX_NLEN, NODE_MAGIC};

// ============================================================================
// Node sizes
// ============================================================================

/// Common header
pub const CH_SZ: usize = 24;
/// Inode node without inline data
pub const INO_NODE_SZ: usize = 160;
/// Data node without payload
pub const DATA_NODE_SZ: usize = 48;
/// Directory entry node without name
pub const DENT_NODE_SZ: usize = 56;
/// Index node without branches
pub const IDX_NODE_SZ: usize = 28;
/// Index branch without key
pub const BRANCH_SZ: usize = 12;
/// Index branch including a simple key
pub const BRANCH_WITH_KEY_SZ: usize = BRANCH_SZ + 8;
/// Superblock node
pub const SB_NODE_SZ: usize = 4096;
/// Master node
pub const MST_NODE_SZ: usize = 512;
/// Largest possible leaf node (a data node with a full block)
pub const MAX_DATA_NODE_SZ: usize = DATA_NODE_SZ + BLOCK_SIZE;
/// Nodes start on 8-byte boundaries
pub const NODE_ALIGN: usize = 8;

// ============================================================================
// Node types
// ============================================================================

/// Node type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Inode = 0,
    Data = 1,
    Dent = 2,
    Xent = 3,
    Trun = 4,
    Pad = 5,
    Superblock = 6,
    Master = 7,
    Ref = 8,
    Index = 9,
    Cs = 10,
    Orph = 11,
}

impl NodeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => NodeType::Inode,
            1 => NodeType::Data,
            2 => NodeType::Dent,
            3 => NodeType::Xent,
            4 => NodeType::Trun,
            5 => NodeType::Pad,
            6 => NodeType::Superblock,
            7 => NodeType::Master,
            8 => NodeType::Ref,
            9 => NodeType::Index,
            10 => NodeType::Cs,
            11 => NodeType::Orph,
            _ => return None,
        })
    }
}

bitflags! {
    /// Inode flags (`ubifs_ino_node.flags`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InodeFlags: u32 {
        const COMPR = 0x01;
        const SYNC = 0x02;
        const IMMUTABLE = 0x04;
        const APPEND = 0x08;
        const DIRSYNC = 0x10;
        const XATTR = 0x20;
        const CRYPT = 0x40;
    }
}

bitflags! {
    /// Master node flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MasterFlags: u32 {
        /// Filesystem was not unmounted cleanly
        const DIRTY = 0x01;
        const NO_ORPHS = 0x02;
        /// Written by recovery
        const RCVRY = 0x04;
    }
}

bitflags! {
    /// Superblock flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SuperblockFlags: u32 {
        const BIGLPT = 0x02;
        const SPACE_FIXUP = 0x04;
        const DOUBLE_HASH = 0x08;
        const ENCRYPTION = 0x10;
        const AUTHENTICATION = 0x20;
    }
}

// ============================================================================
// Decoded structures
// ============================================================================

/// Common header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub crc: u32,
    pub sqnum: u64,
    pub len: u32,
    pub node_type: NodeType,
    pub group_type: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub sec: u64,
    pub nsec: u32,
}

/// Inode node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeNode {
    pub key: Key,
    /// Sequence number at creation; older nodes of this inode are stale
    pub creat_sqnum: u64,
    pub size: u64,
    pub atime: Timestamp,
    pub ctime: Timestamp,
    pub mtime: Timestamp,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    pub flags: InodeFlags,
    pub xattr_cnt: u32,
    pub xattr_size: u32,
    pub xattr_names: u32,
    /// Compressor used for new data nodes of this inode
    pub compr_type: u16,
    /// Inline data (symlink target, device number)
    pub data: Vec<u8>,
}

/// Directory or extended attribute entry node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DentNode {
    pub key: Key,
    /// Target inode number
    pub inum: u64,
    /// Target inode type (`UBIFS_ITYPE_*`)
    pub itype: u8,
    pub cookie: u32,
    pub name: Vec<u8>,
}

/// Data node: one block of a file, possibly compressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataNode {
    pub key: Key,
    /// Uncompressed size of the block
    pub size: u32,
    pub compr_type: u16,
    /// Compressed payload
    pub data: Vec<u8>,
}

/// Child pointer inside an index node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    pub lnum: u32,
    pub offs: u32,
    pub len: u32,
    pub key: Key,
}

/// Index node: sorted branches to the next level (or to leaves at level 0)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNode {
    pub level: u16,
    pub branches: Vec<Branch>,
}

/// Superblock node (LEB 0)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperblockNode {
    pub key_hash: u8,
    pub key_fmt: u8,
    pub flags: SuperblockFlags,
    pub min_io_size: u32,
    pub leb_size: u32,
    pub leb_cnt: u32,
    pub max_leb_cnt: u32,
    pub max_bud_bytes: u64,
    pub log_lebs: u32,
    pub lpt_lebs: u32,
    pub orph_lebs: u32,
    pub jhead_cnt: u32,
    pub fanout: u32,
    pub lsave_cnt: u32,
    pub fmt_version: u32,
    pub default_compr: u16,
    pub rp_uid: u32,
    pub rp_gid: u32,
    pub rp_size: u64,
    pub time_gran: u32,
    pub uuid: [u8; 16],
    pub ro_compat_version: u32,
}

/// Master node (LEBs 1 and 2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterNode {
    pub highest_inum: u64,
    pub cmt_no: u64,
    pub flags: MasterFlags,
    pub log_lnum: u32,
    pub root_lnum: u32,
    pub root_offs: u32,
    pub root_len: u32,
    pub gc_lnum: u32,
    pub ihead_lnum: u32,
    pub ihead_offs: u32,
    pub index_size: u64,
    pub total_free: u64,
    pub total_dirty: u64,
    pub total_used: u64,
    pub total_dead: u64,
    pub total_dark: u64,
    pub lpt_lnum: u32,
    pub lpt_offs: u32,
    pub empty_lebs: u32,
    pub idx_lebs: u32,
    pub leb_cnt: u32,
}

/// Type-specific part of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Inode(InodeNode),
    Data(DataNode),
    Dent(DentNode),
    Xent(DentNode),
    Index(IndexNode),
    Superblock(SuperblockNode),
    Master(MasterNode),
    /// Known type without a parsed payload (pad, ref, commit start, ...)
    Bare,
}

/// A decoded, CRC-checked node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub header: NodeHeader,
    pub payload: Payload,
}

impl Node {
    /// Key of a leaf node
    pub fn key(&self) -> Option<Key> {
        match &self.payload {
            Payload::Inode(n) => Some(n.key),
            Payload::Data(n) => Some(n.key),
            Payload::Dent(n) | Payload::Xent(n) => Some(n.key),
            _ => None,
        }
    }

    pub fn sqnum(&self) -> u64 {
        self.header.sqnum
    }

    pub fn into_inode(self) -> Result<InodeNode, CorruptReason> {
        match self.payload {
            Payload::Inode(n) => Ok(n),
            _ => Err(unexpected(NodeType::Inode, self.header.node_type)),
        }
    }

    pub fn into_data(self) -> Result<DataNode, CorruptReason> {
        match self.payload {
            Payload::Data(n) => Ok(n),
            _ => Err(unexpected(NodeType::Data, self.header.node_type)),
        }
    }

    pub fn into_dent(self) -> Result<DentNode, CorruptReason> {
        match self.payload {
            Payload::Dent(n) | Payload::Xent(n) => Ok(n),
            _ => Err(unexpected(NodeType::Dent, self.header.node_type)),
        }
    }

    pub fn into_index(self) -> Result<IndexNode, CorruptReason> {
        match self.payload {
            Payload::Index(n) => Ok(n),
            _ => Err(unexpected(NodeType::Index, self.header.node_type)),
        }
    }
}

fn unexpected(expected: NodeType, found: NodeType) -> CorruptReason {
    CorruptReason::UnexpectedType { expected, found }
}

// ============================================================================
// Decoding
// ============================================================================

#[inline]
fn le16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline]
fn le32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[inline]
fn le64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

/// Check the common header of the node at the start of `raw`
///
/// Verifies the magic, that the length fits inside `raw`, the CRC, and
/// that the node type is known.
pub fn decode_header(raw: &[u8]) -> Result<NodeHeader, CorruptNode> {
    if raw.len() < CH_SZ {
        return Err(CorruptReason::BadLength(raw.len() as u32).into());
    }
    let magic = le32(raw, 0);
    if magic != NODE_MAGIC {
        return Err(CorruptReason::BadMagic(magic).into());
    }
    let len = le32(raw, 16);
    if (len as usize) < CH_SZ || len as usize > raw.len() {
        return Err(CorruptReason::BadLength(len).into());
    }
    let stored = le32(raw, 4);
    let computed = crate::crc32(&raw[8..len as usize]);
    if stored != computed {
        return Err(CorruptReason::BadChecksum { stored, computed }.into());
    }
    let node_type = NodeType::from_u8(raw[20]).ok_or(CorruptReason::UnknownType(raw[20]))?;
    Ok(NodeHeader {
        crc: stored,
        sqnum: le64(raw, 8),
        len,
        node_type,
        group_type: raw[21],
    })
}

/// Decode the node at the start of `raw`
///
/// `raw` may extend past the node; only the first `len` bytes are used.
pub fn decode(raw: &[u8]) -> Result<Node, CorruptNode> {
    let header = decode_header(raw)?;
    let buf = &raw[..header.len as usize];
    let payload = match header.node_type {
        NodeType::Inode => Payload::Inode(decode_inode(buf)?),
        NodeType::Data => Payload::Data(decode_data(buf)?),
        NodeType::Dent => Payload::Dent(decode_dent(buf, KeyType::Dent)?),
        NodeType::Xent => Payload::Xent(decode_dent(buf, KeyType::Xent)?),
        NodeType::Index => Payload::Index(decode_index(buf)?),
        NodeType::Superblock => Payload::Superblock(decode_superblock(buf)?),
        NodeType::Master => Payload::Master(decode_master(buf)?),
        NodeType::Trun | NodeType::Pad | NodeType::Ref | NodeType::Cs | NodeType::Orph => Payload::Bare,
    };
    Ok(Node { header, payload })
}

fn leaf_key(buf: &[u8], want: KeyType) -> Result<Key, CorruptReason> {
    let key = Key::decode(&buf[CH_SZ..CH_SZ + MAX_KEY_LEN])?;
    if key.key_type != want {
        return Err(CorruptReason::BadKey);
    }
    Ok(key)
}

fn decode_inode(buf: &[u8]) -> Result<InodeNode, CorruptReason> {
    if buf.len() < INO_NODE_SZ {
        return Err(CorruptReason::BadLength(buf.len() as u32));
    }
    let data_len = le32(buf, 112);
    if data_len as usize > MAX_INO_DATA {
        return Err(CorruptReason::TooMuchData(data_len));
    }
    if buf.len() != INO_NODE_SZ + data_len as usize {
        return Err(CorruptReason::BadLength(buf.len() as u32));
    }
    Ok(InodeNode {
        key: leaf_key(buf, KeyType::Inode)?,
        creat_sqnum: le64(buf, 40),
        size: le64(buf, 48),
        atime: Timestamp { sec: le64(buf, 56), nsec: le32(buf, 80) },
        ctime: Timestamp { sec: le64(buf, 64), nsec: le32(buf, 84) },
        mtime: Timestamp { sec: le64(buf, 72), nsec: le32(buf, 88) },
        nlink: le32(buf, 92),
        uid: le32(buf, 96),
        gid: le32(buf, 100),
        mode: le32(buf, 104),
        flags: InodeFlags::from_bits_retain(le32(buf, 108)),
        xattr_cnt: le32(buf, 116),
        xattr_size: le32(buf, 120),
        xattr_names: le32(buf, 128),
        compr_type: le16(buf, 132),
        data: buf[INO_NODE_SZ..].to_vec(),
    })
}

fn decode_dent(buf: &[u8], want: KeyType) -> Result<DentNode, CorruptReason> {
    if buf.len() < DENT_NODE_SZ {
        return Err(CorruptReason::BadLength(buf.len() as u32));
    }
    let nlen = le16(buf, 50) as usize;
    if nlen == 0 || nlen > MAX_NLEN {
        return Err(CorruptReason::BadName);
    }
    if buf.len() != DENT_NODE_SZ + nlen + 1 {
        return Err(CorruptReason::BadLength(buf.len() as u32));
    }
    let name = &buf[DENT_NODE_SZ..DENT_NODE_SZ + nlen];
    if buf[DENT_NODE_SZ + nlen] != 0 || name.contains(&0) {
        return Err(CorruptReason::BadName);
    }
    Ok(DentNode {
        key: leaf_key(buf, want)?,
        inum: le64(buf, 40),
        itype: buf[49],
        cookie: le32(buf, 52),
        name: name.to_vec(),
    })
}

fn decode_data(buf: &[u8]) -> Result<DataNode, CorruptReason> {
    if buf.len() <= DATA_NODE_SZ || buf.len() > MAX_DATA_NODE_SZ {
        return Err(CorruptReason::BadLength(buf.len() as u32));
    }
    let size = le32(buf, 40);
    if size as usize > BLOCK_SIZE {
        return Err(CorruptReason::TooMuchData(size));
    }
    Ok(DataNode {
        key: leaf_key(buf, KeyType::Data)?,
        size,
        compr_type: le16(buf, 44),
        data: buf[DATA_NODE_SZ..].to_vec(),
    })
}

fn decode_index(buf: &[u8]) -> Result<IndexNode, CorruptReason> {
    if buf.len() < IDX_NODE_SZ {
        return Err(CorruptReason::BadLength(buf.len() as u32));
    }
    let child_cnt = le16(buf, 24) as usize;
    let level = le16(buf, 26);
    if child_cnt == 0 {
        return Err(CorruptReason::BadIndex);
    }
    if buf.len() != IDX_NODE_SZ + child_cnt * BRANCH_WITH_KEY_SZ {
        return Err(CorruptReason::BadLength(buf.len() as u32));
    }
    let mut branches = Vec::with_capacity(child_cnt);
    for i in 0..child_cnt {
        let off = IDX_NODE_SZ + i * BRANCH_WITH_KEY_SZ;
        branches.push(Branch {
            lnum: le32(buf, off),
            offs: le32(buf, off + 4),
            len: le32(buf, off + 8),
            key: Key::decode(&buf[off + BRANCH_SZ..off + BRANCH_WITH_KEY_SZ])?,
        });
    }
    Ok(IndexNode { level, branches })
}

fn decode_superblock(buf: &[u8]) -> Result<SuperblockNode, CorruptReason> {
    if buf.len() != SB_NODE_SZ {
        return Err(CorruptReason::BadLength(buf.len() as u32));
    }
    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&buf[108..124]);
    Ok(SuperblockNode {
        key_hash: buf[26],
        key_fmt: buf[27],
        flags: SuperblockFlags::from_bits_retain(le32(buf, 28)),
        min_io_size: le32(buf, 32),
        leb_size: le32(buf, 36),
        leb_cnt: le32(buf, 40),
        max_leb_cnt: le32(buf, 44),
        max_bud_bytes: le64(buf, 48),
        log_lebs: le32(buf, 56),
        lpt_lebs: le32(buf, 60),
        orph_lebs: le32(buf, 64),
        jhead_cnt: le32(buf, 68),
        fanout: le32(buf, 72),
        lsave_cnt: le32(buf, 76),
        fmt_version: le32(buf, 80),
        default_compr: le16(buf, 84),
        rp_uid: le32(buf, 88),
        rp_gid: le32(buf, 92),
        rp_size: le64(buf, 96),
        time_gran: le32(buf, 104),
        uuid,
        ro_compat_version: le32(buf, 124),
    })
}

fn decode_master(buf: &[u8]) -> Result<MasterNode, CorruptReason> {
    if buf.len() != MST_NODE_SZ {
        return Err(CorruptReason::BadLength(buf.len() as u32));
    }
    Ok(MasterNode {
        highest_inum: le64(buf, 24),
        cmt_no: le64(buf, 32),
        flags: MasterFlags::from_bits_retain(le32(buf, 40)),
        log_lnum: le32(buf, 44),
        root_lnum: le32(buf, 48),
        root_offs: le32(buf, 52),
        root_len: le32(buf, 56),
        gc_lnum: le32(buf, 60),
        ihead_lnum: le32(buf, 64),
        ihead_offs: le32(buf, 68),
        index_size: le64(buf, 72),
        total_free: le64(buf, 80),
        total_dirty: le64(buf, 88),
        total_used: le64(buf, 96),
        total_dead: le64(buf, 104),
        total_dark: le64(buf, 112),
        lpt_lnum: le32(buf, 120),
        lpt_offs: le32(buf, 124),
        empty_lebs: le32(buf, 156),
        idx_lebs: le32(buf, 160),
        leb_cnt: le32(buf, 164),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{finish_node, encode_data, encode_dent, encode_index, encode_inode, InodeSpec};

    fn data_node() -> Vec<u8> {
        encode_data(7, Key::data(42, 3), b"hello flash", 0, 11)
    }

    #[test]
    fn test_decode_data_node() {
        let raw = data_node();
        let node = decode(&raw).unwrap();
        assert_eq!(node.header.node_type, NodeType::Data);
        assert_eq!(node.header.sqnum, 7);
        let data = node.into_data().unwrap();
        assert_eq!(data.key, Key::data(42, 3));
        assert_eq!(data.size, 11);
        assert_eq!(data.data, b"hello flash");
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut raw = data_node();
        raw.extend_from_slice(&[0xFF; 64]);
        assert!(decode(&raw).is_ok());
    }

    #[test]
    fn test_bad_magic() {
        let mut raw = data_node();
        raw[0] ^= 1;
        assert!(matches!(decode(&raw).unwrap_err().reason, CorruptReason::BadMagic(_)));
    }

    #[test]
    fn test_length_past_buffer() {
        let raw = data_node();
        let truncated = &raw[..raw.len() - 1];
        assert!(matches!(decode(truncated).unwrap_err().reason, CorruptReason::BadLength(_)));
        assert!(matches!(decode(&raw[..10]).unwrap_err().reason, CorruptReason::BadLength(10)));
    }

    #[test]
    fn test_every_payload_bit_flip_fails_crc() {
        let raw = data_node();
        for byte in CH_SZ..raw.len() {
            for bit in 0..8 {
                let mut flipped = raw.clone();
                flipped[byte] ^= 1 << bit;
                let err = decode(&flipped).unwrap_err();
                assert!(
                    matches!(err.reason, CorruptReason::BadChecksum { .. }),
                    "flip at byte {} bit {} gave {:?}",
                    byte,
                    bit,
                    err
                );
            }
        }
    }

    #[test]
    fn test_sqnum_covered_by_crc() {
        let mut raw = data_node();
        raw[8] ^= 0x80;
        assert!(matches!(decode(&raw).unwrap_err().reason, CorruptReason::BadChecksum { .. }));
    }

    #[test]
    fn test_unknown_type() {
        let mut raw = data_node();
        raw[20] = 42;
        finish_node(&mut raw);
        assert_eq!(decode(&raw).unwrap_err().reason, CorruptReason::UnknownType(42));
    }

    #[test]
    fn test_decode_inode_with_inline_data() {
        let spec = InodeSpec::symlink(b"/boot/zImage");
        let raw = encode_inode(3, 12, &spec);
        let ino = decode(&raw).unwrap().into_inode().unwrap();
        assert_eq!(ino.key, Key::inode(12));
        assert_eq!(ino.data, b"/boot/zImage");
        assert_eq!(ino.size, 12);
        assert_eq!(ino.mode & 0o170000, 0o120000);
    }

    #[test]
    fn test_inode_data_len_must_match() {
        let spec = InodeSpec::symlink(b"target");
        let mut raw = encode_inode(3, 12, &spec);
        raw[112] = 5;
        finish_node(&mut raw);
        assert!(matches!(decode(&raw).unwrap_err().reason, CorruptReason::BadLength(_)));
    }

    #[test]
    fn test_decode_dent() {
        let raw = encode_dent(9, Key::dent(1, 77), 5, 1, b"boot");
        let dent = decode(&raw).unwrap().into_dent().unwrap();
        assert_eq!(dent.name, b"boot");
        assert_eq!(dent.inum, 5);
        assert_eq!(dent.itype, 1);
    }

    #[test]
    fn test_dent_name_must_be_terminated() {
        let mut raw = encode_dent(9, Key::dent(1, 77), 5, 1, b"boot");
        let last = raw.len() - 1;
        raw[last] = b'x';
        finish_node(&mut raw);
        assert_eq!(decode(&raw).unwrap_err().reason, CorruptReason::BadName);
    }

    #[test]
    fn test_dent_key_type_checked() {
        let raw = encode_dent(9, Key::data(1, 77), 5, 1, b"boot");
        assert_eq!(decode(&raw).unwrap_err().reason, CorruptReason::BadKey);
    }

    #[test]
    fn test_decode_index() {
        let branches = [
            Branch { lnum: 3, offs: 0, len: 160, key: Key::inode(1) },
            Branch { lnum: 3, offs: 160, len: 61, key: Key::dent(1, 100) },
        ];
        let raw = encode_index(11, 0, &branches);
        let idx = decode(&raw).unwrap().into_index().unwrap();
        assert_eq!(idx.level, 0);
        assert_eq!(idx.branches, branches);
    }

    #[test]
    fn test_empty_index_rejected() {
        let raw = encode_index(11, 0, &[]);
        assert_eq!(decode(&raw).unwrap_err().reason, CorruptReason::BadIndex);
    }

    #[test]
    fn test_wrong_payload_accessor() {
        let node = decode(&data_node()).unwrap();
        assert!(matches!(
            node.into_inode(),
            Err(CorruptReason::UnexpectedType { expected: NodeType::Inode, found: NodeType::Data })
        ));
    }
}
