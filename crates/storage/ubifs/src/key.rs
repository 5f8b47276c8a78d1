//! Index keys
//!
//! Every leaf node in the index is addressed by a key. Keys sort by
//! (inode number, key type, secondary), which groups everything an inode
//! owns together: its inode node, then its data blocks in block order,
//! then its directory entries in name-hash order.
//!
//! On flash only the "simple" key format exists:
//!
//! ```text
//! bytes 0..4   le32 inode number
//! bytes 4..8   le32 (key type << 29) | (secondary & 0x1FFF_FFFF)
//! ```

use crate::error::CorruptReason;

/// Bits of the second key word holding the block number or name hash
pub const KEY_HASH_MASK: u32 = 0x1FFF_FFFF;

/// Bits of the second key word reserved for the key type
pub const KEY_TYPE_SHIFT: u32 = 29;

/// On-flash size of a simple key
pub const SIMPLE_KEY_LEN: usize = 8;

/// Width of the key field inside leaf nodes
pub const MAX_KEY_LEN: usize = 16;

/// Key type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum KeyType {
    Inode = 0,
    Data = 1,
    Dent = 2,
    Xent = 3,
}

impl KeyType {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(KeyType::Inode),
            1 => Some(KeyType::Data),
            2 => Some(KeyType::Dent),
            3 => Some(KeyType::Xent),
            _ => None,
        }
    }
}

/// A decoded index key
///
/// The derived ordering is the on-flash index ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub inum: u64,
    pub key_type: KeyType,
    /// Block number for data keys, name hash for entry keys, 0 for inodes
    pub secondary: u32,
}

impl Key {
    pub const fn new(inum: u64, key_type: KeyType, secondary: u32) -> Self {
        Key {
            inum,
            key_type,
            secondary: secondary & KEY_HASH_MASK,
        }
    }

    /// Key of an inode node
    pub const fn inode(inum: u64) -> Self {
        Key::new(inum, KeyType::Inode, 0)
    }

    /// Key of data block `block` of inode `inum`
    pub const fn data(inum: u64, block: u32) -> Self {
        Key::new(inum, KeyType::Data, block)
    }

    /// Key of a directory entry with the given name hash
    pub const fn dent(dir: u64, hash: u32) -> Self {
        Key::new(dir, KeyType::Dent, hash)
    }

    /// Smallest possible directory entry key of a directory
    pub const fn lowest_dent(dir: u64) -> Self {
        Key::new(dir, KeyType::Dent, 0)
    }

    /// Block number of a data key
    pub fn block(&self) -> u32 {
        self.secondary
    }

    /// Name hash of an entry key
    pub fn hash(&self) -> u32 {
        self.secondary
    }

    /// True when both keys belong to the same inode and have the same type
    pub fn same_range(&self, other: &Key) -> bool {
        self.inum == other.inum && self.key_type == other.key_type
    }

    /// Decode a simple key from the first 8 bytes of `buf`
    pub fn decode(buf: &[u8]) -> Result<Key, CorruptReason> {
        if buf.len() < SIMPLE_KEY_LEN {
            return Err(CorruptReason::BadKey);
        }
        let inum = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let word = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let key_type = KeyType::from_bits(word >> KEY_TYPE_SHIFT).ok_or(CorruptReason::BadKey)?;
        Ok(Key {
            inum: inum as u64,
            key_type,
            secondary: word & KEY_HASH_MASK,
        })
    }

    /// Encode as a simple key
    pub fn encode(&self) -> [u8; SIMPLE_KEY_LEN] {
        let mut out = [0u8; SIMPLE_KEY_LEN];
        out[0..4].copy_from_slice(&(self.inum as u32).to_le_bytes());
        let word = ((self.key_type as u32) << KEY_TYPE_SHIFT) | (self.secondary & KEY_HASH_MASK);
        out[4..8].copy_from_slice(&word.to_le_bytes());
        out
    }
}

impl core::fmt::Display for Key {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let t = match self.key_type {
            KeyType::Inode => "inode",
            KeyType::Data => "data",
            KeyType::Dent => "dent",
            KeyType::Xent => "xent",
        };
        write!(f, "({}, {}, {:#x})", self.inum, t, self.secondary)
    }
}

/// Directory entry name hash, selected by the superblock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyHash {
    /// Reiserfs R5 hash (the default)
    R5,
    /// First four bytes of the name (debugging images)
    Test,
}

impl KeyHash {
    /// Superblock `key_hash` value
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(KeyHash::R5),
            1 => Some(KeyHash::Test),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            KeyHash::R5 => 0,
            KeyHash::Test => 1,
        }
    }

    /// Hash a directory entry name
    pub fn hash(self, name: &[u8]) -> u32 {
        let a = match self {
            KeyHash::R5 => r5_hash(name),
            KeyHash::Test => test_hash(name),
        } & KEY_HASH_MASK;
        // 0, 1 and 2 are reserved for "." and ".." cookies
        if a <= 2 {
            a + 3
        } else {
            a
        }
    }
}

fn r5_hash(name: &[u8]) -> u32 {
    let mut a: u32 = 0;
    for &b in name.iter().take_while(|&&b| b != 0) {
        // Arithmetic is done on signed chars
        let c = b as i8 as i32;
        a = a.wrapping_add((c << 4) as u32);
        a = a.wrapping_add((c >> 4) as u32);
        a = a.wrapping_mul(11);
    }
    a
}

fn test_hash(name: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    let n = name.len().min(4);
    bytes[..n].copy_from_slice(&name[..n]);
    u32::from_le_bytes(bytes)
}
