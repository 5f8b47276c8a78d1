//! bootfs-ubifs - read-only UBIFS reader
//!
//! Reads kernel images and device trees out of a UBIFS volume from inside
//! the bootloader. Nothing is ever written back: there is no journal
//! replay, no garbage collection and no orphan processing.
//!
//! ## On-flash structure
//!
//! ```text
//! LEB 0:      Superblock node (geometry, key hash, default compressor)
//! LEB 1, 2:   Master nodes (root of the index, newest wins)
//! LEB 3+:     Log, LPT, orphan area, then main area:
//!
//!                    ┌─────────────┐
//!                    │ Index node  │  level N
//!                    └──────┬──────┘
//!             ┌─────────────┼─────────────┐
//!        ┌────▼────┐   ┌────▼────┐   ┌────▼────┐
//!        │  Index  │   │  Index  │   │  Index  │  level 0
//!        └────┬────┘   └────┬────┘   └────┬────┘
//!             │             │             │
//!       inode / dentry / data leaf nodes (by LEB + offset)
//! ```
//!
//! Every node is self-describing: magic, CRC-32 over everything after the
//! CRC field, a global sequence number, length and type.
//!
//! ## Layers
//!
//! | Module     | Role                                                    |
//! |------------|---------------------------------------------------------|
//! | `node`     | Bounds-checked decode of raw node bytes                 |
//! | `compress` | Process-wide codec registry (none / LZO / DEFLATE)      |
//! | `tnc`      | Index walk, exact lookup and directory range scans      |
//! | `inode`    | Reference-counted inode cache                           |
//! | `dir`      | Path resolution and directory iteration                 |
//! | `file`     | Block reads with a single-block cache                   |
//! | `mount`    | Superblock and master node discovery                    |

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod key;
pub mod node;
pub mod compress;
pub mod tnc;
pub mod inode;
pub mod dir;
pub mod file;
pub mod mount;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(feature = "vfs")]
pub mod vfs_adapter;

#[cfg(test)]
mod tests;

pub use error::{CorruptNode, CorruptReason, DecompressError, DecompressFailure, Error, IoError, MountError, Result};
pub use key::{Key, KeyHash, KeyType};
pub use node::{
    DataNode, DentNode, IndexNode, InodeFlags, InodeNode, MasterNode, Node, NodeHeader, NodeType, Payload,
    SuperblockNode, Timestamp,
};
pub use compress::{CodecRegistry, Compression};
pub use inode::{FileKind, Inode, InodeCache, InodeRef};
pub use dir::{DirCursor, DirEntry};
pub use file::OpenFile;
pub use mount::{MountOptions, Ubifs, VolumeInfo};

#[cfg(feature = "vfs")]
pub use vfs_adapter::UbifsFilesystem;

/// UBIFS node magic number
pub const NODE_MAGIC: u32 = 0x0610_1831;

/// Data block size: one data node holds at most this many uncompressed bytes
pub const BLOCK_SIZE: usize = 4096;

/// log2(BLOCK_SIZE)
pub const BLOCK_SHIFT: u32 = 12;

/// Maximum directory entry name length
pub const MAX_NLEN: usize = 255;

/// Root directory inode number
pub const ROOT_INO: u64 = 1;

/// Maximum inline data carried by an inode node (symlink targets)
pub const MAX_INO_DATA: usize = BLOCK_SIZE;

/// Highest on-flash format version this reader understands
pub const FORMAT_VERSION: u32 = 5;

/// Highest read-only compatibility version this reader understands
pub const RO_COMPAT_VERSION: u32 = 0;

/// UBIFS CRC-32
///
/// Same polynomial and seed as the IEEE CRC-32 but without the final
/// inversion. Computed over a node from the sequence number to the end.
pub fn crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0xEDB88320;
    let mut crc: u32 = 0xFFFFFFFF;

    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLY
            } else {
                crc >> 1
            };
        }
    }

    crc
}

#[cfg(test)]
mod crc_tests {
    use super::*;

    #[test]
    fn test_crc32() {
        // IEEE CRC-32 check values with the final inversion undone
        assert_eq!(crc32(b""), 0xFFFFFFFF);
        assert_eq!(!crc32(b"a"), 0xE8B7BE43);
        assert_eq!(!crc32(b"abc"), 0x352441C2);
        assert_eq!(!crc32(b"message digest"), 0x20159D7F);
    }
}
