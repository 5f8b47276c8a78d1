//! Mounting: superblock and master node discovery
//!
//! LEB 0 holds the superblock node with the static geometry. LEBs 1 and 2
//! each hold a sequence of master nodes, appended on every commit at
//! `align(512, min_io_size)` steps; the last valid one in either LEB with
//! the highest sequence number describes the current index root.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use bootfs_driver_traits::{VolumeDevice, VolumeDeviceExt};
use log::{debug, info, warn};

use crate::compress::{self, CodecRegistry, Compression};
use crate::error::{CorruptNode, CorruptReason, Error, IoError, MountError};
use crate::inode::{Inode, InodeCache, InodeRef};
use crate::key::{Key, KeyHash};
use crate::node::{self, MasterFlags, MasterNode, NodeType, Payload, SuperblockNode, IDX_NODE_SZ, MST_NODE_SZ, SB_NODE_SZ};
use crate::tnc::{RootRef, Tnc, DEFAULT_CACHE_LIMIT};
use crate::{FORMAT_VERSION, RO_COMPAT_VERSION, ROOT_INO};

/// LEB holding the superblock
pub const SB_LNUM: u32 = 0;
/// First master LEB
pub const MST_LNUM: u32 = 1;
/// Number of master LEBs
pub const MST_LEBS: u32 = 2;

/// Source of [`Ubifs::mount_id`] values
static NEXT_MOUNT_ID: AtomicU32 = AtomicU32::new(1);

/// Runtime mount options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOptions {
    /// Index nodes kept in memory before the index cache is dropped
    pub tnc_cache_limit: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            tnc_cache_limit: DEFAULT_CACHE_LIMIT,
        }
    }
}

impl MountOptions {
    /// Parse a comma separated option string (`tnc_cache=N`)
    ///
    /// Unknown options are ignored with a warning.
    pub fn parse(options: &str) -> Self {
        let mut opts = MountOptions::default();
        for opt in options.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match opt.split_once('=') {
                Some(("tnc_cache", v)) => match v.parse() {
                    Ok(n) => opts.tnc_cache_limit = n,
                    Err(_) => warn!("ubifs: bad tnc_cache value '{}'", v),
                },
                _ => warn!("ubifs: ignoring unknown option '{}'", opt),
            }
        }
        opts
    }
}

/// What mount learned about the volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub leb_size: u32,
    pub leb_cnt: u32,
    pub min_io_size: u32,
    pub fmt_version: u32,
    pub ro_compat_version: u32,
    pub key_hash: KeyHash,
    pub default_compr: u16,
    pub fanout: u32,
    pub uuid: [u8; 16],
    pub highest_inum: u64,
    pub cmt_no: u64,
    /// Master node sequence number
    pub mst_sqnum: u64,
    /// Filesystem was not unmounted cleanly
    pub dirty: bool,
    pub total_free: u64,
    pub total_used: u64,
    pub index_size: u64,
}

/// A mounted UBIFS volume
///
/// Owns the volume, the index cache and the inode cache. All operations
/// take `&mut self`; the single-caller model of the bootloader needs no
/// internal locking.
pub struct Ubifs<V: VolumeDevice> {
    pub(crate) volume: V,
    pub(crate) id: u32,
    pub(crate) info: VolumeInfo,
    pub(crate) codecs: &'static CodecRegistry,
    pub(crate) tnc: Tnc,
    pub(crate) inodes: InodeCache,
}

fn align_up(v: u32, a: u32) -> u32 {
    if a <= 1 {
        v
    } else {
        v.div_ceil(a) * a
    }
}

impl<V: VolumeDevice> Ubifs<V> {
    /// Mount with the process-wide codec registry
    pub fn mount(volume: V, options: MountOptions) -> Result<Self, MountError> {
        Self::mount_with(volume, options, compress::registry())
    }

    /// Mount with an explicit codec registry
    pub fn mount_with(mut volume: V, options: MountOptions, codecs: &'static CodecRegistry) -> Result<Self, MountError> {
        let geo = volume.geometry();
        if (geo.leb_size as usize) < SB_NODE_SZ || geo.leb_count < SB_LNUM + 1 + MST_LEBS + 1 {
            return Err(MountError::BadGeometry);
        }

        let sb = read_superblock(&mut volume)?;
        if sb.leb_size != geo.leb_size || sb.leb_cnt > geo.leb_count || sb.leb_cnt < MST_LNUM + MST_LEBS + 1 {
            warn!(
                "ubifs: superblock geometry {}x{} does not match volume {}x{}",
                sb.leb_cnt, sb.leb_size, geo.leb_count, geo.leb_size
            );
            return Err(MountError::GeometryMismatch);
        }
        if sb.min_io_size != geo.min_io_size {
            return Err(MountError::GeometryMismatch);
        }
        if sb.key_fmt != 0 {
            return Err(MountError::UnsupportedKeyFormat(sb.key_fmt));
        }
        let key_hash = KeyHash::from_u8(sb.key_hash).ok_or(MountError::UnsupportedKeyHash(sb.key_hash))?;
        if sb.fmt_version > FORMAT_VERSION && sb.ro_compat_version > RO_COMPAT_VERSION {
            return Err(MountError::UnsupportedVersion {
                fmt_version: sb.fmt_version,
                ro_compat_version: sb.ro_compat_version,
            });
        }
        if !codecs.supports(sb.default_compr) {
            warn!(
                "ubifs: default compressor {} is not compiled in",
                Compression::name_of(sb.default_compr)
            );
        }

        let (mst, mst_sqnum) = find_master(&mut volume, sb.leb_size, sb.min_io_size)?;
        let root = RootRef {
            lnum: mst.root_lnum,
            offs: mst.root_offs,
            len: mst.root_len,
        };
        let root_ok = root.lnum < sb.leb_cnt
            && root.len as usize >= IDX_NODE_SZ
            && root.offs.checked_add(root.len).map_or(false, |end| end <= sb.leb_size);
        if !root_ok {
            return Err(MountError::BadRoot);
        }

        let dirty = mst.flags.contains(MasterFlags::DIRTY);
        if dirty {
            warn!("ubifs: filesystem was not unmounted cleanly, journal is not replayed");
        }

        let info = VolumeInfo {
            leb_size: sb.leb_size,
            leb_cnt: sb.leb_cnt,
            min_io_size: sb.min_io_size,
            fmt_version: sb.fmt_version,
            ro_compat_version: sb.ro_compat_version,
            key_hash,
            default_compr: sb.default_compr,
            fanout: sb.fanout,
            uuid: sb.uuid,
            highest_inum: mst.highest_inum,
            cmt_no: mst.cmt_no,
            mst_sqnum,
            dirty,
            total_free: mst.total_free,
            total_used: mst.total_used,
            index_size: mst.index_size,
        };

        let mut fs = Ubifs {
            volume,
            id: NEXT_MOUNT_ID.fetch_add(1, Ordering::Relaxed),
            tnc: Tnc::new(root, info.leb_size, info.leb_cnt, options.tnc_cache_limit),
            info,
            codecs,
            inodes: InodeCache::new(),
        };

        let root_ino = fs.iget(ROOT_INO).map_err(|e| match e {
            Error::Io(io) => MountError::Io(io),
            _ => MountError::BadRoot,
        })?;
        let root_is_dir = root_ino.is_dir();
        fs.release(root_ino);
        if !root_is_dir {
            return Err(MountError::BadRoot);
        }

        info!(
            "ubifs: mounted {} LEBs of {} bytes, format {}, commit {}",
            fs.info.leb_cnt, fs.info.leb_size, fs.info.fmt_version, fs.info.cmt_no
        );
        Ok(fs)
    }

    /// Drop all caches and hand the volume back
    pub fn unmount(mut self) -> V {
        self.inodes.clear();
        self.tnc.clear_cache();
        debug!("ubifs: unmounted");
        self.volume
    }

    /// Identifies this mount; handles record the mount that opened them
    pub fn mount_id(&self) -> u32 {
        self.id
    }

    pub fn info(&self) -> &VolumeInfo {
        &self.info
    }

    pub fn codecs(&self) -> &'static CodecRegistry {
        self.codecs
    }

    pub fn inode_cache(&self) -> &InodeCache {
        &self.inodes
    }

    pub fn inode_cache_mut(&mut self) -> &mut InodeCache {
        &mut self.inodes
    }

    /// Number of index nodes held by the index cache
    pub fn cached_index_nodes(&self) -> usize {
        self.tnc.cached_index_nodes()
    }

    /// Exact index lookup
    pub fn lookup(&mut self, key: &Key) -> Result<Option<node::Node>, IoError> {
        self.tnc.lookup(&mut self.volume, key)
    }

    /// Directory range scan, see [`Tnc::next_entry`]
    pub fn next_entry(
        &mut self,
        after: &Key,
        name_hint: Option<&[u8]>,
        min_sqnum: u64,
    ) -> Result<Option<node::DentNode>, IoError> {
        self.tnc.next_entry(&mut self.volume, after, name_hint, min_sqnum)
    }

    /// Take a reference to inode `inum`
    pub fn iget(&mut self, inum: u64) -> Result<InodeRef, Error> {
        let Ubifs { volume, tnc, inodes, .. } = self;
        inodes.get(inum, |inum| {
            let node = tnc.lookup(volume, &Key::inode(inum))?.ok_or(Error::NotFound)?;
            let ino = node.into_inode().map_err(CorruptNode::new)?;
            Ok(Inode::from_node(ino)?)
        })
    }

    /// Give back a reference taken by `iget`, `resolve` or `stat`
    pub fn release(&mut self, inode: InodeRef) {
        self.inodes.release(inode);
    }

    /// Attributes of the inode at `path`
    pub fn stat(&mut self, path: &str) -> Result<Inode, Error> {
        let inode = self.resolve(path)?;
        let attrs = Inode::clone(&inode);
        self.release(inode);
        Ok(attrs)
    }

    /// Target of the symlink at `path`
    pub fn readlink(&mut self, path: &str) -> Result<Vec<u8>, Error> {
        let inode = self.resolve(path)?;
        let result = if inode.is_symlink() {
            Ok(inode.inline_data.clone())
        } else {
            Err(Error::NotASymlink)
        };
        self.release(inode);
        result
    }

    /// Kernel command line `root=` argument for this volume
    pub fn linux_rootarg(&self, volume_name: &str, mtd_partition: &str) -> String {
        format!("root=ubi0:{} ubi.mtd={} rootfstype=ubifs", volume_name, mtd_partition)
    }
}

fn read_superblock<V: VolumeDevice>(volume: &mut V) -> Result<SuperblockNode, MountError> {
    let buf = volume.read_leb_vec(SB_LNUM, 0, SB_NODE_SZ as u32)?;
    let node = node::decode(&buf).map_err(|e| MountError::BadSuperblock(e.at(SB_LNUM, 0)))?;
    match node.payload {
        Payload::Superblock(sb) => Ok(sb),
        _ => Err(MountError::BadSuperblock(
            CorruptNode::new(CorruptReason::UnexpectedType {
                expected: NodeType::Superblock,
                found: node.header.node_type,
            })
            .at(SB_LNUM, 0),
        )),
    }
}

/// Last valid master node in one master LEB
fn scan_master_leb<V: VolumeDevice>(
    volume: &mut V,
    lnum: u32,
    leb_size: u32,
    step: u32,
) -> Result<Option<(MasterNode, u64)>, MountError> {
    let mut last = None;
    let mut offs = 0;
    while offs + MST_NODE_SZ as u32 <= leb_size {
        let buf = volume.read_leb_vec(lnum, offs, MST_NODE_SZ as u32)?;
        match node::decode(&buf) {
            Ok(node::Node {
                header,
                payload: Payload::Master(mst),
            }) => last = Some((mst, header.sqnum)),
            Ok(_) => break,
            Err(e) => {
                // Erased space ends the list; anything else is worth a note
                if buf.iter().any(|&b| b != 0xFF) {
                    debug!("ubifs: master LEB {} ends at {}: {}", lnum, offs, e);
                }
                break;
            }
        }
        offs += step;
    }
    Ok(last)
}

fn find_master<V: VolumeDevice>(volume: &mut V, leb_size: u32, min_io_size: u32) -> Result<(MasterNode, u64), MountError> {
    let step = align_up(MST_NODE_SZ as u32, min_io_size);
    let mut best: Option<(MasterNode, u64)> = None;
    for lnum in MST_LNUM..MST_LNUM + MST_LEBS {
        match scan_master_leb(volume, lnum, leb_size, step)? {
            Some((mst, sqnum)) => {
                if best.as_ref().map_or(true, |(_, s)| sqnum > *s) {
                    best = Some((mst, sqnum));
                }
            }
            None => warn!("ubifs: no valid master node in LEB {}", lnum),
        }
    }
    best.ok_or(MountError::NoMasterNode)
}
