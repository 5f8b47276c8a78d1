//! NFSv3 (RFC 1813), MOUNT v3 and portmap v2 protocol constants and types

use core::fmt;

use crate::error::XdrError;
use crate::xdr::XdrDecoder;

/// Well-known portmapper port
pub const PORTMAP_PORT: u16 = 111;

pub const PROG_PORTMAP: u32 = 100_000;
pub const PROG_NFS: u32 = 100_003;
pub const PROG_MOUNT: u32 = 100_005;

pub const PORTMAP_VERSION: u32 = 2;
pub const NFS_VERSION: u32 = 3;
pub const MOUNT_VERSION: u32 = 3;

pub const PORTMAP_GETPORT: u32 = 3;
pub const IPPROTO_UDP: u32 = 17;

pub const MOUNTPROC3_MNT: u32 = 1;
pub const MOUNTPROC3_UMNT: u32 = 3;

pub const NFSPROC3_GETATTR: u32 = 1;
pub const NFSPROC3_LOOKUP: u32 = 3;
pub const NFSPROC3_READLINK: u32 = 5;
pub const NFSPROC3_READ: u32 = 6;
pub const NFSPROC3_READDIR: u32 = 16;

/// Largest NFSv3 file handle
pub const NFS3_FHSIZE: usize = 64;
/// READDIR cookie verifier size
pub const NFS3_COOKIEVERFSIZE: usize = 8;
/// Longest path MOUNT accepts
pub const MNTPATHLEN: usize = 1024;
/// Longest symlink target accepted from READLINK
pub const MAXPATHLEN: usize = 4096;

/// Bytes requested per READ
pub const READ_CHUNK: u32 = 1024;
/// Reply size hint sent with READDIR
pub const READDIR_COUNT: u32 = 1024;

/// nfsstat3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfsStat {
    Perm,
    NoEnt,
    Io,
    NxIo,
    Access,
    Exist,
    XDev,
    NoDev,
    NotDir,
    IsDir,
    Inval,
    FBig,
    NoSpc,
    RoFs,
    MLink,
    NameTooLong,
    NotEmpty,
    DQuot,
    Stale,
    Remote,
    BadHandle,
    NotSync,
    BadCookie,
    NotSupp,
    TooSmall,
    ServerFault,
    BadType,
    Jukebox,
    /// Status outside RFC 1813
    Other(u32),
}

impl NfsStat {
    /// `None` for NFS3_OK
    pub fn from_u32(v: u32) -> Option<Self> {
        let stat = match v {
            0 => return None,
            1 => NfsStat::Perm,
            2 => NfsStat::NoEnt,
            5 => NfsStat::Io,
            6 => NfsStat::NxIo,
            13 => NfsStat::Access,
            17 => NfsStat::Exist,
            18 => NfsStat::XDev,
            19 => NfsStat::NoDev,
            20 => NfsStat::NotDir,
            21 => NfsStat::IsDir,
            22 => NfsStat::Inval,
            27 => NfsStat::FBig,
            28 => NfsStat::NoSpc,
            30 => NfsStat::RoFs,
            31 => NfsStat::MLink,
            63 => NfsStat::NameTooLong,
            66 => NfsStat::NotEmpty,
            69 => NfsStat::DQuot,
            70 => NfsStat::Stale,
            71 => NfsStat::Remote,
            10001 => NfsStat::BadHandle,
            10002 => NfsStat::NotSync,
            10003 => NfsStat::BadCookie,
            10004 => NfsStat::NotSupp,
            10005 => NfsStat::TooSmall,
            10006 => NfsStat::ServerFault,
            10007 => NfsStat::BadType,
            10008 => NfsStat::Jukebox,
            other => NfsStat::Other(other),
        };
        Some(stat)
    }

    /// Read a status word, turning anything but NFS3_OK into an error
    pub fn check(dec: &mut XdrDecoder<'_>) -> crate::Result<()> {
        match NfsStat::from_u32(dec.get_u32()?) {
            None => Ok(()),
            Some(stat) => Err(stat.into()),
        }
    }
}

impl fmt::Display for NfsStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NfsStat::Perm => "not owner",
            NfsStat::NoEnt => "no such file or directory",
            NfsStat::Io => "I/O error",
            NfsStat::NxIo => "no such device or address",
            NfsStat::Access => "permission denied",
            NfsStat::Exist => "file exists",
            NfsStat::XDev => "cross-device link",
            NfsStat::NoDev => "no such device",
            NfsStat::NotDir => "not a directory",
            NfsStat::IsDir => "is a directory",
            NfsStat::Inval => "invalid argument",
            NfsStat::FBig => "file too large",
            NfsStat::NoSpc => "no space left on device",
            NfsStat::RoFs => "read-only filesystem",
            NfsStat::MLink => "too many links",
            NfsStat::NameTooLong => "name too long",
            NfsStat::NotEmpty => "directory not empty",
            NfsStat::DQuot => "quota exceeded",
            NfsStat::Stale => "stale file handle",
            NfsStat::Remote => "too many levels of remote in path",
            NfsStat::BadHandle => "illegal file handle",
            NfsStat::NotSync => "update synchronization mismatch",
            NfsStat::BadCookie => "stale READDIR cookie",
            NfsStat::NotSupp => "operation not supported",
            NfsStat::TooSmall => "buffer too small",
            NfsStat::ServerFault => "server fault",
            NfsStat::BadType => "type not supported by server",
            NfsStat::Jukebox => "server busy, try later",
            NfsStat::Other(v) => return write!(f, "status {}", v),
        };
        f.write_str(s)
    }
}

/// ftype3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType3 {
    Regular,
    Directory,
    BlockDevice,
    CharDevice,
    Symlink,
    Socket,
    Fifo,
    Unknown(u32),
}

impl From<u32> for FileType3 {
    fn from(v: u32) -> Self {
        match v {
            1 => FileType3::Regular,
            2 => FileType3::Directory,
            3 => FileType3::BlockDevice,
            4 => FileType3::CharDevice,
            5 => FileType3::Symlink,
            6 => FileType3::Socket,
            7 => FileType3::Fifo,
            other => FileType3::Unknown(other),
        }
    }
}

/// nfstime3
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NfsTime {
    pub seconds: u32,
    pub nseconds: u32,
}

/// fattr3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fattr3 {
    pub ftype: FileType3,
    /// Permission bits only; the type lives in `ftype`
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub used: u64,
    pub rdev: (u32, u32),
    pub fsid: u64,
    pub fileid: u64,
    pub atime: NfsTime,
    pub mtime: NfsTime,
    pub ctime: NfsTime,
}

fn decode_time(dec: &mut XdrDecoder<'_>) -> Result<NfsTime, XdrError> {
    Ok(NfsTime {
        seconds: dec.get_u32()?,
        nseconds: dec.get_u32()?,
    })
}

impl Fattr3 {
    /// Encoded size in bytes
    pub const SIZE: usize = 84;

    pub fn decode(dec: &mut XdrDecoder<'_>) -> Result<Self, XdrError> {
        Ok(Fattr3 {
            ftype: FileType3::from(dec.get_u32()?),
            mode: dec.get_u32()?,
            nlink: dec.get_u32()?,
            uid: dec.get_u32()?,
            gid: dec.get_u32()?,
            size: dec.get_u64()?,
            used: dec.get_u64()?,
            rdev: (dec.get_u32()?, dec.get_u32()?),
            fsid: dec.get_u64()?,
            fileid: dec.get_u64()?,
            atime: decode_time(dec)?,
            mtime: decode_time(dec)?,
            ctime: decode_time(dec)?,
        })
    }
}

/// post_op_attr: optional attributes trailing most replies
pub fn decode_post_op_attr(dec: &mut XdrDecoder<'_>) -> Result<Option<Fattr3>, XdrError> {
    if dec.get_bool()? {
        Fattr3::decode(dec).map(Some)
    } else {
        Ok(None)
    }
}
