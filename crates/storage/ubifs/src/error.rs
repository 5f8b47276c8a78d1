//! UBIFS error types
//!
//! All errors are small `Copy` values so they can cross the VFS boundary
//! and be logged without allocation.

use core::fmt;

use bootfs_driver_traits::DriverError;

use crate::node::NodeType;

/// Result type for filesystem operations
pub type Result<T> = core::result::Result<T, Error>;

/// Why a node failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptReason {
    /// Magic number mismatch
    BadMagic(u32),
    /// Length field below the header size, past the buffer, or inconsistent
    /// with the node type
    BadLength(u32),
    /// Stored CRC does not match the node contents
    BadChecksum { stored: u32, computed: u32 },
    /// Node type number outside the known range
    UnknownType(u8),
    /// A valid node of the wrong type was found where another was expected
    UnexpectedType { expected: NodeType, found: NodeType },
    /// Key type bits outside the known range, or wrong for this node
    BadKey,
    /// Directory entry name empty, too long, not terminated or containing NUL
    BadName,
    /// Decompressed length differs from the length declared by the data node
    SizeMismatch { expected: u32, actual: u32 },
    /// Inline data or data node payload larger than a block
    TooMuchData(u32),
    /// Index node child count or level is invalid
    BadIndex,
    /// Branch points outside the volume
    BadBranch { lnum: u32, offs: u32, len: u32 },
    /// Leaf key differs from the key of the branch pointing at it
    KeyMismatch,
    /// Index level did not decrease by exactly one
    BadLevel { expected: u16, found: u16 },
    /// Inode mode has no valid file type bits
    BadMode(u32),
}

/// A node that failed structural validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorruptNode {
    pub reason: CorruptReason,
    /// (LEB, offset) the node was read from, when known
    pub location: Option<(u32, u32)>,
}

impl CorruptNode {
    pub const fn new(reason: CorruptReason) -> Self {
        CorruptNode { reason, location: None }
    }

    /// Attach the node position
    pub const fn at(mut self, lnum: u32, offs: u32) -> Self {
        self.location = Some((lnum, offs));
        self
    }
}

impl From<CorruptReason> for CorruptNode {
    fn from(reason: CorruptReason) -> Self {
        CorruptNode::new(reason)
    }
}

/// Why a codec failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompressFailure {
    /// No codec registered for this tag
    NotCompiledIn,
    /// Stream is malformed (bad instruction, truncated input, bad distance)
    Corrupt,
    /// Output would exceed the block buffer
    OutputOverrun,
}

/// Decompression failure with codec context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompressError {
    /// Compression type tag from the node
    pub codec: u16,
    /// Compressed input length
    pub input_len: usize,
    /// Output capacity offered to the codec
    pub expected: usize,
    /// Bytes produced before the failure
    pub actual: usize,
    pub failure: DecompressFailure,
}

/// Media or content failure while reading the volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// The volume collaborator reported an error
    Device(DriverError),
    /// A node on the read path failed validation
    CorruptTree(CorruptNode),
    /// A data node could not be decompressed
    Decompress(DecompressError),
}

impl From<DriverError> for IoError {
    fn from(e: DriverError) -> Self {
        IoError::Device(e)
    }
}

impl From<CorruptNode> for IoError {
    fn from(e: CorruptNode) -> Self {
        IoError::CorruptTree(e)
    }
}

impl From<DecompressError> for IoError {
    fn from(e: DecompressError) -> Self {
        IoError::Decompress(e)
    }
}

/// Filesystem operation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Path component does not exist
    NotFound,
    /// Intermediate component is not a directory
    NotADirectory,
    /// Expected a file, found a directory
    IsADirectory,
    /// readlink on something that is not a symlink
    NotASymlink,
    /// Path component longer than 255 bytes
    NameTooLong,
    /// Handle opened by another mount, or an offset past the last block
    InvalidArgument,
    Io(IoError),
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<CorruptNode> for Error {
    fn from(e: CorruptNode) -> Self {
        Error::Io(IoError::CorruptTree(e))
    }
}

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        Error::Io(IoError::Device(e))
    }
}

/// Mount failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountError {
    /// Volume geometry cannot hold a UBIFS image
    BadGeometry,
    /// LEB 0 does not hold a valid superblock node
    BadSuperblock(CorruptNode),
    /// Superblock LEB size or count disagrees with the volume
    GeometryMismatch,
    /// Key format other than "simple"
    UnsupportedKeyFormat(u8),
    /// Unknown key hash function
    UnsupportedKeyHash(u8),
    /// Format version newer than this reader
    UnsupportedVersion { fmt_version: u32, ro_compat_version: u32 },
    /// Neither master LEB holds a valid master node
    NoMasterNode,
    /// Root branch of the index is out of range
    BadRoot,
    Io(IoError),
}

impl From<IoError> for MountError {
    fn from(e: IoError) -> Self {
        MountError::Io(e)
    }
}

impl From<DriverError> for MountError {
    fn from(e: DriverError) -> Self {
        MountError::Io(IoError::Device(e))
    }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptReason::BadMagic(m) => write!(f, "bad magic {:#010x}", m),
            CorruptReason::BadLength(l) => write!(f, "bad node length {}", l),
            CorruptReason::BadChecksum { stored, computed } => {
                write!(f, "bad CRC: stored {:#010x}, computed {:#010x}", stored, computed)
            }
            CorruptReason::UnknownType(t) => write!(f, "unknown node type {}", t),
            CorruptReason::UnexpectedType { expected, found } => {
                write!(f, "expected {:?} node, found {:?}", expected, found)
            }
            CorruptReason::BadKey => f.write_str("bad key"),
            CorruptReason::BadName => f.write_str("bad entry name"),
            CorruptReason::SizeMismatch { expected, actual } => {
                write!(f, "decompressed {} bytes, node declares {}", actual, expected)
            }
            CorruptReason::TooMuchData(n) => write!(f, "{} bytes of data exceed a block", n),
            CorruptReason::BadIndex => f.write_str("bad index node"),
            CorruptReason::BadBranch { lnum, offs, len } => {
                write!(f, "branch {}:{} len {} outside the volume", lnum, offs, len)
            }
            CorruptReason::KeyMismatch => f.write_str("leaf key differs from branch key"),
            CorruptReason::BadLevel { expected, found } => {
                write!(f, "index level {} where {} was expected", found, expected)
            }
            CorruptReason::BadMode(m) => write!(f, "bad inode mode {:o}", m),
        }
    }
}

impl fmt::Display for CorruptNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some((lnum, offs)) => write!(f, "corrupt node at {}:{}: {}", lnum, offs, self.reason),
            None => write!(f, "corrupt node: {}", self.reason),
        }
    }
}

impl fmt::Display for DecompressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.failure {
            DecompressFailure::NotCompiledIn => "not compiled in",
            DecompressFailure::Corrupt => "corrupt stream",
            DecompressFailure::OutputOverrun => "output overrun",
        };
        write!(
            f,
            "cannot decompress {} bytes with {}: {} ({} of {} bytes produced)",
            self.input_len,
            crate::compress::Compression::name_of(self.codec),
            what,
            self.actual,
            self.expected
        )
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Device(e) => write!(f, "volume read failed: {}", e),
            IoError::CorruptTree(e) => write!(f, "{}", e),
            IoError::Decompress(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => f.write_str("no such file or directory"),
            Error::NotADirectory => f.write_str("not a directory"),
            Error::IsADirectory => f.write_str("is a directory"),
            Error::NotASymlink => f.write_str("not a symbolic link"),
            Error::NameTooLong => f.write_str("file name too long"),
            Error::InvalidArgument => f.write_str("invalid argument"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl fmt::Display for MountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountError::BadGeometry => f.write_str("volume too small for UBIFS"),
            MountError::BadSuperblock(e) => write!(f, "bad superblock: {}", e),
            MountError::GeometryMismatch => f.write_str("superblock geometry does not match the volume"),
            MountError::UnsupportedKeyFormat(k) => write!(f, "unsupported key format {}", k),
            MountError::UnsupportedKeyHash(k) => write!(f, "unsupported key hash {}", k),
            MountError::UnsupportedVersion { fmt_version, ro_compat_version } => write!(
                f,
                "on-flash format version {} (r/o compat {}) is not supported",
                fmt_version, ro_compat_version
            ),
            MountError::NoMasterNode => f.write_str("no valid master node"),
            MountError::BadRoot => f.write_str("bad index root"),
            MountError::Io(e) => write!(f, "{}", e),
        }
    }
}
