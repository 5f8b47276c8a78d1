//! VFS Error types

use core::fmt;

/// VFS Result type
pub type VfsResult<T> = Result<T, VfsError>;

/// VFS Error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    /// File or directory not found
    NotFound,
    /// Permission denied
    PermissionDenied,
    /// Not a directory
    NotADirectory,
    /// Is a directory (when expecting file)
    IsADirectory,
    /// readlink on something that is not a symlink
    NotASymlink,
    /// Invalid argument
    InvalidArgument,
    /// I/O error
    IoError,
    /// Name too long
    NameTooLong,
    /// Invalid path
    InvalidPath,
    /// Not a mount point
    NotMounted,
    /// Already mounted
    AlreadyMounted,
    /// Busy (in use)
    Busy,
    /// VFS not initialized
    NotInitialized,
    /// Operation not supported
    NotSupported,
    /// Read-only filesystem
    ReadOnly,
    /// Symlink chain longer than the resolver allows
    TooManySymlinks,
    /// Remote server did not answer
    TimedOut,
    /// No driver or device for the mount source
    NoDevice,
    /// Corrupted data
    Corrupted,
    /// Filesystem-specific error
    FsError(i32),
}

impl VfsError {
    /// Convert to errno-style error code
    pub fn to_errno(&self) -> i32 {
        match self {
            VfsError::NotFound => -2,          // ENOENT
            VfsError::PermissionDenied => -13, // EACCES
            VfsError::NotADirectory => -20,    // ENOTDIR
            VfsError::IsADirectory => -21,     // EISDIR
            VfsError::NotASymlink => -22,      // EINVAL, as readlink(2)
            VfsError::InvalidArgument => -22,  // EINVAL
            VfsError::IoError => -5,           // EIO
            VfsError::NameTooLong => -36,      // ENAMETOOLONG
            VfsError::InvalidPath => -22,
            VfsError::NotMounted => -22,
            VfsError::AlreadyMounted => -16, // EBUSY
            VfsError::Busy => -16,
            VfsError::NotInitialized => -22,
            VfsError::NotSupported => -38,    // ENOSYS
            VfsError::ReadOnly => -30,        // EROFS
            VfsError::TooManySymlinks => -40, // ELOOP
            VfsError::TimedOut => -110,       // ETIMEDOUT
            VfsError::NoDevice => -19,        // ENODEV
            VfsError::Corrupted => -5,        // EIO (corruption)
            VfsError::FsError(e) => *e,
        }
    }
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            VfsError::NotFound => "no such file or directory",
            VfsError::PermissionDenied => "permission denied",
            VfsError::NotADirectory => "not a directory",
            VfsError::IsADirectory => "is a directory",
            VfsError::NotASymlink => "not a symbolic link",
            VfsError::InvalidArgument => "invalid argument",
            VfsError::IoError => "I/O error",
            VfsError::NameTooLong => "file name too long",
            VfsError::InvalidPath => "invalid path",
            VfsError::NotMounted => "not mounted",
            VfsError::AlreadyMounted => "already mounted",
            VfsError::Busy => "device or resource busy",
            VfsError::NotInitialized => "VFS not initialized",
            VfsError::NotSupported => "operation not supported",
            VfsError::ReadOnly => "read-only file system",
            VfsError::TooManySymlinks => "too many levels of symbolic links",
            VfsError::TimedOut => "timed out",
            VfsError::NoDevice => "no such device",
            VfsError::Corrupted => "corrupted file system",
            VfsError::FsError(e) => return write!(f, "file system error {}", e),
        };
        f.write_str(msg)
    }
}
