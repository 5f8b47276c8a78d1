//! Symbolic link resolution
//!
//! Filesystems only report links (`stat` does not follow, `readlink`
//! returns the target). The VFS walks paths component by component and
//! splices link targets in, bounded by [`MAX_SYMLINK_DEPTH`].
//!
//! Absolute targets are taken relative to the VFS root, relative targets
//! to the directory holding the link.

use alloc::string::String;

use crate::path::Path;
use crate::{VfsError, VfsResult};

/// Maximum symlink depth to prevent infinite loops
pub const MAX_SYMLINK_DEPTH: usize = 40;

/// Symlink target - where a symlink points to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkTarget {
    /// The raw target path as stored
    pub raw: String,
}

impl SymlinkTarget {
    pub fn new(target: &str) -> Self {
        SymlinkTarget {
            raw: String::from(target),
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.raw.starts_with('/')
    }

    /// Resolve this target against the directory containing the link
    pub fn resolve(&self, symlink_dir: &str) -> Path {
        Path::new(symlink_dir).join(&self.raw)
    }
}

/// Counts links followed during one resolution
#[derive(Debug, Default)]
pub struct SymlinkResolver {
    depth: usize,
}

impl SymlinkResolver {
    pub fn new() -> Self {
        SymlinkResolver { depth: 0 }
    }

    /// Account for one more link, failing past the limit
    pub fn enter(&mut self) -> VfsResult<()> {
        self.depth += 1;
        if self.depth > MAX_SYMLINK_DEPTH {
            Err(VfsError::TooManySymlinks)
        } else {
            Ok(())
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Result of resolving a path that may contain symlinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// The final resolved path
    pub path: String,
    /// Number of symlinks followed
    pub symlinks_followed: usize,
}

/// Options for path resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Follow symlinks in intermediate components
    pub follow_symlinks: bool,
    /// Follow the final component if it's a symlink
    /// (false for lstat and readlink)
    pub follow_final: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            follow_symlinks: true,
            follow_final: true,
        }
    }
}

impl ResolveOptions {
    /// Don't follow symlinks at all
    pub fn no_follow() -> Self {
        ResolveOptions {
            follow_symlinks: false,
            follow_final: false,
        }
    }

    /// Follow all symlinks except the final component
    pub fn no_follow_final() -> Self {
        ResolveOptions {
            follow_symlinks: true,
            follow_final: false,
        }
    }
}
