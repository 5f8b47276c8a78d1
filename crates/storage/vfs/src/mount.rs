//! Mount table management
//!
//! Path mounts only. A path resolves to the mount with the longest
//! matching prefix, and the remainder is handed to that filesystem as an
//! absolute path.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use log::info;

use crate::path::normalize;
use crate::{Filesystem, VfsError, VfsResult, MAX_MOUNTS};

/// A mount point in the VFS
pub struct MountPoint {
    /// Mount path (normalized)
    pub path: String,
    /// Driver name the filesystem was mounted with
    pub fstype: String,
    /// Mount source (`ubi0:rootfs`, `10.0.0.1:/export`, ...)
    pub source: String,
    /// Mounted filesystem
    pub filesystem: Box<dyn Filesystem>,
}

/// Mount table managing all mounted filesystems
#[derive(Default)]
pub struct MountTable {
    /// Sorted by path length, longest first
    mounts: Vec<MountPoint>,
}

impl MountTable {
    pub fn new() -> Self {
        MountTable { mounts: Vec::new() }
    }

    /// Mount a filesystem at the given path
    pub fn mount(&mut self, path: &str, fstype: &str, source: &str, filesystem: Box<dyn Filesystem>) -> VfsResult<()> {
        let normalized = normalize(path);

        if self.mounts.iter().any(|m| m.path == normalized) {
            return Err(VfsError::AlreadyMounted);
        }
        if self.mounts.len() >= MAX_MOUNTS {
            return Err(VfsError::Busy);
        }

        info!("vfs: mounted {} ({}) on {}", source, fstype, normalized);
        self.mounts.push(MountPoint {
            path: normalized,
            fstype: String::from(fstype),
            source: String::from(source),
            filesystem,
        });
        self.mounts.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Ok(())
    }

    /// Unmount the filesystem at the given path
    ///
    /// Open files of that filesystem keep working; they hold their own
    /// reference to the mount context.
    pub fn unmount(&mut self, path: &str) -> VfsResult<MountPoint> {
        let normalized = normalize(path);
        let idx = self
            .mounts
            .iter()
            .position(|m| m.path == normalized)
            .ok_or(VfsError::NotMounted)?;
        info!("vfs: unmounted {}", normalized);
        Ok(self.mounts.remove(idx))
    }

    /// Find the filesystem for a given path
    ///
    /// Returns the filesystem and the path relative to the mount point
    pub fn resolve(&self, path: &str) -> VfsResult<(&dyn Filesystem, String)> {
        let normalized = normalize(path);

        for mount in &self.mounts {
            if mount.path == "/" {
                return Ok((mount.filesystem.as_ref(), normalized));
            }
            if normalized == mount.path {
                return Ok((mount.filesystem.as_ref(), String::from("/")));
            }
            if let Some(rest) = normalized.strip_prefix(mount.path.as_str()) {
                if rest.starts_with('/') {
                    return Ok((mount.filesystem.as_ref(), String::from(rest)));
                }
            }
        }

        Err(VfsError::NotMounted)
    }

    /// All mount points, longest path first
    pub fn list(&self) -> &[MountPoint] {
        &self.mounts
    }

    /// Is `path` a proper ancestor of some mount point?
    pub fn is_mount_ancestor(&self, path: &str) -> bool {
        let normalized = normalize(path);
        self.mounts.iter().any(|m| {
            m.path.len() > normalized.len()
                && m.path.starts_with(normalized.as_str())
                && (normalized == "/" || m.path.as_bytes()[normalized.len()] == b'/')
        })
    }

    pub fn is_mount_point(&self, path: &str) -> bool {
        let normalized = normalize(path);
        self.mounts.iter().any(|m| m.path == normalized)
    }
}
