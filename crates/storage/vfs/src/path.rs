//! Path handling utilities
//!
//! VFS paths are always absolute. `.` and `..` are folded lexically; `..`
//! at the root stays at the root.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

/// Path separator
pub const SEPARATOR: char = '/';

/// Normalized absolute path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    inner: String,
}

impl Path {
    pub fn new(s: &str) -> Self {
        Path { inner: normalize(s) }
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn is_root(&self) -> bool {
        self.inner == "/"
    }

    /// Parent directory; the root is its own parent
    pub fn parent(&self) -> Path {
        let (dir, _) = split(&self.inner);
        Path::new(dir)
    }

    /// Last component, `None` for the root
    pub fn filename(&self) -> Option<&str> {
        match split(&self.inner) {
            (_, "") => None,
            (_, name) => Some(name),
        }
    }

    /// Append `other`, or replace the path when `other` is absolute
    pub fn join(&self, other: &str) -> Path {
        if other.starts_with(SEPARATOR) {
            Path::new(other)
        } else {
            Path::new(&format!("{}/{}", self.inner, other))
        }
    }

    pub fn components(&self) -> Vec<&str> {
        components(&self.inner)
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path::new(s)
    }
}

impl core::fmt::Display for Path {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.inner)
    }
}

/// Non-empty components, `.` and `..` kept
pub fn components(path: &str) -> Vec<&str> {
    path.split(SEPARATOR).filter(|s| !s.is_empty()).collect()
}

/// Normalize a path string
///
/// - Removes duplicate and trailing slashes
/// - Resolves `.` and `..`
/// - Makes the path absolute
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(SEPARATOR) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Split a normalized path into directory and last component
pub fn split(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(0) => ("/", &trimmed[1..]),
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None if trimmed.is_empty() => ("/", ""),
        None => ("/", trimmed),
    }
}

/// Check if a path component is valid
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(SEPARATOR)
        && !name.contains('\0')
        && name.len() <= super::MAX_FILENAME
}
