//! Mount source and option parsing
//!
//! The source names the export as `<server>:<path>`; the server must be a
//! dotted-quad IPv4 address since the bootloader has no resolver. Options
//! come as a comma separated list:
//!
//! | Option        | Meaning                                   |
//! |---------------|-------------------------------------------|
//! | `mountport=N` | mountd port, skips the portmap lookup     |
//! | `port=N`      | nfsd port, skips the portmap lookup       |
//! | `timeout=MS`  | per-attempt reply deadline (default 2000) |
//! | `retries=N`   | attempts per call (default 5)             |

use alloc::string::String;

use bootfs_driver_traits::Ipv4Addr;
use log::warn;

use crate::error::{Error, Result};
use crate::proto::MNTPATHLEN;

/// Per-attempt reply deadline in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;
/// Transmissions per call before giving up
pub const DEFAULT_RETRIES: u32 = 5;

/// Parsed mount configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfsOptions {
    pub server: Ipv4Addr,
    /// Exported directory on the server
    pub path: String,
    /// mountd port given by the user
    pub mount_port: Option<u16>,
    /// nfsd port given by the user
    pub nfs_port: Option<u16>,
    pub timeout_ms: u64,
    pub retries: u32,
}

/// Parse a dotted-quad IPv4 address
pub fn parse_ipv4(s: &str) -> Option<Ipv4Addr> {
    let mut addr = [0u8; 4];
    let mut parts = s.split('.');
    for byte in addr.iter_mut() {
        *byte = parts.next()?.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(addr)
}

fn parse_port(value: &str) -> Result<Option<u16>> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::BadOptions),
        Ok(port) => Ok(Some(port)),
    }
}

impl NfsOptions {
    /// Options for `server:path` with defaults
    pub fn new(server: Ipv4Addr, path: &str) -> Self {
        NfsOptions {
            server,
            path: String::from(path),
            mount_port: None,
            nfs_port: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
        }
    }

    /// Parse a mount source and option string
    pub fn parse(source: &str, options: &str) -> Result<Self> {
        let (server, path) = source.split_once(':').ok_or(Error::BadOptions)?;
        let server = parse_ipv4(server).ok_or(Error::BadOptions)?;
        if !path.starts_with('/') || path.len() > MNTPATHLEN {
            return Err(Error::BadOptions);
        }

        let mut opts = NfsOptions::new(server, path);
        for opt in options.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match opt.split_once('=') {
                Some(("mountport", v)) => opts.mount_port = parse_port(v)?,
                Some(("port", v)) => opts.nfs_port = parse_port(v)?,
                Some(("timeout", v)) => {
                    opts.timeout_ms = v.parse().map_err(|_| Error::BadOptions)?;
                }
                Some(("retries", v)) => match v.parse() {
                    Ok(n) if n > 0 => opts.retries = n,
                    _ => return Err(Error::BadOptions),
                },
                _ => warn!("nfs: ignoring unknown option '{}'", opt),
            }
        }
        Ok(opts)
    }
}
