//! bootfs - boot filesystems for the bootloader shell
//!
//! Ties the pieces together: drivers register a probe under their
//! filesystem type, `mount -t <type> <source> <path>` runs the probe and
//! puts the result in the VFS mount table, and the shell commands read
//! through the VFS.
//!
//! ```text
//!   shell ──► commands ──► Vfs ──┬──► UbifsFilesystem ──► VolumeDevice
//!                          ▲     └──► NfsFilesystem ────► UdpConnection ──► NetworkStack
//!   mount ──► FsDriverRegistry
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod registry;
pub mod commands;

pub use registry::{nfs_probe, ubifs_probe, udp_connector, FsDriverRegistry, Probe, UbiSource};

pub use bootfs_driver_traits as drivers;
pub use bootfs_net as net;
pub use bootfs_nfs as nfs;
pub use bootfs_ubifs as ubifs;
pub use bootfs_vfs as vfs;
