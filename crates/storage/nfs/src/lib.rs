//! bootfs-nfs - read-only NFSv3 client
//!
//! Boots kernels straight off an NFS export. Everything runs over one UDP
//! socket supplied by the network stack:
//!
//! ```text
//! ┌──────────────┐  GETPORT   ┌──────────┐
//! │              │ ─────────► │ portmap  │ :111
//! │              │  MNT/UMNT  ├──────────┤
//! │  NfsClient   │ ─────────► │ mountd   │ :mountport
//! │              │  LOOKUP,   ├──────────┤
//! │              │  READ, ... │ nfsd     │ :port
//! └──────┬───────┘ ─────────► └──────────┘
//!        │ RpcClient (xid, retransmit)
//!        ▼
//!    UdpSocket
//! ```
//!
//! | Module     | Role                                              |
//! |------------|---------------------------------------------------|
//! | `xdr`      | Big-endian encoder and bounds-checked decoder     |
//! | `rpc`      | Call framing, credentials, reply checks, retries  |
//! | `proto`    | Program numbers, `nfsstat3`, `fattr3`             |
//! | `options`  | `<server>:<path>` and mount option parsing        |
//! | `client`   | MOUNT and NFS procedures, file and dir streams    |
//!
//! Only the read side of the protocol is implemented.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod xdr;
pub mod proto;
pub mod rpc;
pub mod options;
pub mod client;

#[cfg(feature = "vfs")]
pub mod vfs_adapter;


pub use error::{Error, Result, RpcError, XdrError};
pub use proto::{Fattr3, FileType3, NfsStat};
pub use options::NfsOptions;
pub use client::{DirStream, Entry3, FileHandle, NfsClient, NfsFile, ReadReply};
pub use rpc::{Program, RpcClient};

#[cfg(feature = "vfs")]
pub use vfs_adapter::NfsFilesystem;
