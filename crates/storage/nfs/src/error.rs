//! NFS client error types

use core::fmt;

use bootfs_driver_traits::DriverError;

use crate::proto::NfsStat;

/// Result type for client operations
pub type Result<T> = core::result::Result<T, Error>;

/// Malformed XDR data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XdrError {
    /// Reply ended inside an item
    PrematureEnd { needed: usize, remaining: usize },
    /// Variable-length item longer than the protocol allows
    TooLong { len: u32, max: u32 },
    /// Boolean discriminant other than 0 or 1
    BadBool(u32),
}

/// Reply rejected at the RPC layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcError {
    /// Transaction id belongs to neither the current nor the previous call
    XidMismatch { expected: u32, found: u32 },
    /// Message type is not REPLY
    NotAReply(u32),
    /// Server denied the call (RPC version or authentication)
    Denied(u32),
    /// Call accepted but not executed (program unavailable, bad procedure, ...)
    NotAccepted(u32),
}

/// Client operation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Server answered with a non-OK status
    Status(NfsStat),
    /// MOUNT service refused the export
    MountRefused(u32),
    Xdr(XdrError),
    Rpc(RpcError),
    /// No reply after all retransmissions
    TimedOut,
    /// Socket failure
    Network(DriverError),
    /// Mount source or option string could not be parsed
    BadOptions,
    /// Path component longer than 255 bytes
    NameTooLong,
    /// Portmapper does not know the program
    NoPort(u32),
    /// Server returned zero bytes short of end of file
    ShortRead,
}

impl From<XdrError> for Error {
    fn from(e: XdrError) -> Self {
        Error::Xdr(e)
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Error::Rpc(e)
    }
}

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        Error::Network(e)
    }
}

impl From<NfsStat> for Error {
    fn from(s: NfsStat) -> Self {
        Error::Status(s)
    }
}

impl fmt::Display for XdrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XdrError::PrematureEnd { needed, remaining } => {
                write!(f, "premature end of packet ({} bytes needed, {} left)", needed, remaining)
            }
            XdrError::TooLong { len, max } => write!(f, "item of {} bytes exceeds {}", len, max),
            XdrError::BadBool(v) => write!(f, "bad boolean {}", v),
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::XidMismatch { expected, found } => {
                write!(f, "reply xid {:#x}, expected {:#x}", found, expected)
            }
            RpcError::NotAReply(t) => write!(f, "message type {} is not a reply", t),
            RpcError::Denied(s) => write!(f, "call denied ({})", s),
            RpcError::NotAccepted(s) => write!(f, "call not accepted ({})", s),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Status(s) => write!(f, "server error: {}", s),
            Error::MountRefused(s) => write!(f, "mount refused ({})", s),
            Error::Xdr(e) => write!(f, "xdr: {}", e),
            Error::Rpc(e) => write!(f, "rpc: {}", e),
            Error::TimedOut => f.write_str("no reply from server"),
            Error::Network(e) => write!(f, "network: {}", e),
            Error::BadOptions => f.write_str("bad mount source or options"),
            Error::NameTooLong => f.write_str("file name too long"),
            Error::NoPort(prog) => write!(f, "program {} not registered with portmap", prog),
            Error::ShortRead => f.write_str("empty read before end of file"),
        }
    }
}
