//! Collaborator Traits for bootfs
//!
//! The filesystem drivers never talk to hardware directly. They consume
//! the traits defined here, which are implemented by the surrounding
//! bootloader:
//!
//! - [`VolumeDevice`]: logical erase block (LEB) reads from a UBI volume
//! - [`UdpSocket`]: a bound UDP endpoint with a millisecond clock
//!
//! Both are synchronous. A read either completes or reports a
//! [`DriverError`]; retry policy belongs to the caller.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod volume;
pub mod socket;

pub use volume::*;
pub use socket::*;

/// Common error type for driver operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// Device not found or not responding
    DeviceNotFound,
    /// Operation timed out
    Timeout,
    /// Invalid parameter (e.g. read outside the volume)
    InvalidParameter,
    /// Device busy
    Busy,
    /// I/O error (e.g. uncorrectable ECC)
    IoError,
    /// Not supported by this device
    NotSupported,
    /// Buffer too small
    BufferTooSmall,
    /// Device-specific error
    DeviceError(u32),
}

impl core::fmt::Display for DriverError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DriverError::DeviceNotFound => f.write_str("device not found"),
            DriverError::Timeout => f.write_str("timed out"),
            DriverError::InvalidParameter => f.write_str("invalid parameter"),
            DriverError::Busy => f.write_str("device busy"),
            DriverError::IoError => f.write_str("I/O error"),
            DriverError::NotSupported => f.write_str("not supported"),
            DriverError::BufferTooSmall => f.write_str("buffer too small"),
            DriverError::DeviceError(code) => write!(f, "device error {}", code),
        }
    }
}

pub type DriverResult<T> = Result<T, DriverError>;
