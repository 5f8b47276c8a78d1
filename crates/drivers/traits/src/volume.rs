//! UBI Volume Trait
//!
//! Implemented by the UBI layer (or by an image file on a host).
//! Used by flash filesystem drivers (UBIFS).
//!
//! The volume is addressed in logical erase blocks. Bad-block remapping
//! and wear leveling happen below this interface.

use alloc::vec;
use alloc::vec::Vec;

use crate::{DriverError, DriverResult};

/// Volume geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeGeometry {
    /// Logical erase block size in bytes
    pub leb_size: u32,
    /// Number of logical erase blocks in the volume
    pub leb_count: u32,
    /// Minimal I/O unit size (NAND page size, 1 for NOR)
    pub min_io_size: u32,
}

/// Read-only logical erase block access
pub trait VolumeDevice {
    /// Get volume geometry
    fn geometry(&self) -> VolumeGeometry;

    /// Read bytes from a logical erase block
    ///
    /// # Arguments
    /// * `leb` - Logical erase block number
    /// * `offset` - Byte offset inside the LEB
    /// * `buffer` - Buffer to read into (size determines read length)
    ///
    /// Unmapped LEBs read as all `0xFF`, like erased flash.
    fn read_leb(&mut self, leb: u32, offset: u32, buffer: &mut [u8]) -> DriverResult<()>;
}

/// Convenience methods for VolumeDevice
pub trait VolumeDeviceExt: VolumeDevice {
    /// Get LEB size
    fn leb_size(&self) -> u32 {
        self.geometry().leb_size
    }

    /// Get LEB count
    fn leb_count(&self) -> u32 {
        self.geometry().leb_count
    }

    /// Get total volume size in bytes
    fn size_bytes(&self) -> u64 {
        self.geometry().leb_count as u64 * self.geometry().leb_size as u64
    }

    /// Read `len` bytes into a freshly allocated buffer
    ///
    /// Bounds are checked against the geometry before the device is touched.
    fn read_leb_vec(&mut self, leb: u32, offset: u32, len: u32) -> DriverResult<Vec<u8>> {
        let geo = self.geometry();
        if leb >= geo.leb_count {
            return Err(DriverError::InvalidParameter);
        }
        let end = offset.checked_add(len).ok_or(DriverError::InvalidParameter)?;
        if end > geo.leb_size {
            return Err(DriverError::InvalidParameter);
        }
        let mut buf = vec![0u8; len as usize];
        self.read_leb(leb, offset, &mut buf)?;
        Ok(buf)
    }
}

// Auto-implement VolumeDeviceExt for all VolumeDevice implementors
impl<T: VolumeDevice + ?Sized> VolumeDeviceExt for T {}

/// A volume held entirely in memory
///
/// Useful for ramdisk images loaded by an earlier boot stage, and for tests.
#[derive(Debug, Clone)]
pub struct RamVolume {
    geometry: VolumeGeometry,
    data: Vec<u8>,
}

impl RamVolume {
    /// Wrap an image. The image length is rounded down to whole LEBs.
    pub fn new(data: Vec<u8>, leb_size: u32, min_io_size: u32) -> Self {
        let leb_count = if leb_size == 0 {
            0
        } else {
            (data.len() / leb_size as usize) as u32
        };
        RamVolume {
            geometry: VolumeGeometry {
                leb_size,
                leb_count,
                min_io_size,
            },
            data,
        }
    }

    /// Raw image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw image bytes (for corruption tests)
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl VolumeDevice for RamVolume {
    fn geometry(&self) -> VolumeGeometry {
        self.geometry
    }

    fn read_leb(&mut self, leb: u32, offset: u32, buffer: &mut [u8]) -> DriverResult<()> {
        if leb >= self.geometry.leb_count {
            return Err(DriverError::InvalidParameter);
        }
        let end = offset as usize + buffer.len();
        if end > self.geometry.leb_size as usize {
            return Err(DriverError::InvalidParameter);
        }
        let base = leb as usize * self.geometry.leb_size as usize;
        buffer.copy_from_slice(&self.data[base + offset as usize..base + end]);
        Ok(())
    }
}
