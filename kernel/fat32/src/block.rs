//! Block I/O boundary: whole 512-byte sectors addressed by LBA.

use core::fmt;

/// Size of one device sector. The filesystem never transfers less.
pub const SECTOR_SIZE: usize = 512;

/// A sector transfer failed. The device decides about retries, not us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoError {
    pub lba: u32,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sector transfer failed at lba {}", self.lba)
    }
}

impl core::error::Error for IoError {}

pub trait BlockDev {
    fn read(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), IoError>;
    fn write(&mut self, lba: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), IoError>;
}

impl<T: BlockDev + ?Sized> BlockDev for &mut T {
    fn read(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), IoError> {
        (**self).read(lba, buf)
    }

    fn write(&mut self, lba: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), IoError> {
        (**self).write(lba, buf)
    }
}
