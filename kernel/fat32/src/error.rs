use core::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::block::IoError;

/// Every way a filesystem call can fail.
///
/// Field-less and `repr(u8)` so the code can cross the shell boundary as a
/// plain status byte. `DeviceIo` and `CorruptVolume` form the device class:
/// they abort the current operation and are never repaired here.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum FsError {
    NotMounted = 1,
    InvalidBootSector,
    NotFat32,
    DeviceIo,
    CorruptVolume,
    FileNotFound,
    NoFreeHandles,
    NotOpen,
    ReadOnly,
    OutOfSpace,
    InvalidName,
    IsDirectory,
    UnsupportedPath,
}

impl FsError {
    /// Errors that mean the medium or its metadata cannot be trusted.
    pub fn is_device_error(self) -> bool {
        matches!(self, FsError::DeviceIo | FsError::CorruptVolume)
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::NotMounted => "no volume mounted",
            FsError::InvalidBootSector => "invalid boot sector",
            FsError::NotFat32 => "not a FAT32 volume",
            FsError::DeviceIo => "device I/O error",
            FsError::CorruptVolume => "inconsistent on-disk metadata",
            FsError::FileNotFound => "file not found",
            FsError::NoFreeHandles => "no free handles",
            FsError::NotOpen => "handle is not open",
            FsError::ReadOnly => "file is read-only",
            FsError::OutOfSpace => "no free cluster",
            FsError::InvalidName => "not a valid 8.3 name",
            FsError::IsDirectory => "is a directory",
            FsError::UnsupportedPath => "only the root directory is supported",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for FsError {}

impl From<IoError> for FsError {
    fn from(err: IoError) -> Self {
        log::warn!("fat32: {err}");
        FsError::DeviceIo
    }
}
