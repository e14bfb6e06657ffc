//! Read/write FAT32 driver for a 512-byte block device.
//!
//! The volume is expected at LBA 0 (raw image, no partition table) and only
//! the root directory is addressable. Short (8.3) names only; long-name
//! entries written by other implementations are skipped, never produced.
//!
//! All disk I/O goes through [`BlockDev`], which keeps the crate `no_std`
//! and lets the tests run it against an in-memory image.

// Host builds for `cargo test`, no_std everywhere else.
#![cfg_attr(not(test), no_std)]

pub mod block;
mod bytes;
pub mod dir;
pub mod error;
pub mod fat;
pub mod file;
pub mod fs;
pub mod handle;
pub mod volume;

#[cfg(test)]
mod testing;

pub use block::{BlockDev, IoError, SECTOR_SIZE};
pub use dir::{Attributes, DirEntry, DirHandle, EntryLocation, ShortName, compare_names, convert_name};
pub use error::FsError;
pub use file::FileHandle;
pub use fs::{Fat32, VolumeInfo};
pub use handle::{DirId, FileId};
pub use volume::{BootSector, Volume, VolumeDescriptor};
