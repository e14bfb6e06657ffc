//! Raw image files as a block device.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use fat32::{BlockDev, IoError, SECTOR_SIZE};

pub struct ImageDisk {
    file: File,
    sectors: u32,
}

impl ImageDisk {
    /// Open an existing image. Without `writable` every sector write fails.
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .with_context(|| format!("opening image {}", path.display()))?;
        let len = file.metadata()?.len();
        let sectors = u32::try_from(len / SECTOR_SIZE as u64)
            .context("image is larger than 32-bit sector addressing allows")?;
        log::debug!("image: {} ({sectors} sectors{})", path.display(), if writable { "" } else { ", read-only" });
        Ok(Self { file, sectors })
    }

    pub fn sectors(&self) -> u32 {
        self.sectors
    }

    fn seek_to(&mut self, lba: u32) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(lba as u64 * SECTOR_SIZE as u64)).map(drop)
    }
}

impl BlockDev for ImageDisk {
    fn read(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), IoError> {
        if lba >= self.sectors {
            return Err(IoError { lba });
        }
        self.seek_to(lba)
            .and_then(|()| self.file.read_exact(buf))
            .map_err(|err| {
                log::debug!("image: read at lba {lba} failed: {err}");
                IoError { lba }
            })
    }

    fn write(&mut self, lba: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), IoError> {
        if lba >= self.sectors {
            return Err(IoError { lba });
        }
        self.seek_to(lba)
            .and_then(|()| self.file.write_all(buf))
            .map_err(|err| {
                log::debug!("image: write at lba {lba} failed: {err}");
                IoError { lba }
            })
    }
}
