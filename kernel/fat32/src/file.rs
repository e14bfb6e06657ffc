//! Open-file state and the byte-stream operations on it.
//!
//! The cursor is lazy: `current_cluster` is the chain member that starts at
//! byte `cluster_start`, and it is only moved forward when a transfer needs
//! the cluster holding `position`. That keeps a cursor parked at the exact
//! end of a full chain valid without allocating anything.

use crate::block::{BlockDev, SECTOR_SIZE};
use crate::dir::{Attributes, DirEntry, ShortName};
use crate::error::FsError;
use crate::volume::Volume;

/// Everything an open file needs, copied out of its directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub(crate) name: ShortName,
    pub(crate) dir_cluster: u32,
    pub(crate) first_cluster: u32,
    pub(crate) current_cluster: u32,
    pub(crate) cluster_start: u32,
    pub(crate) position: u32,
    pub(crate) size: u32,
    pub(crate) attributes: Attributes,
    pub(crate) dirty: bool,
}

impl FileHandle {
    pub(crate) fn from_entry(entry: &DirEntry, dir_cluster: u32) -> Self {
        Self {
            name: entry.name,
            dir_cluster,
            first_cluster: entry.first_cluster,
            current_cluster: entry.first_cluster,
            cluster_start: 0,
            position: 0,
            size: entry.size,
            attributes: entry.attributes,
            dirty: false,
        }
    }

    pub fn name(&self) -> ShortName { self.name }
    pub fn size(&self) -> u32 { self.size }
    pub fn position(&self) -> u32 { self.position }
    pub fn first_cluster(&self) -> u32 { self.first_cluster }
    pub fn attributes(&self) -> Attributes { self.attributes }

    /// True when size or first cluster changed since the entry was last written.
    pub fn is_dirty(&self) -> bool { self.dirty }

    fn rewind_cursor(&mut self) {
        self.current_cluster = self.first_cluster;
        self.cluster_start = 0;
    }
}

impl<D: BlockDev> Volume<D> {
    /// Move the cursor onto the cluster that holds `file.position`.
    ///
    /// With `allocate` the chain is created or extended as needed. Without
    /// it, `Ok(false)` means the chain ends before `position`.
    fn seat_cursor(&mut self, file: &mut FileHandle, allocate: bool) -> Result<bool, FsError> {
        let bpc = self.geometry()?.bytes_per_cluster;

        if file.first_cluster == 0 {
            if !allocate {
                return Ok(false);
            }
            let cluster = self.allocate_cluster(None)?;
            file.first_cluster = cluster;
            file.current_cluster = cluster;
            file.cluster_start = 0;
            file.dirty = true;
        }

        while file.position - file.cluster_start >= bpc {
            let next = match self.follow(file.current_cluster)? {
                Some(next) => next,
                None if allocate => self.allocate_cluster(Some(file.current_cluster))?,
                None => return Ok(false),
            };
            file.current_cluster = next;
            file.cluster_start += bpc;
        }
        Ok(true)
    }

    /// Sector and byte offset of `file.position` inside the seated cluster.
    fn cursor_sector(&self, file: &FileHandle) -> Result<(u32, usize), FsError> {
        let in_cluster = file.position - file.cluster_start;
        let lba = self.cluster_to_sector(file.current_cluster)? + in_cluster / SECTOR_SIZE as u32;
        Ok((lba, in_cluster as usize % SECTOR_SIZE))
    }

    /// Copy up to `buf.len()` bytes from the cursor, never past the file size.
    pub fn read_file(&mut self, file: &mut FileHandle, buf: &mut [u8]) -> Result<usize, FsError> {
        let remaining = file.size.saturating_sub(file.position) as usize;
        let want = buf.len().min(remaining);
        let mut done = 0;

        while done < want {
            if !self.seat_cursor(file, false)? {
                log::warn!(
                    "fat32::read: {} claims {} bytes but its chain ends before byte {}",
                    file.name, file.size, file.position,
                );
                break;
            }
            let (lba, off) = self.cursor_sector(file)?;
            let n = (want - done).min(SECTOR_SIZE - off);
            self.read_sector(lba)?;
            buf[done..done + n].copy_from_slice(&self.buf[off..off + n]);
            done += n;
            file.position += n as u32;
        }
        Ok(done)
    }

    /// Write `data` at the cursor, growing the chain as needed.
    ///
    /// Running out of clusters after some bytes have landed returns the short
    /// count; running out before the first byte is `OutOfSpace`.
    pub fn write_file(&mut self, file: &mut FileHandle, data: &[u8]) -> Result<usize, FsError> {
        if file.attributes.contains(Attributes::READ_ONLY) {
            return Err(FsError::ReadOnly);
        }
        // Size is a 32-bit field.
        let want = data.len().min((u32::MAX - file.position) as usize);
        let mut done = 0;

        while done < want {
            match self.seat_cursor(file, true) {
                Ok(_) => {}
                Err(FsError::OutOfSpace) if done > 0 => {
                    log::warn!("fat32::write: volume full, {} wrote {done} of {} bytes", file.name, data.len());
                    break;
                }
                Err(err) => return Err(err),
            }
            let (lba, off) = self.cursor_sector(file)?;
            let n = (want - done).min(SECTOR_SIZE - off);
            if off != 0 || n < SECTOR_SIZE {
                self.read_sector(lba)?;
            }
            self.buf[off..off + n].copy_from_slice(&data[done..done + n]);
            self.write_sector(lba)?;

            done += n;
            file.position += n as u32;
            if file.position > file.size {
                file.size = file.position;
            }
            file.dirty = true;
        }
        Ok(done)
    }

    /// Place the cursor at `position`, clamped to the file size. Returns where it landed.
    pub fn seek_file(&mut self, file: &mut FileHandle, position: u32) -> Result<u32, FsError> {
        file.position = position.min(file.size);
        file.rewind_cursor();
        // Walk eagerly so a broken chain shows up here rather than on the next read.
        if !self.seat_cursor(file, false)? && file.position < file.size {
            log::warn!(
                "fat32::seek: {} claims {} bytes but its chain ends before byte {}",
                file.name, file.size, file.position,
            );
        }
        Ok(file.position)
    }

    /// Drop everything after the first cluster and record size 0 on disk.
    pub fn truncate_file(&mut self, file: &mut FileHandle) -> Result<(), FsError> {
        if file.attributes.contains(Attributes::READ_ONLY) {
            return Err(FsError::ReadOnly);
        }
        if file.first_cluster != 0 {
            self.truncate_chain(file.first_cluster)?;
        }
        file.size = 0;
        file.position = 0;
        file.rewind_cursor();
        file.dirty = true;
        self.update_entry(file)?;
        file.dirty = false;
        Ok(())
    }
}
