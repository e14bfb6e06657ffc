//! Fixtures shared by the unit tests: in-memory disks and `fatfs`-built images.

use std::io::{Cursor, Read, Write};
use std::string::String;
use std::vec::Vec;

use crate::block::{BlockDev, IoError, SECTOR_SIZE};
use crate::volume::{BootSector, Volume, VolumeDescriptor};

// ── Mock block devices ───────────────────────────────────────────────────────

pub struct MemDisk(pub Vec<u8>);

impl BlockDev for MemDisk {
    fn read(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), IoError> {
        let off = lba as usize * SECTOR_SIZE;
        if off + SECTOR_SIZE > self.0.len() { return Err(IoError { lba }); }
        buf.copy_from_slice(&self.0[off..off + SECTOR_SIZE]);
        Ok(())
    }

    fn write(&mut self, lba: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), IoError> {
        let off = lba as usize * SECTOR_SIZE;
        if off + SECTOR_SIZE > self.0.len() { return Err(IoError { lba }); }
        self.0[off..off + SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Only the n-th write (1-based, counted from arming) fails.
    NthWrite(usize),
    AllWrites,
    AllReads,
}

/// `MemDisk` that fails transfers on demand.
pub struct FaultyDisk {
    pub disk: MemDisk,
    fault: Fault,
    writes: usize,
}

impl FaultyDisk {
    pub fn new(disk: MemDisk, fault: Fault) -> Self {
        Self { disk, fault, writes: 0 }
    }

    pub fn failing_write(disk: MemDisk, nth: usize) -> Self {
        Self::new(disk, Fault::NthWrite(nth))
    }

    pub fn arm(&mut self, fault: Fault) {
        self.fault = fault;
        self.writes = 0;
    }
}

impl BlockDev for FaultyDisk {
    fn read(&mut self, lba: u32, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), IoError> {
        if self.fault == Fault::AllReads { return Err(IoError { lba }); }
        self.disk.read(lba, buf)
    }

    fn write(&mut self, lba: u32, buf: &[u8; SECTOR_SIZE]) -> Result<(), IoError> {
        self.writes += 1;
        match self.fault {
            Fault::AllWrites => return Err(IoError { lba }),
            Fault::NthWrite(n) if n == self.writes => return Err(IoError { lba }),
            _ => {}
        }
        self.disk.write(lba, buf)
    }
}

// ── fatfs-built images ───────────────────────────────────────────────────────

/// FAT32 image of `size` bytes formatted by `fatfs`.
///
/// `fatfs` only picks FAT32 when there are at least 65 525 clusters; with its
/// 512-byte clusters for small volumes that means roughly 34 MB minimum.
pub fn format_disk(size: usize) -> MemDisk {
    let mut cursor = Cursor::new(vec![0u8; size]);
    fatfs::format_volume(
        &mut cursor,
        fatfs::FormatVolumeOptions::new().fat_type(fatfs::FatType::Fat32),
    ).expect("format_volume failed");
    MemDisk(cursor.into_inner())
}

pub fn make_disk() -> MemDisk {
    format_disk(40 * 1024 * 1024)
}

/// Write each `(name, content)` into the root directory through `fatfs`.
pub fn populate(disk: &mut MemDisk, files: &[(&str, &[u8])]) {
    let mut cursor = Cursor::new(&mut disk.0);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new())
        .expect("FileSystem::new failed");
    for (name, content) in files {
        let mut f = fs.root_dir().create_file(name).expect("create_file failed");
        f.truncate().unwrap();
        f.write_all(content).unwrap();
    }
}

pub fn disk_with_files(files: &[(&str, &[u8])]) -> MemDisk {
    let mut disk = make_disk();
    populate(&mut disk, files);
    disk
}

pub fn add_dir(disk: &mut MemDisk, name: &str) {
    let mut cursor = Cursor::new(&mut disk.0);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).unwrap();
    fs.root_dir().create_dir(name).unwrap();
}

pub fn read_via_fatfs(disk: &mut MemDisk, name: &str) -> Vec<u8> {
    let mut cursor = Cursor::new(&mut disk.0);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).unwrap();
    let mut f = fs.root_dir().open_file(name).unwrap();
    let mut buf = Vec::new();
    f.read_to_end(&mut buf).unwrap();
    buf
}

/// `(short name, size, is_dir)` for every root entry `fatfs` reports.
pub fn list_via_fatfs(disk: &mut MemDisk) -> Vec<(String, u64, bool)> {
    let mut cursor = Cursor::new(&mut disk.0);
    let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new()).unwrap();
    fs.root_dir()
        .iter()
        .map(|e| e.unwrap())
        .map(|e| (e.short_file_name(), e.len(), e.is_dir()))
        .collect()
}

// ── Raw metadata access ──────────────────────────────────────────────────────

pub fn descriptor_of(disk: &MemDisk) -> VolumeDescriptor {
    let mut sec = [0u8; SECTOR_SIZE];
    sec.copy_from_slice(&disk.0[..SECTOR_SIZE]);
    VolumeDescriptor::from_boot_sector(&BootSector::parse(&sec).unwrap()).unwrap()
}

fn fat_entry_offset(desc: &VolumeDescriptor, copy: u32, cluster: u32) -> usize {
    let fat = desc.fat_start_sector + copy * desc.fat_size;
    fat as usize * SECTOR_SIZE + cluster as usize * 4
}

/// FAT entry exactly as stored, reserved nibble included.
pub fn raw_fat_entry(disk: &MemDisk, desc: &VolumeDescriptor, copy: u32, cluster: u32) -> u32 {
    let off = fat_entry_offset(desc, copy, cluster);
    u32::from_le_bytes(disk.0[off..off + 4].try_into().unwrap())
}

pub fn set_raw_fat_entry(disk: &mut MemDisk, desc: &VolumeDescriptor, copy: u32, cluster: u32, value: u32) {
    let off = fat_entry_offset(desc, copy, cluster);
    disk.0[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

/// Mark every free cluster as a one-cluster chain, except the lowest `keep_free`.
pub fn fill_fat(disk: &mut MemDisk, keep_free: u32) {
    let desc = descriptor_of(disk);
    let mut kept = 0;
    for cluster in 2..desc.total_clusters + 2 {
        if raw_fat_entry(disk, &desc, 0, cluster) & 0x0FFF_FFFF != 0 { continue; }
        if kept < keep_free {
            kept += 1;
            continue;
        }
        for copy in 0..desc.fat_count {
            set_raw_fat_entry(disk, &desc, copy, cluster, 0x0FFF_FFFF);
        }
    }
}

/// Byte offset of `name`'s root directory slot.
pub fn entry_offset(disk: &mut MemDisk, name: &str) -> usize {
    let mut vol = Volume::new(&mut *disk);
    let root = vol.mount().unwrap().root_cluster;
    let (_, loc) = vol.find_entry(root, name).unwrap();
    loc.lba as usize * SECTOR_SIZE + loc.slot * 32
}

pub fn set_attributes(disk: &mut MemDisk, name: &str, attrs: u8) {
    let off = entry_offset(disk, name);
    disk.0[off + 11] = attrs;
}
