//! Boot sector codec, derived geometry and the mounted-volume context.
//!
//! # Boot sector layout (512 bytes, little-endian)
//! - 0..3     jump instruction
//! - 3..11    OEM name
//! - 11..36   BIOS parameter block
//! - 36..90   FAT32 extended block
//! - 90..510  boot code
//! - 510..512 signature 0x55 0xAA

use crate::block::{BlockDev, SECTOR_SIZE};
use crate::bytes::{get_array, get_u16, get_u32, put_u16, put_u32};
use crate::error::FsError;

/// FAT32 entries per FAT sector.
pub(crate) const FAT_ENTRIES_PER_SECTOR: u32 = (SECTOR_SIZE / 4) as u32;

const BOOT_SIGNATURE: u16 = 0xAA55;

/// Every field of the boot sector except the boot code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootSector {
    pub jump: [u8; 3],
    pub oem_name: [u8; 8],
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub root_entry_count: u16,
    pub total_sectors_16: u16,
    pub media: u8,
    pub fat_size_16: u16,
    pub sectors_per_track: u16,
    pub num_heads: u16,
    pub hidden_sectors: u32,
    pub total_sectors_32: u32,
    // FAT32 extension
    pub fat_size_32: u32,
    pub ext_flags: u16,
    pub fs_version: u16,
    pub root_cluster: u32,
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,
    pub reserved: [u8; 12],
    pub drive_number: u8,
    pub reserved1: u8,
    pub boot_signature: u8,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub fs_type: [u8; 8],
    pub signature: u16,
}

impl BootSector {
    /// Decode sector 0. Only the trailing signature is checked here.
    pub fn parse(sec: &[u8; SECTOR_SIZE]) -> Result<Self, FsError> {
        let bs = Self {
            jump: get_array(sec, 0),
            oem_name: get_array(sec, 3),
            bytes_per_sector: get_u16(sec, 11),
            sectors_per_cluster: sec[13],
            reserved_sectors: get_u16(sec, 14),
            num_fats: sec[16],
            root_entry_count: get_u16(sec, 17),
            total_sectors_16: get_u16(sec, 19),
            media: sec[21],
            fat_size_16: get_u16(sec, 22),
            sectors_per_track: get_u16(sec, 24),
            num_heads: get_u16(sec, 26),
            hidden_sectors: get_u32(sec, 28),
            total_sectors_32: get_u32(sec, 32),
            fat_size_32: get_u32(sec, 36),
            ext_flags: get_u16(sec, 40),
            fs_version: get_u16(sec, 42),
            root_cluster: get_u32(sec, 44),
            fs_info_sector: get_u16(sec, 48),
            backup_boot_sector: get_u16(sec, 50),
            reserved: get_array(sec, 52),
            drive_number: sec[64],
            reserved1: sec[65],
            boot_signature: sec[66],
            volume_id: get_u32(sec, 67),
            volume_label: get_array(sec, 71),
            fs_type: get_array(sec, 82),
            signature: get_u16(sec, 510),
        };
        if bs.signature != BOOT_SIGNATURE {
            return Err(FsError::InvalidBootSector);
        }
        Ok(bs)
    }

    /// Encode every field back into `sec`. Boot code bytes are left as they are.
    pub fn write_to(&self, sec: &mut [u8; SECTOR_SIZE]) {
        sec[0..3].copy_from_slice(&self.jump);
        sec[3..11].copy_from_slice(&self.oem_name);
        put_u16(sec, 11, self.bytes_per_sector);
        sec[13] = self.sectors_per_cluster;
        put_u16(sec, 14, self.reserved_sectors);
        sec[16] = self.num_fats;
        put_u16(sec, 17, self.root_entry_count);
        put_u16(sec, 19, self.total_sectors_16);
        sec[21] = self.media;
        put_u16(sec, 22, self.fat_size_16);
        put_u16(sec, 24, self.sectors_per_track);
        put_u16(sec, 26, self.num_heads);
        put_u32(sec, 28, self.hidden_sectors);
        put_u32(sec, 32, self.total_sectors_32);
        put_u32(sec, 36, self.fat_size_32);
        put_u16(sec, 40, self.ext_flags);
        put_u16(sec, 42, self.fs_version);
        put_u32(sec, 44, self.root_cluster);
        put_u16(sec, 48, self.fs_info_sector);
        put_u16(sec, 50, self.backup_boot_sector);
        sec[52..64].copy_from_slice(&self.reserved);
        sec[64] = self.drive_number;
        sec[65] = self.reserved1;
        sec[66] = self.boot_signature;
        put_u32(sec, 67, self.volume_id);
        sec[71..82].copy_from_slice(&self.volume_label);
        sec[82..90].copy_from_slice(&self.fs_type);
        put_u16(sec, 510, self.signature);
    }

    /// FAT12/16 media carry a 16-bit FAT size, a fixed root directory or a
    /// 16-bit sector count. FAT32 leaves all three zero.
    pub fn is_fat32(&self) -> bool {
        self.fat_size_16 == 0 && self.root_entry_count == 0 && self.total_sectors_16 == 0
    }
}

/// Geometry derived once at mount time.
///
/// `bytes_per_cluster = sectors_per_cluster * bytes_per_sector` and
/// `data_start_sector = fat_start_sector + fat_count * fat_size` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub fat_count: u32,
    pub fat_size: u32,
    pub root_cluster: u32,
    pub fat_start_sector: u32,
    pub data_start_sector: u32,
    pub bytes_per_cluster: u32,
    pub total_clusters: u32,
    pub fs_info_sector: u16,
    pub backup_boot_sector: u16,
    pub volume_id: u32,
    pub volume_label: [u8; 11],
    pub oem_name: [u8; 8],
}

impl VolumeDescriptor {
    pub fn from_boot_sector(bs: &BootSector) -> Result<Self, FsError> {
        if !bs.is_fat32() {
            return Err(FsError::NotFat32);
        }

        let bytes_per_sector = bs.bytes_per_sector as u32;
        let sectors_per_cluster = bs.sectors_per_cluster as u32;
        let fat_count = bs.num_fats as u32;
        let fat_size = bs.fat_size_32;

        // The device moves 512-byte units; anything else would need sub-sector addressing.
        if bytes_per_sector != SECTOR_SIZE as u32 {
            log::warn!("fat32::mount: unsupported sector size {bytes_per_sector}");
            return Err(FsError::InvalidBootSector);
        }
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(FsError::InvalidBootSector);
        }
        if fat_count == 0 || fat_size == 0 || bs.root_cluster < 2 {
            return Err(FsError::InvalidBootSector);
        }

        let fat_start_sector = bs.reserved_sectors as u32;
        let data_start_sector = fat_count
            .checked_mul(fat_size)
            .and_then(|fats| fats.checked_add(fat_start_sector))
            .ok_or(FsError::InvalidBootSector)?;
        let data_sectors = bs
            .total_sectors_32
            .checked_sub(data_start_sector)
            .filter(|&n| n > 0)
            .ok_or(FsError::InvalidBootSector)?;

        // Clusters the FAT can index, minus the two reserved entries.
        let fat_capacity = fat_size.saturating_mul(FAT_ENTRIES_PER_SECTOR).saturating_sub(2);
        let total_clusters = (data_sectors / sectors_per_cluster).min(fat_capacity);
        if bs.root_cluster >= total_clusters + 2 {
            return Err(FsError::InvalidBootSector);
        }

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors: bs.reserved_sectors as u32,
            fat_count,
            fat_size,
            root_cluster: bs.root_cluster,
            fat_start_sector,
            data_start_sector,
            bytes_per_cluster: sectors_per_cluster * bytes_per_sector,
            total_clusters,
            fs_info_sector: bs.fs_info_sector,
            backup_boot_sector: bs.backup_boot_sector,
            volume_id: bs.volume_id,
            volume_label: bs.volume_label,
            oem_name: bs.oem_name,
        })
    }

    /// First sector of `cluster`, or 0 for the reserved indices 0 and 1.
    pub fn cluster_to_sector(&self, cluster: u32) -> u32 {
        if cluster < 2 {
            return 0;
        }
        self.data_start_sector + (cluster - 2) * self.sectors_per_cluster
    }

    /// True for indices that address the data region.
    pub fn is_data_cluster(&self, cluster: u32) -> bool {
        cluster >= 2 && cluster - 2 < self.total_clusters
    }

    /// Volume label with the space padding trimmed.
    pub fn label(&self) -> &str {
        let len = self.volume_label.iter()
            .rposition(|&b| b != b' ')
            .map_or(0, |p| p + 1);
        core::str::from_utf8(&self.volume_label[..len]).unwrap_or("")
    }
}

/// A block device plus what is known about the volume on it.
///
/// Owns the only sector scratch buffer; all sub-sector reads and writes go
/// through it. Every operation that needs geometry fails with
/// [`FsError::NotMounted`] until [`Volume::mount`] succeeds.
pub struct Volume<D> {
    dev: D,
    desc: Option<VolumeDescriptor>,
    pub(crate) buf: [u8; SECTOR_SIZE],
}

impl<D: BlockDev> Volume<D> {
    pub fn new(dev: D) -> Self {
        Self { dev, desc: None, buf: [0; SECTOR_SIZE] }
    }

    /// Read and validate sector 0. On failure the volume stays unmounted
    /// and no geometry is kept.
    pub fn mount(&mut self) -> Result<&VolumeDescriptor, FsError> {
        self.desc = None;
        self.read_sector(0)?;
        let boot = BootSector::parse(&self.buf).inspect_err(|_| {
            log::warn!("fat32::mount: boot sector signature missing");
        })?;
        let desc = VolumeDescriptor::from_boot_sector(&boot).inspect_err(|err| {
            log::warn!("fat32::mount: rejected boot sector: {err}");
        })?;

        log::info!(
            "fat32::mount: {} clusters of {} bytes, FAT at {} ({} x {} sectors), data at {}, label {:?}",
            desc.total_clusters,
            desc.bytes_per_cluster,
            desc.fat_start_sector,
            desc.fat_count,
            desc.fat_size,
            desc.data_start_sector,
            desc.label(),
        );
        Ok(&*self.desc.insert(desc))
    }

    pub fn unmount(&mut self) {
        if self.desc.take().is_some() {
            log::info!("fat32::unmount: volume released");
        }
        self.buf.fill(0);
    }

    pub fn is_mounted(&self) -> bool {
        self.desc.is_some()
    }

    pub fn descriptor(&self) -> Result<&VolumeDescriptor, FsError> {
        self.desc.as_ref().ok_or(FsError::NotMounted)
    }

    /// Copy of the geometry, so callers can keep it across `&mut self` calls.
    pub(crate) fn geometry(&self) -> Result<VolumeDescriptor, FsError> {
        self.desc.ok_or(FsError::NotMounted)
    }

    pub fn cluster_to_sector(&self, cluster: u32) -> Result<u32, FsError> {
        Ok(self.descriptor()?.cluster_to_sector(cluster))
    }

    pub fn device(&self) -> &D {
        &self.dev
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    pub fn into_device(self) -> D {
        self.dev
    }

    /// Load `lba` into the scratch buffer.
    pub(crate) fn read_sector(&mut self, lba: u32) -> Result<(), FsError> {
        log::trace!("fat32: read lba {lba}");
        self.dev.read(lba, &mut self.buf)?;
        Ok(())
    }

    /// Store the scratch buffer at `lba`.
    pub(crate) fn write_sector(&mut self, lba: u32) -> Result<(), FsError> {
        log::trace!("fat32: write lba {lba}");
        self.dev.write(lba, &self.buf)?;
        Ok(())
    }
}
