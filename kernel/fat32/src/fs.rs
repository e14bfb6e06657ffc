//! The filesystem context: one volume plus its open-file and open-directory tables.

use heapless::String;

use crate::block::BlockDev;
use crate::dir::{DirEntry, DirHandle, ShortName};
use crate::error::FsError;
use crate::file::FileHandle;
use crate::handle::{DirId, FileId, HandlePool};
use crate::volume::{Volume, VolumeDescriptor};

/// Geometry and identity of the mounted volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub bytes_per_cluster: u32,
    pub reserved_sectors: u32,
    pub fat_count: u32,
    pub fat_size: u32,
    pub fat_start_sector: u32,
    pub data_start_sector: u32,
    pub root_cluster: u32,
    pub total_clusters: u32,
    pub volume_id: u32,
    pub label: String<11>,
}

impl From<&VolumeDescriptor> for VolumeInfo {
    fn from(desc: &VolumeDescriptor) -> Self {
        Self {
            bytes_per_sector: desc.bytes_per_sector,
            sectors_per_cluster: desc.sectors_per_cluster,
            bytes_per_cluster: desc.bytes_per_cluster,
            reserved_sectors: desc.reserved_sectors,
            fat_count: desc.fat_count,
            fat_size: desc.fat_size,
            fat_start_sector: desc.fat_start_sector,
            data_start_sector: desc.data_start_sector,
            root_cluster: desc.root_cluster,
            total_clusters: desc.total_clusters,
            volume_id: desc.volume_id,
            label: String::try_from(desc.label()).unwrap_or_default(),
        }
    }
}

/// A FAT32 volume on `D` with room for `FILES` open files and `DIRS` open directories.
///
/// Only the root directory is addressable. Every call fails with
/// [`FsError::NotMounted`] until [`Fat32::mount`] succeeds, and with
/// [`FsError::NotOpen`] when given an id that has already been closed.
pub struct Fat32<D, const FILES: usize = 16, const DIRS: usize = 8> {
    volume: Volume<D>,
    files: HandlePool<FileHandle, FILES>,
    dirs: HandlePool<DirHandle, DIRS>,
}

impl<D: BlockDev, const FILES: usize, const DIRS: usize> Fat32<D, FILES, DIRS> {
    /// Wrap a device without touching it.
    pub fn new(dev: D) -> Self {
        Self { volume: Volume::new(dev), files: HandlePool::new(), dirs: HandlePool::new() }
    }

    pub fn mounted(dev: D) -> Result<Self, FsError> {
        let mut fs = Self::new(dev);
        fs.mount()?;
        Ok(fs)
    }

    // ─── Mount state ───────────────────────────────────────────────────────────

    /// Mount the volume at LBA 0, unmounting first if something is mounted.
    pub fn mount(&mut self) -> Result<VolumeInfo, FsError> {
        if self.volume.is_mounted() {
            if let Err(err) = self.unmount() {
                log::warn!("fat32::mount: previous volume did not unmount cleanly: {err}");
            }
        }
        self.volume.mount().map(VolumeInfo::from)
    }

    /// Close every handle, flushing dirty files, then forget the volume.
    ///
    /// Teardown always completes; the first flush error is returned afterwards.
    pub fn unmount(&mut self) -> Result<(), FsError> {
        let mut first_err = None;
        for file in self.files.drain() {
            if !file.dirty {
                continue;
            }
            if let Err(err) = self.volume.update_entry(&file) {
                log::warn!("fat32::unmount: lost metadata for {}: {err}", file.name);
                first_err.get_or_insert(err);
            }
        }
        self.dirs.drain().for_each(drop);
        self.volume.unmount();
        first_err.map_or(Ok(()), Err)
    }

    pub fn is_mounted(&self) -> bool {
        self.volume.is_mounted()
    }

    pub fn volume_info(&self) -> Result<VolumeInfo, FsError> {
        self.volume.descriptor().map(VolumeInfo::from)
    }

    pub fn free_clusters(&mut self) -> Result<u32, FsError> {
        self.volume.free_clusters()
    }

    // ─── Files ─────────────────────────────────────────────────────────────────

    /// Open an existing root-directory file, matching `name` without regard to case.
    ///
    /// Each call gets its own handle with its own copy of the entry. Two
    /// handles on the same file are not coordinated: if both allocate a
    /// first cluster for an empty file, the last `close` wins the entry and
    /// the other chain is lost.
    pub fn open(&mut self, name: &str) -> Result<FileId, FsError> {
        let geo = self.volume.geometry()?;
        let (entry, _) = self.volume.find_entry(geo.root_cluster, name)?;
        let file = Self::file_from_entry(&geo, &entry)?;
        let id = FileId(self.files.insert(file)?);
        log::debug!("fat32::open: {} as {id:?}, {} bytes", entry.name, entry.size);
        Ok(id)
    }

    /// Open `name` empty: an existing file is truncated, a new one gets a
    /// directory entry. The first data cluster is allocated by the first write.
    ///
    /// Handles already open on `name` are not told about the truncation; see
    /// [`Fat32::open`].
    pub fn create(&mut self, name: &str) -> Result<FileId, FsError> {
        let geo = self.volume.geometry()?;
        let short = ShortName::parse(name)?;
        if !self.files.has_free() {
            return Err(FsError::NoFreeHandles);
        }

        let file = match self.volume.find_entry(geo.root_cluster, name) {
            Ok((entry, _)) => {
                let mut file = Self::file_from_entry(&geo, &entry)?;
                self.volume.truncate_file(&mut file)?;
                log::debug!("fat32::create: truncated {}", entry.name);
                file
            }
            Err(FsError::FileNotFound) => {
                let entry = DirEntry::new_file(short);
                self.volume.insert_entry(geo.root_cluster, &entry)?;
                FileHandle::from_entry(&entry, geo.root_cluster)
            }
            Err(err) => return Err(err),
        };
        let id = FileId(self.files.insert(file)?);
        log::debug!("fat32::create: {short} as {id:?}");
        Ok(id)
    }

    fn file_from_entry(geo: &VolumeDescriptor, entry: &DirEntry) -> Result<FileHandle, FsError> {
        if entry.is_dir() {
            return Err(FsError::IsDirectory);
        }
        if entry.first_cluster != 0 && !geo.is_data_cluster(entry.first_cluster) {
            log::warn!("fat32::open: {} starts at invalid cluster {}", entry.name, entry.first_cluster);
            return Err(FsError::CorruptVolume);
        }
        Ok(FileHandle::from_entry(entry, geo.root_cluster))
    }

    pub fn read(&mut self, id: FileId, buf: &mut [u8]) -> Result<usize, FsError> {
        self.volume.descriptor()?;
        let file = self.files.get_mut(id.0)?;
        self.volume.read_file(file, buf)
    }

    pub fn write(&mut self, id: FileId, data: &[u8]) -> Result<usize, FsError> {
        self.volume.descriptor()?;
        let file = self.files.get_mut(id.0)?;
        self.volume.write_file(file, data)
    }

    /// Move the cursor, clamped to `[0, size]`. Returns the new position.
    pub fn seek(&mut self, id: FileId, position: u32) -> Result<u32, FsError> {
        self.volume.descriptor()?;
        let file = self.files.get_mut(id.0)?;
        self.volume.seek_file(file, position)
    }

    pub fn tell(&self, id: FileId) -> Result<u32, FsError> {
        Ok(self.file(id)?.position)
    }

    /// Size as cached in the handle, including writes not yet flushed.
    pub fn file_size(&self, id: FileId) -> Result<u32, FsError> {
        Ok(self.file(id)?.size)
    }

    pub fn file(&self, id: FileId) -> Result<&FileHandle, FsError> {
        self.volume.descriptor()?;
        self.files.get(id.0)
    }

    /// Release the handle, writing size and first cluster back if they changed.
    ///
    /// The slot is freed even when that write fails.
    pub fn close(&mut self, id: FileId) -> Result<(), FsError> {
        self.volume.descriptor()?;
        let file = self.files.remove(id.0)?;
        log::debug!("fat32::close: {} ({} bytes{})", file.name, file.size, if file.dirty { ", flushed" } else { "" });
        if file.dirty {
            self.volume
                .update_entry(&file)
                .inspect_err(|err| log::warn!("fat32::close: {}: {err}", file.name))?;
        }
        Ok(())
    }

    pub fn open_files(&self) -> usize {
        self.files.in_use()
    }

    pub fn file_capacity(&self) -> usize {
        self.files.capacity()
    }

    // ─── Directories ───────────────────────────────────────────────────────────

    /// Open the root directory for enumeration. `"/"` and `""` name it; nothing else exists.
    pub fn opendir(&mut self, path: &str) -> Result<DirId, FsError> {
        let root = self.volume.descriptor()?.root_cluster;
        if !path.is_empty() && path != "/" {
            return Err(FsError::UnsupportedPath);
        }
        let id = DirId(self.dirs.insert(DirHandle::new(root))?);
        log::debug!("fat32::opendir: {path:?} as {id:?}");
        Ok(id)
    }

    /// Next entry of the directory, or `None` at the end (and on every call after).
    pub fn readdir(&mut self, id: DirId) -> Result<Option<DirEntry>, FsError> {
        self.volume.descriptor()?;
        let dir = self.dirs.get_mut(id.0)?;
        self.volume.read_dir_next(dir)
    }

    pub fn closedir(&mut self, id: DirId) -> Result<(), FsError> {
        self.volume.descriptor()?;
        self.dirs.remove(id.0)?;
        log::debug!("fat32::closedir: {id:?}");
        Ok(())
    }

    pub fn open_dirs(&self) -> usize {
        self.dirs.in_use()
    }

    pub fn dir_capacity(&self) -> usize {
        self.dirs.capacity()
    }

    // ─── Raw access ────────────────────────────────────────────────────────────

    pub fn volume(&self) -> &Volume<D> {
        &self.volume
    }

    /// Direct access to FAT and directory primitives. Open handles are not
    /// told about changes made through it.
    pub fn volume_mut(&mut self) -> &mut Volume<D> {
        &mut self.volume
    }

    /// Give the device back. Open handles are dropped unflushed; call
    /// [`Fat32::unmount`] first to keep their metadata.
    pub fn into_device(self) -> D {
        self.volume.into_device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        Fault, FaultyDisk, MemDisk, add_dir, disk_with_files, format_disk, list_via_fatfs, make_disk, populate,
        read_via_fatfs,
    };

    fn mounted(disk: MemDisk) -> Fat32<MemDisk> {
        Fat32::mounted(disk).unwrap()
    }

    const README: &[u8] = b"FAT32 test image: this file is exactly 53 bytes long.";

    // ── reference scenario ───────────────────────────────────────────────────

    #[test]
    fn sixty_four_mib_image_scenario() {
        assert_eq!(README.len(), 53);
        let mut disk = format_disk(64 * 1024 * 1024);
        populate(&mut disk, &[("README.TXT", README), ("HELLO.TXT", b"hello\n"), ("DATA.BIN", &[0xAB; 1300])]);
        let mut fs = mounted(disk);

        let id = fs.open("readme.txt").unwrap();
        let mut buf = [0u8; 512];
        assert_eq!(fs.read(id, &mut buf).unwrap(), 53);
        assert_eq!(&buf[..53], README);
        fs.close(id).unwrap();

        let dir = fs.opendir("/").unwrap();
        let mut listing = Vec::new();
        while let Some(entry) = fs.readdir(dir).unwrap() {
            listing.push((entry.display_name().as_str().to_owned(), entry.size, entry.is_dir()));
        }
        fs.closedir(dir).unwrap();
        assert_eq!(
            listing,
            [
                ("README.TXT".to_owned(), 53, false),
                ("HELLO.TXT".to_owned(), 6, false),
                ("DATA.BIN".to_owned(), 1300, false),
            ]
        );
    }

    // ── mount state ──────────────────────────────────────────────────────────

    #[test]
    fn everything_fails_before_mount() {
        let mut fs: Fat32<MemDisk> = Fat32::new(make_disk());
        assert!(!fs.is_mounted());
        assert_eq!(fs.volume_info().unwrap_err(), FsError::NotMounted);
        assert_eq!(fs.open("X").unwrap_err(), FsError::NotMounted);
        assert_eq!(fs.create("X").unwrap_err(), FsError::NotMounted);
        assert_eq!(fs.opendir("/").unwrap_err(), FsError::NotMounted);
        assert_eq!(fs.free_clusters().unwrap_err(), FsError::NotMounted);
    }

    #[test]
    fn failed_mount_leaves_nothing_behind() {
        let mut fs: Fat32<MemDisk> = Fat32::new(MemDisk(vec![0u8; 1024 * 1024]));
        assert_eq!(fs.mount().unwrap_err(), FsError::InvalidBootSector);
        assert!(!fs.is_mounted());
        assert!(Fat32::<MemDisk>::mounted(MemDisk(vec![0u8; 1024 * 1024])).is_err());
    }

    #[test]
    fn volume_info_reports_geometry() {
        let mut disk = make_disk();
        disk.0[71..82].copy_from_slice(b"TESTVOL    ");
        let fs = mounted(disk);
        let info = fs.volume_info().unwrap();
        assert_eq!(info.bytes_per_sector, 512);
        assert_eq!(info.root_cluster, 2);
        assert_eq!(info.bytes_per_cluster, info.sectors_per_cluster * 512);
        assert_eq!(info.label.as_str(), "TESTVOL");
    }

    #[test]
    fn unmount_flushes_and_closes() {
        let mut fs = mounted(make_disk());
        let id = fs.create("KEEP.TXT").unwrap();
        fs.write(id, b"kept across unmount").unwrap();
        let dir = fs.opendir("").unwrap();
        assert_eq!((fs.open_files(), fs.open_dirs()), (1, 1));

        fs.unmount().unwrap();
        assert!(!fs.is_mounted());
        assert_eq!(fs.read(id, &mut [0u8; 4]).unwrap_err(), FsError::NotMounted);
        assert_eq!(fs.readdir(dir).unwrap_err(), FsError::NotMounted);
        assert_eq!((fs.open_files(), fs.open_dirs()), (0, 0));

        let mut disk = fs.into_device();
        assert_eq!(read_via_fatfs(&mut disk, "KEEP.TXT"), b"kept across unmount");
    }

    #[test]
    fn remount_invalidates_old_handles() {
        let mut fs = mounted(disk_with_files(&[("A.TXT", b"a")]));
        let id = fs.open("A.TXT").unwrap();
        fs.mount().unwrap();
        assert!(fs.is_mounted());
        assert_eq!(fs.tell(id).unwrap_err(), FsError::NotOpen);
        assert_eq!(fs.open_files(), 0);
        assert!(fs.open("A.TXT").is_ok());
    }

    #[test]
    fn unmount_reports_flush_failure() {
        let disk = FaultyDisk::new(make_disk(), Fault::None);
        let mut fs: Fat32<FaultyDisk> = Fat32::mounted(disk).unwrap();
        let id = fs.create("LOST.TXT").unwrap();
        fs.write(id, b"data").unwrap();
        fs.volume_mut().device_mut().arm(Fault::AllWrites);

        assert_eq!(fs.unmount().unwrap_err(), FsError::DeviceIo);
        assert!(!fs.is_mounted());
        assert_eq!(fs.open_files(), 0);
    }

    // ── handles ──────────────────────────────────────────────────────────────

    #[test]
    fn file_pool_bound() {
        let mut fs: Fat32<MemDisk, 4, 2> = Fat32::mounted(disk_with_files(&[("ONE.TXT", b"1")])).unwrap();
        assert_eq!(fs.file_capacity(), 4);
        let ids: Vec<_> = (0..4).map(|_| fs.open("ONE.TXT").unwrap()).collect();
        assert_eq!(fs.open("ONE.TXT").unwrap_err(), FsError::NoFreeHandles);
        assert_eq!(fs.create("NEW.TXT").unwrap_err(), FsError::NoFreeHandles);

        fs.close(ids[2]).unwrap();
        let again = fs.open("ONE.TXT").unwrap();
        assert_eq!(fs.open("ONE.TXT").unwrap_err(), FsError::NoFreeHandles);
        assert_eq!(fs.close(ids[2]).unwrap_err(), FsError::NotOpen);
        assert!(fs.tell(again).is_ok());

        // A refused create must not have touched the directory.
        let mut disk = fs.into_device();
        assert!(list_via_fatfs(&mut disk).iter().all(|(name, _, _)| name != "NEW.TXT"));
    }

    #[test]
    fn dir_pool_bound() {
        let mut fs: Fat32<MemDisk, 4, 2> = Fat32::mounted(make_disk()).unwrap();
        let a = fs.opendir("/").unwrap();
        fs.opendir("/").unwrap();
        assert_eq!(fs.opendir("/").unwrap_err(), FsError::NoFreeHandles);
        fs.closedir(a).unwrap();
        assert_eq!(fs.closedir(a).unwrap_err(), FsError::NotOpen);
        assert!(fs.opendir("/").is_ok());
        assert_eq!(fs.open_dirs(), 2);
    }

    #[test]
    fn stale_file_id_after_close() {
        let mut fs = mounted(disk_with_files(&[("S.TXT", b"s")]));
        let id = fs.open("S.TXT").unwrap();
        fs.close(id).unwrap();
        assert_eq!(fs.read(id, &mut [0u8; 1]).unwrap_err(), FsError::NotOpen);
        assert_eq!(fs.write(id, b"x").unwrap_err(), FsError::NotOpen);
        assert_eq!(fs.seek(id, 0).unwrap_err(), FsError::NotOpen);
        assert_eq!(fs.close(id).unwrap_err(), FsError::NotOpen);
    }

    // ── open / create ────────────────────────────────────────────────────────

    #[test]
    fn open_missing_file() {
        let mut fs = mounted(make_disk());
        assert_eq!(fs.open("NOPE.TXT").unwrap_err(), FsError::FileNotFound);
        assert_eq!(fs.open_files(), 0);
    }

    #[test]
    fn directories_cannot_be_opened_as_files() {
        let mut disk = make_disk();
        add_dir(&mut disk, "SUBDIR");
        let mut fs = mounted(disk);
        assert_eq!(fs.open("subdir").unwrap_err(), FsError::IsDirectory);
        assert_eq!(fs.create("SUBDIR").unwrap_err(), FsError::IsDirectory);

        let dir = fs.opendir("/").unwrap();
        let entry = fs.readdir(dir).unwrap().unwrap();
        assert!(entry.is_dir());
    }

    #[test]
    fn create_rejects_invalid_names() {
        let mut fs = mounted(make_disk());
        assert_eq!(fs.create("much-too-long.txt").unwrap_err(), FsError::InvalidName);
        assert_eq!(fs.create("a?.txt").unwrap_err(), FsError::InvalidName);
    }

    #[test]
    fn created_file_survives_reopen_and_remount() {
        let mut fs = mounted(make_disk());
        let id = fs.create("fresh.txt").unwrap();
        assert_eq!(fs.write(id, b"brand new").unwrap(), 9);
        fs.close(id).unwrap();

        fs.mount().unwrap();
        let id = fs.open("FRESH.TXT").unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(fs.read(id, &mut buf).unwrap(), 9);
        assert_eq!(&buf[..9], b"brand new");
        assert_eq!(fs.file(id).unwrap().name().display().as_str(), "FRESH.TXT");
        fs.close(id).unwrap();

        let mut disk = fs.into_device();
        let listing = list_via_fatfs(&mut disk);
        assert_eq!(listing, [("FRESH.TXT".to_owned(), 9, false)]);
    }

    #[test]
    fn close_without_writes_leaves_entry_alone() {
        let mut fs = mounted(disk_with_files(&[("RO.TXT", b"untouched")]));
        let before = fs.volume().device().0.clone();
        let id = fs.open("RO.TXT").unwrap();
        let mut buf = [0u8; 4];
        fs.read(id, &mut buf).unwrap();
        fs.close(id).unwrap();
        assert!(fs.volume().device().0 == before);
    }

    #[test]
    fn uncoordinated_handles_last_close_wins() {
        let mut fs = mounted(make_disk());
        let id = fs.create("SHARED.TXT").unwrap();
        fs.close(id).unwrap();

        let a = fs.open("SHARED.TXT").unwrap();
        let b = fs.open("shared.txt").unwrap();
        fs.write(a, b"from a").unwrap();
        fs.write(b, b"from b!").unwrap();
        let (first_a, first_b) = (fs.file(a).unwrap().first_cluster(), fs.file(b).unwrap().first_cluster());
        assert_ne!(first_a, first_b);
        fs.close(a).unwrap();
        fs.close(b).unwrap();

        let root = fs.volume_info().unwrap().root_cluster;
        let (entry, _) = fs.volume_mut().find_entry(root, "SHARED.TXT").unwrap();
        assert_eq!((entry.first_cluster, entry.size), (first_b, 7));
        let mut disk = fs.into_device();
        assert_eq!(read_via_fatfs(&mut disk, "SHARED.TXT"), b"from b!");
    }

    #[test]
    fn close_after_entry_vanished_still_frees_slot() {
        let mut fs = mounted(disk_with_files(&[("TMP.TXT", b"t")]));
        let id = fs.create("TMP.TXT").unwrap();
        fs.write(id, b"rewritten").unwrap();

        let root = fs.volume_info().unwrap().root_cluster;
        let (_, loc) = fs.volume_mut().find_entry(root, "TMP.TXT").unwrap();
        fs.volume_mut().device_mut().0[loc.lba as usize * 512 + loc.slot * 32] = 0xE5;

        assert_eq!(fs.close(id).unwrap_err(), FsError::FileNotFound);
        assert_eq!(fs.open_files(), 0);
    }

    // ── directories ──────────────────────────────────────────────────────────

    #[test]
    fn opendir_only_knows_root() {
        let mut fs = mounted(make_disk());
        assert_eq!(fs.opendir("/SUB").unwrap_err(), FsError::UnsupportedPath);
        assert_eq!(fs.opendir("sub/dir").unwrap_err(), FsError::UnsupportedPath);
        assert_eq!(fs.open_dirs(), 0);
    }

    #[test]
    fn readdir_keeps_reporting_end() {
        let mut fs = mounted(disk_with_files(&[("ONLY.TXT", b"o")]));
        let dir = fs.opendir("/").unwrap();
        assert!(fs.readdir(dir).unwrap().is_some());
        assert_eq!(fs.readdir(dir).unwrap(), None);
        assert_eq!(fs.readdir(dir).unwrap(), None);
        fs.closedir(dir).unwrap();
        assert_eq!(fs.readdir(dir).unwrap_err(), FsError::NotOpen);
    }

    #[test]
    fn many_creates_grow_root_directory() {
        let mut fs = mounted(make_disk());
        let per_cluster = fs.volume_info().unwrap().bytes_per_cluster / 32;
        let count = per_cluster + 4;
        for i in 0..count {
            let id = fs.create(&format!("N{i}.DAT")).unwrap();
            fs.write(id, format!("{i}").as_bytes()).unwrap();
            fs.close(id).unwrap();
        }
        let root = fs.volume_info().unwrap().root_cluster;
        assert!(fs.volume_mut().chain_len(root).unwrap() >= 2);

        let dir = fs.opendir("/").unwrap();
        let mut seen = 0;
        while fs.readdir(dir).unwrap().is_some() {
            seen += 1;
        }
        assert_eq!(seen, count);

        let mut disk = fs.into_device();
        assert_eq!(list_via_fatfs(&mut disk).len(), count as usize);
        assert_eq!(read_via_fatfs(&mut disk, &format!("N{}.DAT", count - 1)), format!("{}", count - 1).as_bytes());
    }

    #[test]
    fn error_codes_cross_as_bytes() {
        let code: u8 = FsError::OutOfSpace.into();
        assert_eq!(FsError::try_from(code).ok(), Some(FsError::OutOfSpace));
        assert_eq!(u8::from(FsError::NotMounted), 1);
        assert!(FsError::try_from(0u8).is_err());
    }
}
