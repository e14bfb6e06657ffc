//! 8.3 names, 32-byte directory entries and the directory walker.
//!
//! Directory entry layout (little-endian):
//! - 0..11  name (8 base + 3 extension, space padded)
//! - 11     attributes
//! - 12     reserved (NT case flags)
//! - 13     creation time, tenths of a second
//! - 14..18 creation time, creation date
//! - 18..20 last access date
//! - 20..22 first cluster, high half
//! - 22..26 last write time, last write date
//! - 26..28 first cluster, low half
//! - 28..32 size in bytes

use core::fmt;
use core::ops::ControlFlow;

use bitflags::bitflags;
use heapless::String;

use crate::block::{BlockDev, SECTOR_SIZE};
use crate::bytes::{get_array, get_u16, get_u32, put_u16, put_u32};
use crate::error::FsError;
use crate::file::FileHandle;
use crate::volume::Volume;

pub const DIR_ENTRY_SIZE: usize = 32;
const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DIR_ENTRY_SIZE;

const END_OF_DIR: u8 = 0x00;
const DELETED: u8 = 0xE5;

// ─── Attributes ────────────────────────────────────────────────────────────────

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
        /// Marks a VFAT long-name fragment, never a real file.
        const LONG_NAME = 0x0F;

        const _ = !0;
    }
}

impl Attributes {
    pub fn is_long_name(self) -> bool {
        self.bits() & 0x3F == Self::LONG_NAME.bits()
    }
}

// ─── Names ─────────────────────────────────────────────────────────────────────

/// The 11 on-disk name bytes, exactly as stored.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortName(pub [u8; 11]);

impl ShortName {
    /// On-disk form of a user-supplied `NAME.EXT`, upper-cased and space padded.
    pub fn parse(name: &str) -> Result<Self, FsError> {
        let (base, ext) = match name.split_once('.') {
            Some((_, ext)) if ext.contains('.') => return Err(FsError::InvalidName),
            Some(parts) => parts,
            None => (name, ""),
        };
        if base.is_empty() || base.len() > 8 || ext.len() > 3 {
            return Err(FsError::InvalidName);
        }

        let mut raw = [b' '; 11];
        for (dst, b) in raw[..8].iter_mut().zip(base.bytes()) {
            *dst = short_name_byte(b)?;
        }
        for (dst, b) in raw[8..].iter_mut().zip(ext.bytes()) {
            *dst = short_name_byte(b)?;
        }
        Ok(Self(raw))
    }

    pub fn display(&self) -> String<12> {
        convert_name(&self.0)
    }
}

fn short_name_byte(b: u8) -> Result<u8, FsError> {
    const FORBIDDEN: &[u8] = b"\"*+,/:;<=>?[\\]|";
    if !b.is_ascii_graphic() || FORBIDDEN.contains(&b) {
        return Err(FsError::InvalidName);
    }
    Ok(b.to_ascii_uppercase())
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName({:?})", self.display().as_str())
    }
}

/// Display form of a raw 8.3 name: `"README  TXT"` → `"README.TXT"`.
///
/// Base and extension each stop at their first space. A leading 0x05 is the
/// escape for a real 0xE5 first byte; like every byte outside printable
/// ASCII it is shown as `?`.
pub fn convert_name(raw: &[u8; 11]) -> String<12> {
    fn shown(b: u8) -> char {
        if b.is_ascii_graphic() { b as char } else { '?' }
    }

    // At most 8 + 1 + 3 characters, so pushes cannot overflow.
    let mut out = String::new();
    for &b in raw[..8].iter().take_while(|&&b| b != b' ') {
        let _ = out.push(shown(b));
    }
    if raw[8] != b' ' {
        let _ = out.push('.');
        for &b in raw[8..].iter().take_while(|&&b| b != b' ') {
            let _ = out.push(shown(b));
        }
    }
    out
}

/// ASCII case-insensitive name equality.
pub fn compare_names(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

// ─── Directory entry ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub name: ShortName,
    pub attributes: Attributes,
    pub nt_reserved: u8,
    pub create_time_tenths: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub access_date: u16,
    pub first_cluster: u32,
    pub write_time: u16,
    pub write_date: u16,
    pub size: u32,
}

impl DirEntry {
    /// Decode the first 32 bytes of `raw`.
    pub fn parse(raw: &[u8]) -> Self {
        let hi = get_u16(raw, 20) as u32;
        let lo = get_u16(raw, 26) as u32;
        Self {
            name: ShortName(get_array(raw, 0)),
            attributes: Attributes::from_bits_retain(raw[11]),
            nt_reserved: raw[12],
            create_time_tenths: raw[13],
            create_time: get_u16(raw, 14),
            create_date: get_u16(raw, 16),
            access_date: get_u16(raw, 18),
            first_cluster: (hi << 16) | lo,
            write_time: get_u16(raw, 22),
            write_date: get_u16(raw, 24),
            size: get_u32(raw, 28),
        }
    }

    /// Encode into the first 32 bytes of `raw`.
    pub fn write_to(&self, raw: &mut [u8]) {
        raw[0..11].copy_from_slice(&self.name.0);
        raw[11] = self.attributes.bits();
        raw[12] = self.nt_reserved;
        raw[13] = self.create_time_tenths;
        put_u16(raw, 14, self.create_time);
        put_u16(raw, 16, self.create_date);
        put_u16(raw, 18, self.access_date);
        put_u16(raw, 20, (self.first_cluster >> 16) as u16);
        put_u16(raw, 22, self.write_time);
        put_u16(raw, 24, self.write_date);
        put_u16(raw, 26, self.first_cluster as u16);
        put_u32(raw, 28, self.size);
    }

    /// Entry for a file that has never been written: no cluster, no bytes.
    pub fn new_file(name: ShortName) -> Self {
        Self {
            name,
            attributes: Attributes::ARCHIVE,
            nt_reserved: 0,
            create_time_tenths: 0,
            create_time: 0,
            create_date: 0,
            access_date: 0,
            first_cluster: 0,
            write_time: 0,
            write_date: 0,
            size: 0,
        }
    }

    pub fn is_end(&self) -> bool { self.name.0[0] == END_OF_DIR }
    pub fn is_deleted(&self) -> bool { self.name.0[0] == DELETED }
    pub fn is_long_name(&self) -> bool { self.attributes.is_long_name() }
    pub fn is_dir(&self) -> bool { self.attributes.contains(Attributes::DIRECTORY) }
    pub fn is_read_only(&self) -> bool { self.attributes.contains(Attributes::READ_ONLY) }

    pub fn is_volume_label(&self) -> bool {
        self.attributes.contains(Attributes::VOLUME_ID) && !self.is_long_name()
    }

    /// Slots that never name a file: deleted, long-name fragments, the volume label.
    fn is_hidden_slot(&self) -> bool {
        self.is_deleted() || self.is_long_name() || self.is_volume_label()
    }

    pub fn display_name(&self) -> String<12> {
        self.name.display()
    }
}

/// Where an entry lives: its sector and the slot within that sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub lba: u32,
    pub slot: usize,
}

impl EntryLocation {
    fn byte_offset(&self) -> usize {
        self.slot * DIR_ENTRY_SIZE
    }
}

/// Forward-only enumeration state for one open directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirHandle {
    cluster: u32,
    index: u32,
    walked: u32,
    finished: bool,
}

impl DirHandle {
    pub fn new(cluster: u32) -> Self {
        Self { cluster, index: 0, walked: 0, finished: false }
    }

    pub fn cluster(&self) -> u32 { self.cluster }
    pub fn index(&self) -> u32 { self.index }
    pub fn is_finished(&self) -> bool { self.finished }
}

// ─── Directory operations ──────────────────────────────────────────────────────

impl<D: BlockDev> Volume<D> {
    /// Run `visit` over every slot of the directory chain in on-disk order.
    ///
    /// Returns the value `visit` broke with, or `None` when the chain ran out.
    fn walk_dir<B>(
        &mut self,
        dir_cluster: u32,
        mut visit: impl FnMut(&DirEntry, EntryLocation) -> ControlFlow<B>,
    ) -> Result<Option<B>, FsError> {
        let geo = self.geometry()?;
        let mut cluster = dir_cluster;
        let mut walked = 0;
        loop {
            if !geo.is_data_cluster(cluster) {
                log::warn!("fat32::walk_dir: directory cluster {cluster} out of range");
                return Err(FsError::CorruptVolume);
            }
            let first = geo.cluster_to_sector(cluster);
            for lba in first..first + geo.sectors_per_cluster {
                self.read_sector(lba)?;
                for slot in 0..ENTRIES_PER_SECTOR {
                    let entry = DirEntry::parse(&self.buf[slot * DIR_ENTRY_SIZE..]);
                    if let ControlFlow::Break(found) = visit(&entry, EntryLocation { lba, slot }) {
                        return Ok(Some(found));
                    }
                }
            }
            match self.follow(cluster)? {
                Some(next) => cluster = next,
                None => return Ok(None),
            }
            walked += 1;
            if walked > geo.total_clusters {
                return Err(FsError::CorruptVolume);
            }
        }
    }

    /// First live entry for which `pred` holds, stopping at the end marker.
    fn find_where(
        &mut self,
        dir_cluster: u32,
        mut pred: impl FnMut(&DirEntry) -> bool,
    ) -> Result<(DirEntry, EntryLocation), FsError> {
        let found = self.walk_dir(dir_cluster, |entry, loc| {
            if entry.is_end() {
                ControlFlow::Break(None)
            } else if !entry.is_hidden_slot() && pred(entry) {
                ControlFlow::Break(Some((*entry, loc)))
            } else {
                ControlFlow::Continue(())
            }
        })?;
        found.flatten().ok_or(FsError::FileNotFound)
    }

    /// Look `name` up in a directory, ignoring ASCII case.
    pub fn find_entry(&mut self, dir_cluster: u32, name: &str) -> Result<(DirEntry, EntryLocation), FsError> {
        self.find_where(dir_cluster, |entry| compare_names(&entry.display_name(), name))
    }

    /// Write `file`'s first cluster and size back into its directory entry.
    ///
    /// Only those six bytes of the slot change.
    pub fn update_entry(&mut self, file: &FileHandle) -> Result<(), FsError> {
        let (_, loc) = self
            .find_where(file.dir_cluster, |entry| entry.name == file.name)
            .inspect_err(|err| log::warn!("fat32::update_entry: {}: {err}", file.name))?;

        self.read_sector(loc.lba)?;
        let off = loc.byte_offset();
        put_u16(&mut self.buf, off + 20, (file.first_cluster >> 16) as u16);
        put_u16(&mut self.buf, off + 26, file.first_cluster as u16);
        put_u32(&mut self.buf, off + 28, file.size);
        self.write_sector(loc.lba)?;
        log::trace!("fat32::update_entry: {} cluster {} size {}", file.name, file.first_cluster, file.size);
        Ok(())
    }

    /// Store `entry` in the first deleted or unused slot, growing the
    /// directory by one cluster when every slot is taken.
    pub fn insert_entry(&mut self, dir_cluster: u32, entry: &DirEntry) -> Result<EntryLocation, FsError> {
        let free = self.walk_dir(dir_cluster, |slot, loc| {
            if slot.is_end() || slot.is_deleted() {
                ControlFlow::Break(loc)
            } else {
                ControlFlow::Continue(())
            }
        })?;
        let loc = match free {
            Some(loc) => loc,
            None => self.grow_dir(dir_cluster)?,
        };

        self.read_sector(loc.lba)?;
        let off = loc.byte_offset();
        entry.write_to(&mut self.buf[off..off + DIR_ENTRY_SIZE]);
        self.write_sector(loc.lba)?;
        log::debug!("fat32::insert_entry: {} at lba {} slot {}", entry.name, loc.lba, loc.slot);
        Ok(loc)
    }

    /// Append a zeroed cluster to the directory and return its first slot.
    ///
    /// The cluster is zeroed before it is linked, so a failed fill never
    /// exposes stale bytes as directory entries.
    fn grow_dir(&mut self, dir_cluster: u32) -> Result<EntryLocation, FsError> {
        let geo = self.geometry()?;
        let last = self.last_cluster(dir_cluster)?;
        let cluster = self.allocate_cluster(None)?;

        let first = geo.cluster_to_sector(cluster);
        self.buf.fill(0);
        for lba in first..first + geo.sectors_per_cluster {
            if let Err(err) = self.write_sector(lba) {
                self.release_cluster(cluster);
                return Err(err);
            }
        }
        self.link_cluster(last, cluster)?;
        log::debug!("fat32::grow_dir: directory {dir_cluster} extended with cluster {cluster}");
        Ok(EntryLocation { lba: first, slot: 0 })
    }

    /// Next file or directory entry, or `None` once the directory is exhausted.
    pub fn read_dir_next(&mut self, dir: &mut DirHandle) -> Result<Option<DirEntry>, FsError> {
        let geo = self.geometry()?;
        let per_cluster = geo.bytes_per_cluster / DIR_ENTRY_SIZE as u32;

        while !dir.finished {
            if dir.index >= per_cluster {
                match self.follow(dir.cluster)? {
                    Some(next) => {
                        dir.walked += 1;
                        if dir.walked > geo.total_clusters {
                            return Err(FsError::CorruptVolume);
                        }
                        dir.cluster = next;
                        dir.index = 0;
                    }
                    None => dir.finished = true,
                }
                continue;
            }
            if !geo.is_data_cluster(dir.cluster) {
                return Err(FsError::CorruptVolume);
            }

            let byte = dir.index as usize * DIR_ENTRY_SIZE;
            let lba = geo.cluster_to_sector(dir.cluster) + (byte / SECTOR_SIZE) as u32;
            self.read_sector(lba)?;
            let entry = DirEntry::parse(&self.buf[byte % SECTOR_SIZE..]);
            if entry.is_end() {
                dir.finished = true;
                break;
            }
            dir.index += 1;
            if !entry.is_hidden_slot() {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}
