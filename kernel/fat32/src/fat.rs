//! File Allocation Table access and cluster-chain management.
//!
//! Each FAT32 entry is 4 bytes; only the low 28 bits are meaningful and the
//! reserved top nibble is carried through on every write. Changes are
//! applied to every FAT copy, lookups use the first one.

use crate::block::BlockDev;
use crate::bytes::{get_u32, put_u32};
use crate::error::FsError;
use crate::volume::{FAT_ENTRIES_PER_SECTOR, Volume};

/// FAT32 entry values.
pub mod cluster_values {
    pub const FREE: u32 = 0x0000_0000;
    pub const RESERVED: u32 = 0x0000_0001;
    pub const BAD: u32 = 0x0FFF_FFF7;
    /// Lowest end-of-chain marker.
    pub const EOC_MIN: u32 = 0x0FFF_FFF8;
    /// End-of-chain value this driver writes.
    pub const EOC: u32 = 0x0FFF_FFFF;
    pub const CLUSTER_MASK: u32 = 0x0FFF_FFFF;

    pub fn is_eoc(value: u32) -> bool {
        (value & CLUSTER_MASK) >= EOC_MIN
    }

    pub fn is_free(value: u32) -> bool {
        (value & CLUSTER_MASK) == FREE
    }
}

use cluster_values::{CLUSTER_MASK, EOC, FREE, is_eoc};

/// FAT sector (relative to the start of a FAT copy) and byte offset of `cluster`'s entry.
fn fat_position(cluster: u32) -> (u32, usize) {
    let sector = cluster / FAT_ENTRIES_PER_SECTOR;
    let off = (cluster % FAT_ENTRIES_PER_SECTOR) as usize * 4;
    (sector, off)
}

impl<D: BlockDev> Volume<D> {
    /// The FAT entry for `cluster`, masked to 28 bits.
    ///
    /// Indices outside the data region read as end-of-chain.
    pub fn next_cluster(&mut self, cluster: u32) -> Result<u32, FsError> {
        let geo = self.geometry()?;
        if !geo.is_data_cluster(cluster) {
            return Ok(EOC);
        }
        let (sector, off) = fat_position(cluster);
        self.read_sector(geo.fat_start_sector + sector)?;
        Ok(get_u32(&self.buf, off) & CLUSTER_MASK)
    }

    /// Read-modify-write of `cluster`'s entry in every FAT copy.
    pub fn set_next_cluster(&mut self, cluster: u32, value: u32) -> Result<(), FsError> {
        let geo = self.geometry()?;
        if !geo.is_data_cluster(cluster) {
            log::warn!("fat32::set_next_cluster: cluster {cluster} is outside the data region");
            return Err(FsError::CorruptVolume);
        }
        let (sector, off) = fat_position(cluster);
        for copy in 0..geo.fat_count {
            let lba = geo.fat_start_sector + copy * geo.fat_size + sector;
            self.read_sector(lba)?;
            let current = get_u32(&self.buf, off);
            put_u32(&mut self.buf, off, (current & !CLUSTER_MASK) | (value & CLUSTER_MASK));
            self.write_sector(lba)?;
        }
        Ok(())
    }

    /// Lowest-numbered free cluster.
    ///
    /// A linear scan over the whole FAT, one sector (128 entries) per read.
    /// Callers rely only on "first free cluster in ascending order", so a
    /// cursor or bitmap can replace the scan later without changing them.
    pub fn find_free_cluster(&mut self) -> Result<u32, FsError> {
        let geo = self.geometry()?;
        let end = geo.total_clusters + 2;
        let mut cluster = 2;
        while cluster < end {
            let (sector, _) = fat_position(cluster);
            self.read_sector(geo.fat_start_sector + sector)?;
            let sector_end = end.min((sector + 1) * FAT_ENTRIES_PER_SECTOR);
            while cluster < sector_end {
                let (_, off) = fat_position(cluster);
                if get_u32(&self.buf, off) & CLUSTER_MASK == FREE {
                    return Ok(cluster);
                }
                cluster += 1;
            }
        }
        Err(FsError::OutOfSpace)
    }

    /// Take a free cluster, mark it end-of-chain and append it after `previous`,
    /// which must be the last cluster of its chain.
    ///
    /// If linking fails the chain is left as it was (see [`Volume::link_cluster`]).
    pub fn allocate_cluster(&mut self, previous: Option<u32>) -> Result<u32, FsError> {
        let geo = self.geometry()?;
        if let Some(prev) = previous {
            if !geo.is_data_cluster(prev) {
                log::warn!("fat32::allocate_cluster: cannot extend from cluster {prev}");
                return Err(FsError::CorruptVolume);
            }
        }

        let cluster = self.find_free_cluster()?;
        self.set_next_cluster(cluster, EOC)?;

        if let Some(prev) = previous {
            self.link_cluster(prev, cluster)?;
        }
        log::debug!("fat32::allocate_cluster: {cluster} (after {previous:?})");
        Ok(cluster)
    }

    /// Point the chain end `prev` at the freshly allocated end-of-chain `cluster`.
    ///
    /// A failed link may already have reached some FAT copies. On failure
    /// `prev` is marked end-of-chain again in every copy and only then is
    /// `cluster` released; if that restore fails too, `cluster` stays
    /// allocated so no copy points at a free cluster.
    pub(crate) fn link_cluster(&mut self, prev: u32, cluster: u32) -> Result<(), FsError> {
        let Err(err) = self.set_next_cluster(prev, cluster) else {
            return Ok(());
        };
        if self.set_next_cluster(prev, EOC).is_err() {
            log::warn!("fat32::allocate_cluster: FAT copies disagree on {prev}, keeping {cluster}");
            return Err(err);
        }
        if self.set_next_cluster(cluster, FREE).is_err() {
            log::warn!("fat32::allocate_cluster: cluster {cluster} leaked after failed link");
        }
        Err(err)
    }

    /// Return a cluster from [`Volume::allocate_cluster`]`(None)` to the free pool.
    pub(crate) fn release_cluster(&mut self, cluster: u32) {
        if self.set_next_cluster(cluster, FREE).is_err() {
            log::warn!("fat32::allocate_cluster: cluster {cluster} leaked");
        }
    }

    /// Mark every cluster of the chain starting at `start` free.
    ///
    /// Stops at the first entry that is already free, so a second call on
    /// the same chain writes nothing. Returns how many clusters were released.
    pub fn free_chain(&mut self, start: u32) -> Result<u32, FsError> {
        let geo = self.geometry()?;
        let mut cluster = start;
        let mut freed = 0;
        while geo.is_data_cluster(cluster) {
            if freed > geo.total_clusters {
                log::warn!("fat32::free_chain: chain from {start} does not terminate");
                return Err(FsError::CorruptVolume);
            }
            let next = self.next_cluster(cluster)?;
            if next == FREE {
                break;
            }
            self.set_next_cluster(cluster, FREE)?;
            freed += 1;
            if is_eoc(next) {
                break;
            }
            cluster = next;
        }
        if freed > 0 {
            log::debug!("fat32::free_chain: released {freed} clusters from {start}");
        }
        Ok(freed)
    }

    /// Cut the chain down to its first cluster.
    pub fn truncate_chain(&mut self, first: u32) -> Result<(), FsError> {
        let next = self.next_cluster(first)?;
        if next != FREE && !is_eoc(next) {
            self.free_chain(next)?;
        }
        self.set_next_cluster(first, EOC)
    }

    /// The cluster after `cluster`, `None` at end of chain.
    ///
    /// A pointer to a free, reserved, bad or out-of-range cluster means the
    /// FAT is inconsistent.
    pub(crate) fn follow(&mut self, cluster: u32) -> Result<Option<u32>, FsError> {
        let next = self.next_cluster(cluster)?;
        if is_eoc(next) {
            return Ok(None);
        }
        if !self.geometry()?.is_data_cluster(next) {
            log::warn!("fat32::follow: cluster {cluster} points at {next:#010x}");
            return Err(FsError::CorruptVolume);
        }
        Ok(Some(next))
    }

    /// Last cluster of the chain that starts at `first`.
    pub(crate) fn last_cluster(&mut self, first: u32) -> Result<u32, FsError> {
        let limit = self.geometry()?.total_clusters;
        let mut cluster = first;
        let mut steps = 0;
        while let Some(next) = self.follow(cluster)? {
            steps += 1;
            if steps > limit {
                return Err(FsError::CorruptVolume);
            }
            cluster = next;
        }
        Ok(cluster)
    }

    /// Number of clusters in the chain starting at `first` (0 for no chain).
    pub fn chain_len(&mut self, first: u32) -> Result<u32, FsError> {
        let geo = self.geometry()?;
        if !geo.is_data_cluster(first) {
            return Ok(0);
        }
        let mut len = 1;
        let mut cluster = first;
        while let Some(next) = self.follow(cluster)? {
            len += 1;
            if len > geo.total_clusters {
                return Err(FsError::CorruptVolume);
            }
            cluster = next;
        }
        Ok(len)
    }

    /// Count of free data clusters.
    pub fn free_clusters(&mut self) -> Result<u32, FsError> {
        let geo = self.geometry()?;
        let end = geo.total_clusters + 2;
        let mut free = 0;
        let mut cluster = 2;
        while cluster < end {
            let (sector, _) = fat_position(cluster);
            self.read_sector(geo.fat_start_sector + sector)?;
            let sector_end = end.min((sector + 1) * FAT_ENTRIES_PER_SECTOR);
            while cluster < sector_end {
                let (_, off) = fat_position(cluster);
                if get_u32(&self.buf, off) & CLUSTER_MASK == FREE {
                    free += 1;
                }
                cluster += 1;
            }
        }
        Ok(free)
    }
}
