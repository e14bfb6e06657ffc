//! Fresh FAT32 images, formatted and populated with `fatfs`.

use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use fat32::{BootSector, FsError, SECTOR_SIZE, ShortName, VolumeDescriptor};

pub struct ImageOptions {
    pub size_mib: u32,
    pub label: Option<String>,
    /// Host files copied into the root directory under their 8.3 names.
    pub files: Vec<PathBuf>,
}

/// Format a FAT32 image of `size_mib` MiB at `path` and copy `files` into it.
///
/// `fatfs` formats small images as FAT12/16 even when asked for FAT32, so
/// the result is checked and anything the driver would not mount is refused
/// (`NotFat32`) before `path` is written.
pub fn create_image(path: &Path, opts: &ImageOptions) -> Result<()> {
    let size = usize::try_from(u64::from(opts.size_mib) * 1024 * 1024)
        .context("image size does not fit in memory")?;
    let mut disk = Cursor::new(vec![0u8; size]);

    let mut format = fatfs::FormatVolumeOptions::new().fat_type(fatfs::FatType::Fat32);
    if let Some(label) = &opts.label {
        format = format.volume_label(volume_label(label)?);
    }
    fatfs::format_volume(&mut disk, format)
        .with_context(|| format!("formatting a {} MiB FAT32 volume", opts.size_mib))?;
    ensure_fat32(disk.get_ref())
        .with_context(|| format!("{} MiB is too small for a FAT32 volume", opts.size_mib))?;

    disk.seek(SeekFrom::Start(0))?;
    let fs = fatfs::FileSystem::new(&mut disk, fatfs::FsOptions::new())
        .context("reopening the formatted volume")?;
    {
        let root = fs.root_dir();
        for host in &opts.files {
            let file_name = host
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("{} has no usable file name", host.display()))?;
            let short = ShortName::parse(file_name)
                .with_context(|| format!("{file_name} is not a valid 8.3 name"))?;
            let data = std::fs::read(host).with_context(|| format!("reading {}", host.display()))?;

            let mut f = root.create_file(short.display().as_str())?;
            f.truncate()?;
            f.write_all(&data)?;
            log::info!("mkimage: added {short} ({} bytes)", data.len());
        }
    }
    fs.unmount()?;

    std::fs::write(path, disk.into_inner())
        .with_context(|| format!("writing {}", path.display()))?;
    log::info!("mkimage: wrote {} ({} MiB)", path.display(), opts.size_mib);
    Ok(())
}

/// Refuse a freshly formatted image that is not the FAT32 layout the driver mounts.
fn ensure_fat32(image: &[u8]) -> Result<(), FsError> {
    let sector: &[u8; SECTOR_SIZE] = image
        .get(..SECTOR_SIZE)
        .and_then(|s| s.try_into().ok())
        .ok_or(FsError::InvalidBootSector)?;
    let boot = BootSector::parse(sector)?;
    VolumeDescriptor::from_boot_sector(&boot)?;
    Ok(())
}

/// Upper-cased, space-padded boot-sector label.
pub fn volume_label(label: &str) -> Result<[u8; 11]> {
    if label.len() > 11 {
        bail!("volume label {label:?} is longer than 11 characters");
    }
    let mut raw = [b' '; 11];
    for (dst, b) in raw.iter_mut().zip(label.bytes()) {
        if !(b.is_ascii_graphic() || b == b' ') {
            bail!("volume label {label:?} must be printable ASCII");
        }
        *dst = b.to_ascii_uppercase();
    }
    Ok(raw)
}
