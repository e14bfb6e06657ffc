//! Shell commands over a mounted volume. Output goes to `out` so the tests can capture it.

use std::io::Write;

use anyhow::Result;
use fat32::{BlockDev, DirId, Fat32, FileId, FsError};

/// Transfer size for `cat`, one sector at a time.
const CHUNK: usize = 512;

pub fn ls<D: BlockDev>(fs: &mut Fat32<D>, out: &mut impl Write) -> Result<()> {
    let dir = fs.opendir("/")?;
    let listed = list_entries(fs, dir, out);
    let closed = fs.closedir(dir);
    let total = listed?;
    closed?;
    writeln!(out, "Total entries: {total}")?;
    Ok(())
}

fn list_entries<D: BlockDev>(fs: &mut Fat32<D>, dir: DirId, out: &mut impl Write) -> Result<usize> {
    let mut total = 0;
    while let Some(entry) = fs.readdir(dir)? {
        let name = entry.display_name();
        if entry.is_dir() {
            writeln!(out, "{name:<12} {:>10} [DIR]", entry.size)?;
        } else {
            writeln!(out, "{name:<12} {:>10}", entry.size)?;
        }
        total += 1;
    }
    Ok(total)
}

pub fn cat<D: BlockDev>(fs: &mut Fat32<D>, name: &str, out: &mut impl Write) -> Result<u64> {
    let file = fs.open(name)?;
    let copied = copy_out(fs, file, out);
    let closed = fs.close(file);
    let copied = copied?;
    closed?;
    Ok(copied)
}

fn copy_out<D: BlockDev>(fs: &mut Fat32<D>, file: FileId, out: &mut impl Write) -> Result<u64> {
    let mut buf = [0u8; CHUNK];
    let mut copied = 0u64;
    loop {
        let n = fs.read(file, &mut buf)?;
        if n == 0 {
            return Ok(copied);
        }
        out.write_all(&buf[..n])?;
        copied += n as u64;
    }
}

/// Create (or truncate) `name` and store `text`, plus a trailing newline when
/// the whole text fit. Returns the number of bytes written.
pub fn write_text<D: BlockDev>(fs: &mut Fat32<D>, name: &str, text: &str) -> Result<usize> {
    let file = fs.create(name)?;
    let written = write_all_or_partial(fs, file, text.as_bytes());
    let closed = fs.close(file);
    let written = written?;
    closed?;
    Ok(written)
}

fn write_all_or_partial<D: BlockDev>(fs: &mut Fat32<D>, file: FileId, data: &[u8]) -> Result<usize> {
    let n = fs.write(file, data)?;
    if n < data.len() {
        log::warn!("write: volume full after {n} of {} bytes", data.len());
        return Ok(n);
    }
    match fs.write(file, b"\n") {
        Ok(nl) => Ok(n + nl),
        Err(FsError::OutOfSpace) => {
            log::warn!("write: no room for the trailing newline");
            Ok(n)
        }
        Err(err) => Err(err.into()),
    }
}

pub fn fsinfo<D: BlockDev>(fs: &mut Fat32<D>, out: &mut impl Write) -> Result<()> {
    let info = fs.volume_info()?;
    let free = fs.free_clusters()?;
    writeln!(out, "Filesystem type: FAT32")?;
    writeln!(out, "Bytes per sector: {}", info.bytes_per_sector)?;
    writeln!(out, "Sectors per cluster: {}", info.sectors_per_cluster)?;
    writeln!(out, "Bytes per cluster: {}", info.bytes_per_cluster)?;
    writeln!(out, "Total clusters: {}", info.total_clusters)?;
    writeln!(out, "Free clusters: {free}")?;
    writeln!(out, "Root cluster: {}", info.root_cluster)?;
    writeln!(out, "Volume ID: {:08X}", info.volume_id)?;
    let label = if info.label.is_empty() { "(none)" } else { info.label.as_str() };
    writeln!(out, "Volume label: {label}")?;
    Ok(())
}
