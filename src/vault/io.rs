//! Filesystem primitives for the container engine.
//!
//! Three rules govern every write: containers and staging files are
//! owner-only, data is fsynced before the metadata that references it, and
//! whole-file replacement goes through a sibling temp file plus atomic
//! rename with a directory fsync behind it.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::REWRITE_BUF_SIZE;
use crate::crypto::random_bytes;
use crate::error::Result;

#[cfg(unix)]
use std::os::unix::fs::{FileExt, OpenOptionsExt, PermissionsExt};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Reads exactly `buf.len()` bytes at `offset`.
#[cfg(unix)]
pub fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset)?;
    Ok(())
}

/// Writes the whole buffer at `offset` through a single positioned write.
#[cfg(unix)]
pub fn write_all_at(file: &File, buf: &[u8], offset: u64) -> Result<()> {
    file.write_all_at(buf, offset)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut f = file;
    f.seek(SeekFrom::Start(offset))?;
    f.read_exact(buf)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn write_all_at(file: &File, buf: &[u8], offset: u64) -> Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    let mut f = file;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(buf)?;
    Ok(())
}

/// Opens an existing container for reading and positioned writes.
pub fn open_rw(path: &Path) -> Result<File> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    Ok(file)
}

/// Creates a new owner-only file, truncating any previous content.
pub fn create_owner_only(path: &Path) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    opts.mode(0o600);
    let file = opts.open(path)?;
    Ok(file)
}

/// Creates a directory (and parents) readable by the owner only.
///
/// A directory that already exists keeps its permissions.
pub fn ensure_dir_owner_only(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        fs::create_dir_all(dir)?;
        #[cfg(unix)]
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Fsyncs a directory so a rename inside it is durable.
pub fn fsync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

/// The sibling temp path used by staged whole-file writes.
pub fn tmp_path(target: &Path) -> PathBuf {
    let mut p = target.as_os_str().to_os_string();
    p.push(".tmp");
    PathBuf::from(p)
}

/// Builds a file at `<target>.tmp`, fsyncs it, then renames it over `target`.
///
/// The temp file is unlinked on any failure, and the parent directory is
/// fsynced after the rename so the replacement survives power loss.
pub fn replace_file<F>(target: &Path, build: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let tmp = tmp_path(target);
    let result = (|| {
        let mut file = create_owner_only(&tmp)?;
        build(&mut file)?;
        file.sync_all()?;
        fs::rename(&tmp, target)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
        return result;
    }

    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        fsync_dir(parent)?;
    }
    Ok(())
}

/// Overwrites a file with random bytes, fsyncs, then unlinks it.
///
/// Best-effort scrubbing: the filesystem may still hold stale copies in
/// journal or wear-leveled blocks.
pub fn secure_wipe(path: &Path) -> Result<()> {
    let len = fs::metadata(path)?.len();
    {
        let file = OpenOptions::new().write(true).open(path)?;
        let mut remaining = len;
        let mut offset = 0u64;
        let mut noise = vec![0u8; REWRITE_BUF_SIZE.min(len as usize).max(1)];
        while remaining > 0 {
            let n = noise.len().min(remaining as usize);
            random_bytes(&mut noise[..n]);
            write_all_at(&file, &noise[..n], offset)?;
            offset += n as u64;
            remaining -= n as u64;
        }
        file.sync_all()?;
    }
    fs::remove_file(path)?;
    Ok(())
}
