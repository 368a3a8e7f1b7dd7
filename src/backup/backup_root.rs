//! Lifecycle of the backup root directory.
//!
//! The root holds published archives as a flat list of `<prefix>_<timestamp>.zip`
//! files next to transient `uploads/`, `staging_*` and `restore_*` directories.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub static ARCHIVE_EXT: &str = "zip";
pub static DATA_EXT: &str = "csv";

static TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
static UPLOADS_DIR: &str = "uploads";
/// Upper bound on `_N` suffixes tried when two archives share a second.
static MAX_NAME_SUFFIX: u32 = 1000;

/// Fixed-width, lexicographically sortable `YYYYMMDD_HHMMSS`.
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Recursively removes `path`; a missing path is not an error.
pub fn remove_tree<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    let res = match std::fs::symlink_metadata(path) {
        Ok(md) if md.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    match res {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::from(e).add_msg(format!("Failed to remove {:?}", path))),
    }
}

#[derive(Clone, Debug)]
pub struct BackupRoot {
    path: PathBuf,
}

impl BackupRoot {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the root if it is missing. Idempotent.
    pub fn ensure(&self) -> Result<&Path> {
        std::fs::create_dir_all(&self.path)
            .map_err(Error::from)
            .add_msg(format!("Failed to create backup root {:?}", self.path))?;
        Ok(&self.path)
    }

    pub fn uploads_dir(&self) -> Result<PathBuf> {
        let dir = self.ensure()?.join(UPLOADS_DIR);
        std::fs::create_dir_all(&dir)
            .map_err(Error::from)
            .add_msg(format!("Failed to create uploads directory {:?}", dir))?;
        Ok(dir)
    }

    /// Removes the uploads directory if nothing is left in it. A concurrent
    /// upload may see it vanish and has to recreate it.
    pub fn prune_uploads_dir(&self) {
        if let Err(e) = std::fs::remove_dir(self.path.join(UPLOADS_DIR)) {
            debug!("Uploads directory kept: {e}");
        }
    }

    /// Creates a fresh, uniquely named directory directly under the root.
    pub fn create_temp_dir(&self, prefix: &str) -> Result<PathBuf> {
        let root = self.ensure()?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(root)
            .map_err(Error::from)
            .add_msg(format!("Failed to create {prefix}* directory in {:?}", root))?
            .keep();
        debug!("Created temporary directory {:?}", dir);
        Ok(dir)
    }

    pub fn archive_file_name(&self, prefix: &str, stamp: &str, suffix: u32) -> String {
        match suffix {
            0 => format!("{prefix}_{stamp}.{ARCHIVE_EXT}"),
            n => format!("{prefix}_{stamp}_{n}.{ARCHIVE_EXT}"),
        }
    }

    /// Moves a fully written archive at `tmp` to its public name without ever
    /// replacing an existing archive. Same-second collisions get a `_N` suffix.
    pub fn publish_archive(&self, tmp: &Path, prefix: &str, stamp: &str) -> Result<PathBuf> {
        for suffix in 0..MAX_NAME_SUFFIX {
            let candidate = self.path.join(self.archive_file_name(prefix, stamp, suffix));
            match std::fs::hard_link(tmp, &candidate) {
                Ok(()) => {
                    remove_tree(tmp)?;
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!("Archive name {:?} taken, trying next suffix", candidate);
                }
                Err(e) => {
                    // Filesystems without hard links: best effort rename.
                    if candidate.exists() {
                        continue;
                    }
                    warn!("Hard link into {:?} failed ({e}), renaming instead", candidate);
                    std::fs::rename(tmp, &candidate)
                        .map_err(Error::from)
                        .add_msg(format!("Failed to publish archive {:?}", candidate))?;
                    return Ok(candidate);
                }
            }
        }

        Err(Error::from(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free archive name for {prefix}_{stamp}"),
        )))
    }

    /// Resolves a validated file name to a regular file under the root.
    /// Anything that cannot be read as one is reported as not found.
    pub fn existing_archive(&self, file_name: &str) -> Result<PathBuf> {
        let path = self.path.join(file_name);
        match std::fs::symlink_metadata(&path) {
            Ok(md) if md.is_file() => Ok(path),
            Ok(_) => Err(Error::backup_not_found(file_name)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::backup_not_found(file_name)),
            Err(e) => {
                warn!("Cannot stat {:?}: {e}", path);
                Err(Error::backup_not_found(file_name))
            }
        }
    }
}

/// Removes its directory tree when dropped, unless told to keep it.
#[derive(Debug)]
pub struct ScopedTree {
    path: PathBuf,
    keep: bool,
}

impl ScopedTree {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            keep: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for ScopedTree {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = remove_tree(&self.path) {
            warn!("Cleanup failed: {e}");
        }
    }
}
