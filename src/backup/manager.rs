//! The operations exposed to the surrounding application.
//!
//! Callers are expected to have authenticated and authorized the request
//! already. Every failure is one of the caller-facing [`ErrorKind`]s, see
//! [`ErrorReport`](crate::backup::result_error::report::ErrorReport).
//!
//! [`ErrorKind`]: crate::backup::result_error::error::ErrorKind

use crate::backup::archiver::archive_dir;
use crate::backup::backup_config::BackupConfig;
use crate::backup::backup_root::{timestamp, BackupRoot, ScopedTree, ARCHIVE_EXT};
use crate::backup::catalog::{list_archives, BackupInfo};
use crate::backup::entity::TableRegistry;
use crate::backup::export::export_all;
use crate::backup::function_path;
use crate::backup::restore::{RestoreSession, RestoreSummary};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg, IntoErrorKind};
use crate::backup::validate::{sanitize_filename, validate_filename};
use chrono::{DateTime, Utc};
use function_name::named;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use validator::Validate;

static STAGING_DIR_PREFIX: &str = "staging_";
static UPLOAD_FILE_PREFIX: &str = "upload_";
static ARCHIVE_CONTENT_TYPE: &str = "application/zip";
static BUSY_TIMEOUT_MS: u32 = 5000;
static UPLOAD_SPOOL_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreatedBackup {
    pub filename: String,
    pub path: PathBuf,
    pub tables_exported: usize,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeletedBackup {
    pub filename: String,
}

/// An open archive ready to be streamed to the caller.
#[derive(Debug, Serialize)]
pub struct BackupDownload {
    #[serde(skip)]
    pub file: File,
    pub filename: String,
    pub content_type: &'static str,
    pub content_length: u64,
    pub content_disposition: String,
}

#[derive(Debug)]
pub struct BackupManager {
    config: BackupConfig,
    root: BackupRoot,
    registry: TableRegistry,
}

impl BackupManager {
    /// Validates `config` and makes sure the backup root exists.
    ///
    /// A missing base directory is a `Config` error: nothing in this
    /// subsystem can run without one.
    pub fn new(config: BackupConfig) -> Result<Self> {
        let root_path = config.backup_root_path()?;
        config
            .validate()
            .map_err(Error::from)
            .add_msg("Invalid backup configuration")?;

        let root = BackupRoot::new(root_path);
        root.ensure()?;
        let registry = TableRegistry::from_table_names(config.tables());
        info!(
            "Backup root {:?} with {} registered tables",
            root.path(),
            registry.len()
        );
        Ok(Self {
            config,
            root,
            registry,
        })
    }

    /// Replaces the table registry built from the configured table names.
    pub fn with_registry(mut self, registry: TableRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn root(&self) -> &BackupRoot {
        &self.root
    }

    fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(self.config.database())?;
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys = ON;\nPRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"
        ))?;
        Ok(conn)
    }

    #[named]
    pub fn create_backup(&self) -> Result<CreatedBackup> {
        self.create_backup_at(Utc::now())
            .backup_failed("could not create backup")
            .add_fn_name(function_path!())
    }

    fn create_backup_at(&self, now: DateTime<Utc>) -> Result<CreatedBackup> {
        let stamp = timestamp(now);
        let staging = ScopedTree::new(self.root.create_temp_dir(STAGING_DIR_PREFIX)?);
        let staging_name = staging
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(STAGING_DIR_PREFIX)
            .to_owned();

        let summary = {
            let mut conn = self.open_connection()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
            let summary = export_all(&tx, &self.registry, staging.path())?;
            tx.commit()?;
            summary
        };

        let tmp = ScopedTree::new(
            self.root
                .path()
                .join(format!(".{staging_name}.{ARCHIVE_EXT}.tmp")),
        );
        archive_dir(staging.path(), tmp.path())?;
        let path = self
            .root
            .publish_archive(tmp.path(), self.config.archive_prefix(), &stamp)?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_owned();

        info!(
            "Created backup {:?} with {} tables",
            filename, summary.tables_exported
        );
        Ok(CreatedBackup {
            filename,
            path,
            tables_exported: summary.tables_exported,
            timestamp: stamp,
        })
    }

    /// Never fails: a missing root lists nothing and unreadable entries are
    /// skipped.
    pub fn list_backups(&self) -> Vec<BackupInfo> {
        list_archives(self.root.path())
    }

    /// Opens a stored archive. The only failures are `InvalidFilename` and
    /// `BackupNotFound`; an archive that cannot be opened counts as missing.
    pub fn download_backup(&self, filename: &str) -> Result<BackupDownload> {
        validate_filename(filename, ARCHIVE_EXT)?;
        let path = self.root.existing_archive(filename)?;
        let unreadable = |e: std::io::Error| {
            if e.kind() != ErrorKind::NotFound {
                warn!("Cannot open {:?}: {e}", path);
            }
            Error::backup_not_found(filename)
        };
        let file = File::open(&path).map_err(unreadable)?;
        let content_length = file.metadata().map_err(unreadable)?.len();
        debug!("Serving {:?} ({} bytes)", path, content_length);

        Ok(BackupDownload {
            file,
            filename: filename.to_owned(),
            content_type: ARCHIVE_CONTENT_TYPE,
            content_length,
            content_disposition: format!("attachment; filename=\"{filename}\""),
        })
    }

    #[named]
    pub fn delete_backup(&self, filename: &str) -> Result<DeletedBackup> {
        validate_filename(filename, ARCHIVE_EXT)?;
        let path = self.root.existing_archive(filename)?;
        match std::fs::remove_file(&path) {
            Ok(()) => (),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::backup_not_found(filename));
            }
            Err(e) => {
                return Err(Error::from(e))
                    .backup_failed(format!("could not delete {filename:?}"))
                    .add_fn_name(function_path!());
            }
        }

        info!("Deleted backup {:?}", filename);
        Ok(DeletedBackup {
            filename: filename.to_owned(),
        })
    }

    /// Creates the spool file for an upload. Another request may prune the
    /// uploads directory between creating it and placing the file in it.
    fn create_upload_file(&self, filename: &str) -> Result<(File, PathBuf)> {
        let suffix = format!("_{}", sanitize_filename(filename));
        let mut builder = tempfile::Builder::new();
        builder.prefix(UPLOAD_FILE_PREFIX).suffix(&suffix);

        let mut attempt = 1;
        let spooled = loop {
            let uploads = self.root.uploads_dir()?;
            match builder.tempfile_in(&uploads) {
                Err(e) if e.kind() == ErrorKind::NotFound && attempt < UPLOAD_SPOOL_ATTEMPTS => {
                    debug!("Uploads directory {:?} vanished, recreating it", uploads);
                    attempt += 1;
                }
                res => break res?,
            }
        };
        spooled
            .keep()
            .map_err(|e| Error::from(std::io::Error::from(e)))
    }

    /// Streams `upload` into the uploads directory, at most
    /// `max_upload_size` bytes of it.
    fn store_upload(&self, filename: &str, upload: &mut dyn Read) -> Result<ScopedTree> {
        let (file, path) = self.create_upload_file(filename)?;
        let guard = ScopedTree::new(path);

        let limit = self.config.limits().max_upload_size();
        let mut writer = BufWriter::new(file);
        let written = std::io::copy(&mut upload.take(limit.saturating_add(1)), &mut writer)?;
        if written > limit {
            return Err(Error::invalid_backup_file_msg(format!(
                "upload exceeds {limit} bytes"
            )));
        }
        writer.flush()?;
        debug!("Stored upload {:?} ({} bytes)", guard.path(), written);
        Ok(guard)
    }

    fn restore_archive(&self, archive: &Path, owns_archive: bool) -> Result<RestoreSummary> {
        let mut conn = self
            .open_connection()
            .restore_failed(None, "cannot open database")?;
        RestoreSession::builder()
            .root(&self.root)
            .registry(&self.registry)
            .limits(self.config.limits())
            .archive(archive)
            .owns_archive(owns_archive)
            .preserve_temp_files(*self.config.preserve_temp_files())
            .build()
            .run(&mut conn)
    }

    /// Restores every registered table from an uploaded archive. The upload
    /// is removed afterwards unless temp files are preserved.
    #[named]
    pub fn restore_from_upload(&self, filename: &str, upload: &mut dyn Read) -> Result<RestoreSummary> {
        validate_filename(filename, ARCHIVE_EXT).map_err(|e| Error::InvalidBackupFile {
            msg: format!("rejected upload name {filename:?}"),
            error: Some(Box::new(e)),
        })?;

        let preserve = *self.config.preserve_temp_files();
        let result = self
            .store_upload(filename, upload)
            .restore_failed(None, "could not store upload")
            .and_then(|mut stored| {
                if preserve {
                    stored.keep();
                }
                info!("Restoring from uploaded {:?}", filename);
                self.restore_archive(stored.path(), true)
            });
        if !preserve {
            self.root.prune_uploads_dir();
        }
        result.add_fn_name(function_path!())
    }

    /// Restores every registered table from an archive already in the
    /// backup root. The archive itself is left in place.
    pub fn restore_from_backup(&self, filename: &str) -> Result<RestoreSummary> {
        validate_filename(filename, ARCHIVE_EXT)?;
        let path = self.root.existing_archive(filename)?;
        info!("Restoring from stored backup {:?}", filename);
        self.restore_archive(&path, false)
    }
}
