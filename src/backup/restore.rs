//! Transactional restore of every registered entity from one archive.
//!
//! A session walks `Received -> Extracting -> Locating -> Clearing -> Loading
//! -> Committing -> Done`. Any failure once the transaction is open ends in
//! `RolledBack` and leaves the store untouched; earlier failures end in
//! `Failed`. Temporary directories (and an uploaded archive) are removed on
//! every exit path unless temp files are preserved for inspection.

use crate::backup::archiver::{locate_data_dir, unarchive};
use crate::backup::backup_config::ArchiveLimits;
use crate::backup::backup_root::{BackupRoot, ScopedTree, ARCHIVE_EXT, DATA_EXT};
use crate::backup::entity::TableRegistry;
use crate::backup::export::data_file_name;
use crate::backup::function_path;
use crate::backup::import::import_entity;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, IntoErrorKind};
use bon::Builder;
use derive_more::Display;
use function_name::named;
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

static EXTRACT_DIR_PREFIX: &str = "restore_";

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Serialize)]
pub enum RestoreState {
    Received,
    Extracting,
    Locating,
    Clearing,
    Loading,
    Committing,
    Done,
    RolledBack,
    Failed,
}

impl RestoreState {
    fn in_transaction(self) -> bool {
        matches!(
            self,
            RestoreState::Clearing | RestoreState::Loading | RestoreState::Committing
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableRowCount {
    pub table: String,
    pub rows: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub tables_restored: usize,
    pub table_rows: Vec<TableRowCount>,
    pub total_rows: usize,
}

/// One restore invocation. Nothing about it is persisted.
#[derive(Debug, Builder)]
pub struct RestoreSession<'a> {
    root: &'a BackupRoot,
    registry: &'a TableRegistry,
    limits: &'a ArchiveLimits,
    #[builder(into)]
    archive: PathBuf,
    /// The archive is an upload and goes away with the session.
    #[builder(default)]
    owns_archive: bool,
    #[builder(default)]
    preserve_temp_files: bool,
    #[builder(skip = RestoreState::Received)]
    state: RestoreState,
    #[builder(skip)]
    table_rows: Vec<TableRowCount>,
}

impl RestoreSession<'_> {
    pub fn state(&self) -> RestoreState {
        self.state
    }

    fn set_state(&mut self, state: RestoreState) {
        debug!("Restore of {:?}: {} -> {}", self.archive, self.state, state);
        self.state = state;
    }

    fn scoped<P: Into<PathBuf>>(&self, path: P) -> ScopedTree {
        let mut tree = ScopedTree::new(path);
        if self.preserve_temp_files {
            tree.keep();
        }
        tree
    }

    /// Runs the whole restore against `conn`. A session runs at most once.
    pub fn run(&mut self, conn: &mut Connection) -> Result<RestoreSummary> {
        if self.state != RestoreState::Received {
            return Err(Error::restore_failed_msg(
                None,
                format!("session already ran and ended in {}", self.state),
            ));
        }

        let upload = self.owns_archive.then(|| self.scoped(&self.archive));
        let result = self.execute(conn);

        let end = match &result {
            Ok(_) => RestoreState::Done,
            Err(_) if self.state.in_transaction() => RestoreState::RolledBack,
            Err(_) => RestoreState::Failed,
        };
        self.set_state(end);
        match &result {
            Ok(summary) => info!(
                "Restored {} tables ({} rows) from {:?}",
                summary.tables_restored, summary.total_rows, self.archive
            ),
            Err(e) => warn!("Restore from {:?} ended in {}: {}", self.archive, end, e),
        }

        if let Some(upload) = upload {
            if self.preserve_temp_files {
                warn!("Preserving uploaded archive {:?} for inspection", upload.path());
            }
        }
        result
    }

    fn check_received(&self) -> Result<()> {
        let has_ext = self
            .archive
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXT));
        if !has_ext {
            return Err(Error::invalid_backup_file_msg(format!(
                "{:?} is not a .{ARCHIVE_EXT} file",
                self.archive.file_name().unwrap_or_default()
            )));
        }

        let metadata = std::fs::metadata(&self.archive)
            .map_err(Error::from)
            .invalid_backup_file("archive cannot be read")?;
        if !metadata.is_file() {
            return Err(Error::invalid_backup_file_msg("archive is not a regular file"));
        }
        if metadata.len() == 0 {
            return Err(Error::invalid_backup_file_msg("archive is empty"));
        }
        Ok(())
    }

    fn warn_unknown_data_files(&self, data_dir: &Path) -> Result<()> {
        for entry in WalkDir::new(data_dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            let is_data = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(DATA_EXT));
            let known = path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| self.registry.contains(s));
            if entry.file_type().is_file() && is_data && !known {
                warn!("Ignoring {:?}: no registered entity by that name", path);
            }
        }
        Ok(())
    }

    #[named]
    fn execute(&mut self, conn: &mut Connection) -> Result<RestoreSummary> {
        self.check_received()?;

        self.set_state(RestoreState::Extracting);
        let extract_dir = self.scoped(
            self.root
                .create_temp_dir(EXTRACT_DIR_PREFIX)
                .restore_failed(None, "cannot create extraction directory")?,
        );
        if self.preserve_temp_files {
            warn!("Preserving extraction directory {:?} for inspection", extract_dir.path());
        }
        let extracted = unarchive(&self.archive, extract_dir.path(), self.limits)
            .invalid_backup_file("archive cannot be extracted")?;
        debug!("Extracted {} files into {:?}", extracted.len(), extract_dir.path());

        self.set_state(RestoreState::Locating);
        let expected = self
            .registry
            .iter()
            .map(|entity| data_file_name(entity.name()))
            .collect::<Vec<_>>();
        let data_dir = locate_data_dir(extract_dir.path(), &expected)
            .invalid_backup_file("cannot scan extracted archive")?
            .ok_or_else(|| {
                Error::invalid_backup_file_msg(format!(
                    "archive holds none of the expected data files ({})",
                    expected.join(", ")
                ))
            })?;
        self.warn_unknown_data_files(&data_dir)
            .invalid_backup_file("cannot scan extracted archive")?;

        self.set_state(RestoreState::Clearing);
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(Error::from)
            .restore_failed(None, "cannot open transaction")?;
        for entity in self.registry.iter_clear_order() {
            let deleted = entity
                .delete_all(&tx)
                .restore_failed(Some(entity.name()), "clearing existing rows")?;
            debug!("Cleared {} rows of {:?}", deleted, entity.name());
        }

        self.set_state(RestoreState::Loading);
        self.table_rows.clear();
        for entity in self.registry.iter() {
            let file = data_dir.join(data_file_name(entity.name()));
            let rows = import_entity(&file, entity.as_ref(), &tx)
                .restore_failed(Some(entity.name()), "loading data file")
                .add_fn_name(function_path!())?;
            self.table_rows.push(TableRowCount {
                table: entity.name().to_owned(),
                rows,
            });
        }

        self.set_state(RestoreState::Committing);
        tx.commit()
            .map_err(Error::from)
            .restore_failed(None, "commit failed")?;

        Ok(RestoreSummary {
            tables_restored: self.table_rows.len(),
            total_rows: self.table_rows.iter().map(|t| t.rows).sum(),
            table_rows: self.table_rows.clone(),
        })
    }
}
