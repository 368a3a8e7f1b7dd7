use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::validate::{
    validate_dir_exist_or_created, validate_sql_file, validate_table_names,
    validate_valid_archive_base_name,
};
use bon::Builder;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use validator::Validate;

static DEFAULT_MAX_UPLOAD_SIZE: u64 = 1 << 30;
static DEFAULT_MAX_ENTRIES: usize = 1024;
static DEFAULT_MAX_ENTRY_SIZE: u64 = 1 << 30;
static DEFAULT_MAX_TOTAL_SIZE: u64 = 4 << 30;

fn default_backup_dir_name() -> String {
    "backups".to_owned()
}

fn default_archive_prefix() -> String {
    "backup".to_owned()
}

/// Configuration of the backup subsystem.
///
/// Loaded once at startup and handed to
/// [`BackupManager`](crate::backup::manager::BackupManager); nothing here is
/// read from process-wide state afterwards.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupConfig {
    /// Base resource directory. Required; the backup root lives below it.
    #[validate(custom(function = validate_dir_exist_or_created))]
    #[builder(into)]
    base_dir: Option<PathBuf>,
    #[serde(default = "default_backup_dir_name")]
    #[validate(custom(function = validate_valid_archive_base_name))]
    #[builder(default = default_backup_dir_name(), into)]
    backup_dir_name: String,
    #[serde(default = "default_archive_prefix")]
    #[validate(custom(function = validate_valid_archive_base_name))]
    #[builder(default = default_archive_prefix(), into)]
    archive_prefix: String,
    /// SQLite database holding the registered tables.
    #[validate(custom(function = validate_sql_file))]
    #[builder(into)]
    database: PathBuf,
    /// Registered tables, parents before children.
    #[validate(custom(function = validate_table_names))]
    #[builder(into)]
    tables: Vec<String>,
    /// Keep uploads and extraction directories after a restore for inspection.
    #[serde(default)]
    #[builder(default)]
    preserve_temp_files: bool,
    /// Include the full error chain in reports. Leave off in production.
    #[serde(default)]
    #[builder(default)]
    expose_error_detail: bool,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    limits: ArchiveLimits,
}

/// Caps applied to uploaded and extracted archives.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, CopyGetters, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
#[getset(get_copy = "pub")]
pub struct ArchiveLimits {
    #[validate(range(min = 1))]
    #[builder(default = DEFAULT_MAX_UPLOAD_SIZE)]
    max_upload_size: u64,
    #[validate(range(min = 1))]
    #[builder(default = DEFAULT_MAX_ENTRIES)]
    max_entries: usize,
    /// Decompressed bytes allowed for a single entry.
    #[validate(range(min = 1))]
    #[builder(default = DEFAULT_MAX_ENTRY_SIZE)]
    max_entry_size: u64,
    /// Decompressed bytes allowed for the whole archive.
    #[validate(range(min = 1))]
    #[builder(default = DEFAULT_MAX_TOTAL_SIZE)]
    max_total_size: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            max_entries: DEFAULT_MAX_ENTRIES,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
        }
    }
}

impl BackupConfig {
    pub fn load_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        File::open(path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader::<_, BackupConfig>(f).map_err(Error::from))
            .add_msg(format!("Parse YAML config failed: {:?}", path))
    }

    pub fn with_base_dir<P: Into<PathBuf>>(mut self, base_dir: P) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// `<base_dir>/<backup_dir_name>`; fails when no base directory is configured.
    pub fn backup_root_path(&self) -> Result<PathBuf> {
        self.base_dir
            .as_ref()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.join(&self.backup_dir_name))
            .ok_or_else(|| Error::config("base_dir is not configured"))
    }
}
