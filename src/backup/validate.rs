//! Validation of user supplied file names and configuration values.
//!
//! Every file name that arrives from outside (download, delete, restore
//! upload) goes through [`validate_filename`] before it is joined onto the
//! backup root. [`sanitize_filename`] is only a normalizer for names we are
//! about to create ourselves; it never replaces validation.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use rusqlite::{Connection, OpenFlags};
use sanitize_filename::{is_sanitized, sanitize, sanitize_with_options, Options};
use validator::ValidationError;

use std::collections::HashSet;
use std::path::{Component, Path};
use std::result;

/// Rejects empty names, traversal attempts, separators, NUL bytes, absolute
/// paths and names without the `required_ext` extension.
pub fn validate_filename<S: AsRef<str>>(name: S, required_ext: &str) -> Result<()> {
    let name = name.as_ref();
    let reject = |reason: &str| Err(Error::invalid_filename(name, reason));

    if name.trim().is_empty() {
        return reject("must not be empty");
    }
    if name.contains('\0') {
        return reject("must not contain a null byte");
    }
    if name.contains("..") {
        return reject("must not contain '..'");
    }
    if name.contains('/') || name.contains('\\') {
        return reject("must not contain path separators");
    }

    let path = Path::new(name);
    if path.is_absolute() || path.has_root() {
        return reject("must not be an absolute path");
    }
    let mut components = path.components();
    if !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) {
        return reject("must be a single plain file name");
    }

    let has_ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(required_ext));
    if !has_ext {
        return Err(Error::invalid_filename(
            name,
            format!("must end with .{required_ext}"),
        ));
    }

    Ok(())
}

/// Reduces `name` to its last path component and replaces every character
/// outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename<S: AsRef<str>>(name: S) -> String {
    let base = name
        .as_ref()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let replaced: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = sanitize_with_options(
        replaced,
        Options {
            windows: true,
            truncate: true,
            replacement: "_",
        },
    );

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_owned()
    } else {
        cleaned
    }
}

pub fn validate_valid_archive_base_name<S: AsRef<str>>(name: S) -> result::Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() || !is_sanitized(name) || sanitize_filename(name) != name {
        return Err(ValidationError::new("InvalidArchiveBaseName").with_message(
            format!(
                "Invalid file name {:?}, try sanitizing like {:?}",
                name,
                sanitize_filename(sanitize(name))
            )
            .into(),
        ));
    }

    Ok(())
}

pub fn validate_table_names(tables: &[String]) -> result::Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for table in tables {
        validate_valid_archive_base_name(table).map_err(|_| {
            ValidationError::new("InvalidTableName").with_message(
                format!("table name {table:?} cannot be used as a data file name").into(),
            )
        })?;
        if !seen.insert(table.as_str()) {
            return Err(ValidationError::new("DuplicateTableName")
                .with_message(format!("table {table:?} is listed twice").into()));
        }
    }

    Ok(())
}

pub fn validate_dir_exist_or_created<P: AsRef<Path>>(dir: P) -> result::Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        return std::fs::create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory").with_message(
                format!("cannot create or access base_dir path {:?}: {}", dir, e).into(),
            )
        });
    }

    Ok(())
}

pub fn validate_sql_file<P: AsRef<Path>>(path: P) -> result::Result<(), ValidationError> {
    let path = path.as_ref();
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map(|_| ())
    .map_err(|e| {
        ValidationError::new("InvalidSqlFile")
            .with_message(format!("cannot open sql file {:?}: {}", path, e).into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::result_error::error::ErrorKind;
    use tempfile::TempDir;

    fn assert_rejected(name: &str) {
        let err = validate_filename(name, "zip").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFilename, "{name:?} was accepted");
    }

    #[test]
    fn test_accepts_plain_archive_name() {
        assert!(validate_filename("backup_20240102_030405.zip", "zip").is_ok());
        assert!(validate_filename("Backup.ZIP", "zip").is_ok());
    }

    #[test]
    fn test_rejects_traversal_and_separators() {
        for name in [
            "../backup.zip",
            "..",
            "a..b.zip",
            "/etc/passwd.zip",
            "/backup.zip",
            "dir/backup.zip",
            "dir\\backup.zip",
            "..\\..\\backup.zip",
            "backup\0.zip",
        ] {
            assert_rejected(name);
        }
    }

    #[test]
    fn test_rejects_empty_and_whitespace() {
        assert_rejected("");
        assert_rejected("   ");
    }

    #[test]
    fn test_rejects_wrong_extension() {
        assert_rejected("backup.tar.gz");
        assert_rejected("backup");
        assert_rejected(".zip");
        assert_rejected("backup.zip.exe");
    }

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\dump.zip"), "dump.zip");
    }

    #[test]
    fn test_sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("my backup(1).zip"), "my_backup_1_.zip");
        assert_eq!(sanitize_filename("naïve.zip"), "na_ve.zip");
    }

    #[test]
    fn test_sanitize_never_returns_empty_or_dots() {
        assert_eq!(sanitize_filename(""), "_");
        assert_eq!(sanitize_filename("a/.."), "_");
        assert_eq!(sanitize_filename("dir/"), "_");
    }

    #[test]
    fn test_validate_table_names() {
        assert!(validate_table_names(&["users".into(), "orders".into()]).is_ok());
        assert!(validate_table_names(&["users".into(), "users".into()]).is_err());
        assert!(validate_table_names(&["../users".into()]).is_err());
        assert!(validate_table_names(&["order items".into()]).is_err());
    }

    #[test]
    fn test_validate_dir_exist_or_created() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b");
        assert!(validate_dir_exist_or_created(&nested).is_ok());
        assert!(nested.is_dir());

        let file = temp_dir.path().join("file");
        std::fs::write(&file, "x").unwrap();
        assert!(validate_dir_exist_or_created(&file).is_err());
    }
}
