//! Listing of published archives.

use crate::backup::backup_root::ARCHIVE_EXT;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::io::ErrorKind;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

static SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub filename: String,
    pub size: u64,
    pub size_formatted: String,
    pub created_at: DateTime<Utc>,
}

/// Human readable size in base 1024 units with at most two decimals.
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let number = format!("{value:.2}");
    let number = number.trim_end_matches('0').trim_end_matches('.');
    format!("{number} {}", SIZE_UNITS[unit])
}

fn is_archive(name: &str) -> bool {
    !name.starts_with('.')
        && Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXT))
}

fn backup_info(entry: &walkdir::DirEntry, name: &str) -> std::io::Result<BackupInfo> {
    let metadata = entry.metadata()?;
    Ok(BackupInfo {
        filename: name.to_owned(),
        size: metadata.len(),
        size_formatted: format_size(metadata.len()),
        created_at: DateTime::<Utc>::from(metadata.modified()?),
    })
}

/// Archives directly under `root`, newest first. A missing root lists
/// nothing and unreadable entries are skipped.
pub fn list_archives(root: &Path) -> Vec<BackupInfo> {
    match std::fs::symlink_metadata(root) {
        Ok(_) => (),
        Err(e) if e.kind() == ErrorKind::NotFound => return vec![],
        Err(e) => {
            warn!("Cannot read backup root {:?}: {e}", root);
            return vec![];
        }
    }

    let mut backups = vec![];
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {:?}: {e}", root);
                continue;
            }
        };
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !entry.file_type().is_file() || !is_archive(name) {
            continue;
        }

        match backup_info(&entry, name) {
            Ok(info) => backups.push(info),
            Err(e) => warn!("Skipping {:?}: {e}", entry.path()),
        }
    }

    backups.sort_by(|a, b| {
        (Reverse(a.created_at), Reverse(&a.filename)).cmp(&(Reverse(b.created_at), Reverse(&b.filename)))
    });
    backups
}
