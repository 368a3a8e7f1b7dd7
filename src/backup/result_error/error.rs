use crate::backup::result_error::{AddFunctionName, AddMsg, IntoErrorKind};
use derive_more::Display;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Stable, caller-facing classification of a failure.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidFilename,
    BackupNotFound,
    BackupFailed,
    InvalidBackupFile,
    RestoreFailed,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn is_caller_facing(self) -> bool {
        self != ErrorKind::Internal
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error("Schema mismatch: {0}")]
    Schema(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid filename {name:?}: {reason}")]
    InvalidFilename { name: String, reason: String },
    #[error("Backup not found: {0:?}")]
    BackupNotFound(String),
    #[error("Backup failed: {msg}{}", cause(.error))]
    BackupFailed {
        msg: String,
        error: Option<Box<Error>>,
    },
    #[error("Invalid backup file: {msg}{}", cause(.error))]
    InvalidBackupFile {
        msg: String,
        error: Option<Box<Error>>,
    },
    #[error("Restore failed{}: {msg}{}", entity_suffix(.entity), cause(.error))]
    RestoreFailed {
        entity: Option<String>,
        msg: String,
        error: Option<Box<Error>>,
    },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFunctionName { error: Box<Error>, fn_name: String },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

fn cause(error: &Option<Box<Error>>) -> String {
    match error {
        Some(e) => format!(":\n{}", indent::indent_all_with("  ", e.to_string())),
        None => String::new(),
    }
}

fn entity_suffix(entity: &Option<String>) -> String {
    entity
        .as_ref()
        .map(|e| format!(" for entity {e:?}"))
        .unwrap_or_default()
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Error::WithFunctionName {
            error: Box::new(self),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> IntoErrorKind<S> for Error {
    fn backup_failed(self, msg: S) -> Self {
        if self.kind().is_caller_facing() {
            return self;
        }
        Error::BackupFailed {
            msg: msg.into(),
            error: Some(Box::new(self)),
        }
    }

    fn invalid_backup_file(self, msg: S) -> Self {
        if self.kind().is_caller_facing() {
            return self;
        }
        Error::InvalidBackupFile {
            msg: msg.into(),
            error: Some(Box::new(self)),
        }
    }

    fn restore_failed(self, entity: Option<&str>, msg: S) -> Self {
        if self.kind().is_caller_facing() {
            return self;
        }
        Error::RestoreFailed {
            entity: entity.map(str::to_owned),
            msg: msg.into(),
            error: Some(Box::new(self)),
        }
    }
}

impl Error {
    pub fn invalid_filename<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Error::InvalidFilename {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn backup_not_found<N: Into<String>>(name: N) -> Self {
        Error::BackupNotFound(name.into())
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Error::Config(msg.into())
    }

    pub fn schema<M: Into<String>>(msg: M) -> Self {
        Error::Schema(msg.into())
    }

    pub fn backup_failed_msg<M: Into<String>>(msg: M) -> Self {
        Error::BackupFailed {
            msg: msg.into(),
            error: None,
        }
    }

    pub fn invalid_backup_file_msg<M: Into<String>>(msg: M) -> Self {
        Error::InvalidBackupFile {
            msg: msg.into(),
            error: None,
        }
    }

    pub fn restore_failed_msg<M: Into<String>>(entity: Option<&str>, msg: M) -> Self {
        Error::RestoreFailed {
            entity: entity.map(str::to_owned),
            msg: msg.into(),
            error: None,
        }
    }

    /// Outermost caller-facing kind, looking through context wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidFilename { .. } => ErrorKind::InvalidFilename,
            Error::BackupNotFound(_) => ErrorKind::BackupNotFound,
            Error::BackupFailed { .. } => ErrorKind::BackupFailed,
            Error::InvalidBackupFile { .. } => ErrorKind::InvalidBackupFile,
            Error::RestoreFailed { .. } => ErrorKind::RestoreFailed,
            Error::Config(_) | Error::ValidationError(_) => ErrorKind::Config,
            Error::WithMsg { error, .. } | Error::WithFunctionName { error, .. } => error.kind(),
            Error::LotsOfError(errors) => errors
                .iter()
                .map(Error::kind)
                .find(|k| k.is_caller_facing())
                .unwrap_or(ErrorKind::Internal),
            _ => ErrorKind::Internal,
        }
    }

    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }
}
