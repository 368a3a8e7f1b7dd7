use crate::backup::result_error::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Structured failure result handed back to the surrounding application.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    /// Full error chain, only present when diagnostics are exposed.
    pub detail: Option<String>,
}

impl ErrorReport {
    pub fn from_error(error: &Error, expose_detail: bool) -> Self {
        let full = error.to_string();
        let message = full.lines().next().unwrap_or_default().trim_end_matches(':');
        Self {
            kind: error.kind(),
            message: message.to_owned(),
            detail: expose_detail.then_some(full),
        }
    }
}
