pub mod error;
pub mod report;
pub mod result;

pub trait AddFunctionName<S: Into<String>> {
    fn add_fn_name(self, fn_name: S) -> Self;
}

pub trait AddMsg<S: Into<String>> {
    fn add_msg(self, msg: S) -> Self;
}

/// Lifts an internal failure into one of the caller-facing error kinds.
///
/// Errors that already carry a caller-facing kind pass through untouched, so
/// an `InvalidFilename` raised deep inside a delete is still reported as one.
pub trait IntoErrorKind<S: Into<String>> {
    fn backup_failed(self, msg: S) -> Self;
    fn invalid_backup_file(self, msg: S) -> Self;
    fn restore_failed(self, entity: Option<&str>, msg: S) -> Self;
}
