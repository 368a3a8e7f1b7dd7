use crate::backup::result_error::error::Error;
use crate::backup::result_error::{AddFunctionName, AddMsg, IntoErrorKind};

pub type Result<T> = std::result::Result<T, Error>;

impl<S: Into<String>, R> AddFunctionName<S> for Result<R> {
    fn add_fn_name(self, fn_name: S) -> Self {
        self.map_err(|e| e.add_fn_name(fn_name))
    }
}

impl<R, S: Into<String>> AddMsg<S> for Result<R> {
    fn add_msg(self, msg: S) -> Self {
        self.map_err(|e| e.add_msg(msg))
    }
}

impl<R, S: Into<String>> IntoErrorKind<S> for Result<R> {
    fn backup_failed(self, msg: S) -> Self {
        self.map_err(|e| e.backup_failed(msg))
    }

    fn invalid_backup_file(self, msg: S) -> Self {
        self.map_err(|e| e.invalid_backup_file(msg))
    }

    fn restore_failed(self, entity: Option<&str>, msg: S) -> Self {
        self.map_err(|e| e.restore_failed(entity, msg))
    }
}
