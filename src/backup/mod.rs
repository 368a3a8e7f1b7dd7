pub mod archiver;
pub mod backup_config;
pub mod backup_root;
pub mod catalog;
pub mod entity;
pub mod export;
pub mod import;
pub mod manager;
pub mod restore;
pub mod result_error;
pub mod validate;

#[cfg(test)]
mod test_support;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
