//! Zip container for a staging directory of data files.
//!
//! Extraction treats the archive as hostile input: entry names are checked
//! component by component before anything touches the destination, symlink
//! entries are skipped, and size limits are enforced on the bytes actually
//! inflated rather than on what the entry headers claim.

use crate::backup::backup_config::ArchiveLimits;
use crate::backup::backup_root::remove_tree;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg, IntoErrorKind};
use function_name::named;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

/// Packs the regular files directly under `source_dir` into a new zip at
/// `out_file`, in file name order. Nothing is left at `out_file` on failure.
#[named]
pub fn archive_dir(source_dir: &Path, out_file: &Path) -> Result<usize> {
    let file = File::create_new(out_file)
        .map_err(Error::from)
        .add_msg(format!("Failed to create archive {:?}", out_file))?;
    write_archive(source_dir, file)
        .map_err(|e| match remove_tree(out_file) {
            Ok(()) => e,
            Err(cleanup) => e.chain(cleanup),
        })
        .add_msg(format!("Failed to archive {:?} into {:?}", source_dir, out_file))
        .add_fn_name(function_path!())
}

fn write_archive(source_dir: &Path, out: File) -> Result<usize> {
    let files = WalkDir::new(source_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) if entry.file_type().is_file() => Some(Ok(entry.into_path())),
            Ok(_) => None,
            Err(e) => Some(Err(Error::from(e))),
        })
        .collect::<Result<Vec<_>>>()?;

    let mut zip = ZipWriter::new(BufWriter::new(out));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for path in &files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::backup_failed_msg(format!("non UTF-8 file name {:?}", path)))?;
        zip.start_file(name, options)?;
        std::io::copy(&mut File::open(path)?, &mut zip)?;
        debug!("Added {:?} to archive", name);
    }

    zip.finish()?
        .into_inner()
        .map_err(std::io::IntoInnerError::into_error)?
        .sync_all()?;
    Ok(files.len())
}

/// Running totals checked against [`ArchiveLimits`] while inflating.
#[derive(Debug)]
struct ExtractionQuota<'a> {
    limits: &'a ArchiveLimits,
    files: usize,
    bytes: u64,
}

impl<'a> ExtractionQuota<'a> {
    fn new(limits: &'a ArchiveLimits) -> Self {
        Self {
            limits,
            files: 0,
            bytes: 0,
        }
    }

    /// Most bytes the next entry may inflate to.
    fn entry_budget(&self) -> u64 {
        self.limits
            .max_entry_size()
            .min(self.limits.max_total_size().saturating_sub(self.bytes))
    }

    fn record_file(&mut self, name: &str, size: u64) -> Result<()> {
        self.files += 1;
        self.bytes = self.bytes.saturating_add(size);

        if self.files > self.limits.max_entries() {
            return Err(Error::invalid_backup_file_msg(format!(
                "archive has more than {} files",
                self.limits.max_entries()
            )));
        }
        if size > self.limits.max_entry_size() {
            return Err(Error::invalid_backup_file_msg(format!(
                "entry {name:?} inflates beyond {} bytes",
                self.limits.max_entry_size()
            )));
        }
        if self.bytes > self.limits.max_total_size() {
            return Err(Error::invalid_backup_file_msg(format!(
                "archive inflates beyond {} bytes",
                self.limits.max_total_size()
            )));
        }
        Ok(())
    }
}

/// Relative path an entry may be written to, or an error for names that
/// could land outside the destination.
fn safe_entry_path(name: &str) -> Result<PathBuf> {
    let reject = |reason: &str| {
        Err(Error::invalid_backup_file_msg(format!(
            "unsafe entry name {name:?}: {reason}"
        )))
    };

    if name.contains('\0') {
        return reject("contains a null byte");
    }
    if name.contains('\\') {
        return reject("contains a backslash");
    }

    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => (),
            Component::ParentDir => return reject("contains a parent directory segment"),
            Component::RootDir | Component::Prefix(_) => return reject("is absolute"),
        }
    }
    Ok(relative)
}

fn is_symlink<R: Read + Seek>(entry: &zip::read::ZipFile<'_, R>) -> bool {
    entry
        .unix_mode()
        .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
}

/// Expands `in_file` into the existing directory `dest_dir` and returns the
/// extracted files, relative to `dest_dir`.
///
/// Every rejection is an `InvalidBackupFile` error; files written before the
/// rejection stay behind for the caller to remove with the directory.
#[named]
pub fn unarchive(in_file: &Path, dest_dir: &Path, limits: &ArchiveLimits) -> Result<Vec<PathBuf>> {
    let reader = BufReader::new(File::open(in_file)?);
    let mut archive = ZipArchive::new(reader)
        .map_err(Error::from)
        .invalid_backup_file("not a readable zip archive")?;
    if archive.len() > limits.max_entries() {
        return Err(Error::invalid_backup_file_msg(format!(
            "archive lists {} entries, at most {} allowed",
            archive.len(),
            limits.max_entries()
        )));
    }

    let mut quota = ExtractionQuota::new(limits);
    let mut extracted = vec![];
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(Error::from)
            .invalid_backup_file(format!("unreadable entry #{i}"))?;
        let name = entry.name().to_owned();
        let relative = safe_entry_path(&name)?;
        if entry.enclosed_name().is_none() {
            return Err(Error::invalid_backup_file_msg(format!(
                "entry {name:?} escapes the extraction directory"
            )));
        }
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = dest_dir.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if is_symlink(&entry) {
            warn!("Skipping symlink entry {:?}", name);
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = match File::create_new(&target) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::invalid_backup_file_msg(format!(
                    "duplicate entry {name:?}"
                )));
            }
            Err(e) => return Err(Error::from(e).add_msg(format!("Failed to create {:?}", target))),
        };

        let budget = quota.entry_budget();
        let written = std::io::copy(&mut (&mut entry).take(budget.saturating_add(1)), &mut out)
            .map_err(Error::from)
            .invalid_backup_file(format!("corrupt entry {name:?}"))
            .add_fn_name(function_path!())?;
        quota.record_file(&name, written)?;
        debug!("Extracted {:?} ({} bytes)", name, written);
        extracted.push(relative);
    }

    Ok(extracted)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_none_or(|n| n.starts_with('.') || n == "__MACOSX")
}

fn holds_data_file(dir: &Path, data_files: &[String]) -> bool {
    data_files.iter().any(|name| dir.join(name).is_file())
}

/// Directory holding the expected `data_files`: `extract_dir` itself when
/// any of them sits at the top level, or else the first subdirectory one
/// level down (by name) that holds one. Never looks deeper.
pub fn locate_data_dir(extract_dir: &Path, data_files: &[String]) -> Result<Option<PathBuf>> {
    if holds_data_file(extract_dir, data_files) {
        return Ok(Some(extract_dir.to_path_buf()));
    }

    for entry in WalkDir::new(extract_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_dir()
            && !is_hidden(entry.file_name())
            && holds_data_file(entry.path(), data_files)
        {
            return Ok(Some(entry.into_path()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::result_error::error::ErrorKind as Kind;
    use crate::backup::test_support::write_zip;
    use tempfile::TempDir;

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_archive_then_unarchive() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("staging");
        std::fs::create_dir_all(source.join("nested")).unwrap();
        std::fs::write(source.join("users.csv"), "id,name\n1,Ada\n").unwrap();
        std::fs::write(source.join("orders.csv"), "id\n").unwrap();
        std::fs::write(source.join("nested/ignored.csv"), "x\n").unwrap();

        let out = temp_dir.path().join("out.zip");
        assert_eq!(archive_dir(&source, &out).unwrap(), 2);

        let dest = temp_dir.path().join("dest");
        std::fs::create_dir(&dest).unwrap();
        let extracted = unarchive(&out, &dest, &ArchiveLimits::default()).unwrap();
        assert_eq!(extracted, [PathBuf::from("orders.csv"), PathBuf::from("users.csv")]);
        assert_eq!(
            std::fs::read_to_string(dest.join("users.csv")).unwrap(),
            "id,name\n1,Ada\n"
        );
    }

    #[test]
    fn test_archive_dir_does_not_overwrite_and_cleans_up() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("taken.zip");
        std::fs::write(&out, "existing").unwrap();
        assert!(archive_dir(temp_dir.path(), &out).is_err());

        let missing_source = temp_dir.path().join("missing");
        let out2 = temp_dir.path().join("fresh.zip");
        assert!(archive_dir(&missing_source, &out2).is_err());
        assert!(!out2.exists());
    }

    #[test]
    fn test_unarchive_refuses_parent_dir_entry() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("evil.zip");
        write_zip(
            &archive,
            &[("users.csv", b"id\n".as_slice()), ("../evil.csv", b"pwned\n".as_slice())],
        );

        let dest = temp_dir.path().join("dest");
        std::fs::create_dir(&dest).unwrap();
        let err = unarchive(&archive, &dest, &ArchiveLimits::default()).unwrap_err();
        assert_eq!(err.kind(), Kind::InvalidBackupFile);
        assert!(!temp_dir.path().join("evil.csv").exists());
    }

    #[test]
    fn test_safe_entry_path() {
        assert_eq!(safe_entry_path("a/b.csv").unwrap(), PathBuf::from("a/b.csv"));
        assert_eq!(safe_entry_path("./b.csv").unwrap(), PathBuf::from("b.csv"));
        assert!(safe_entry_path("a/../../b.csv").is_err());
        assert!(safe_entry_path("/etc/passwd").is_err());
        assert!(safe_entry_path("a\\..\\b.csv").is_err());
        assert!(safe_entry_path("a\0.csv").is_err());
    }

    #[test]
    fn test_unarchive_enforces_limits() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("big.zip");
        let zeros = vec![0u8; 64 * 1024];
        write_zip(&archive, &[("a.csv", zeros.as_slice()), ("b.csv", zeros.as_slice())]);

        let cases = [
            ArchiveLimits::builder().max_entry_size(1024).build(),
            ArchiveLimits::builder().max_total_size(100 * 1024).build(),
            ArchiveLimits::builder().max_entries(1).build(),
        ];
        for (i, limits) in cases.iter().enumerate() {
            let dest = temp_dir.path().join(format!("dest{i}"));
            std::fs::create_dir(&dest).unwrap();
            let err = unarchive(&archive, &dest, limits).unwrap_err();
            assert_eq!(err.kind(), Kind::InvalidBackupFile, "case {i}");
        }
    }

    #[test]
    fn test_unarchive_rejects_garbage_and_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("dest");
        std::fs::create_dir(&dest).unwrap();

        let garbage = temp_dir.path().join("garbage.zip");
        std::fs::write(&garbage, "definitely not a zip").unwrap();
        let err = unarchive(&garbage, &dest, &ArchiveLimits::default()).unwrap_err();
        assert_eq!(err.kind(), Kind::InvalidBackupFile);

        let dup = temp_dir.path().join("dup.zip");
        write_zip(
            &dup,
            &[("x/users.csv", b"id\n".as_slice()), ("./x/users.csv", b"id\n".as_slice())],
        );
        let err = unarchive(&dup, &dest, &ArchiveLimits::default()).unwrap_err();
        assert_eq!(err.kind(), Kind::InvalidBackupFile);
    }

    #[test]
    fn test_locate_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let expected = ["users.csv".to_owned(), "orders.csv".to_owned()];

        let top = temp_dir.path().join("top");
        std::fs::create_dir_all(&top).unwrap();
        std::fs::write(top.join("orders.csv"), "id\n").unwrap();
        assert_eq!(locate_data_dir(&top, &expected).unwrap(), Some(top.clone()));

        let nested = temp_dir.path().join("nested");
        std::fs::create_dir_all(nested.join(".hidden")).unwrap();
        std::fs::create_dir_all(nested.join("export_2024")).unwrap();
        std::fs::write(nested.join(".hidden/users.csv"), "id\n").unwrap();
        std::fs::write(nested.join("export_2024/users.csv"), "id\n").unwrap();
        std::fs::write(nested.join("README.txt"), "hi").unwrap();
        assert_eq!(
            locate_data_dir(&nested, &expected).unwrap(),
            Some(nested.join("export_2024"))
        );

        let deep = temp_dir.path().join("deep");
        std::fs::create_dir_all(deep.join("a/b")).unwrap();
        std::fs::write(deep.join("a/b/users.csv"), "id\n").unwrap();
        assert_eq!(locate_data_dir(&deep, &expected).unwrap(), None);
        assert_eq!(dir_names(&deep), ["a"]);
    }

    #[test]
    fn test_locate_data_dir_ignores_unexpected_csv_files() {
        let temp_dir = TempDir::new().unwrap();
        let expected = ["users.csv".to_owned()];

        let stray = temp_dir.path().join("stray");
        std::fs::create_dir_all(stray.join("export")).unwrap();
        std::fs::write(stray.join("notes.csv"), "id\n").unwrap();
        std::fs::write(stray.join("export/users.csv"), "id\n").unwrap();
        assert_eq!(
            locate_data_dir(&stray, &expected).unwrap(),
            Some(stray.join("export"))
        );

        let unknown = temp_dir.path().join("unknown");
        std::fs::create_dir_all(unknown.join("export")).unwrap();
        std::fs::write(unknown.join("payments.csv"), "id\n").unwrap();
        std::fs::write(unknown.join("export/refunds.csv"), "id\n").unwrap();
        assert_eq!(locate_data_dir(&unknown, &expected).unwrap(), None);
    }
}
