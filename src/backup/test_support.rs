//! Fixture stores shared by the unit tests.

use crate::backup::backup_config::BackupConfig;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const USERS_ORDERS_ITEMS: &[&str] = &["users", "orders", "order_items"];

pub const SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT
    );
    CREATE TABLE orders (
        id INTEGER PRIMARY KEY,
        user_id INTEGER NOT NULL REFERENCES users(id),
        item TEXT NOT NULL,
        amount REAL,
        note TEXT
    );
    CREATE TABLE order_items (
        id INTEGER PRIMARY KEY,
        order_id INTEGER NOT NULL REFERENCES orders(id),
        sku TEXT NOT NULL,
        payload BLOB
    );
";

pub const DATA: &str = "
    INSERT INTO users VALUES (1, 'Ada', 'ada@example.com');
    INSERT INTO users VALUES (7, 'Linus, \"the\" maintainer', NULL);
    INSERT INTO orders VALUES (10, 1, 'book', 12.5, 'first\nline');
    INSERT INTO orders VALUES (11, 7, 'lamp', 30, '');
    INSERT INTO orders VALUES (12, 1, 'pen', NULL, NULL);
    INSERT INTO order_items VALUES (100, 10, 'B-1', x'cafe');
    INSERT INTO order_items VALUES (101, 12, 'P-9', NULL);
";

pub fn open(path: &Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    conn
}

/// Database with the users/orders/order_items schema and sample rows.
pub fn fixture_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");
    let conn = open(&path);
    conn.execute_batch(SCHEMA).unwrap();
    conn.execute_batch(DATA).unwrap();
    (dir, path)
}

pub fn row_count(path: &Path, table: &str) -> i64 {
    open(path)
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .unwrap()
}

pub fn row_counts(path: &Path) -> Vec<i64> {
    USERS_ORDERS_ITEMS.iter().map(|t| row_count(path, t)).collect()
}

/// All rows of `table` ordered by id, rendered through SQLite's `quote()`.
pub fn dump(path: &Path, table: &str) -> Vec<String> {
    let conn = open(path);
    let columns: Vec<String> = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .unwrap()
        .query_map([], |r| r.get::<_, String>(1))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    let select = columns
        .iter()
        .map(|c| format!("quote({c})"))
        .collect::<Vec<_>>()
        .join(" || ',' || ");
    let rows: Vec<String> = conn
        .prepare(&format!("SELECT {select} FROM {table} ORDER BY id"))
        .unwrap()
        .query_map([], |r| r.get::<_, String>(0))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    rows
}

pub fn config(base_dir: &Path, database: &Path) -> BackupConfig {
    BackupConfig::builder()
        .base_dir(base_dir)
        .database(database)
        .tables(USERS_ORDERS_ITEMS.iter().map(|t| t.to_string()).collect::<Vec<_>>())
        .build()
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content).unwrap();
        }
    }
    zip.finish().unwrap();
}

/// Exports every fixture table of `database` and zips the result into
/// `out_dir/fixture.zip`.
pub fn fixture_archive(database: &Path, out_dir: &Path) -> PathBuf {
    use crate::backup::archiver::archive_dir;
    use crate::backup::entity::TableRegistry;
    use crate::backup::export::export_all;

    let staging = out_dir.join("fixture_staging");
    std::fs::create_dir_all(&staging).unwrap();
    export_all(
        &open(database),
        &TableRegistry::from_table_names(USERS_ORDERS_ITEMS),
        &staging,
    )
    .unwrap();
    let archive = out_dir.join("fixture.zip");
    archive_dir(&staging, &archive).unwrap();
    std::fs::remove_dir_all(staging).unwrap();
    archive
}
