//! # table_backup
//!
//! Backup and restore of a set of SQLite tables as portable zip archives.
//!
//! ## Features
//!
//! - **Export**: every registered table to one CSV file, read from a single snapshot
//! - **Archives**: flat `<prefix>_<timestamp>.zip` files, never overwritten
//! - **Restore**: all-or-nothing, clearing children first and loading parents first
//! - **Hostile input**: file name validation, path-escape and zip-bomb checks on uploads
//!
//! ## Quick Start
//!
//! ```no_run
//! use table_backup::backup::backup_config::BackupConfig;
//! use table_backup::backup::manager::BackupManager;
//!
//! let config = BackupConfig::load_yaml("config.yml")?;
//! let manager = BackupManager::new(config)?;
//!
//! let created = manager.create_backup()?;
//! let summary = manager.restore_from_backup(&created.filename)?;
//! println!("restored {} rows", summary.total_rows);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
