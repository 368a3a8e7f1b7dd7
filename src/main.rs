use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::path::PathBuf;
use std::process::exit;
use table_backup::backup::backup_config::BackupConfig;
use table_backup::backup::manager::BackupManager;
use table_backup::backup::result_error::error::Error;
use table_backup::backup::result_error::report::ErrorReport;
use table_backup::backup::result_error::result::Result;
use table_backup::backup::result_error::AddMsg;
use tracing::error;

/// Back up and restore the registered tables of a SQLite database
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,

    /// Base resource directory, overrides `base_dir` from the config file
    #[arg(long, env = "BACKUP_BASE_DIR")]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export every registered table into a new archive
    Create,
    /// List archives, newest first
    List,
    /// Copy an archive out of the backup root
    Download {
        filename: String,
        /// Destination file, defaults to the archive name in the current directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete an archive
    Delete { filename: String },
    /// Restore from an archive anywhere on disk, handled like an upload
    Restore { archive: PathBuf },
    /// Restore from an archive in the backup root
    RestoreBackup { filename: String },
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn run(manager: &BackupManager, command: Command) -> Result<String> {
    match command {
        Command::Create => to_json(&manager.create_backup()?),
        Command::List => to_json(&manager.list_backups()),
        Command::Download { filename, output } => {
            let mut download = manager.download_backup(&filename)?;
            let output = output.unwrap_or_else(|| PathBuf::from(&download.filename));
            let mut out = File::create_new(&output)
                .map_err(Error::from)
                .add_msg(format!("Failed to create {:?}", output))?;
            std::io::copy(&mut download.file, &mut out)?;
            out.sync_all()?;

            let mut value = serde_json::to_value(&download)?;
            value["output"] = serde_json::to_value(&output)?;
            to_json(&value)
        }
        Command::Delete { filename } => to_json(&manager.delete_backup(&filename)?),
        Command::Restore { archive } => {
            let filename = archive
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_owned();
            let mut upload = File::open(&archive)
                .map_err(Error::from)
                .add_msg(format!("Failed to open {:?}", archive))?;
            to_json(&manager.restore_from_upload(&filename, &mut upload)?)
        }
        Command::RestoreBackup { filename } => to_json(&manager.restore_from_backup(&filename)?),
    }
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut expose_error_detail = false;
    let res = BackupConfig::load_yaml(&args.config)
        .map(|config| match args.base_dir {
            Some(base_dir) => config.with_base_dir(base_dir),
            None => config,
        })
        .and_then(|config| {
            expose_error_detail = *config.expose_error_detail();
            BackupManager::new(config)
        })
        .and_then(|manager| run(&manager, args.command));

    match res {
        Ok(json) => println!("{json}"),
        Err(e) => {
            error!("{e}");
            let report = ErrorReport::from_error(&e, expose_error_detail);
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("{e}"),
            }
            exit(1);
        }
    }
}
