//! Writes entity rows to delimited text files.
//!
//! Each file starts with exactly one header row. NULL is written as the empty
//! field, so NULL and the empty string are indistinguishable after a round
//! trip. Quoting follows the usual CSV rules (only when needed).

use crate::backup::backup_root::DATA_EXT;
use crate::backup::entity::{EntityStore, TableRegistry};
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use rusqlite::Connection;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExportedEntity {
    pub name: String,
    pub file: PathBuf,
    pub rows: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub tables_exported: usize,
    pub entities: Vec<ExportedEntity>,
}

pub fn data_file_name(entity_name: &str) -> String {
    format!("{entity_name}.{DATA_EXT}")
}

/// Streams every row of `entity` into a new file at `dest`.
///
/// A failure leaves whatever was written behind; the caller owns the staging
/// directory and discards it as a whole.
#[named]
pub fn export_entity(conn: &Connection, entity: &dyn EntityStore, dest: &Path) -> Result<u64> {
    let file = File::create_new(dest)
        .map_err(Error::from)
        .add_msg(format!("Failed to create data file {:?}", dest))?;
    let mut writer = csv::WriterBuilder::new().from_writer(BufWriter::new(file));

    let columns = entity.columns(conn)?;
    writer.write_record(&columns)?;

    let rows = entity
        .find_all(conn, &mut |row| {
            writer.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
            Ok(())
        })
        .add_msg(format!("Failed to export rows of {:?}", entity.name()))
        .add_fn_name(function_path!())?;

    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| Error::from(std::io::Error::other(e.to_string())))?
        .into_inner()
        .map_err(IntoInnerError::into_error)?
        .sync_all()?;

    debug!("Exported {} rows of {:?} to {:?}", rows, entity.name(), dest);
    Ok(rows)
}

/// Exports every registry entity, in registry order, into `dest_dir`.
///
/// An empty registry is a failure: an empty archive cannot be told apart
/// from a misconfigured one.
pub fn export_all(conn: &Connection, registry: &TableRegistry, dest_dir: &Path) -> Result<ExportSummary> {
    if registry.is_empty() {
        return Err(Error::backup_failed_msg("no entities are registered for export"));
    }

    let mut entities = Vec::with_capacity(registry.len());
    for entity in registry.iter() {
        let file = dest_dir.join(data_file_name(entity.name()));
        let rows = export_entity(conn, entity.as_ref(), &file)?;
        entities.push(ExportedEntity {
            name: entity.name().to_owned(),
            file,
            rows,
        });
    }

    info!("Exported {} entities to {:?}", entities.len(), dest_dir);
    Ok(ExportSummary {
        tables_exported: entities.len(),
        entities,
    })
}
