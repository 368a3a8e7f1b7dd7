//! Loads exported data files back into entity stores.

use crate::backup::entity::{EntityStore, Row};
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use csv::StringRecord;
use function_name::named;
use itertools::Itertools;
use rusqlite::Transaction;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;
use tracing::{debug, warn};

/// Empty fields become NULL, everything else is passed through as text.
pub fn parse_row(record: &StringRecord) -> Row {
    record
        .iter()
        .map(|field| (!field.is_empty()).then(|| field.to_owned()))
        .collect()
}

/// The header must name exactly the destination's columns, in any order.
fn check_header(entity: &dyn EntityStore, header: &[String], columns: &[String]) -> Result<()> {
    let unique: HashSet<&String> = header.iter().collect();
    if unique.len() != header.len() {
        return Err(Error::schema(format!(
            "header of {:?} repeats a column: {}",
            entity.name(),
            header.join(",")
        )));
    }

    let expected: HashSet<&String> = columns.iter().collect();
    if unique != expected {
        let missing = expected.difference(&unique).sorted().join(",");
        let unknown = unique.difference(&expected).sorted().join(",");
        return Err(Error::schema(format!(
            "header of {:?} does not match its columns (missing: [{missing}], unknown: [{unknown}])",
            entity.name()
        )));
    }
    Ok(())
}

/// Reads `file` completely and inserts all of its rows into `entity` within
/// `tx`. A missing file or a header without rows imports nothing.
#[named]
pub fn import_entity(file: &Path, entity: &dyn EntityStore, tx: &Transaction<'_>) -> Result<usize> {
    let reader = match File::open(file) {
        Ok(f) => BufReader::new(f),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("No data file for {:?} at {:?}, importing 0 rows", entity.name(), file);
            return Ok(0);
        }
        Err(e) => return Err(Error::from(e).add_msg(format!("Failed to open {:?}", file))),
    };

    let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
    let header = csv_reader.headers()?.iter().map(str::to_owned).collect_vec();
    if header.is_empty() {
        debug!("Data file {:?} is empty", file);
        return Ok(0);
    }

    let rows = csv_reader
        .records()
        .map(|record| record.map(|r| parse_row(&r)).map_err(Error::from))
        .collect::<Result<Vec<Row>>>()
        .add_msg(format!("Failed to parse {:?}", file))?;
    if rows.is_empty() {
        debug!("Data file {:?} has no rows", file);
        return Ok(0);
    }

    check_header(entity, &header, &entity.columns(tx)?)?;
    let inserted = entity
        .bulk_insert(tx, &header, &rows)
        .add_msg(format!("Failed to load {} rows into {:?}", rows.len(), entity.name()))
        .add_fn_name(function_path!())?;
    debug!("Imported {} rows into {:?}", inserted, entity.name());
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::entity::sqlite::SqliteTable;
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn open_people() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, nick TEXT);",
        )
        .unwrap();
        conn
    }

    fn people(conn: &Connection) -> Vec<(i64, String, Option<String>)> {
        conn.prepare("SELECT id, name, nick FROM people ORDER BY id")
            .unwrap()
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_parse_row_maps_empty_to_null() {
        let record = StringRecord::from(vec!["1", "", "x y"]);
        assert_eq!(
            parse_row(&record),
            vec![Some("1".to_owned()), None, Some("x y".to_owned())]
        );
    }

    #[test]
    fn test_import_entity_reordered_header() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("people.csv");
        std::fs::write(&file, "nick,id,name\n,2,Bob\n\"the, great\",1,\"Al \"\"A\"\"\"\n").unwrap();

        let mut conn = open_people();
        let tx = conn.transaction().unwrap();
        assert_eq!(import_entity(&file, &SqliteTable::new("people"), &tx).unwrap(), 2);
        tx.commit().unwrap();

        assert_eq!(
            people(&conn),
            vec![
                (1, "Al \"A\"".to_owned(), Some("the, great".to_owned())),
                (2, "Bob".to_owned(), None),
            ]
        );
    }

    #[test]
    fn test_import_entity_missing_or_header_only_is_zero() {
        let dir = TempDir::new().unwrap();
        let header_only = dir.path().join("people.csv");
        std::fs::write(&header_only, "id,name,nick\n").unwrap();
        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, "").unwrap();

        let mut conn = open_people();
        let tx = conn.transaction().unwrap();
        let table = SqliteTable::new("people");
        assert_eq!(import_entity(&dir.path().join("nope.csv"), &table, &tx).unwrap(), 0);
        assert_eq!(import_entity(&header_only, &table, &tx).unwrap(), 0);
        assert_eq!(import_entity(&empty, &table, &tx).unwrap(), 0);
    }

    #[test]
    fn test_import_entity_rejects_schema_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut conn = open_people();
        let table = SqliteTable::new("people");

        for content in [
            "id,name\n1,Al\n",
            "id,name,nick,age\n1,Al,,3\n",
            "id,name,name\n1,Al,Al\n",
        ] {
            let file = dir.path().join("people.csv");
            std::fs::write(&file, content).unwrap();
            let tx = conn.transaction().unwrap();
            let err = import_entity(&file, &table, &tx).unwrap_err();
            assert!(matches!(err, Error::Schema(_)), "{content:?}: {err}");
        }
    }

    #[test]
    fn test_import_entity_fails_on_constraint_violation() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("people.csv");
        std::fs::write(&file, "id,name,nick\n1,Al,\n2,,x\n").unwrap();

        let mut conn = open_people();
        let tx = conn.transaction().unwrap();
        assert!(import_entity(&file, &SqliteTable::new("people"), &tx).is_err());
    }

    #[test]
    fn test_import_entity_rejects_ragged_rows() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("people.csv");
        std::fs::write(&file, "id,name,nick\n1,Al\n").unwrap();

        let mut conn = open_people();
        let tx = conn.transaction().unwrap();
        assert!(import_entity(&file, &SqliteTable::new("people"), &tx).is_err());
    }
}
