use crate::backup::entity::{EntityStore, Row};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use itertools::Itertools;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, Transaction};
use std::collections::HashMap;
use std::sync::Arc;

/// A SQLite table addressed by name.
///
/// Values are read back as text and written as text, leaving conversion to
/// the column's type affinity. Columns declared as BLOB travel as lowercase
/// hex and may only hold blobs; every other column must not hold one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SqliteTable {
    name: Arc<str>,
}

impl SqliteTable {
    pub fn new<S: Into<Arc<str>>>(name: S) -> Self {
        Self { name: name.into() }
    }

    /// `(name, declared type)` pairs in table order.
    fn column_info(&self, conn: &Connection) -> Result<Vec<(String, String)>> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&self.name)))?;
        let info = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if info.is_empty() {
            return Err(Error::schema(format!("table {:?} does not exist", self.name)));
        }
        Ok(info)
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn is_blob_type(declared: &str) -> bool {
    declared.to_ascii_uppercase().contains("BLOB")
}

fn value_to_text(column: &str, blob_column: bool, value: ValueRef<'_>) -> Result<Option<String>> {
    Ok(match (value, blob_column) {
        (ValueRef::Null, _) => None,
        (ValueRef::Blob(bytes), true) => Some(hex::encode(bytes)),
        (ValueRef::Blob(_), false) => {
            return Err(Error::schema(format!(
                "column {column:?} holds a blob but is not declared BLOB"
            )));
        }
        (other, true) => {
            return Err(Error::schema(format!(
                "column {column:?} is declared BLOB but holds a {} value",
                other.data_type()
            )));
        }
        (ValueRef::Integer(i), false) => Some(i.to_string()),
        (ValueRef::Real(f), false) => Some(f.to_string()),
        (ValueRef::Text(bytes), false) => Some(std::str::from_utf8(bytes)?.to_owned()),
    })
}

impl EntityStore for SqliteTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self, conn: &Connection) -> Result<Vec<String>> {
        Ok(self.column_info(conn)?.into_iter().map(|(name, _)| name).collect())
    }

    fn find_all(&self, conn: &Connection, visit: &mut dyn FnMut(Row) -> Result<()>) -> Result<u64> {
        let info = self.column_info(conn)?;
        let sql = format!(
            "SELECT {} FROM {}",
            info.iter().map(|(c, _)| quote_ident(c)).join(", "),
            quote_ident(&self.name)
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut count = 0;
        while let Some(row) = rows.next()? {
            let values = info
                .iter()
                .enumerate()
                .map(|(i, (column, declared))| {
                    value_to_text(column, is_blob_type(declared), row.get_ref(i)?)
                })
                .collect::<Result<Row>>()?;
            visit(values)?;
            count += 1;
        }
        Ok(count)
    }

    fn delete_all(&self, tx: &Transaction<'_>) -> Result<usize> {
        Ok(tx.execute(&format!("DELETE FROM {}", quote_ident(&self.name)), [])?)
    }

    fn bulk_insert(&self, tx: &Transaction<'_>, columns: &[String], rows: &[Row]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let declared: HashMap<String, String> = self.column_info(tx)?.into_iter().collect();
        let is_blob = columns
            .iter()
            .map(|c| declared.get(c).is_some_and(|t| is_blob_type(t)))
            .collect_vec();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.name),
            columns.iter().map(|c| quote_ident(c)).join(", "),
            std::iter::repeat_n("?", columns.len()).join(", ")
        );
        let mut stmt = tx.prepare(&sql)?;

        for (line, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::schema(format!(
                    "row {} has {} values, expected {}",
                    line + 1,
                    row.len(),
                    columns.len()
                )));
            }
            let values = row
                .iter()
                .zip(columns.iter().zip(&is_blob))
                .map(|(value, (column, blob))| {
                    Ok(match value {
                        None => Value::Null,
                        Some(s) if *blob => Value::Blob(hex::decode(s).map_err(|e| {
                            Error::schema(format!(
                                "row {}: column {column:?} is not hex encoded ({e})",
                                line + 1
                            ))
                        })?),
                        Some(s) => Value::Text(s.clone()),
                    })
                })
                .collect::<Result<Vec<Value>>>()?;
            stmt.execute(params_from_iter(values))?;
        }

        Ok(rows.len())
    }
}
