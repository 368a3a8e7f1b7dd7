pub mod sqlite;

use crate::backup::entity::sqlite::SqliteTable;
use crate::backup::result_error::result::Result;
use rusqlite::{Connection, Transaction};
use std::fmt::Debug;
use std::sync::Arc;

/// One exported row; `None` is an explicit NULL.
pub type Row = Vec<Option<String>>;

/// Row store behind a single logical entity.
///
/// Reads take a plain connection (export may run inside any read snapshot),
/// writes always take the restore transaction.
pub trait EntityStore: Debug + Send + Sync {
    /// Unique name, also the base name of the entity's data file.
    fn name(&self) -> &str;

    /// Column names in the store's natural order.
    fn columns(&self, conn: &Connection) -> Result<Vec<String>>;

    /// Streams every row, values ordered like [`EntityStore::columns`].
    fn find_all(&self, conn: &Connection, visit: &mut dyn FnMut(Row) -> Result<()>) -> Result<u64>;

    fn delete_all(&self, tx: &Transaction<'_>) -> Result<usize>;

    /// Inserts `rows` whose values follow the order of `columns`.
    fn bulk_insert(&self, tx: &Transaction<'_>, columns: &[String], rows: &[Row]) -> Result<usize>;
}

/// Entities in foreign-key dependency order, parents first.
///
/// The order is maintained by hand alongside the schema; it is never derived
/// from live store metadata.
#[derive(Clone, Debug, Default)]
pub struct TableRegistry {
    entities: Vec<Arc<dyn EntityStore>>,
}

impl TableRegistry {
    pub fn new(entities: Vec<Arc<dyn EntityStore>>) -> Self {
        Self { entities }
    }

    pub fn from_table_names<S: AsRef<str>>(tables: &[S]) -> Self {
        Self::new(
            tables
                .iter()
                .map(|t| Arc::new(SqliteTable::new(t.as_ref())) as Arc<dyn EntityStore>)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Insert order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<dyn EntityStore>> {
        self.entities.iter()
    }

    /// Delete order: children before parents.
    pub fn iter_clear_order(&self) -> impl Iterator<Item = &Arc<dyn EntityStore>> {
        self.entities.iter().rev()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.iter().any(|e| e.name() == name)
    }
}
