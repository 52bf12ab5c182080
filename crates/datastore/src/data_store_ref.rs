//! A data store together with the schema describing it.
//!
//! [crate::DataStore] only knows physical tables; this is what the rest of an application talks to when it wants rows
//! of a [Table], and it's what can turn rows into something a person can read.
use std::collections::HashMap;

use itertools::Itertools;
use log::*;

use crate::catalog::Catalog;
use crate::data_store::DataStore;
use crate::entities::{Column, PrimaryKey, Table};
use crate::error::{Result, StorageError};
use crate::ids::{DatabaseId, RowId, TableId};
use crate::row::Row;
use crate::value::StoredValue;

const NULL: &str = "NULL";

/// One row a table column could point at.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReferenceChoice {
    pub row_id: RowId,
    /// The row's description, with ` (n)` appended if an earlier row already had it.
    pub label: String,
}

pub struct DataStoreRef<'a> {
    catalog: &'a Catalog,
    store: &'a DataStore,
}

impl<'a> DataStoreRef<'a> {
    pub(crate) fn new(catalog: &'a Catalog, store: &'a DataStore) -> Self {
        Self { catalog, store }
    }

    pub fn get_database_id(&self) -> DatabaseId {
        self.store.get_database_id()
    }

    /// Look up a table and its columns, refusing tables of other databases.
    fn schema_for(&self, table: TableId) -> Result<(Table, Vec<Column>)> {
        let t = self
            .catalog
            .table(table)?
            .filter(|t| t.database_id == self.get_database_id())
            .ok_or_else(|| StorageError::not_found("Table", table))?;
        let columns = self.catalog.columns_for(table)?;
        Ok((t, columns))
    }

    /// A new row for `table` with every value null.  Nothing is written until [DataStoreRef::add_row].
    pub fn new_row(&self, table: TableId) -> Result<Row> {
        let (_, columns) = self.schema_for(table)?;
        Ok(Row::new(table, &columns))
    }

    /// Every row of `table`, oldest first.  Empty if anything goes wrong.
    pub fn rows_for(&self, table: &Table) -> Vec<Row> {
        let res = self
            .schema_for(table.id)
            .and_then(|(t, columns)| self.store.load_rows(&t, &columns));
        res.unwrap_or_else(|e| {
            error!("Could not load rows of {} ({}): {}", table.name, table.id, e);
            vec![]
        })
    }

    pub fn row(&self, id: RowId, table: TableId) -> Option<Row> {
        let res = self
            .schema_for(table)
            .and_then(|(t, columns)| self.store.load_row(id, &t, &columns));
        res.unwrap_or_else(|e| {
            error!("Could not load row {} of {}: {}", id, table, e);
            None
        })
    }

    pub fn add_row(&self, row: &Row) -> Result<()> {
        let res = self
            .schema_for(row.table_id)
            .and_then(|(_, columns)| self.store.insert_row(row, &columns));
        if let Err(e) = &res {
            error!("Could not add row {}: {}", row.id, e);
        }
        res
    }

    pub fn update_row(&self, row: &Row) -> Result<()> {
        let res = self
            .schema_for(row.table_id)
            .and_then(|(_, columns)| self.store.update_row(row, &columns));
        if let Err(e) = &res {
            error!("Could not update row {}: {}", row.id, e);
        }
        res
    }

    /// Remove a row.  Rows elsewhere which pointed at it are left pointing at nothing, and render as `NULL`.
    pub fn remove_row(&self, row: &Row) -> Result<()> {
        let res = self
            .schema_for(row.table_id)
            .and_then(|_| self.store.delete_row(row));
        if let Err(e) = &res {
            error!("Could not remove row {}: {}", row.id, e);
        }
        res
    }

    /// Describe a row by its primary key, following references one hop.
    pub fn description(&self, row: &Row) -> String {
        self.describe(row, true)
    }

    /// Describe a row by its primary key.  References render as the referenced row's id.
    pub fn non_recursive_description(&self, row: &Row) -> String {
        self.describe(row, false)
    }

    /// Describe a single value, following a reference one hop.
    pub fn value_description(&self, value: &StoredValue) -> String {
        self.describe_value(value, true)
    }

    fn describe(&self, row: &Row, recursive: bool) -> String {
        let (table, columns) = match self.schema_for(row.table_id) {
            Ok(x) => x,
            Err(e) => {
                error!("Could not describe row {}: {}", row.id, e);
                return row.id.to_string();
            }
        };

        let value_of = |c: &Column| match row.value_for(c.id) {
            Some(v) => self.describe_value(v, recursive),
            None => NULL.to_string(),
        };

        match PrimaryKey::derive(&table, &columns) {
            PrimaryKey::Id(_) => row.id.to_string(),
            PrimaryKey::Column(c) => value_of(&c),
            PrimaryKey::Columns(cs) => format!(
                "({})",
                cs.iter()
                    .map(|c| format!("{}: {}", c.name, value_of(c)))
                    .join(", ")
            ),
        }
    }

    fn describe_value(&self, value: &StoredValue, recursive: bool) -> String {
        let (row_id, table_id) = match value {
            StoredValue::Row {
                referenced_row_id: Some(r),
                referenced_table_id: Some(t),
            } => (*r, *t),
            StoredValue::Row { .. } => return NULL.to_string(),
            v => return v.to_string(),
        };

        if !recursive {
            return match self.store.row_exists(table_id, row_id) {
                Ok(true) => row_id.to_string(),
                Ok(false) => NULL.to_string(),
                Err(e) => {
                    warn!("Could not check for row {}: {}", row_id, e);
                    NULL.to_string()
                }
            };
        }

        // Exactly one hop, so cycles between tables can't recurse forever.
        match self.row(row_id, table_id) {
            Some(target) => self.describe(&target, false),
            None => NULL.to_string(),
        }
    }

    /// Every row `column` could point at, labelled by description.  Empty for columns with no target.
    pub fn reference_choices(&self, column: &Column) -> Vec<ReferenceChoice> {
        let target = match column.referenced_table_id {
            Some(t) => t,
            None => return vec![],
        };
        let table = match self.schema_for(target) {
            Ok((t, _)) => t,
            Err(e) => {
                error!("Could not list choices for column {}: {}", column.id, e);
                return vec![];
            }
        };

        let mut seen: HashMap<String, usize> = HashMap::new();
        self.rows_for(&table)
            .into_iter()
            .map(|row| {
                let description = self.description(&row);
                let count = seen.entry(description.clone()).or_insert(0);
                let label = if *count == 0 {
                    description
                } else {
                    format!("{} ({})", description, count)
                };
                *count += 1;
                ReferenceChoice {
                    row_id: row.id,
                    label,
                }
            })
            .collect()
    }
}
