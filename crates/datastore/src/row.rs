//! Rows.
//!
//! A row only exists inside a data store.  Its values are keyed by column id.  A missing entry means the row
//! predates the column; [Row::normalize] fills those in with nulls, and anything read back from a store is already
//! normalized.
use std::collections::HashMap;

use crate::entities::Column;
use crate::ids::{ColumnId, RowId, TableId};
use crate::value::StoredValue;

#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub id: RowId,
    pub table_id: TableId,
    values: HashMap<ColumnId, StoredValue>,
}

impl Row {
    /// An empty row: one null per column.
    pub fn new(table_id: TableId, columns: &[Column]) -> Self {
        Self::with_id(RowId::new(), table_id, columns)
    }

    pub(crate) fn with_id(id: RowId, table_id: TableId, columns: &[Column]) -> Self {
        let values = columns
            .iter()
            .map(|c| (c.id, StoredValue::null_for(c)))
            .collect();
        Self {
            id,
            table_id,
            values,
        }
    }

    pub fn value_for(&self, column: ColumnId) -> Option<&StoredValue> {
        self.values.get(&column)
    }

    /// Set (or add) the value for a column.
    pub fn set_value(&mut self, column: ColumnId, value: StoredValue) {
        self.values.insert(column, value);
    }

    pub fn remove_value(&mut self, column: ColumnId) -> Option<StoredValue> {
        self.values.remove(&column)
    }

    pub fn values(&self) -> impl Iterator<Item = (&ColumnId, &StoredValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Bring the value map in line with the table's current columns: nulls for new columns, and entries for removed
    /// columns dropped.
    pub fn normalize(&mut self, columns: &[Column]) {
        self.values
            .retain(|id, _| columns.iter().any(|c| c.id == *id));
        for c in columns {
            self.values
                .entry(c.id)
                .or_insert_with(|| StoredValue::null_for(c));
        }
    }
}
