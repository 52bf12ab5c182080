//! The schema entities: databases, which own tables, which own columns.
//!
//! These are plain values.  None of them holds a reference to its parent or children; walking the tree always goes
//! through the schema store by id.
use crate::ids::{ColumnId, DatabaseId, TableId};
use crate::value::ValueType;

#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Database {
    pub id: DatabaseId,
    pub name: String,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: DatabaseId::new(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Table {
    pub id: TableId,
    pub database_id: DatabaseId,
    pub name: String,

    /// Whether to surface the table to the user.  Tables which only exist so that something can reference them may
    /// be hidden.
    pub should_show: bool,
}

impl Table {
    pub fn new(database_id: DatabaseId, name: impl Into<String>) -> Self {
        Self {
            id: TableId::new(),
            database_id,
            name: name.into(),
            should_show: true,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.should_show = false;
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub table_id: TableId,
    pub name: String,

    /// Part of the table's primary key.  The primary key is only used to describe rows to people; nothing enforces
    /// uniqueness.
    pub is_primary: bool,
    pub value_type: ValueType,

    /// Which table's rows this column may point to.  Only meaningful for [ValueType::Table]; a table column without
    /// one is waiting to be configured and always reads as null.
    pub referenced_table_id: Option<TableId>,
}

impl Column {
    pub fn new(table_id: TableId, name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            id: ColumnId::new(),
            table_id,
            name: name.into(),
            is_primary: false,
            value_type,
            referenced_table_id: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }

    /// Make this a table column pointing at `table`.
    pub fn referencing(mut self, table: TableId) -> Self {
        self.value_type = ValueType::Table;
        self.referenced_table_id = Some(table);
        self
    }

    /// A table column which doesn't point anywhere yet.
    pub fn is_pending(&self) -> bool {
        self.value_type == ValueType::Table && self.referenced_table_id.is_none()
    }

    /// Whether moving from `self` to `new` needs the physical column rebuilt, dropping its values.
    ///
    /// Only the type and, for table columns, the target matter.  Names and primary flags are metadata.
    pub fn requires_rebuild(&self, new: &Column) -> bool {
        if self.value_type != new.value_type {
            return true;
        }

        self.value_type == ValueType::Table && self.referenced_table_id != new.referenced_table_id
    }
}

/// How a table's rows are told apart when shown to a person.  Derived from the columns' flags on demand.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum PrimaryKey {
    /// Nothing is marked primary, so a row is its id.
    Id(TableId),
    Column(Column),
    /// In the order the table lists its columns.
    Columns(Vec<Column>),
}

impl PrimaryKey {
    /// `columns` must be the table's columns in listing order.
    pub fn derive(table: &Table, columns: &[Column]) -> PrimaryKey {
        let mut key = columns
            .iter()
            .filter(|c| c.is_primary)
            .cloned()
            .collect::<Vec<_>>();

        match key.len() {
            0 => PrimaryKey::Id(table.id),
            1 => PrimaryKey::Column(key.remove(0)),
            _ => PrimaryKey::Columns(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn table_with_flags(flags: &[bool]) -> (Table, Vec<Column>) {
        let table = Table::new(DatabaseId::new(), "t");
        let columns = flags
            .iter()
            .enumerate()
            .map(|(i, primary)| {
                let mut c = Column::new(table.id, format!("c{}", i), ValueType::String);
                c.is_primary = *primary;
                c
            })
            .collect();
        (table, columns)
    }

    #[test]
    fn no_primary_columns_means_the_id() {
        let (table, columns) = table_with_flags(&[false, false]);
        assert_eq!(PrimaryKey::derive(&table, &columns), PrimaryKey::Id(table.id));
        assert_eq!(PrimaryKey::derive(&table, &[]), PrimaryKey::Id(table.id));
    }

    #[test]
    fn one_primary_column() {
        let (table, columns) = table_with_flags(&[false, true, false]);
        assert_eq!(
            PrimaryKey::derive(&table, &columns),
            PrimaryKey::Column(columns[1].clone())
        );
    }

    #[test]
    fn rebuild_rules() {
        let t = TableId::new();
        let c = Column::new(t, "a", ValueType::Int);

        let mut renamed = c.clone();
        renamed.name = "b".into();
        renamed.is_primary = true;
        assert!(!c.requires_rebuild(&renamed));

        let mut retyped = c.clone();
        retyped.value_type = ValueType::Double;
        assert!(c.requires_rebuild(&retyped));

        let pending = Column::new(t, "r", ValueType::Table);
        assert!(pending.is_pending());
        let configured = pending.clone().referencing(TableId::new());
        assert!(!configured.is_pending());
        assert!(pending.requires_rebuild(&configured));
        assert!(!configured.requires_rebuild(&configured.clone()));
    }

    #[test]
    fn columns_serialize_with_tags() {
        let target = TableId::new();
        let column = Column::new(TableId::new(), "owner", ValueType::Table).referencing(target);
        let json = serde_json::to_value(&column).unwrap();
        assert_eq!(json["value_type"], "table");
        assert_eq!(json["referenced_table_id"], target.to_string());
        assert_eq!(serde_json::from_value::<Column>(json).unwrap(), column);
    }

    proptest! {
        #[test]
        fn derivation_is_deterministic(flags in proptest::collection::vec(any::<bool>(), 0..12)) {
            let (table, columns) = table_with_flags(&flags);
            let first = PrimaryKey::derive(&table, &columns);
            prop_assert_eq!(&first, &PrimaryKey::derive(&table, &columns));

            let primaries = columns.iter().filter(|c| c.is_primary).cloned().collect::<Vec<_>>();
            match primaries.len() {
                0 => prop_assert_eq!(first, PrimaryKey::Id(table.id)),
                1 => prop_assert_eq!(first, PrimaryKey::Column(primaries[0].clone())),
                _ => prop_assert_eq!(first, PrimaryKey::Columns(primaries)),
            }
        }
    }
}
