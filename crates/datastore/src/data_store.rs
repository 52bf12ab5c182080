//! A data store: the physical rows of one user database, in its own sqlite file.
//!
//! The shape of the physical tables is entirely dictated by the schema store, which calls the DDL methods here.  The
//! row methods take the table's columns as an argument rather than looking them up, since this file doesn't know the
//! schema; [crate::DataStoreRef] pairs a data store with the schema for callers.
use std::collections::HashMap;

use camino::Utf8Path;
use log::*;
use smallvec::SmallVec;

use crate::config::StoreConfig;
use crate::ddl::{self, quote_ident, MigrationPlan, PhysicalColumn, PhysicalTable, PhysicalType};
use crate::entities::{Column, Table};
use crate::error::{Result, StorageError};
use crate::ids::{DatabaseId, RowId, TableId};
use crate::row::Row;
use crate::value::StoredValue;

/// Bound parameters for one row.  Most tables are narrow enough to avoid the allocation.
type RowParams = SmallVec<[rusqlite::types::Value; 16]>;

const INSERT_TEMPLATE: &str = r#"INSERT INTO {{ table }} (
    {{ columns | join(sep=", ") }}
) VALUES (
    {%- for c in columns -%}
    ?{{ loop.index }}{% if not loop.last %}, {% endif -%}
    {%- endfor -%}
)"#;

const UPDATE_TEMPLATE: &str = r#"UPDATE {{ table }} SET
    {%- for c in columns %}
    {{ c }} = ?{{ loop.index + 1 }}{% if not loop.last %},{% endif -%}
    {%- endfor %}
WHERE {{ id_column }} = ?1"#;

pub struct DataStore {
    database_id: DatabaseId,
    conn: rusqlite::Connection,
}

impl DataStore {
    /// Open the data store for `database_id` in `dir`, creating it if this is the first time.
    pub fn open(database_id: DatabaseId, dir: &Utf8Path, config: &StoreConfig) -> Result<Self> {
        let conn = crate::connection::open_in_dir(dir, config)?;
        Ok(Self { database_id, conn })
    }

    /// Build a data store from an already-existing connection.
    ///
    /// This should be used for testing only.
    pub fn with_connection(database_id: DatabaseId, conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = 1")?;
        Ok(Self { database_id, conn })
    }

    pub fn get_database_id(&self) -> DatabaseId {
        self.database_id
    }

    /// Names of every physical table, sorted.
    pub fn physical_table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// Read a table's shape back out of sqlite.
    pub fn physical_table(&self, name: &str) -> Result<Option<PhysicalTable>> {
        let exists = self
            .conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")?
            .exists(rusqlite::params![name])?;
        if !exists {
            return Ok(None);
        }

        let mut fk_stmt = self
            .conn
            .prepare("SELECT \"from\", \"table\" FROM pragma_foreign_key_list(?)")?;
        let references = fk_stmt
            .query_map(rusqlite::params![name], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;

        let mut info_stmt = self
            .conn
            .prepare("SELECT name, type FROM pragma_table_info(?) ORDER BY cid")?;
        let columns = info_stmt
            .query_map(rusqlite::params![name], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .filter(|(col, _)| col != ddl::ID_COLUMN && col != ddl::TABLE_ID_COLUMN)
            .map(|(col, declared)| PhysicalColumn {
                physical_type: PhysicalType::from_declared(
                    &declared,
                    references.get(&col).map(|x| x.as_str()),
                ),
                name: col,
            })
            .collect();

        Ok(Some(PhysicalTable {
            name: name.to_string(),
            columns,
        }))
    }

    /// Run a plan in one transaction.
    ///
    /// Plans which rebuild tables run with foreign keys off, followed by a check that nothing ended up dangling; a
    /// failed check rolls everything back.
    pub fn apply(&mut self, plan: &MigrationPlan) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }

        if !plan.needs_foreign_keys_off() {
            return run_plan(&mut self.conn, plan, false);
        }

        // This pragma is a no-op inside a transaction, so it has to wrap the whole thing.
        self.conn.execute_batch("PRAGMA foreign_keys = 0")?;
        let res = run_plan(&mut self.conn, plan, true);
        self.conn.execute_batch("PRAGMA foreign_keys = 1")?;
        res
    }

    /// Bring one table in line with the desired shape (`None` to drop it).
    pub fn sync_table(&mut self, name: &str, desired: Option<&PhysicalTable>) -> Result<()> {
        let actual = self.physical_table(name)?;
        let plan = ddl::plan(actual.as_ref(), desired)?;
        self.apply(&plan)
    }

    pub fn create_table(&mut self, table: &Table) -> Result<()> {
        info!("Creating physical table for {} ({})", table.name, table.id);
        let plan = ddl::plan(None, Some(&PhysicalTable::for_schema(table, &[])))?;
        self.apply(&plan)
    }

    pub fn drop_table(&mut self, table: TableId) -> Result<()> {
        info!("Dropping physical table {}", table);
        self.sync_table(&table.to_string(), None)
    }

    fn require_table(&self, table: TableId) -> Result<PhysicalTable> {
        self.physical_table(&table.to_string())?.ok_or_else(|| {
            StorageError::SchemaDrift(format!("Table {} has no physical storage", table))
        })
    }

    pub fn add_column(&mut self, column: &Column) -> Result<()> {
        let actual = self.require_table(column.table_id)?;
        let mut desired = actual.clone();
        desired.columns.retain(|c| c.name != column.id.to_string());
        desired.columns.push(PhysicalColumn::for_column(column));
        let plan = ddl::plan(Some(&actual), Some(&desired))?;
        self.apply(&plan)
    }

    pub fn drop_column(&mut self, column: &Column) -> Result<()> {
        let actual = self.require_table(column.table_id)?;
        let mut desired = actual.clone();
        desired.columns.retain(|c| c.name != column.id.to_string());
        let plan = ddl::plan(Some(&actual), Some(&desired))?;
        self.apply(&plan)
    }

    /// Swap a column for one of a different type or target.  Destroys every value in the column.
    pub fn replace_column(&mut self, old: &Column, new: &Column) -> Result<()> {
        info!(
            "Recreating column {} as {:?}; existing values are dropped",
            old.id, new.value_type
        );
        let actual = self.require_table(old.table_id)?;
        let mut without = actual.clone();
        without.columns.retain(|c| c.name != old.id.to_string());
        let mut with_new = without.clone();
        with_new.columns.push(PhysicalColumn::for_column(new));

        let mut plan = ddl::plan(Some(&actual), Some(&without))?;
        plan.extend(ddl::plan(Some(&without), Some(&with_new))?);
        self.apply(&plan)
    }

    /// Names of the physical columns of `table`, intrinsic ones included, mapped to their index in `SELECT *`.
    fn column_indices(stmt: &rusqlite::Statement<'_>) -> HashMap<String, usize> {
        stmt.column_names()
            .into_iter()
            .enumerate()
            .map(|(i, n)| (n.to_string(), i))
            .collect()
    }

    /// Turn one physical row into a [Row].  Columns which have no physical counterpart read as null.
    fn hydrate(
        table: &Table,
        columns: &[Column],
        indices: &HashMap<String, usize>,
        r: &rusqlite::Row<'_>,
    ) -> rusqlite::Result<Option<Row>> {
        let raw_id: String = r.get(indices[ddl::ID_COLUMN])?;
        let id = match RowId::parse_str(&raw_id) {
            Ok(x) => x,
            Err(_) => {
                warn!("Skipping row with malformed id {:?} in {}", raw_id, table.id);
                return Ok(None);
            }
        };

        let mut row = Row::with_id(id, table.id, columns);
        for c in columns {
            let value = match indices.get(&c.id.to_string()) {
                Some(i) => StoredValue::from_sql_ref(c, r.get_ref(*i)?),
                None => StoredValue::null_for(c),
            };
            row.set_value(c.id, value);
        }

        Ok(Some(row))
    }

    fn warn_missing_columns(table: &Table, columns: &[Column], indices: &HashMap<String, usize>) {
        for c in columns {
            if !indices.contains_key(&c.id.to_string()) {
                warn!(
                    "Column {} ({}) of {} has no physical storage; reading null",
                    c.name, c.id, table.id
                );
            }
        }
    }

    /// Every row of a table, in insertion order.
    pub fn load_rows(&self, table: &Table, columns: &[Column]) -> Result<Vec<Row>> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY rowid",
            quote_ident(&table.id.to_string())
        );
        // Not cached: `SELECT *` is expanded at prepare time, and the columns change under us.
        let mut stmt = self.conn.prepare(&sql)?;
        let indices = Self::column_indices(&stmt);
        if !indices.contains_key(ddl::ID_COLUMN) {
            return Err(StorageError::SchemaDrift(format!(
                "Table {} has no id column",
                table.id
            )));
        }
        Self::warn_missing_columns(table, columns, &indices);

        let mut ret = vec![];
        let mut rows = stmt.query([])?;
        while let Some(r) = rows.next()? {
            if let Some(row) = Self::hydrate(table, columns, &indices, r)? {
                ret.push(row);
            }
        }

        Ok(ret)
    }

    pub fn load_row(&self, id: RowId, table: &Table, columns: &[Column]) -> Result<Option<Row>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1",
            quote_ident(&table.id.to_string()),
            quote_ident(ddl::ID_COLUMN)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let indices = Self::column_indices(&stmt);
        if !indices.contains_key(ddl::ID_COLUMN) {
            return Err(StorageError::SchemaDrift(format!(
                "Table {} has no id column",
                table.id
            )));
        }
        Self::warn_missing_columns(table, columns, &indices);

        let mut rows = stmt.query(rusqlite::params![id])?;
        match rows.next()? {
            Some(r) => Ok(Self::hydrate(table, columns, &indices, r)?),
            None => Ok(None),
        }
    }

    /// Whether `table` has a row `id`.  A table which doesn't physically exist has no rows.
    pub fn row_exists(&self, table: TableId, id: RowId) -> Result<bool> {
        if self.physical_table(&table.to_string())?.is_none() {
            return Ok(false);
        }

        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ?1",
            quote_ident(&table.to_string()),
            quote_ident(ddl::ID_COLUMN)
        );
        Ok(self
            .conn
            .prepare_cached(&sql)?
            .exists(rusqlite::params![id])?)
    }

    /// Work out which of `columns` can be written, and their values.  Columns with no physical counterpart are
    /// skipped with a warning.
    fn writable_values(
        &self,
        row: &Row,
        columns: &[Column],
    ) -> Result<(Vec<String>, RowParams)> {
        let physical = self.require_table(row.table_id)?;

        let mut names = vec![quote_ident(ddl::TABLE_ID_COLUMN)];
        let mut params: RowParams = SmallVec::new();
        params.push(rusqlite::types::Value::Text(row.table_id.to_string()));

        for c in columns {
            if physical.column(&c.id.to_string()).is_none() {
                warn!(
                    "Column {} ({}) has no physical storage; not writing it",
                    c.name, c.id
                );
                continue;
            }

            let value = match row.value_for(c.id) {
                Some(v) => v.coerce_for(c),
                None => StoredValue::null_for(c),
            };
            names.push(quote_ident(&c.id.to_string()));
            params.push(value.to_sql_value());
        }

        Ok((names, params))
    }

    pub fn insert_row(&self, row: &Row, columns: &[Column]) -> Result<()> {
        let (mut names, values) = self.writable_values(row, columns)?;
        names.insert(0, quote_ident(ddl::ID_COLUMN));
        let mut params: RowParams = SmallVec::new();
        params.push(rusqlite::types::Value::Text(row.id.to_string()));
        params.extend(values);

        let mut context = tera::Context::new();
        context.insert("table", &quote_ident(&row.table_id.to_string()));
        context.insert("columns", &names);
        let sql = tera::Tera::one_off(INSERT_TEMPLATE, &context, false)?;
        debug!("Inserting row {}: {}", row.id, sql);

        self.conn
            .prepare_cached(&sql)?
            .execute(rusqlite::params_from_iter(params.iter()))?;
        Ok(())
    }

    pub fn update_row(&self, row: &Row, columns: &[Column]) -> Result<()> {
        let (names, values) = self.writable_values(row, columns)?;
        let mut params: RowParams = SmallVec::new();
        params.push(rusqlite::types::Value::Text(row.id.to_string()));
        params.extend(values);

        let mut context = tera::Context::new();
        context.insert("table", &quote_ident(&row.table_id.to_string()));
        context.insert("id_column", &quote_ident(ddl::ID_COLUMN));
        context.insert("columns", &names);
        let sql = tera::Tera::one_off(UPDATE_TEMPLATE, &context, false)?;
        debug!("Updating row {}: {}", row.id, sql);

        let changed = self
            .conn
            .prepare_cached(&sql)?
            .execute(rusqlite::params_from_iter(params.iter()))?;
        if changed == 0 {
            return Err(StorageError::not_found("Row", row.id));
        }
        Ok(())
    }

    pub fn delete_row(&self, row: &Row) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote_ident(&row.table_id.to_string()),
            quote_ident(ddl::ID_COLUMN)
        );
        let changed = self
            .conn
            .prepare_cached(&sql)?
            .execute(rusqlite::params![row.id])?;
        if changed == 0 {
            return Err(StorageError::not_found("Row", row.id));
        }
        Ok(())
    }
}

fn run_plan(conn: &mut rusqlite::Connection, plan: &MigrationPlan, check_foreign_keys: bool) -> Result<()> {
    let transaction = conn.transaction()?;
    for statement in plan.statements() {
        debug!("Running DDL: {}", statement);
        transaction.execute_batch(statement)?;
    }

    if check_foreign_keys && transaction.prepare("PRAGMA foreign_key_check")?.exists([])? {
        return Err(StorageError::ConstraintViolation(
            "Rebuilding a table left dangling references".into(),
        ));
    }

    transaction.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use crate::entities::Table;
    use crate::ids::DatabaseId;
    use crate::value::ValueType;

    fn memory_store() -> DataStore {
        tabula_logging::log_for_tests();
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        DataStore::with_connection(DatabaseId::new(), conn).unwrap()
    }

    fn physical_names(store: &DataStore, table: &Table) -> Vec<String> {
        store
            .physical_table(&table.id.to_string())
            .unwrap()
            .unwrap()
            .columns
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    #[test]
    fn columns_come_and_go() {
        let mut store = memory_store();
        let table = Table::new(store.get_database_id(), "t");
        store.create_table(&table).unwrap();
        assert_eq!(store.physical_table_names().unwrap(), vec![table.id.to_string()]);

        let a = Column::new(table.id, "a", ValueType::Int);
        let b = Column::new(table.id, "b", ValueType::Table).referencing(table.id);
        store.add_column(&a).unwrap();
        store.add_column(&b).unwrap();
        assert_eq!(
            physical_names(&store, &table),
            vec![a.id.to_string(), b.id.to_string()]
        );
        assert_eq!(
            store
                .physical_table(&table.id.to_string())
                .unwrap()
                .unwrap()
                .column(&b.id.to_string())
                .unwrap()
                .physical_type,
            PhysicalType::Reference(Some(table.id.to_string()))
        );

        // b is a foreign key, so this is the rebuild path.
        store.drop_column(&b).unwrap();
        assert_eq!(physical_names(&store, &table), vec![a.id.to_string()]);

        store.drop_table(table.id).unwrap();
        assert!(store.physical_table_names().unwrap().is_empty());
    }

    #[test]
    fn rows_round_trip() {
        let mut store = memory_store();
        let table = Table::new(store.get_database_id(), "t");
        store.create_table(&table).unwrap();
        let columns = vec![
            Column::new(table.id, "i", ValueType::Int),
            Column::new(table.id, "s", ValueType::String),
            Column::new(table.id, "b", ValueType::Bool),
            Column::new(table.id, "d", ValueType::Double),
            Column::new(table.id, "r", ValueType::Table).referencing(table.id),
        ];
        for c in columns.iter() {
            store.add_column(c).unwrap();
        }

        let first = Row::new(table.id, &columns);
        store.insert_row(&first, &columns).unwrap();

        let mut second = Row::new(table.id, &columns);
        second.set_value(columns[0].id, StoredValue::Int(Some(5)));
        second.set_value(columns[1].id, StoredValue::String(Some("five".into())));
        second.set_value(columns[2].id, StoredValue::Bool(Some(true)));
        second.set_value(columns[3].id, StoredValue::Double(Some(5.5)));
        second.set_value(columns[4].id, StoredValue::reference(&columns[4], first.id));
        store.insert_row(&second, &columns).unwrap();

        assert_eq!(
            store.load_rows(&table, &columns).unwrap(),
            vec![first.clone(), second.clone()]
        );

        second.set_value(columns[1].id, StoredValue::String(None));
        store.update_row(&second, &columns).unwrap();
        assert_eq!(
            store.load_row(second.id, &table, &columns).unwrap(),
            Some(second.clone())
        );

        store.delete_row(&second).unwrap();
        assert_eq!(store.load_row(second.id, &table, &columns).unwrap(), None);
        assert_eq!(
            store.delete_row(&second).unwrap_err().kind(),
            crate::ErrorKind::NotFound
        );
    }

    #[test]
    fn references_to_missing_rows_are_constraint_violations() {
        let mut store = memory_store();
        let table = Table::new(store.get_database_id(), "t");
        store.create_table(&table).unwrap();
        let r = Column::new(table.id, "r", ValueType::Table).referencing(table.id);
        store.add_column(&r).unwrap();

        let mut row = Row::new(table.id, &[r.clone()]);
        row.set_value(r.id, StoredValue::reference(&r, RowId::new()));
        let err = store.insert_row(&row, &[r]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ConstraintViolation);
    }

    #[test]
    fn columns_without_storage_read_null() {
        let mut store = memory_store();
        let table = Table::new(store.get_database_id(), "t");
        store.create_table(&table).unwrap();
        let present = Column::new(table.id, "p", ValueType::Int);
        store.add_column(&present).unwrap();
        let missing = Column::new(table.id, "m", ValueType::String);
        let columns = vec![present.clone(), missing.clone()];

        let mut row = Row::new(table.id, &columns);
        row.set_value(present.id, StoredValue::Int(Some(1)));
        row.set_value(missing.id, StoredValue::String(Some("lost".into())));
        store.insert_row(&row, &columns).unwrap();

        let back = store.load_row(row.id, &table, &columns).unwrap().unwrap();
        assert_eq!(back.value_for(present.id), Some(&StoredValue::Int(Some(1))));
        assert_eq!(back.value_for(missing.id), Some(&StoredValue::String(None)));
    }

    #[derive(Clone, Debug)]
    enum Op {
        Add(ValueType, bool),
        Remove(usize),
        Retype(usize, ValueType),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (any::<ValueType>(), any::<bool>()).prop_map(|(t, r)| Op::Add(t, r)),
            any::<usize>().prop_map(Op::Remove),
            (any::<usize>(), any::<ValueType>()).prop_map(|(i, t)| Op::Retype(i, t)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..Default::default()
        })]

        /// After every operation the physical columns are exactly the ones the schema calls for.
        #[test]
        fn physical_shape_tracks_schema(ops in proptest::collection::vec(op_strategy(), 0..16)) {
            let mut store = memory_store();
            let table = Table::new(store.get_database_id(), "t");
            store.create_table(&table).unwrap();
            let mut columns: Vec<Column> = vec![];

            for op in ops {
                match op {
                    Op::Add(t, point_at_self) => {
                        let mut c = Column::new(table.id, "c", t);
                        if t == ValueType::Table && point_at_self {
                            c = c.referencing(table.id);
                        }
                        store.add_column(&c).unwrap();
                        columns.push(c);
                    }
                    Op::Remove(i) if !columns.is_empty() => {
                        let c = columns.remove(i % columns.len());
                        store.drop_column(&c).unwrap();
                    }
                    Op::Retype(i, t) if !columns.is_empty() => {
                        let i = i % columns.len();
                        let mut new = columns[i].clone();
                        new.value_type = t;
                        new.referenced_table_id = None;
                        store.replace_column(&columns[i], &new).unwrap();
                        // Replacing moves the column to the end.
                        columns.remove(i);
                        columns.push(new);
                    }
                    _ => {}
                }

                let expected = PhysicalTable::for_schema(&table, &columns);
                let actual = store.physical_table(&table.id.to_string()).unwrap().unwrap();
                prop_assert_eq!(actual, expected);
            }
        }
    }
}
