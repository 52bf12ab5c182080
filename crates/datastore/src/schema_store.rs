//! The schema store: the record of what databases, tables and columns exist, and the thing which keeps every data
//! store's physical shape in step with that record.
//!
//! The two live in different sqlite files, so a change can't be one transaction.  Instead, every change is ordered so
//! that a failure halfway leaves physical storage ahead of the metadata: things being added are created physically
//! first, things being removed lose their metadata first.  Leftovers of that kind are harmless, and [SchemaStore::drift]
//! and [SchemaStore::reconcile] can find and remove them.  When the second step fails, we also make a best-effort
//! attempt to undo the first.
use std::collections::HashMap;

use log::*;

use crate::catalog::Catalog;
use crate::config::StoreConfig;
use crate::data_store::DataStore;
use crate::data_store_ref::DataStoreRef;
use crate::ddl::{self, MigrationPlan, PhysicalTable};
use crate::entities::{Column, Database, PrimaryKey, Table};
use crate::error::{Result, StorageError};
use crate::ids::{ColumnId, DatabaseId, TableId};
use crate::value::ValueType;

/// What [SchemaStore::update_column] did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ColumnChange {
    /// Only metadata changed; every value survived.
    MetadataOnly,
    /// The type or target changed, so the column was dropped and added again.  Every value in it is gone.
    Recreated,
}

/// The open data stores, one per database, opened on first use.
struct DataStores {
    config: StoreConfig,
    open: HashMap<DatabaseId, DataStore>,
}

impl DataStores {
    fn get_or_open(&mut self, database: DatabaseId) -> Result<&mut DataStore> {
        use std::collections::hash_map::Entry;

        match self.open.entry(database) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let dir = self.config.data_store_dir(database);
                let store = DataStore::open(database, &dir, &self.config)?;
                Ok(e.insert(store))
            }
        }
    }

    /// Close the store and delete everything it had on disk.
    fn destroy(&mut self, database: DatabaseId) -> Result<()> {
        // The connection has to be closed before its files can go.
        self.open.remove(&database);
        let dir = self.config.data_store_dir(database);
        if dir.exists() {
            info!("Deleting data store at {}", dir);
            std::fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }
}

fn logged<T>(op: &str, res: Result<T>) -> Result<T> {
    if let Err(e) = &res {
        error!("{} failed: {}", op, e);
    }
    res
}

/// Log a failed read and carry on with `fallback`.
fn or_log<T>(op: &str, res: Result<T>, fallback: T) -> T {
    res.unwrap_or_else(|e| {
        error!("{} failed: {}", op, e);
        fallback
    })
}

/// Log the failure of a compensating step.  The caller sees the error that caused the undo.
fn undo(what: &str, res: Result<()>) {
    if let Err(e) = res {
        warn!("Could not undo {}: {}; run reconcile to clean up", what, e);
    }
}

pub struct SchemaStore {
    catalog: Catalog,
    data_stores: DataStores,
}

impl SchemaStore {
    /// Open the schema store under the configured root, creating it if needed.
    ///
    /// Failing here is the one error an application can't do much about: without this store nothing works.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let conn = crate::connection::open_in_dir(&config.schema_dir(), &config)?;
        let catalog = Catalog::new(conn)?;
        info!("Schema store open at {}", config.get_root());
        Ok(Self {
            catalog,
            data_stores: DataStores {
                config,
                open: Default::default(),
            },
        })
    }

    pub fn add_database(&mut self, db: Database) -> Result<Database> {
        logged("add_database", self.catalog.insert_database(&db))?;
        info!("Added database {} ({})", db.name, db.id);
        Ok(db)
    }

    pub fn update_database(&mut self, db: &Database) -> Result<()> {
        logged("update_database", self.catalog.update_database(db))
    }

    /// Remove a database, its tables and columns, and all of its rows.  Irreversible.
    pub fn remove_database(&mut self, db: &Database) -> Result<()> {
        logged("remove_database", self.catalog.delete_database(db.id))?;
        logged("remove_database", self.data_stores.destroy(db.id))?;
        info!("Removed database {} ({})", db.name, db.id);
        Ok(())
    }

    fn require_database(&self, id: DatabaseId) -> Result<Database> {
        self.catalog
            .database(id)?
            .ok_or_else(|| StorageError::not_found("Database", id))
    }

    fn require_table(&self, id: TableId) -> Result<Table> {
        self.catalog
            .table(id)?
            .ok_or_else(|| StorageError::not_found("Table", id))
    }

    fn require_column(&self, id: ColumnId) -> Result<Column> {
        self.catalog
            .column(id)?
            .ok_or_else(|| StorageError::not_found("Column", id))
    }

    pub fn add_table(&mut self, table: Table) -> Result<Table> {
        logged("add_table", self.add_table_inner(&table))?;
        info!("Added table {} ({})", table.name, table.id);
        Ok(table)
    }

    fn add_table_inner(&mut self, table: &Table) -> Result<()> {
        self.require_database(table.database_id)?;
        if self.catalog.table(table.id)?.is_some() {
            return Err(StorageError::ConstraintViolation(format!(
                "Table {} already exists",
                table.id
            )));
        }

        let store = self.data_stores.get_or_open(table.database_id)?;
        store.create_table(table)?;
        if let Err(e) = self.catalog.insert_table(table) {
            undo("physical table creation", store.drop_table(table.id));
            return Err(e);
        }
        Ok(())
    }

    /// Only the name and visibility are read; the physical table is keyed by id, so nothing physical happens.
    pub fn update_table(&mut self, table: &Table) -> Result<()> {
        logged("update_table", self.update_table_inner(table))
    }

    fn update_table_inner(&mut self, table: &Table) -> Result<()> {
        let old = self.require_table(table.id)?;
        if old.database_id != table.database_id {
            return Err(StorageError::InvalidChange(format!(
                "Table {} can't move to another database",
                table.id
            )));
        }
        self.catalog.update_table(table)
    }

    /// Remove a table with its columns and rows.
    ///
    /// Columns elsewhere which pointed at it are left waiting to be configured again, and their values read as null.
    pub fn remove_table(&mut self, table: &Table) -> Result<()> {
        logged("remove_table", self.remove_table_inner(table))?;
        info!("Removed table {} ({})", table.name, table.id);
        Ok(())
    }

    fn remove_table_inner(&mut self, table: &Table) -> Result<()> {
        let table = self.require_table(table.id)?;
        let referencing = self
            .catalog
            .all_columns()?
            .into_iter()
            .filter(|c| c.referenced_table_id == Some(table.id) && c.table_id != table.id)
            .map(|c| c.table_id)
            .collect::<std::collections::BTreeSet<_>>();

        self.catalog.delete_table(table.id)?;

        let store = self.data_stores.get_or_open(table.database_id)?;
        store.drop_table(table.id)?;

        // The metadata for columns pointing here was nulled out by the delete; follow suit physically so they stop
        // being foreign keys into a table which no longer exists.
        for other in referencing {
            if let Some(other_table) = self.catalog.table(other)? {
                let desired =
                    PhysicalTable::for_schema(&other_table, &self.catalog.columns_for(other)?);
                store.sync_table(&desired.name, Some(&desired))?;
            }
        }

        Ok(())
    }

    /// Check that a column makes sense: its table exists, and if it points at a table that one is in the same
    /// database.  Returns the table the column belongs to.
    fn validate_column(&self, column: &Column) -> Result<Table> {
        let table = self.require_table(column.table_id)?;

        match (column.value_type, column.referenced_table_id) {
            (ValueType::Table, Some(target)) => {
                let target = self.require_table(target)?;
                if target.database_id != table.database_id {
                    return Err(StorageError::InvalidChange(format!(
                        "Column {} can't point at table {} in another database",
                        column.id, target.id
                    )));
                }
            }
            (ValueType::Table, None) => {}
            (t, Some(_)) => {
                return Err(StorageError::InvalidChange(format!(
                    "Column {} is {:?} but points at a table",
                    column.id, t
                )));
            }
            (_, None) => {}
        }

        Ok(table)
    }

    pub fn add_column(&mut self, column: Column) -> Result<Column> {
        logged("add_column", self.add_column_inner(&column))?;
        info!(
            "Added column {} ({}) to {}",
            column.name, column.id, column.table_id
        );
        Ok(column)
    }

    fn add_column_inner(&mut self, column: &Column) -> Result<()> {
        let table = self.validate_column(column)?;
        if self.catalog.column(column.id)?.is_some() {
            return Err(StorageError::ConstraintViolation(format!(
                "Column {} already exists",
                column.id
            )));
        }

        let store = self.data_stores.get_or_open(table.database_id)?;
        store.add_column(column)?;
        if let Err(e) = self.catalog.insert_column(column) {
            undo("physical column creation", store.drop_column(column));
            return Err(e);
        }
        Ok(())
    }

    pub fn remove_column(&mut self, column: &Column) -> Result<()> {
        logged("remove_column", self.remove_column_inner(column))
    }

    fn remove_column_inner(&mut self, column: &Column) -> Result<()> {
        let column = self.require_column(column.id)?;
        let table = self.require_table(column.table_id)?;
        self.catalog.delete_column(column.id)?;
        self.data_stores
            .get_or_open(table.database_id)?
            .drop_column(&column)
    }

    /// Update a column.
    ///
    /// Renaming or changing the primary flag is metadata only.  Changing the type, or the table a table column points
    /// at, drops the column and adds it back: every value in it is lost.  There is no conversion between types.
    pub fn update_column(&mut self, column: &Column) -> Result<ColumnChange> {
        let change = logged("update_column", self.update_column_inner(column))?;
        if change == ColumnChange::Recreated {
            warn!(
                "Column {} ({}) was recreated as {:?}; its values were dropped",
                column.name, column.id, column.value_type
            );
        }
        Ok(change)
    }

    fn update_column_inner(&mut self, column: &Column) -> Result<ColumnChange> {
        let old = self.require_column(column.id)?;
        if old.table_id != column.table_id {
            return Err(StorageError::InvalidChange(format!(
                "Column {} can't move to another table",
                column.id
            )));
        }
        let table = self.validate_column(column)?;

        if !old.requires_rebuild(column) {
            self.catalog.update_column(column)?;
            return Ok(ColumnChange::MetadataOnly);
        }

        let store = self.data_stores.get_or_open(table.database_id)?;
        store.replace_column(&old, column)?;
        if let Err(e) = self.catalog.update_column(column) {
            undo("column recreation", store.replace_column(column, &old));
            return Err(e);
        }
        Ok(ColumnChange::Recreated)
    }

    pub fn database(&self, id: DatabaseId) -> Option<Database> {
        or_log("database", self.catalog.database(id), None)
    }

    pub fn all_databases(&self) -> Vec<Database> {
        or_log("all_databases", self.catalog.all_databases(), vec![])
    }

    pub fn table(&self, id: TableId) -> Option<Table> {
        or_log("table", self.catalog.table(id), None)
    }

    /// A database's tables, in the order they were added.
    pub fn tables_for(&self, database: DatabaseId) -> Vec<Table> {
        or_log("tables_for", self.catalog.tables_for(database), vec![])
    }

    /// Like [SchemaStore::tables_for], without the hidden ones.
    pub fn visible_tables_for(&self, database: DatabaseId) -> Vec<Table> {
        let mut tables = self.tables_for(database);
        tables.retain(|t| t.should_show);
        tables
    }

    pub fn all_tables(&self) -> Vec<Table> {
        or_log("all_tables", self.catalog.all_tables(), vec![])
    }

    pub fn column(&self, id: ColumnId) -> Option<Column> {
        or_log("column", self.catalog.column(id), None)
    }

    /// A table's columns, in the order they were added.
    pub fn columns_for(&self, table: TableId) -> Vec<Column> {
        or_log("columns_for", self.catalog.columns_for(table), vec![])
    }

    pub fn all_columns(&self) -> Vec<Column> {
        or_log("all_columns", self.catalog.all_columns(), vec![])
    }

    pub fn primary_key(&self, table: &Table) -> PrimaryKey {
        PrimaryKey::derive(table, &self.columns_for(table.id))
    }

    /// The data store holding a database's rows.
    pub fn data_store(&mut self, database: DatabaseId) -> Result<DataStoreRef<'_>> {
        logged("data_store", self.require_database(database))?;
        let store = logged("data_store", self.data_stores.get_or_open(database))?;
        Ok(DataStoreRef::new(&self.catalog, store))
    }

    /// The DDL it would take to make a database's physical storage match its metadata.  Empty when they agree.
    pub fn drift(&mut self, database: DatabaseId) -> Result<MigrationPlan> {
        logged("drift", self.drift_inner(database))
    }

    fn drift_inner(&mut self, database: DatabaseId) -> Result<MigrationPlan> {
        self.require_database(database)?;
        let tables = self.catalog.tables_for(database)?;
        let store = self.data_stores.get_or_open(database)?;
        let mut plan = MigrationPlan::default();

        let expected = tables
            .iter()
            .map(|t| t.id.to_string())
            .collect::<std::collections::HashSet<_>>();
        for orphan in store.physical_table_names()? {
            if !expected.contains(&orphan) {
                debug!("Physical table {} has no metadata", orphan);
                plan.extend(ddl::plan(store.physical_table(&orphan)?.as_ref(), None)?);
            }
        }

        for table in tables.iter() {
            let desired = PhysicalTable::for_schema(table, &self.catalog.columns_for(table.id)?);
            let actual = store.physical_table(&desired.name)?;
            plan.extend(ddl::plan(actual.as_ref(), Some(&desired))?);
        }

        Ok(plan)
    }

    /// Make a database's physical storage match its metadata, e.g. after a crash between the two halves of a change.
    pub fn reconcile(&mut self, database: DatabaseId) -> Result<()> {
        let plan = self.drift(database)?;
        if plan.is_empty() {
            return Ok(());
        }

        info!(
            "Reconciling database {}: {} statements",
            database,
            plan.statements().len()
        );
        logged(
            "reconcile",
            self.data_stores.get_or_open(database)?.apply(&plan),
        )
    }
}
