//! The metadata tables of the schema store: what databases, tables and columns exist.
//!
//! This only touches the schema store's own sqlite file.  Keeping data stores in step is [crate::SchemaStore]'s job.
use rusqlite::OptionalExtension;

use crate::entities::{Column, Database, Table};
use crate::error::{Result, StorageError};
use crate::ids::{ColumnId, DatabaseId, TableId};
use crate::migrations::Migration;

pub(crate) const MIGRATIONS: &[Migration] = &[Migration {
    name: "create_schema_tables",
    sql: r#"
CREATE TABLE "database" (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL
);

CREATE TABLE "table" (
    id TEXT PRIMARY KEY NOT NULL,
    database_id TEXT NOT NULL REFERENCES "database"(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    should_show BOOLEAN NOT NULL
);
CREATE INDEX table_by_database ON "table"(database_id);

CREATE TABLE "column" (
    id TEXT PRIMARY KEY NOT NULL,
    table_id TEXT NOT NULL REFERENCES "table"(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    is_primary BOOLEAN NOT NULL,
    value_type TEXT NOT NULL,
    -- Nulled out when the referenced table goes away, which leaves the column waiting to be configured again.
    referenced_table_id TEXT REFERENCES "table"(id) ON DELETE SET NULL
);
CREATE INDEX column_by_table ON "column"(table_id);
CREATE INDEX column_by_referenced_table ON "column"(referenced_table_id);
"#,
}];

const TABLE_FIELDS: &str = r#"id, database_id, name, should_show"#;
const COLUMN_FIELDS: &str =
    r#"id, table_id, name, is_primary, value_type, referenced_table_id"#;

fn database_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Database> {
    Ok(Database {
        id: r.get(0)?,
        name: r.get(1)?,
    })
}

fn table_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Table> {
    Ok(Table {
        id: r.get(0)?,
        database_id: r.get(1)?,
        name: r.get(2)?,
        should_show: r.get(3)?,
    })
}

fn column_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Column> {
    Ok(Column {
        id: r.get(0)?,
        table_id: r.get(1)?,
        name: r.get(2)?,
        is_primary: r.get(3)?,
        value_type: r.get(4)?,
        referenced_table_id: r.get(5)?,
    })
}

pub(crate) struct Catalog {
    conn: rusqlite::Connection,
}

impl Catalog {
    pub(crate) fn new(mut conn: rusqlite::Connection) -> Result<Self> {
        crate::migrations::run_migrations(&mut conn, MIGRATIONS)?;
        Ok(Self { conn })
    }

    fn query_all<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        f: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let ret = stmt
            .query_map(params, f)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ret)
    }

    fn query_one<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        f: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Option<T>> {
        Ok(self
            .conn
            .prepare_cached(sql)?
            .query_row(params, f)
            .optional()?)
    }

    /// Fail with `NotFound` if an update or delete touched nothing.
    fn expect_changed(changed: usize, kind: &'static str, id: impl std::fmt::Display) -> Result<()> {
        if changed == 0 {
            return Err(StorageError::not_found(kind, id));
        }
        Ok(())
    }

    pub(crate) fn insert_database(&self, db: &Database) -> Result<()> {
        self.conn.execute(
            r#"INSERT INTO "database" (id, name) VALUES (?, ?)"#,
            rusqlite::params![db.id, db.name],
        )?;
        Ok(())
    }

    pub(crate) fn update_database(&self, db: &Database) -> Result<()> {
        let changed = self.conn.execute(
            r#"UPDATE "database" SET name = ? WHERE id = ?"#,
            rusqlite::params![db.name, db.id],
        )?;
        Self::expect_changed(changed, "Database", db.id)
    }

    /// Cascades to the database's tables and their columns.
    pub(crate) fn delete_database(&self, id: DatabaseId) -> Result<()> {
        let changed = self.conn.execute(
            r#"DELETE FROM "database" WHERE id = ?"#,
            rusqlite::params![id],
        )?;
        Self::expect_changed(changed, "Database", id)
    }

    pub(crate) fn database(&self, id: DatabaseId) -> Result<Option<Database>> {
        self.query_one(
            r#"SELECT id, name FROM "database" WHERE id = ?"#,
            rusqlite::params![id],
            database_from_row,
        )
    }

    pub(crate) fn all_databases(&self) -> Result<Vec<Database>> {
        self.query_all(
            r#"SELECT id, name FROM "database" ORDER BY rowid"#,
            [],
            database_from_row,
        )
    }

    pub(crate) fn insert_table(&self, table: &Table) -> Result<()> {
        self.conn.execute(
            r#"INSERT INTO "table" (id, database_id, name, should_show) VALUES (?, ?, ?, ?)"#,
            rusqlite::params![table.id, table.database_id, table.name, table.should_show],
        )?;
        Ok(())
    }

    /// Only the name and visibility can change; the database a table belongs to is fixed.
    pub(crate) fn update_table(&self, table: &Table) -> Result<()> {
        let changed = self.conn.execute(
            r#"UPDATE "table" SET name = ?, should_show = ? WHERE id = ? AND database_id = ?"#,
            rusqlite::params![table.name, table.should_show, table.id, table.database_id],
        )?;
        Self::expect_changed(changed, "Table", table.id)
    }

    /// Cascades to the table's columns, and unpoints columns elsewhere which referenced it.
    pub(crate) fn delete_table(&self, id: TableId) -> Result<()> {
        let changed = self
            .conn
            .execute(r#"DELETE FROM "table" WHERE id = ?"#, rusqlite::params![id])?;
        Self::expect_changed(changed, "Table", id)
    }

    pub(crate) fn table(&self, id: TableId) -> Result<Option<Table>> {
        self.query_one(
            &format!(r#"SELECT {} FROM "table" WHERE id = ?"#, TABLE_FIELDS),
            rusqlite::params![id],
            table_from_row,
        )
    }

    pub(crate) fn tables_for(&self, database: DatabaseId) -> Result<Vec<Table>> {
        self.query_all(
            &format!(
                r#"SELECT {} FROM "table" WHERE database_id = ? ORDER BY rowid"#,
                TABLE_FIELDS
            ),
            rusqlite::params![database],
            table_from_row,
        )
    }

    pub(crate) fn all_tables(&self) -> Result<Vec<Table>> {
        self.query_all(
            &format!(r#"SELECT {} FROM "table" ORDER BY rowid"#, TABLE_FIELDS),
            [],
            table_from_row,
        )
    }

    pub(crate) fn insert_column(&self, column: &Column) -> Result<()> {
        self.conn.execute(
            &format!(
                r#"INSERT INTO "column" ({}) VALUES (?, ?, ?, ?, ?, ?)"#,
                COLUMN_FIELDS
            ),
            rusqlite::params![
                column.id,
                column.table_id,
                column.name,
                column.is_primary,
                column.value_type,
                column.referenced_table_id
            ],
        )?;
        Ok(())
    }

    pub(crate) fn update_column(&self, column: &Column) -> Result<()> {
        let changed = self.conn.execute(
            r#"UPDATE "column" SET name = ?, is_primary = ?, value_type = ?, referenced_table_id = ?
            WHERE id = ? AND table_id = ?"#,
            rusqlite::params![
                column.name,
                column.is_primary,
                column.value_type,
                column.referenced_table_id,
                column.id,
                column.table_id
            ],
        )?;
        Self::expect_changed(changed, "Column", column.id)
    }

    pub(crate) fn delete_column(&self, id: ColumnId) -> Result<()> {
        let changed = self
            .conn
            .execute(r#"DELETE FROM "column" WHERE id = ?"#, rusqlite::params![id])?;
        Self::expect_changed(changed, "Column", id)
    }

    pub(crate) fn column(&self, id: ColumnId) -> Result<Option<Column>> {
        self.query_one(
            &format!(r#"SELECT {} FROM "column" WHERE id = ?"#, COLUMN_FIELDS),
            rusqlite::params![id],
            column_from_row,
        )
    }

    /// In the order they were added, which is the order the table lists them in.
    pub(crate) fn columns_for(&self, table: TableId) -> Result<Vec<Column>> {
        self.query_all(
            &format!(
                r#"SELECT {} FROM "column" WHERE table_id = ? ORDER BY rowid"#,
                COLUMN_FIELDS
            ),
            rusqlite::params![table],
            column_from_row,
        )
    }

    pub(crate) fn all_columns(&self) -> Result<Vec<Column>> {
        self.query_all(
            &format!(r#"SELECT {} FROM "column" ORDER BY rowid"#, COLUMN_FIELDS),
            [],
            column_from_row,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    use crate::value::ValueType;

    fn catalog() -> Catalog {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = 1").unwrap();
        Catalog::new(conn).unwrap()
    }

    #[test]
    fn cascades() {
        let catalog = catalog();
        let db = Database::new("d");
        catalog.insert_database(&db).unwrap();
        let t1 = Table::new(db.id, "t1");
        let t2 = Table::new(db.id, "t2");
        catalog.insert_table(&t1).unwrap();
        catalog.insert_table(&t2).unwrap();
        let c1 = Column::new(t1.id, "c1", ValueType::Int);
        let r = Column::new(t2.id, "r", ValueType::Table).referencing(t1.id);
        catalog.insert_column(&c1).unwrap();
        catalog.insert_column(&r).unwrap();

        assert_eq!(catalog.tables_for(db.id).unwrap(), vec![t1.clone(), t2.clone()]);
        assert_eq!(catalog.column(r.id).unwrap(), Some(r.clone()));

        // Removing t1 takes c1 with it and leaves r pending.
        catalog.delete_table(t1.id).unwrap();
        assert_eq!(catalog.column(c1.id).unwrap(), None);
        assert!(catalog.column(r.id).unwrap().unwrap().is_pending());

        catalog.delete_database(db.id).unwrap();
        assert!(catalog.all_tables().unwrap().is_empty());
        assert!(catalog.all_columns().unwrap().is_empty());
    }

    #[test]
    fn updates_of_missing_things_are_not_found() {
        let catalog = catalog();
        let db = Database::new("d");
        assert_eq!(
            catalog.update_database(&db).unwrap_err().kind(),
            crate::ErrorKind::NotFound
        );
        assert_eq!(
            catalog.delete_table(TableId::new()).unwrap_err().kind(),
            crate::ErrorKind::NotFound
        );
    }

    #[test]
    fn tables_need_a_database() {
        let catalog = catalog();
        let orphan = Table::new(DatabaseId::new(), "t");
        assert_eq!(
            catalog.insert_table(&orphan).unwrap_err().kind(),
            crate::ErrorKind::ConstraintViolation
        );
    }
}
