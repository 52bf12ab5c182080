//! Named, run-once migrations for the schema store.
//!
//! Each migration runs at most once per store, recorded in a `migrations` table.  That table is the one thing we can't
//! migrate without a lot of work.
use log::*;

use crate::error::Result;

pub(crate) struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// Run the migrations for a given database, creating the initial migrations infrastructure if necessary.
pub(crate) fn run_migrations(conn: &mut rusqlite::Connection, migrations: &[Migration]) -> Result<()> {
    let transaction = conn.transaction()?;

    transaction.execute(
        r#"CREATE TABLE IF NOT EXISTS migrations (
        -- Name of the migration.
        name TEXT PRIMARY KEY NOT NULL,
        -- The specific sql run for this migration, which can be useful for debugging.
        sql TEXT NOT NULL,
        -- Unix timestamp as real seconds
        ran_at REAL NOT NULL,
        -- Duration taken as real seconds.
        duration REAL NOT NULL
    )"#,
        [],
    )?;

    for mig in migrations {
        let had_migration = transaction
            .prepare("SELECT * FROM migrations WHERE name = ?")?
            .exists(rusqlite::params![mig.name])?;
        if had_migration {
            continue;
        }

        let ran_at = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        info!("Running migration {}", mig.name);
        let start_time = std::time::Instant::now();
        transaction.execute_batch(mig.sql)?;
        let duration = start_time.elapsed().as_secs_f64();

        transaction.execute(
            "INSERT INTO migrations(name, sql, ran_at, duration) VALUES(?, ?, ?, ?)",
            rusqlite::params![mig.name, mig.sql, ran_at, duration],
        )?;
    }

    // Make sure that no one has played around with foreign keys.
    let violated = transaction.prepare("PRAGMA foreign_key_check")?.exists([])?;
    if violated {
        return Err(crate::StorageError::ConstraintViolation(
            "foreign key check failed after migrations".into(),
        ));
    }

    transaction.commit()?;
    Ok(())
}
