//! Opening sqlite connections the same way for every store.
use camino::Utf8Path;
use log::*;

use crate::config::StoreConfig;
use crate::error::Result;

/// SQL that we run as part of opening a connection.
///
/// - Sets up WAL.
/// - Enables the busy timeout.
/// - Enables foreign key enforcement.  Table columns are foreign keys into the table they point at, and the schema
///   store cascades deletes through them.
/// - Raises the default cache size, since sqlite's default is sized for small devices.
const INITIAL_SQL: &str = r#"
PRAGMA busy_timeout = {{ busy_timeout_ms }};
PRAGMA cache_size = -{{ cache_size_kib }};
PRAGMA foreign_keys = 1;
PRAGMA journal_mode = WAL;
PRAGMA wal_autocheckpoint = 10000;
"#;

fn render_initial_sql(config: &StoreConfig) -> Result<String> {
    let mut context = tera::Context::new();
    context.insert(
        "busy_timeout_ms",
        &(config.get_busy_timeout().as_millis() as u64),
    );
    context.insert("cache_size_kib", &config.get_cache_size_kib());
    Ok(tera::Tera::one_off(INITIAL_SQL, &context, false)?)
}

/// Apply our pragmas to a connection.
pub(crate) fn configure(conn: &rusqlite::Connection, config: &StoreConfig) -> Result<()> {
    conn.execute_batch(&render_initial_sql(config)?)?;
    Ok(())
}

/// Open (creating if needed) `database.sqlite` inside `dir`.
pub(crate) fn open_in_dir(dir: &Utf8Path, config: &StoreConfig) -> Result<rusqlite::Connection> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join("database.sqlite");
    info!("Opening sqlite database at {}", path);
    let conn = rusqlite::Connection::open(path.as_std_path())?;
    configure(&conn, config)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pragmas_follow_config() {
        let config = StoreConfig::new("/unused")
            .with_busy_timeout(std::time::Duration::from_millis(250))
            .with_cache_size_kib(2048);
        let sql = render_initial_sql(&config).unwrap();
        assert!(sql.contains("PRAGMA busy_timeout = 250;"));
        assert!(sql.contains("PRAGMA cache_size = -2048;"));

        let conn = rusqlite::Connection::open_in_memory().unwrap();
        configure(&conn, &config).unwrap();
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |r| r.get(0))
            .unwrap();
        assert_eq!(fk, 1);
    }
}
