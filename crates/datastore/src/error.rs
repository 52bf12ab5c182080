/// Coarse classification of a [StorageError], for callers which only need to decide how to react.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// The identifier didn't resolve.
    NotFound,
    /// A write was refused because of how rows reference each other.
    ConstraintViolation,
    /// Metadata and physical storage disagree.
    SchemaDrift,
    /// The caller handed us something malformed.
    Invalid,
    /// The backing storage couldn't be reached or is broken.  Distinct from `NotFound`: we don't know whether the
    /// thing exists.
    StorageIo,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Physical storage doesn't match the schema: {0}")]
    SchemaDrift(String),

    #[error("Invalid schema change: {0}")]
    InvalidChange(String),

    #[error("Sqlite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not render SQL: {0}")]
    Template(#[from] tera::Error),
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

impl StorageError {
    pub(crate) fn not_found(kind: &'static str, id: impl std::fmt::Display) -> Self {
        StorageError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            StorageError::SchemaDrift(_) => ErrorKind::SchemaDrift,
            StorageError::InvalidChange(_) => ErrorKind::Invalid,
            StorageError::Sqlite(_) | StorageError::Io(_) | StorageError::Template(_) => {
                ErrorKind::StorageIo
            }
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    /// Constraint failures get their own variant so that e.g. the UI can tell the user a row is still referenced;
    /// everything else sqlite can say is an I/O problem from our point of view.
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ffi_err, msg)
                if ffi_err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::ConstraintViolation(msg.unwrap_or_else(|| ffi_err.to_string()))
            }
            e => StorageError::Sqlite(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_failures_are_classified() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY NOT NULL)")
            .unwrap();
        conn.execute("INSERT INTO t (id) VALUES (1)", []).unwrap();
        let err: StorageError = conn
            .execute("INSERT INTO t (id) VALUES (1)", [])
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    }

    #[test]
    fn other_sqlite_failures_are_io() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: StorageError = conn
            .execute("SELECT * FROM missing", [])
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::StorageIo);
        assert_eq!(
            StorageError::not_found("Table", "abc").to_string(),
            "Table abc not found"
        );
    }
}
