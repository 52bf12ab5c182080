//! Identifiers.
//!
//! Every entity gets a random v4 uuid when it is constructed, never one assigned by storage.  This lets the caller
//! refer to things before they are saved, and means renames never touch identity.  The physical layout leans on this:
//! tables and columns in a data store are named after their ids.
use derive_more::Display;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, Display, Ord, Eq, PartialOrd, PartialEq, Hash, serde::Serialize, serde::Deserialize,
        )]
        #[display(fmt = "{}", _0)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn parse_str(input: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(input).map(Self)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0.to_string()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                Uuid::parse_str(value.as_str()?)
                    .map(Self)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

define_id!(
    /// Identifies a user-created database.
    DatabaseId
);
define_id!(
    /// Identifies a table. Also the name of the table's physical counterpart.
    TableId
);
define_id!(
    /// Identifies a column. Also the name of the column's physical counterpart.
    ColumnId
);
define_id!(RowId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_parse_back() {
        let a = TableId::new();
        let b = TableId::new();
        assert_ne!(a, b);
        assert_eq!(TableId::parse_str(&a.to_string()).unwrap(), a);
        assert!(RowId::parse_str("not a uuid").is_err());
    }

    #[test]
    fn ids_survive_sqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let id = ColumnId::new();
        let back: ColumnId = conn
            .query_row("SELECT ?1", rusqlite::params![id], |r| r.get(0))
            .unwrap();
        assert_eq!(back, id);
    }
}
