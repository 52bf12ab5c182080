//! Cell values.
//!
//! A column has a [ValueType]; a cell holds a [StoredValue] whose variant matches it.  Every variant is independently
//! nullable: a null cell is e.g. `StoredValue::Int(None)`, never a missing entry.
//!
//! Conversion to and from sqlite is explicit per type.  Whatever sqlite hands back that doesn't fit the column's type
//! becomes null rather than an error, since that can only happen after the physical and declared schemas drifted
//! apart.
use log::*;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};

use crate::entities::Column;
use crate::ids::{RowId, TableId};

/// Types of a column.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int,
    String,
    Bool,
    Double,
    /// The column points at rows of another (or the same) table.
    Table,
}

impl ValueType {
    pub const ALL: [ValueType; 5] = [
        ValueType::Int,
        ValueType::String,
        ValueType::Bool,
        ValueType::Double,
        ValueType::Table,
    ];

    /// The tag stored in the schema store.  Stable; never change these.
    pub fn as_tag(&self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::String => "string",
            ValueType::Bool => "bool",
            ValueType::Double => "double",
            ValueType::Table => "table",
        }
    }

    pub fn from_tag(tag: &str) -> Option<ValueType> {
        ValueType::ALL.into_iter().find(|t| t.as_tag() == tag)
    }

    /// What a user should see this type called.
    pub fn display_name(&self) -> &'static str {
        match self {
            ValueType::Int => "Integer",
            ValueType::String => "Text",
            ValueType::Bool => "True or False",
            ValueType::Double => "Decimal",
            ValueType::Table => "Table",
        }
    }
}

impl ToSql for ValueType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_tag()))
    }
}

impl FromSql for ValueType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let tag = value.as_str()?;
        ValueType::from_tag(tag).ok_or_else(|| {
            FromSqlError::Other(format!("Unknown value type tag {}", tag).into())
        })
    }
}

/// Why some user input couldn't become a value.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("{input:?} is not an integer")]
    NotAnInteger { input: String },

    #[error("{input:?} is not a number")]
    NotANumber { input: String },

    #[error("{input:?} is neither true nor false")]
    NotABool { input: String },

    #[error("{input:?} is not a row identifier")]
    NotARowId { input: String },
}

/// The typed, nullable value of one cell.
#[derive(Clone, Debug, PartialEq)]
pub enum StoredValue {
    Int(Option<i64>),
    String(Option<String>),
    Bool(Option<bool>),
    Double(Option<f64>),
    Row {
        referenced_row_id: Option<RowId>,
        referenced_table_id: Option<TableId>,
    },
}

impl StoredValue {
    /// The null value for a column.
    pub fn null_for(column: &Column) -> StoredValue {
        match column.value_type {
            ValueType::Int => StoredValue::Int(None),
            ValueType::String => StoredValue::String(None),
            ValueType::Bool => StoredValue::Bool(None),
            ValueType::Double => StoredValue::Double(None),
            ValueType::Table => StoredValue::Row {
                referenced_row_id: None,
                referenced_table_id: column.referenced_table_id,
            },
        }
    }

    /// A reference to a row of the table `column` points at.
    pub fn reference(column: &Column, row_id: RowId) -> StoredValue {
        StoredValue::Row {
            referenced_row_id: Some(row_id),
            referenced_table_id: column.referenced_table_id,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            StoredValue::Int(_) => ValueType::Int,
            StoredValue::String(_) => ValueType::String,
            StoredValue::Bool(_) => ValueType::Bool,
            StoredValue::Double(_) => ValueType::Double,
            StoredValue::Row { .. } => ValueType::Table,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            StoredValue::Int(v) => v.is_none(),
            StoredValue::String(v) => v.is_none(),
            StoredValue::Bool(v) => v.is_none(),
            StoredValue::Double(v) => v.is_none(),
            StoredValue::Row {
                referenced_row_id, ..
            } => referenced_row_id.is_none(),
        }
    }

    /// Parse text typed by a user into a value for `column`.
    ///
    /// `None` is null.  Surrounding whitespace is ignored for everything but strings.  A table column which doesn't
    /// yet point anywhere parses everything to null.
    pub fn parse(column: &Column, input: Option<&str>) -> Result<StoredValue, ValueError> {
        let input = match input {
            None => return Ok(StoredValue::null_for(column)),
            Some(x) => x,
        };
        let trimmed = input.trim();

        let value = match column.value_type {
            ValueType::Int => StoredValue::Int(Some(trimmed.parse().map_err(|_| {
                ValueError::NotAnInteger {
                    input: input.to_string(),
                }
            })?)),
            ValueType::String => StoredValue::String(Some(input.to_string())),
            ValueType::Bool => {
                let b = if trimmed.eq_ignore_ascii_case("true") {
                    true
                } else if trimmed.eq_ignore_ascii_case("false") {
                    false
                } else {
                    return Err(ValueError::NotABool {
                        input: input.to_string(),
                    });
                };
                StoredValue::Bool(Some(b))
            }
            ValueType::Double => StoredValue::Double(Some(trimmed.parse().map_err(|_| {
                ValueError::NotANumber {
                    input: input.to_string(),
                }
            })?)),
            ValueType::Table => {
                if column.referenced_table_id.is_none() {
                    return Ok(StoredValue::null_for(column));
                }
                let id = RowId::parse_str(trimmed).map_err(|_| ValueError::NotARowId {
                    input: input.to_string(),
                })?;
                StoredValue::reference(column, id)
            }
        };

        Ok(value)
    }

    /// Make this value fit `column`, for writing.
    ///
    /// A value of the wrong variant becomes null, as does anything aimed at a table column which doesn't point at a
    /// table yet.  References always take the column's current target.
    pub fn coerce_for(&self, column: &Column) -> StoredValue {
        if self.value_type() != column.value_type {
            warn!(
                "Column {} is {:?} but got a {:?} value; storing null",
                column.id,
                column.value_type,
                self.value_type()
            );
            return StoredValue::null_for(column);
        }

        match self {
            StoredValue::Row {
                referenced_row_id, ..
            } => {
                if column.referenced_table_id.is_none() {
                    if referenced_row_id.is_some() {
                        debug!(
                            "Column {} doesn't point at a table yet; storing null",
                            column.id
                        );
                    }
                    return StoredValue::null_for(column);
                }
                StoredValue::Row {
                    referenced_row_id: *referenced_row_id,
                    referenced_table_id: column.referenced_table_id,
                }
            }
            x => x.clone(),
        }
    }

    /// The owned sqlite value to bind for this cell.
    pub(crate) fn to_sql_value(&self) -> Value {
        match self {
            StoredValue::Int(Some(i)) => Value::Integer(*i),
            StoredValue::String(Some(s)) => Value::Text(s.clone()),
            StoredValue::Bool(Some(b)) => Value::Integer(*b as i64),
            StoredValue::Double(Some(d)) => Value::Real(*d),
            StoredValue::Row {
                referenced_row_id: Some(id),
                ..
            } => Value::Text(id.to_string()),
            _ => Value::Null,
        }
    }

    /// Read a cell back for `column`.
    pub(crate) fn from_sql_ref(column: &Column, value: ValueRef<'_>) -> StoredValue {
        let converted = match (column.value_type, value) {
            (_, ValueRef::Null) => None,
            (ValueType::Int, ValueRef::Integer(i)) => Some(StoredValue::Int(Some(i))),
            (ValueType::String, ValueRef::Text(t)) => std::str::from_utf8(t)
                .ok()
                .map(|s| StoredValue::String(Some(s.to_string()))),
            (ValueType::Bool, ValueRef::Integer(i)) => Some(StoredValue::Bool(Some(i != 0))),
            (ValueType::Double, ValueRef::Real(d)) => Some(StoredValue::Double(Some(d))),
            (ValueType::Double, ValueRef::Integer(i)) => Some(StoredValue::Double(Some(i as f64))),
            (ValueType::Table, ValueRef::Text(t)) if column.referenced_table_id.is_some() => {
                std::str::from_utf8(t)
                    .ok()
                    .and_then(|s| RowId::parse_str(s).ok())
                    .map(|id| StoredValue::reference(column, id))
            }
            (ValueType::Table, _) if column.referenced_table_id.is_none() => None,
            (t, v) => {
                warn!(
                    "Column {} is {:?} but storage holds a {:?}; reading null",
                    column.id,
                    t,
                    v.data_type()
                );
                None
            }
        };

        converted.unwrap_or_else(|| StoredValue::null_for(column))
    }
}

impl std::fmt::Display for StoredValue {
    /// Renders the bare value, or `NULL`.  References render as the referenced row's id; following them to
    /// something readable needs a data store.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoredValue::Int(Some(i)) => write!(f, "{}", i),
            StoredValue::String(Some(s)) => write!(f, "{}", s),
            StoredValue::Bool(Some(b)) => write!(f, "{}", b),
            StoredValue::Double(Some(d)) => write!(f, "{:?}", d),
            StoredValue::Row {
                referenced_row_id: Some(id),
                ..
            } => write!(f, "{}", id),
            _ => write!(f, "NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    use crate::entities::Column;

    fn column(value_type: ValueType) -> Column {
        Column::new(TableId::new(), "c", value_type)
    }

    #[test]
    fn parses_user_input() {
        assert_eq!(
            StoredValue::parse(&column(ValueType::Int), Some(" 42 ")),
            Ok(StoredValue::Int(Some(42)))
        );
        assert_eq!(
            StoredValue::parse(&column(ValueType::Bool), Some("TRUE")),
            Ok(StoredValue::Bool(Some(true)))
        );
        assert_eq!(
            StoredValue::parse(&column(ValueType::Double), Some("1.5")),
            Ok(StoredValue::Double(Some(1.5)))
        );
        assert_eq!(
            StoredValue::parse(&column(ValueType::String), Some(" padded ")),
            Ok(StoredValue::String(Some(" padded ".into())))
        );
        assert!(matches!(
            StoredValue::parse(&column(ValueType::Int), Some("4.5")),
            Err(ValueError::NotAnInteger { .. })
        ));
        assert!(matches!(
            StoredValue::parse(&column(ValueType::Bool), Some("yes")),
            Err(ValueError::NotABool { .. })
        ));
    }

    #[test]
    fn pending_table_columns_parse_to_null() {
        let pending = column(ValueType::Table);
        let parsed = StoredValue::parse(&pending, Some(&RowId::new().to_string())).unwrap();
        assert!(parsed.is_null());

        let target = TableId::new();
        let configured = column(ValueType::Table).referencing(target);
        let row = RowId::new();
        assert_eq!(
            StoredValue::parse(&configured, Some(&row.to_string())),
            Ok(StoredValue::Row {
                referenced_row_id: Some(row),
                referenced_table_id: Some(target),
            })
        );
        assert!(StoredValue::parse(&configured, Some("nope")).is_err());
    }

    #[test]
    fn coercion_nulls_mismatches() {
        let c = column(ValueType::Int);
        assert_eq!(
            StoredValue::String(Some("x".into())).coerce_for(&c),
            StoredValue::Int(None)
        );
        assert_eq!(StoredValue::Int(Some(3)).coerce_for(&c), StoredValue::Int(Some(3)));

        let pending = column(ValueType::Table);
        let v = StoredValue::Row {
            referenced_row_id: Some(RowId::new()),
            referenced_table_id: Some(TableId::new()),
        };
        assert!(v.coerce_for(&pending).is_null());
    }

    #[test]
    fn displays_values() {
        assert_eq!(StoredValue::Int(Some(-3)).to_string(), "-3");
        assert_eq!(StoredValue::Double(Some(2.0)).to_string(), "2.0");
        assert_eq!(StoredValue::Bool(Some(false)).to_string(), "false");
        assert_eq!(StoredValue::String(None).to_string(), "NULL");
        assert_eq!(ValueType::Bool.display_name(), "True or False");
    }

    #[test]
    fn reads_mismatched_storage_as_null() {
        let c = column(ValueType::Int);
        assert_eq!(
            StoredValue::from_sql_ref(&c, ValueRef::Text(b"hello")),
            StoredValue::Int(None)
        );
        assert_eq!(
            StoredValue::from_sql_ref(&column(ValueType::Double), ValueRef::Integer(2)),
            StoredValue::Double(Some(2.0))
        );
    }

    proptest! {
        #[test]
        fn tags_round_trip(t in any::<ValueType>()) {
            prop_assert_eq!(ValueType::from_tag(t.as_tag()), Some(t));
        }

        #[test]
        fn null_values_match_their_column(t in any::<ValueType>()) {
            let c = column(t);
            let null = StoredValue::null_for(&c);
            prop_assert!(null.is_null());
            prop_assert_eq!(null.value_type(), t);
            prop_assert_eq!(null.to_sql_value(), Value::Null);
            prop_assert_eq!(StoredValue::from_sql_ref(&c, ValueRef::Null), null);
        }
    }
}
