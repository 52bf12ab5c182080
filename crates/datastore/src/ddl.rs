//! The physical shape of a data store and the DDL that moves it from one shape to another.
//!
//! Every user table becomes a sqlite table named after its id, with two intrinsic columns (`id`, the row's id, and
//! `tableID`) followed by one column per user column, named after the column's id.  Renames therefore never reach
//! this module.
//!
//! [plan] is a pure function from the shape a table has to the shape it should have.  It doesn't look at a
//! connection, so it can be tested on its own; the data store introspects sqlite to get the first argument.
use itertools::Itertools;
use log::*;

use crate::entities::{Column, Table};
use crate::error::Result;
use crate::value::ValueType;

pub(crate) const ID_COLUMN: &str = "id";
pub(crate) const TABLE_ID_COLUMN: &str = "tableID";

/// Declared type for table columns.  Contains `TEXT` so that sqlite gives it text affinity, but is distinguishable
/// from a string column when reading the schema back.
const REFERENCE_TYPE: &str = "REFTEXT";

/// Quote a sqlite identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum PhysicalType {
    Integer,
    Text,
    Boolean,
    Real,
    /// A row id, which is a foreign key into the named table's id column if there is one.
    Reference(Option<String>),
    /// Something we didn't create.  Carried along untouched when rebuilding.
    Other(String),
}

impl PhysicalType {
    pub fn for_column(column: &Column) -> PhysicalType {
        match column.value_type {
            ValueType::Int => PhysicalType::Integer,
            ValueType::String => PhysicalType::Text,
            ValueType::Bool => PhysicalType::Boolean,
            ValueType::Double => PhysicalType::Real,
            ValueType::Table => {
                PhysicalType::Reference(column.referenced_table_id.map(|t| t.to_string()))
            }
        }
    }

    /// Rebuild a type from what sqlite reports for a column: the declared type, and the table its foreign key points
    /// at, if any.
    pub fn from_declared(declared: &str, references: Option<&str>) -> PhysicalType {
        match declared.to_ascii_uppercase().as_str() {
            "INTEGER" => PhysicalType::Integer,
            "TEXT" => PhysicalType::Text,
            "BOOLEAN" => PhysicalType::Boolean,
            "REAL" => PhysicalType::Real,
            REFERENCE_TYPE => PhysicalType::Reference(references.map(|x| x.to_string())),
            _ => PhysicalType::Other(declared.to_string()),
        }
    }

    /// Whether sqlite refuses to `DROP COLUMN` this, forcing a rebuild of the table.
    fn blocks_drop_column(&self) -> bool {
        matches!(self, PhysicalType::Reference(Some(_)))
    }

    fn definition(&self, name: &str) -> String {
        let ident = quote_ident(name);
        match self {
            PhysicalType::Integer => format!("{} INTEGER", ident),
            PhysicalType::Text => format!("{} TEXT", ident),
            PhysicalType::Boolean => format!("{} BOOLEAN", ident),
            PhysicalType::Real => format!("{} REAL", ident),
            PhysicalType::Reference(None) => format!("{} {}", ident, REFERENCE_TYPE),
            PhysicalType::Reference(Some(target)) => format!(
                "{} {} REFERENCES {}({}) ON DELETE SET NULL",
                ident,
                REFERENCE_TYPE,
                quote_ident(target),
                quote_ident(ID_COLUMN)
            ),
            PhysicalType::Other(declared) => format!("{} {}", ident, declared),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PhysicalColumn {
    pub name: String,
    pub physical_type: PhysicalType,
}

impl PhysicalColumn {
    pub fn for_column(column: &Column) -> Self {
        Self {
            name: column.id.to_string(),
            physical_type: PhysicalType::for_column(column),
        }
    }

    fn definition(&self) -> String {
        self.physical_type.definition(&self.name)
    }
}

/// A table's physical shape, minus the intrinsic columns which every table has.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PhysicalTable {
    pub name: String,
    pub columns: Vec<PhysicalColumn>,
}

impl PhysicalTable {
    /// The shape the schema says a table should have.
    pub fn for_schema(table: &Table, columns: &[Column]) -> Self {
        Self {
            name: table.id.to_string(),
            columns: columns.iter().map(PhysicalColumn::for_column).collect(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&PhysicalColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// An ordered list of statements to run in one transaction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MigrationPlan {
    statements: Vec<String>,

    /// The plan rebuilds a table.  Foreign keys must be off while it runs, or dropping the old table would null out
    /// every reference into it; they get checked by hand afterwards.
    foreign_keys_off: bool,
}

impl MigrationPlan {
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn needs_foreign_keys_off(&self) -> bool {
        self.foreign_keys_off
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn extend(&mut self, other: MigrationPlan) {
        self.statements.extend(other.statements);
        self.foreign_keys_off |= other.foreign_keys_off;
    }

    fn push(&mut self, statement: String) {
        debug!("Planned: {}", statement);
        self.statements.push(statement);
    }
}

const CREATE_TABLE_TEMPLATE: &str = r#"CREATE TABLE {{ table }} (
    {{ id_column }} TEXT PRIMARY KEY NOT NULL,
    {{ table_id_column }} TEXT NOT NULL
    {%- for c in columns %},
    {{ c }}
    {%- endfor %}
)"#;

const COPY_TEMPLATE: &str = r#"INSERT INTO {{ to }} ({{ columns | join(sep=", ") }})
SELECT {{ columns | join(sep=", ") }} FROM {{ from }} ORDER BY rowid"#;

lazy_static::lazy_static! {
    static ref TEMPLATES: tera::Tera = {
        let mut tera = tera::Tera::default();
        tera.add_raw_templates(vec![
            ("create_table", CREATE_TABLE_TEMPLATE),
            ("copy", COPY_TEMPLATE),
        ])
        .expect("DDL templates are static and should parse");
        tera
    };
}

fn create_table(name: &str, columns: &[PhysicalColumn]) -> Result<String> {
    let mut context = tera::Context::new();
    context.insert("table", &quote_ident(name));
    context.insert("id_column", &quote_ident(ID_COLUMN));
    context.insert("table_id_column", &quote_ident(TABLE_ID_COLUMN));
    context.insert(
        "columns",
        &columns.iter().map(|c| c.definition()).collect::<Vec<_>>(),
    );
    Ok(TEMPLATES.render("create_table", &context)?)
}

/// Statements to rebuild `table` with only the `kept` columns, preserving rows and ids.
fn rebuild_table(table: &str, kept: &[PhysicalColumn]) -> Result<Vec<String>> {
    let scratch = format!("{}_rebuild", table);

    let copied = [ID_COLUMN, TABLE_ID_COLUMN]
        .into_iter()
        .map(quote_ident)
        .chain(kept.iter().map(|c| quote_ident(&c.name)))
        .collect::<Vec<_>>();
    let mut context = tera::Context::new();
    context.insert("to", &quote_ident(&scratch));
    context.insert("from", &quote_ident(table));
    context.insert("columns", &copied);

    Ok(vec![
        create_table(&scratch, kept)?,
        TEMPLATES.render("copy", &context)?,
        format!("DROP TABLE {}", quote_ident(table)),
        format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&scratch),
            quote_ident(table)
        ),
    ])
}

fn add_column(table: &str, column: &PhysicalColumn) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table),
        column.definition()
    )
}

fn drop_column(table: &str, column: &PhysicalColumn) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(table),
        quote_ident(&column.name)
    )
}

/// Work out the statements which turn `actual` into `desired`.  `None` means the table doesn't (or shouldn't) exist.
///
/// Columns are matched by name.  A column whose type changed is dropped and re-added, losing its values.  Drops come
/// before adds.  If any dropped column is a foreign key, all the drops happen by rebuilding the table instead, since
/// sqlite can't drop those in place.
pub fn plan(actual: Option<&PhysicalTable>, desired: Option<&PhysicalTable>) -> Result<MigrationPlan> {
    let mut plan = MigrationPlan::default();

    match (actual, desired) {
        (None, None) => {}
        (None, Some(d)) => plan.push(create_table(&d.name, &d.columns)?),
        (Some(a), None) => plan.push(format!("DROP TABLE {}", quote_ident(&a.name))),
        (Some(a), Some(d)) if a.name != d.name => {
            plan.push(format!("DROP TABLE {}", quote_ident(&a.name)));
            plan.push(create_table(&d.name, &d.columns)?);
        }
        (Some(a), Some(d)) => {
            let (kept, dropped): (Vec<_>, Vec<_>) = a
                .columns
                .iter()
                .cloned()
                .partition(|c| d.column(&c.name) == Some(c));
            let added = d
                .columns
                .iter()
                .filter(|c| a.column(&c.name) != Some(*c))
                .collect::<Vec<_>>();

            if dropped.iter().any(|c| c.physical_type.blocks_drop_column()) {
                debug!(
                    "Rebuilding {} to drop {}",
                    a.name,
                    dropped.iter().map(|c| &c.name).join(", ")
                );
                for s in rebuild_table(&a.name, &kept)? {
                    plan.push(s);
                }
                plan.foreign_keys_off = true;
            } else {
                for c in dropped.iter() {
                    plan.push(drop_column(&a.name, c));
                }
            }

            for c in added {
                plan.push(add_column(&d.name, c));
            }
        }
    }

    Ok(plan)
}
