//! The datastore crate.
//!
//! This crate stores user-defined databases on disk in sqlite.  There are two kinds of store:
//!
//! - The schema store, one per root directory, which records which databases, tables and columns exist.
//! - A data store per database, holding that database's rows in physical tables whose shape the schema store
//!   dictates.
//!
//! Physical tables and columns are named after the ids of the tables and columns they store, never their display
//! names: renaming is free, and nothing a user types ends up in DDL.  Every physical table also has an `id` column with
//! the row's id and a `tableID` column with its table's.
//!
//! Everything is synchronous and single-writer.  Callers sharing a [SchemaStore] between threads have to serialize
//! access themselves.
mod catalog;
mod config;
mod connection;
mod data_store;
mod data_store_ref;
mod ddl;
mod entities;
mod error;
mod ids;
mod migrations;
mod row;
mod schema_store;
mod value;

pub use config::StoreConfig;
pub use data_store::DataStore;
pub use data_store_ref::*;
pub use ddl::{plan, MigrationPlan, PhysicalColumn, PhysicalTable, PhysicalType};
pub use entities::*;
pub use error::*;
pub use ids::*;
pub use row::Row;
pub use schema_store::*;
pub use value::*;
