//! Execution contexts.
//!
//! Revision scripts see a context only through [`SchemaOps`] (schema
//! mutations) and [`Introspect`] (read-only lookups). The executor needs
//! more: transaction control, the advisory lock and the bookkeeping
//! table, which [`Backend`] adds on top.
//!
//! Implementations:
//! - [`postgres::PgBackend`]: a live PostgreSQL connection (sqlx)
//! - [`memory::MemoryBackend`]: in-memory schema model, records calls
//! - [`offline::OfflineBackend`]: renders SQL instead of executing it

pub mod ddl;
pub mod memory;
pub mod offline;
pub mod postgres;

use std::time::Duration;

use serde::Serialize;

use crate::error::DbResult;
use crate::script::{ColumnSpec, ConstraintKind, ForeignKeySpec, IndexSpec, TableSpec};

/// A column as reported by introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Schema mutations available to revision scripts.
///
/// Nothing is autocommitted: changes become visible once the executor
/// commits the surrounding transaction.
#[allow(async_fn_in_trait)]
pub trait SchemaOps {
    async fn add_column(&mut self, table: &str, column: &ColumnSpec) -> DbResult<()>;
    async fn drop_column(&mut self, table: &str, name: &str) -> DbResult<()>;
    async fn create_index(&mut self, index: &IndexSpec) -> DbResult<()>;
    async fn drop_index(&mut self, name: &str, table: &str) -> DbResult<()>;
    async fn create_table(&mut self, table: &TableSpec) -> DbResult<()>;
    async fn drop_table(&mut self, name: &str) -> DbResult<()>;
    async fn add_foreign_key(&mut self, table: &str, foreign_key: &ForeignKeySpec)
    -> DbResult<()>;
    async fn drop_constraint(&mut self, name: &str, table: &str, kind: ConstraintKind)
    -> DbResult<()>;
    /// Escape hatch: run raw SQL.
    async fn execute(&mut self, sql: &str) -> DbResult<()>;
}

/// Read-only schema lookups. Answers reflect what is visible inside the
/// current transaction.
#[allow(async_fn_in_trait)]
pub trait Introspect {
    async fn table_exists(&mut self, name: &str) -> DbResult<bool>;
    async fn column_exists(&mut self, table: &str, name: &str) -> DbResult<bool>;
    async fn index_exists(&mut self, name: &str) -> DbResult<bool>;
    async fn constraint_exists(&mut self, table: &str, name: &str) -> DbResult<bool>;
    /// Columns of `table` in ordinal order; empty if the table is absent.
    async fn list_columns(&mut self, table: &str) -> DbResult<Vec<ColumnInfo>>;
}

/// Everything the executor and migrator need from a database.
#[allow(async_fn_in_trait)]
pub trait Backend: SchemaOps + Introspect {
    /// Try to take the migration lock, waiting at most `timeout`.
    /// Returns `false` when the budget ran out.
    async fn acquire_lock(&mut self, timeout: Duration) -> DbResult<bool>;
    async fn release_lock(&mut self) -> DbResult<()>;

    async fn begin(&mut self) -> DbResult<()>;
    async fn commit(&mut self) -> DbResult<()>;
    async fn rollback(&mut self) -> DbResult<()>;

    async fn version_table_exists(&mut self) -> DbResult<bool>;
    async fn ensure_version_table(&mut self) -> DbResult<()>;
    /// Current bookkeeping rows, sorted. Empty when the table is absent.
    async fn read_versions(&mut self) -> DbResult<Vec<String>>;
    /// Replace all bookkeeping rows.
    async fn write_versions(&mut self, versions: &[String]) -> DbResult<()>;
}
