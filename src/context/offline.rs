//! Offline SQL rendering.
//!
//! Runs a plan without a database: every primitive appends the statement
//! it would have executed. Bookkeeping is simulated in memory so the
//! executor's state checks still hold. Guards need live introspection and
//! fail with [`DbError::Offline`].

use std::time::Duration;

use super::{ddl, Backend, ColumnInfo, Introspect, SchemaOps};
use crate::error::{DbError, DbResult};
use crate::script::{ColumnSpec, ConstraintKind, ForeignKeySpec, IndexSpec, TableSpec};

pub struct OfflineBackend {
    version_table: String,
    version_table_ready: bool,
    versions: Vec<String>,
    statements: Vec<String>,
}

impl OfflineBackend {
    /// `starting` is the bookkeeping state the script assumes. With no
    /// starting revisions the script also creates the bookkeeping table.
    pub fn new(version_table: impl Into<String>, starting: Vec<String>) -> Self {
        let mut versions = starting;
        versions.sort();
        Self {
            version_table: version_table.into(),
            version_table_ready: !versions.is_empty(),
            versions,
            statements: Vec::new(),
        }
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// The rendered script, one statement per paragraph.
    pub fn sql(&self) -> String {
        let mut out = String::new();
        for stmt in &self.statements {
            out.push_str(stmt);
            out.push_str(";\n\n");
        }
        out
    }

    fn emit(&mut self, sql: String) -> DbResult<()> {
        self.statements.push(sql);
        Ok(())
    }

    fn emit_all(&mut self, statements: Vec<String>) -> DbResult<()> {
        self.statements.extend(statements);
        Ok(())
    }
}

impl SchemaOps for OfflineBackend {
    async fn add_column(&mut self, table: &str, column: &ColumnSpec) -> DbResult<()> {
        self.emit_all(ddl::add_column(table, column))
    }

    async fn drop_column(&mut self, table: &str, name: &str) -> DbResult<()> {
        self.emit(ddl::drop_column(table, name))
    }

    async fn create_index(&mut self, index: &IndexSpec) -> DbResult<()> {
        self.emit(ddl::create_index(index))
    }

    async fn drop_index(&mut self, name: &str, _table: &str) -> DbResult<()> {
        self.emit(ddl::drop_index(name))
    }

    async fn create_table(&mut self, table: &TableSpec) -> DbResult<()> {
        self.emit_all(ddl::create_table(table))
    }

    async fn drop_table(&mut self, name: &str) -> DbResult<()> {
        self.emit(ddl::drop_table(name))
    }

    async fn add_foreign_key(&mut self, table: &str, foreign_key: &ForeignKeySpec) -> DbResult<()> {
        self.emit(ddl::add_foreign_key(table, foreign_key))
    }

    async fn drop_constraint(
        &mut self,
        name: &str,
        table: &str,
        kind: ConstraintKind,
    ) -> DbResult<()> {
        self.emit(ddl::drop_constraint(name, table, kind))
    }

    async fn execute(&mut self, sql: &str) -> DbResult<()> {
        self.emit(sql.trim().trim_end_matches(';').to_string())
    }
}

impl Introspect for OfflineBackend {
    async fn table_exists(&mut self, name: &str) -> DbResult<bool> {
        Err(DbError::Offline(format!("table_exists({})", name)))
    }

    async fn column_exists(&mut self, table: &str, name: &str) -> DbResult<bool> {
        Err(DbError::Offline(format!("column_exists({}, {})", table, name)))
    }

    async fn index_exists(&mut self, name: &str) -> DbResult<bool> {
        Err(DbError::Offline(format!("index_exists({})", name)))
    }

    async fn constraint_exists(&mut self, table: &str, name: &str) -> DbResult<bool> {
        Err(DbError::Offline(format!("constraint_exists({}, {})", table, name)))
    }

    async fn list_columns(&mut self, table: &str) -> DbResult<Vec<ColumnInfo>> {
        Err(DbError::Offline(format!("list_columns({})", table)))
    }
}

impl Backend for OfflineBackend {
    async fn acquire_lock(&mut self, _timeout: Duration) -> DbResult<bool> {
        Ok(true)
    }

    async fn release_lock(&mut self) -> DbResult<()> {
        Ok(())
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.emit("BEGIN".into())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.emit("COMMIT".into())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.emit("ROLLBACK".into())
    }

    async fn version_table_exists(&mut self) -> DbResult<bool> {
        Ok(self.version_table_ready)
    }

    async fn ensure_version_table(&mut self) -> DbResult<()> {
        self.version_table_ready = true;
        let sql = ddl::create_version_table(&self.version_table);
        self.emit(sql)
    }

    async fn read_versions(&mut self) -> DbResult<Vec<String>> {
        Ok(self.versions.clone())
    }

    async fn write_versions(&mut self, versions: &[String]) -> DbResult<()> {
        let delete = ddl::delete_versions(&self.version_table);
        self.emit(delete)?;
        for version in versions {
            let insert = ddl::insert_version_literal(&self.version_table, version);
            self.emit(insert)?;
        }
        self.versions = versions.to_vec();
        self.versions.sort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ColumnType;

    #[tokio::test]
    async fn test_renders_statements() {
        let mut offline = OfflineBackend::new("schema_revision", vec![]);
        offline.begin().await.unwrap();
        offline
            .add_column("jobs", &ColumnSpec::new("retry_count", ColumnType::Integer))
            .await
            .unwrap();
        offline.write_versions(&["b1".into()]).await.unwrap();
        offline.commit().await.unwrap();

        let sql = offline.sql();
        assert!(sql.starts_with("BEGIN;\n\n"));
        assert!(sql.contains("ALTER TABLE \"jobs\" ADD COLUMN \"retry_count\" INTEGER;"));
        assert!(sql.contains("INSERT INTO \"schema_revision\" (\"version_num\") VALUES ('b1');"));
        assert_eq!(offline.read_versions().await.unwrap(), vec!["b1"]);
    }

    #[tokio::test]
    async fn test_guards_need_a_connection() {
        let mut offline = OfflineBackend::new("schema_revision", vec![]);
        assert!(matches!(
            offline.table_exists("foo").await,
            Err(DbError::Offline(_))
        ));
    }
}
