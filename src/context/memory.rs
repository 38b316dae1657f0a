//! In-memory backend.
//!
//! A [`MemoryDatabase`] is shared state standing in for a PostgreSQL
//! database: a committed [`Schema`], the bookkeeping rows, and a mutex
//! playing the advisory lock. Each [`MemoryBackend`] is one "connection"
//! with its own transaction snapshot and a log of every call it received,
//! so tests can assert on what a revision did without a live server.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;

use super::{Backend, ColumnInfo, Introspect, SchemaOps};
use crate::error::{DbError, DbResult};
use crate::schema::Schema;
use crate::script::{ColumnSpec, ConstraintKind, ForeignKeySpec, IndexSpec, TableSpec};

#[derive(Debug, Clone, Default, PartialEq)]
struct State {
    schema: Schema,
    /// `None` until the bookkeeping table is created.
    versions: Option<Vec<String>>,
}

/// Shared in-memory database.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
    lock: Arc<tokio::sync::Mutex<()>>,
    rejected_sql: Arc<Mutex<Vec<String>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection.
    pub fn connect(&self) -> MemoryBackend {
        MemoryBackend {
            db: self.clone(),
            tx: None,
            lock_guard: None,
            calls: Vec::new(),
        }
    }

    /// Committed schema.
    pub fn schema(&self) -> Schema {
        self.state().schema.clone()
    }

    /// Committed bookkeeping rows; `None` if the table was never created.
    pub fn versions(&self) -> Option<Vec<String>> {
        self.state().versions.clone()
    }

    /// Make any `execute` whose SQL contains `fragment` fail.
    pub fn reject_sql(&self, fragment: impl Into<String>) {
        self.rejected_sql
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(fragment.into());
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One connection to a [`MemoryDatabase`].
pub struct MemoryBackend {
    db: MemoryDatabase,
    tx: Option<State>,
    lock_guard: Option<OwnedMutexGuard<()>>,
    calls: Vec<String>,
}

impl MemoryBackend {
    /// Every call received, in order, e.g. `create_table foo`.
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    pub fn database(&self) -> &MemoryDatabase {
        &self.db
    }

    fn record(&mut self, call: String) {
        self.calls.push(call);
    }

    fn working(&mut self) -> DbResult<&mut State> {
        self.tx
            .as_mut()
            .ok_or_else(|| DbError::Rejected("no transaction in progress".into()))
    }

    fn mutate(
        &mut self,
        call: String,
        f: impl FnOnce(&mut Schema) -> Result<(), String>,
    ) -> DbResult<()> {
        self.record(call);
        let state = self.working()?;
        f(&mut state.schema).map_err(DbError::Rejected)
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        match &self.tx {
            Some(state) => f(state),
            None => f(&self.db.state()),
        }
    }
}

impl SchemaOps for MemoryBackend {
    async fn add_column(&mut self, table: &str, column: &ColumnSpec) -> DbResult<()> {
        self.mutate(format!("add_column {}.{}", table, column.name), |s| {
            s.add_column(table, column)
        })
    }

    async fn drop_column(&mut self, table: &str, name: &str) -> DbResult<()> {
        self.mutate(format!("drop_column {}.{}", table, name), |s| {
            s.drop_column(table, name)
        })
    }

    async fn create_index(&mut self, index: &IndexSpec) -> DbResult<()> {
        self.mutate(format!("create_index {}", index.name), |s| s.create_index(index))
    }

    async fn drop_index(&mut self, name: &str, table: &str) -> DbResult<()> {
        self.mutate(format!("drop_index {} on {}", name, table), |s| {
            s.drop_index(name)
        })
    }

    async fn create_table(&mut self, table: &TableSpec) -> DbResult<()> {
        self.mutate(format!("create_table {}", table.name), |s| s.create_table(table))
    }

    async fn drop_table(&mut self, name: &str) -> DbResult<()> {
        self.mutate(format!("drop_table {}", name), |s| s.drop_table(name))
    }

    async fn add_foreign_key(&mut self, table: &str, foreign_key: &ForeignKeySpec) -> DbResult<()> {
        self.mutate(format!("add_foreign_key {}", foreign_key.name), |s| {
            s.add_foreign_key(table, foreign_key)
        })
    }

    async fn drop_constraint(
        &mut self,
        name: &str,
        table: &str,
        kind: ConstraintKind,
    ) -> DbResult<()> {
        self.mutate(format!("drop_constraint {} on {}", name, table), |s| {
            s.drop_constraint(name, table, kind)
        })
    }

    /// Raw SQL is recorded but not interpreted.
    async fn execute(&mut self, sql: &str) -> DbResult<()> {
        self.record(format!("execute {}", sql));
        self.working()?;
        let rejected = self
            .db
            .rejected_sql
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|fragment| sql.contains(fragment.as_str()));
        if rejected {
            return Err(DbError::Rejected(format!("syntax error at or near \"{}\"", sql)));
        }
        Ok(())
    }
}

impl Introspect for MemoryBackend {
    async fn table_exists(&mut self, name: &str) -> DbResult<bool> {
        Ok(self.read(|s| s.schema.tables.contains_key(name)))
    }

    async fn column_exists(&mut self, table: &str, name: &str) -> DbResult<bool> {
        Ok(self.read(|s| {
            s.schema
                .table(table)
                .is_some_and(|t| t.column(name).is_some())
        }))
    }

    async fn index_exists(&mut self, name: &str) -> DbResult<bool> {
        Ok(self.read(|s| s.schema.indexes.contains_key(name)))
    }

    async fn constraint_exists(&mut self, table: &str, name: &str) -> DbResult<bool> {
        Ok(self.read(|s| {
            s.schema
                .table(table)
                .is_some_and(|t| t.constraints.contains_key(name))
        }))
    }

    async fn list_columns(&mut self, table: &str) -> DbResult<Vec<ColumnInfo>> {
        Ok(self.read(|s| s.schema.list_columns(table)))
    }
}

impl Backend for MemoryBackend {
    /// Re-entrant for the connection that already holds it, like a
    /// PostgreSQL session-level advisory lock.
    async fn acquire_lock(&mut self, timeout: Duration) -> DbResult<bool> {
        if self.lock_guard.is_some() {
            return Ok(true);
        }
        self.record("acquire_lock".into());
        match tokio::time::timeout(timeout, self.db.lock.clone().lock_owned()).await {
            Ok(guard) => {
                self.lock_guard = Some(guard);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn release_lock(&mut self) -> DbResult<()> {
        self.record("release_lock".into());
        self.lock_guard = None;
        Ok(())
    }

    async fn begin(&mut self) -> DbResult<()> {
        if self.tx.is_some() {
            return Err(DbError::Rejected(
                "there is already a transaction in progress".into(),
            ));
        }
        self.record("begin".into());
        let snapshot = self.db.state().clone();
        self.tx = Some(snapshot);
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.record("commit".into());
        let state = self
            .tx
            .take()
            .ok_or_else(|| DbError::Rejected("no transaction in progress".into()))?;
        *self.db.state() = state;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.record("rollback".into());
        self.tx = None;
        Ok(())
    }

    async fn version_table_exists(&mut self) -> DbResult<bool> {
        Ok(self.read(|s| s.versions.is_some()))
    }

    async fn ensure_version_table(&mut self) -> DbResult<()> {
        self.working()?.versions.get_or_insert_with(Vec::new);
        Ok(())
    }

    async fn read_versions(&mut self) -> DbResult<Vec<String>> {
        let mut versions = self.read(|s| s.versions.clone().unwrap_or_default());
        versions.sort();
        Ok(versions)
    }

    async fn write_versions(&mut self, versions: &[String]) -> DbResult<()> {
        self.record(format!("write_versions [{}]", versions.join(", ")));
        let state = self.working()?;
        let rows = state
            .versions
            .as_mut()
            .ok_or_else(|| DbError::Rejected("relation \"schema_revision\" does not exist".into()))?;
        *rows = versions.to_vec();
        rows.sort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ColumnType;

    fn foo() -> TableSpec {
        TableSpec::new("foo").column(ColumnSpec::new("id", ColumnType::Uuid))
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let db = MemoryDatabase::new();
        let mut conn = db.connect();
        conn.begin().await.unwrap();
        conn.create_table(&foo()).await.unwrap();
        assert!(conn.table_exists("foo").await.unwrap());
        conn.rollback().await.unwrap();
        assert!(!conn.table_exists("foo").await.unwrap());
        assert!(db.schema().tables.is_empty());
    }

    #[tokio::test]
    async fn test_changes_invisible_to_other_connections_until_commit() {
        let db = MemoryDatabase::new();
        let mut a = db.connect();
        let mut b = db.connect();
        a.begin().await.unwrap();
        a.create_table(&foo()).await.unwrap();
        assert!(!b.table_exists("foo").await.unwrap());
        a.commit().await.unwrap();
        assert!(b.table_exists("foo").await.unwrap());
    }

    #[tokio::test]
    async fn test_mutation_requires_transaction() {
        let db = MemoryDatabase::new();
        let mut conn = db.connect();
        assert!(conn.create_table(&foo()).await.is_err());
    }

    #[tokio::test]
    async fn test_lock_times_out_while_held() {
        let db = MemoryDatabase::new();
        let mut a = db.connect();
        let mut b = db.connect();
        assert!(a.acquire_lock(Duration::from_millis(10)).await.unwrap());
        assert!(!b.acquire_lock(Duration::from_millis(10)).await.unwrap());
        a.release_lock().await.unwrap();
        assert!(b.acquire_lock(Duration::from_millis(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_versions_roundtrip() {
        let db = MemoryDatabase::new();
        let mut conn = db.connect();
        assert!(!conn.version_table_exists().await.unwrap());
        conn.begin().await.unwrap();
        conn.ensure_version_table().await.unwrap();
        conn.write_versions(&["c".into(), "b".into()]).await.unwrap();
        conn.commit().await.unwrap();
        assert_eq!(db.versions(), Some(vec!["b".to_string(), "c".to_string()]));
        assert_eq!(conn.read_versions().await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_rejected_sql() {
        let db = MemoryDatabase::new();
        db.reject_sql("BOOM");
        let mut conn = db.connect();
        conn.begin().await.unwrap();
        conn.execute("SELECT 1").await.unwrap();
        assert!(conn.execute("BOOM TABLE").await.is_err());
        assert_eq!(conn.calls().last().unwrap(), "execute BOOM TABLE");
    }
}
