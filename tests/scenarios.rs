//! End-to-end migration scenarios against the in-memory backend.

use std::fs;
use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use strata::context::memory::MemoryDatabase;
use strata::context::Backend;
use strata::context::offline::OfflineBackend;
use strata::{
    ColumnSpec, ColumnType, Direction, Error, IndexSpec, Migrator, MigratorOptions, Operation,
    Revision, RevisionGraph, RevisionStore, Script, TableSpec, Target,
};

fn write(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).unwrap();
}

fn columns(db: &MemoryDatabase, table: &str) -> Vec<String> {
    db.schema()
        .list_columns(table)
        .into_iter()
        .map(|c| c.name)
        .collect()
}

fn tips(ids: &[&str]) -> Option<Vec<String>> {
    Some(ids.iter().map(|s| s.to_string()).collect())
}

const LINEAR_A: &str = r#"
revision = "a1"
message = "create jobs"

[[upgrade]]
op = "create_table"
name = "jobs"
columns = [{ name = "id", type = "uuid", nullable = false }]
primary_key = ["id"]

[[downgrade]]
op = "drop_table"
name = "jobs"
"#;

const LINEAR_B: &str = r#"
revision = "b2"
down_revision = "a1"
message = "add retry count"

[[upgrade]]
op = "add_column"
table = "jobs"
column = { name = "retry_count", type = "int", nullable = false, server_default = "0" }

[[downgrade]]
op = "drop_column"
table = "jobs"
name = "retry_count"
"#;

fn linear_store() -> (tempfile::TempDir, RevisionGraph) {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a1_create_jobs.toml", LINEAR_A);
    write(dir.path(), "b2_add_retry_count.toml", LINEAR_B);
    let graph = RevisionStore::new(dir.path()).load().unwrap();
    (dir, graph)
}

#[tokio::test]
async fn linear_upgrade_and_downgrade() {
    let (_dir, graph) = linear_store();
    let db = MemoryDatabase::new();
    let mut m = Migrator::new(graph, db.connect());

    let outcome = m.upgrade(&Target::Head).await.unwrap();
    assert_eq!(outcome.to, vec!["b2"]);
    assert_eq!(db.versions(), tips(&["b2"]));
    assert_eq!(columns(&db, "jobs"), vec!["id", "retry_count"]);
    let retry = db.schema().table("jobs").unwrap().column("retry_count").cloned().unwrap();
    assert!(!retry.nullable);
    assert_eq!(retry.default.as_deref(), Some("0"));

    m.downgrade(&Target::Revision("a1".into())).await.unwrap();
    assert_eq!(db.versions(), tips(&["a1"]));
    assert_eq!(columns(&db, "jobs"), vec!["id"]);

    m.downgrade(&Target::Base).await.unwrap();
    assert!(db.schema().table("jobs").is_none());
    // Only the (empty) bookkeeping table is left behind.
    assert_eq!(db.versions(), tips(&[]));
    assert!(db.schema().tables.is_empty());
}

fn merge_graph(with_merge: bool) -> RevisionGraph {
    let jobs = TableSpec::new("jobs")
        .column(ColumnSpec::new("id", ColumnType::Uuid).not_null())
        .column(ColumnSpec::new("state", ColumnType::Text(Some(20))))
        .primary_key(&["id"]);
    let mut revisions = vec![
        Revision::new("a")
            .upgrade(Script::new().then(Operation::CreateTable(jobs)))
            .downgrade(Script::new().then(Operation::DropTable { name: "jobs".into() })),
        Revision::new("b")
            .parent("a")
            .upgrade(Script::new().then(Operation::CreateIndex(IndexSpec::new(
                "ix_jobs_state",
                "jobs",
                &["state"],
            ))))
            .downgrade(Script::new().then(Operation::DropIndex {
                name: "ix_jobs_state".into(),
                table: "jobs".into(),
            })),
        Revision::new("c")
            .parent("a")
            .upgrade(Script::new().then(Operation::AddColumn {
                table: "jobs".into(),
                column: ColumnSpec::new("x", ColumnType::Timestamp { with_time_zone: true }),
            }))
            .downgrade(Script::new().then(Operation::DropColumn {
                table: "jobs".into(),
                name: "x".into(),
            })),
    ];
    if with_merge {
        revisions.push(Revision::new("m").parent("b").parent("c").message("merge b and c"));
    }
    RevisionGraph::new(revisions).unwrap()
}

#[tokio::test]
async fn divergent_heads_need_a_merge() {
    let graph = merge_graph(false);
    let heads: Vec<&str> = graph.heads().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(heads, vec!["b", "c"]);

    let db = MemoryDatabase::new();
    let mut m = Migrator::new(graph, db.connect());
    let err = m.upgrade(&Target::Head).await.unwrap_err();
    assert!(matches!(err, Error::DivergentHistory { ref heads } if heads == &["b", "c"]));
    assert_eq!(err.exit_code(), 1);
    // Planning errors leave no trace.
    assert_eq!(db.versions(), None);

    let graph = merge_graph(true);
    assert_eq!(graph.head_ids(), vec!["m"]);
    let mut m = Migrator::new(graph, db.connect());
    let outcome = m.upgrade(&Target::Head).await.unwrap();
    let applied: Vec<&str> = outcome.applied.iter().map(|s| s.revision.as_str()).collect();
    assert_eq!(applied, vec!["a", "b", "c", "m"]);
    assert_eq!(db.versions(), tips(&["m"]));
    assert!(db.schema().indexes.contains_key("ix_jobs_state"));
    assert_eq!(columns(&db, "jobs"), vec!["id", "state", "x"]);
}

#[tokio::test]
async fn partial_upgrade_of_both_branches_keeps_two_rows() {
    let db = MemoryDatabase::new();
    let mut m = Migrator::new(merge_graph(true), db.connect());
    m.upgrade(&Target::Revision("b".into())).await.unwrap();
    assert_eq!(db.versions(), tips(&["b"]));
    m.upgrade(&Target::Revision("c".into())).await.unwrap_err();

    // Sibling targets diverge; `heads` of the unmerged graph does not.
    let mut unmerged = Migrator::new(merge_graph(false), db.connect());
    unmerged.upgrade(&Target::Heads).await.unwrap();
    assert_eq!(db.versions(), tips(&["b", "c"]));

    // The merge collapses both rows into one.
    m.upgrade(&Target::Head).await.unwrap();
    assert_eq!(db.versions(), tips(&["m"]));

    // And downgrading the merge restores them.
    m.downgrade(&Target::Relative(-1)).await.unwrap();
    assert_eq!(db.versions(), tips(&["b", "c"]));
}

const IDEMPOTENT: &str = r#"
revision = "f00"
message = "create foo if missing"

[[upgrade]]
op = "create_table"
when = "not table_exists(foo)"
name = "foo"
columns = [{ name = "id", type = "uuid", nullable = false }]
primary_key = ["id"]

[[upgrade]]
op = "create_index"
when = "not index_exists(ix_foo_id)"
name = "ix_foo_id"
table = "foo"
columns = ["id"]
"#;

#[tokio::test]
async fn guarded_revision_survives_reapplication() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "f00.toml", IDEMPOTENT);
    let graph = RevisionStore::new(dir.path()).load().unwrap();

    let db = MemoryDatabase::new();
    let mut m = Migrator::new(graph, db.connect());
    m.upgrade(&Target::Head).await.unwrap();
    m.stamp(&Target::Base).await.unwrap();
    assert_eq!(db.versions(), tips(&[]));

    let outcome = m.upgrade(&Target::Head).await.unwrap();
    assert_eq!(outcome.applied.len(), 1);
    assert_eq!(db.versions(), tips(&["f00"]));

    let backend = m.into_backend();
    let creates = backend
        .calls()
        .iter()
        .filter(|c| c.starts_with("create_table"))
        .count();
    assert_eq!(creates, 1);
}

#[tokio::test]
async fn failure_mid_plan_keeps_earlier_steps() {
    let jobs = TableSpec::new("jobs").column(ColumnSpec::new("id", ColumnType::Uuid).not_null());
    let graph = RevisionGraph::new(vec![
        Revision::new("s1").upgrade(Script::new().then(Operation::CreateTable(jobs))),
        Revision::new("s2").parent("s1").upgrade(
            Script::new()
                .then(Operation::AddColumn {
                    table: "jobs".into(),
                    column: ColumnSpec::new("half_done", ColumnType::Boolean),
                })
                .then(Operation::Execute {
                    sql: "UPDATE jobs SET BROKEN".into(),
                }),
        ),
        Revision::new("s3").parent("s2").upgrade(Script::new().then(Operation::AddColumn {
            table: "jobs".into(),
            column: ColumnSpec::new("never", ColumnType::Integer),
        })),
    ])
    .unwrap();

    let db = MemoryDatabase::new();
    db.reject_sql("BROKEN");
    let mut m = Migrator::new(graph, db.connect());
    let err = m.upgrade(&Target::Head).await.unwrap_err();

    assert_eq!(err.exit_code(), 3);
    let message = err.to_string();
    assert!(message.contains("'s2'"), "{message}");
    assert!(message.contains("BROKEN"), "{message}");
    assert_eq!(db.versions(), tips(&["s1"]));
    assert_eq!(columns(&db, "jobs"), vec!["id"]);

    let backend = m.into_backend();
    assert!(!backend.calls().iter().any(|c| c.contains("never")));
}

#[tokio::test]
async fn concurrent_migrators_do_the_work_once() {
    let graph = RevisionGraph::new(vec![
        Revision::new("r1").upgrade(Script::new().then(Operation::CreateTable(
            TableSpec::new("t").column(ColumnSpec::new("id", ColumnType::Uuid)),
        ))),
        Revision::new("r2").parent("r1"),
        Revision::new("r3").parent("r2"),
    ])
    .unwrap();
    let db = MemoryDatabase::new();
    let options = MigratorOptions {
        lock_timeout: Duration::from_secs(5),
    };
    let mut first = Migrator::new(graph.clone(), db.connect()).with_options(options.clone());
    let mut second = Migrator::new(graph, db.connect()).with_options(options);

    // Hold the lock on a third connection so both migrators queue on it.
    let mut holder = db.connect();
    assert!(holder.acquire_lock(Duration::from_secs(1)).await.unwrap());
    let release = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let while_held = db.versions();
        holder.release_lock().await.unwrap();
        while_held
    };

    let (a, b, while_held) = tokio::join!(
        first.upgrade(&Target::Head),
        second.upgrade(&Target::Head),
        release
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // Neither migrator got past the lock before it was released.
    assert_eq!(while_held, None);
    assert_eq!(a.to, vec!["r3"]);
    assert_eq!(b.to, vec!["r3"]);
    let worked = [&a, &b].iter().filter(|o| !o.is_noop()).count();
    assert_eq!(worked, 1);
    assert_eq!(second.current().await.unwrap(), tips(&["r3"]));
    assert_eq!(db.versions(), tips(&["r3"]));

    // The migrator that waited saw head and opened no transaction.
    let (busy, idle) = if a.is_noop() { (second, first) } else { (first, second) };
    assert!(idle.into_backend().calls().iter().all(|c| c != "begin"));
    assert!(busy.into_backend().calls().iter().any(|c| c == "begin"));
}

#[test]
fn dangling_parent_fails_at_load() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a1.toml", LINEAR_A);
    write(dir.path(), "x.toml", "revision = \"x\"\ndown_revision = \"ghost\"\n");
    let err = RevisionStore::new(dir.path()).load().unwrap_err();
    assert!(matches!(
        err,
        Error::DanglingParent { ref revision, ref missing, .. } if revision == "x" && missing == "ghost"
    ));
    assert!(err.is_discovery());
}

#[tokio::test]
async fn empty_database_and_no_revisions() {
    let graph = RevisionGraph::new(Vec::new()).unwrap();
    let db = MemoryDatabase::new();
    let mut m = Migrator::new(graph, db.connect());
    assert_eq!(m.current().await.unwrap(), None);
    let outcome = m.upgrade(&Target::Head).await.unwrap();
    assert!(outcome.is_noop());
    assert_eq!(m.current().await.unwrap(), None);
}

#[tokio::test]
async fn stamp_then_current() {
    let (_dir, graph) = linear_store();
    let db = MemoryDatabase::new();
    let mut m = Migrator::new(graph, db.connect());
    m.stamp(&Target::Revision("b2".into())).await.unwrap();
    assert_eq!(m.current().await.unwrap(), tips(&["b2"]));
    // No routine ran.
    assert!(db.schema().tables.is_empty());
}

#[tokio::test]
async fn round_trip_restores_schema_snapshot() {
    let db = MemoryDatabase::new();
    let mut m = Migrator::new(merge_graph(true), db.connect());
    m.upgrade(&Target::Revision("a".into())).await.unwrap();
    let before = db.schema();
    let before_rows = db.versions();

    let up = m.upgrade(&Target::Head).await.unwrap();
    let down = m.downgrade(&Target::Revision("a".into())).await.unwrap();
    assert_eq!(db.schema(), before);
    assert_eq!(db.versions(), before_rows);

    let mut forward: Vec<&str> = up.applied.iter().map(|s| s.revision.as_str()).collect();
    forward.reverse();
    let backward: Vec<&str> = down.applied.iter().map(|s| s.revision.as_str()).collect();
    assert_eq!(backward, forward);
}

#[tokio::test]
async fn offline_sql_for_fresh_database() {
    let (_dir, graph) = linear_store();
    let mut m = Migrator::new(graph, OfflineBackend::new("schema_revision", Vec::new()));
    m.upgrade(&Target::Head).await.unwrap();
    let sql = m.into_backend().sql();

    let create_bookkeeping = sql.find("CREATE TABLE IF NOT EXISTS \"schema_revision\"").unwrap();
    let create_jobs = sql.find("CREATE TABLE \"jobs\"").unwrap();
    assert!(create_bookkeeping < create_jobs);
    assert!(sql.contains("ALTER TABLE \"jobs\" ADD COLUMN \"retry_count\" INTEGER NOT NULL DEFAULT 0"));
    assert!(sql.contains("VALUES ('b2')"));
    assert_eq!(sql.matches("COMMIT;").count(), 3);
}

#[tokio::test]
async fn offline_downgrade_from_explicit_state() {
    let (_dir, graph) = linear_store();
    let mut m = Migrator::new(graph, OfflineBackend::new("schema_revision", vec!["b2".into()]));
    let plan = m.preview(Direction::Down, &Target::Base).await.unwrap();
    assert_eq!(plan.revisions(), vec!["b2", "a1"]);
    m.downgrade(&Target::Base).await.unwrap();
    let sql = m.into_backend().sql();
    assert!(!sql.contains("CREATE TABLE IF NOT EXISTS"));
    assert!(sql.contains("DROP TABLE \"jobs\""));
}
