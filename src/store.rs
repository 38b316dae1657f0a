//! Revision Store: discovers revision files and writes new ones.
//!
//! A revision file is TOML:
//!
//! ```toml
//! revision = "3f2a9c1b7d10"
//! down_revision = "1a2b3c4d5e6f"      # or ["b...", "c..."] for a merge
//! branch_labels = "billing"            # optional, string or array
//! depends_on = ["0d0e0f101112"]        # optional, string or array
//! message = "add retry count"
//! create_date = "2024-05-01T12:00:00+00:00"
//!
//! [[upgrade]]
//! op = "add_column"
//! table = "jobs"
//! column = { name = "retry_count", type = "integer", nullable = false, server_default = "0" }
//!
//! [[downgrade]]
//! op = "drop_column"
//! table = "jobs"
//! name = "retry_count"
//! ```
//!
//! Any step may carry a `when` guard such as `"not table_exists(foo)"`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::RevisionGraph;
use crate::revision::{validate_id, Parents, Revision};
use crate::script::{parse, Operation, Script, Step};

pub const REVISION_EXTENSION: &str = "toml";

/// Header value written either as a single string or an array.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }

    fn from_vec(mut ids: Vec<String>) -> Option<Self> {
        match ids.len() {
            0 => None,
            1 => Some(OneOrMany::One(ids.remove(0))),
            _ => Some(OneOrMany::Many(ids)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RevisionFile {
    revision: String,
    #[serde(default)]
    down_revision: Option<OneOrMany>,
    #[serde(default)]
    branch_labels: Option<OneOrMany>,
    #[serde(default)]
    depends_on: Option<OneOrMany>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    create_date: Option<String>,
    #[serde(default)]
    upgrade: Vec<toml::Table>,
    #[serde(default)]
    downgrade: Vec<toml::Table>,
}

#[derive(Debug, Serialize)]
struct RevisionHeader<'a> {
    revision: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    down_revision: Option<OneOrMany>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch_labels: Option<OneOrMany>,
    #[serde(skip_serializing_if = "Option::is_none")]
    depends_on: Option<OneOrMany>,
    message: &'a str,
    create_date: &'a str,
}

/// Parameters for a new revision file.
#[derive(Debug, Clone, Default)]
pub struct NewRevision {
    pub message: String,
    /// Empty for a root, two or more for a merge.
    pub parents: Vec<String>,
    pub branch_labels: Vec<String>,
    pub depends_on: Vec<String>,
    /// Generated when `None`.
    pub id: Option<String>,
}

/// Directory of revision files.
#[derive(Debug, Clone)]
pub struct RevisionStore {
    dir: PathBuf,
}

impl RevisionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Parse every revision file in the directory (non-recursive).
    pub fn read_all(&self) -> Result<Vec<Revision>> {
        if !self.dir.is_dir() {
            return Err(Error::Config(format!(
                "revision directory '{}' does not exist",
                self.dir.display()
            )));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == REVISION_EXTENSION))
            .collect();
        paths.sort();

        let mut revisions = Vec::with_capacity(paths.len());
        for path in paths {
            let source = fs::read_to_string(&path)?;
            let mut revision = parse_revision(&source, &path.display().to_string())?;
            revision.path = Some(path);
            revisions.push(revision);
        }
        debug!(dir = %self.dir.display(), count = revisions.len(), "discovered revisions");
        Ok(revisions)
    }

    /// Read and validate the revision graph. Fails before any database
    /// work on malformed, duplicate, dangling or cyclic revisions.
    pub fn load(&self) -> Result<RevisionGraph> {
        RevisionGraph::new(self.read_all()?)
    }

    /// Write a new revision file with empty routines.
    pub fn create(&self, new: NewRevision) -> Result<Revision> {
        let id = match new.id {
            Some(id) => id,
            None => generate_id(),
        };
        validate_id(&id).map_err(|reason| Error::MalformedRevision {
            location: id.clone(),
            reason,
        })?;

        let create_date = chrono::Utc::now().to_rfc3339();
        let header = RevisionHeader {
            revision: &id,
            down_revision: OneOrMany::from_vec(new.parents.clone()),
            branch_labels: OneOrMany::from_vec(new.branch_labels.clone()),
            depends_on: OneOrMany::from_vec(new.depends_on.clone()),
            message: &new.message,
            create_date: &create_date,
        };
        let mut content = toml::to_string(&header).map_err(|e| Error::MalformedRevision {
            location: id.clone(),
            reason: e.to_string(),
        })?;
        content.push_str(ROUTINE_TEMPLATE);

        fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("{}_{}.{}", id, slug(&new.message), REVISION_EXTENSION));
        if path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            )));
        }
        fs::write(&path, content)?;

        let mut revision = parse_revision(&fs::read_to_string(&path)?, &path.display().to_string())?;
        revision.path = Some(path);
        Ok(revision)
    }
}

const ROUTINE_TEMPLATE: &str = r#"
# Steps run in order inside one transaction. Example:
#
# [[upgrade]]
# op = "add_column"
# table = "jobs"
# column = { name = "retry_count", type = "integer", nullable = false, server_default = "0" }
#
# [[downgrade]]
# op = "drop_column"
# table = "jobs"
# name = "retry_count"
"#;

/// 12 hex digits from a random UUID.
fn generate_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    hex[..12].to_string()
}

/// File-name friendly version of a message.
fn slug(message: &str) -> String {
    let mut out = String::new();
    for c in message.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed: String = out.trim_matches('_').chars().take(40).collect();
    let trimmed = trimmed.trim_end_matches('_');
    if trimmed.is_empty() {
        "revision".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse one revision file. `location` is used in error messages.
pub fn parse_revision(source: &str, location: &str) -> Result<Revision> {
    let malformed = |reason: String| Error::MalformedRevision {
        location: location.to_string(),
        reason,
    };

    let file: RevisionFile = toml::from_str(source).map_err(|e| malformed(e.message().to_string()))?;

    validate_id(&file.revision).map_err(&malformed)?;

    let parents = file.down_revision.map(OneOrMany::into_vec).unwrap_or_default();
    for parent in &parents {
        if parent.is_empty() {
            return Err(malformed("down_revision contains an empty id".into()));
        }
    }

    let upgrade = parse_routine("upgrade", file.upgrade).map_err(&malformed)?;
    let downgrade = parse_routine("downgrade", file.downgrade).map_err(&malformed)?;

    Ok(Revision {
        id: file.revision,
        parents: Parents::from_ids(parents),
        branch_labels: file
            .branch_labels
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .collect(),
        depends_on: file
            .depends_on
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .collect(),
        message: file.message,
        create_date: file.create_date,
        path: None,
        upgrade,
        downgrade,
    })
}

fn parse_routine(name: &str, raw: Vec<toml::Table>) -> std::result::Result<Script, String> {
    let mut steps = Vec::with_capacity(raw.len());
    for (i, mut table) in raw.into_iter().enumerate() {
        let guard = match table.remove("when") {
            None => None,
            Some(toml::Value::String(expr)) => Some(
                parse::guard(&expr).map_err(|e| format!("{} step {}: {}", name, i + 1, e))?,
            ),
            Some(_) => return Err(format!("{} step {}: `when` must be a string", name, i + 1)),
        };
        let op: Operation = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| format!("{} step {}: {}", name, i + 1, e.message()))?;
        steps.push(Step { guard, op });
    }
    Ok(Script { steps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{ColumnType, SchemaCheck};
    use pretty_assertions::assert_eq;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn test_parse_linear_revision() {
        let rev = parse_revision(
            r#"
revision = "b"
down_revision = "a"
message = "add retry count"

[[upgrade]]
op = "add_column"
table = "jobs"
column = { name = "retry_count", type = "int", nullable = false, server_default = "0" }

[[downgrade]]
op = "drop_column"
table = "jobs"
name = "retry_count"
"#,
            "b.toml",
        )
        .unwrap();
        assert_eq!(rev.id, "b");
        assert_eq!(rev.parents, Parents::Linear("a".into()));
        assert_eq!(rev.upgrade.steps.len(), 1);
        match &rev.upgrade.steps[0].op {
            Operation::AddColumn { table, column } => {
                assert_eq!(table, "jobs");
                assert_eq!(column.column_type, ColumnType::Integer);
                assert!(!column.nullable);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_merge_and_labels() {
        let rev = parse_revision(
            r#"
revision = "m"
down_revision = ["b", "c"]
branch_labels = "billing"
depends_on = ["x", "y"]
"#,
            "m.toml",
        )
        .unwrap();
        assert_eq!(rev.parents, Parents::Merge(vec!["b".into(), "c".into()]));
        assert!(rev.branch_labels.contains("billing"));
        assert_eq!(rev.depends_on.len(), 2);
        assert!(rev.upgrade.is_empty());
    }

    #[test]
    fn test_parse_guarded_step() {
        let rev = parse_revision(
            r#"
revision = "a"

[[upgrade]]
op = "create_table"
when = "not table_exists(foo)"
name = "foo"
columns = [{ name = "id", type = "uuid", nullable = false }]
primary_key = ["id"]
"#,
            "a.toml",
        )
        .unwrap();
        let guard = rev.upgrade.steps[0].guard.as_ref().unwrap();
        assert!(guard.negated);
        assert_eq!(guard.check, SchemaCheck::TableExists("foo".into()));
    }

    #[test]
    fn test_missing_revision_key_is_malformed() {
        let err = parse_revision("down_revision = \"a\"\n", "x.toml").unwrap_err();
        assert!(matches!(err, Error::MalformedRevision { ref location, .. } if location == "x.toml"));
    }

    #[test]
    fn test_unknown_op_is_malformed() {
        let err = parse_revision(
            "revision = \"a\"\n[[upgrade]]\nop = \"rename_everything\"\n",
            "a.toml",
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("upgrade step 1"), "{msg}");
    }

    #[test]
    fn test_bad_guard_is_malformed() {
        let err = parse_revision(
            "revision = \"a\"\n[[upgrade]]\nop = \"drop_table\"\nname = \"t\"\nwhen = \"exists(t)\"\n",
            "a.toml",
        )
        .unwrap_err();
        assert!(matches!(err, Error::MalformedRevision { .. }));
    }

    #[test]
    fn test_reserved_id_is_malformed() {
        assert!(parse_revision("revision = \"head\"\n", "h.toml").is_err());
    }

    #[test]
    fn test_read_all_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.toml", "revision = \"a\"\n");
        write(dir.path(), "b.toml", "revision = \"b\"\ndown_revision = \"a\"\n");
        write(dir.path(), "README.md", "not a revision");
        let store = RevisionStore::new(dir.path());
        let revisions = store.read_all().unwrap();
        assert_eq!(revisions.len(), 2);
        assert!(revisions[0].path.is_some());
        let graph = store.load().unwrap();
        assert_eq!(graph.head_ids(), vec!["b"]);
    }

    #[test]
    fn test_duplicate_ids_across_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "one.toml", "revision = \"a\"\n");
        write(dir.path(), "two.toml", "revision = \"a\"\n");
        let err = RevisionStore::new(dir.path()).load().unwrap_err();
        match err {
            Error::DuplicateRevisionId { id, first, second } => {
                assert_eq!(id, "a");
                assert!(first.ends_with("one.toml"));
                assert!(second.ends_with("two.toml"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_dangling_parent_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.toml", "revision = \"a\"\ndown_revision = \"ghost\"\n");
        let err = RevisionStore::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, Error::DanglingParent { ref missing, .. } if missing == "ghost"));
    }

    #[test]
    fn test_create_writes_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = RevisionStore::new(dir.path().join("revisions"));
        let root = store
            .create(NewRevision {
                message: "Create jobs table!".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(root.id.len(), 12);
        assert!(root.create_date.is_some());
        let file_name = root.path.as_ref().unwrap().file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(file_name, format!("{}_create_jobs_table.toml", root.id));

        let merge = store
            .create(NewRevision {
                message: "merge".into(),
                parents: vec![root.id.clone()],
                branch_labels: vec!["core".into()],
                id: Some("abc123".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(merge.parents, Parents::Linear(root.id.clone()));

        let graph = store.load().unwrap();
        assert_eq!(graph.head_ids(), vec!["abc123"]);
        assert_eq!(graph.resolve("core").unwrap().id, "abc123");
    }

    #[test]
    fn test_create_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = RevisionStore::new(dir.path());
        let new = NewRevision {
            message: "x".into(),
            id: Some("fixed".into()),
            ..Default::default()
        };
        store.create(new.clone()).unwrap();
        assert!(matches!(store.create(new), Err(Error::Io(_))));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Add retry_count to jobs"), "add_retry_count_to_jobs");
        assert_eq!(slug("!!!"), "revision");
    }
}
