//! CLI command implementations.
//!
//! Submodules:
//! - `migrate`: upgrade and downgrade, live or as a SQL script
//! - `status`: current, heads and history
//! - `show`: one revision in detail
//! - `create`: new revisions and merge revisions
//! - `stamp`: overwrite the bookkeeping rows

mod create;
mod migrate;
mod show;
mod stamp;
mod status;

pub use create::{merge, revision};
pub use migrate::{downgrade, upgrade};
pub use show::show;
pub use stamp::stamp;
pub use status::{current, heads, history};

use anyhow::{Context, Result};

use crate::config::Config;
use crate::context::postgres::PgBackend;
use crate::error::DbResult;
use crate::graph::RevisionGraph;
use crate::migrator::{Migrator, MigratorOptions};
use crate::revision::Revision;
use crate::store::RevisionStore;

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Session {
    pub config: Config,
    /// Machine-readable output where supported.
    pub json: bool,
}

impl Session {
    pub fn new(config: Config, json: bool) -> Self {
        Self { config, json }
    }

    pub fn store(&self) -> RevisionStore {
        RevisionStore::new(&self.config.script_location)
    }

    /// Load and validate revisions. Runs before any connection is opened.
    pub fn load_graph(&self) -> Result<RevisionGraph> {
        Ok(self.store().load()?)
    }

    pub fn options(&self) -> MigratorOptions {
        MigratorOptions {
            lock_timeout: self.config.lock_timeout(),
        }
    }

    pub async fn connect(&self) -> Result<PgBackend> {
        let url = self.config.database_url()?;
        let backend = PgBackend::connect(url, &self.config.version_table, self.config.lock_key)
            .await
            .map_err(crate::Error::from)
            .context("failed to connect to the database")?;
        Ok(backend)
    }

    pub async fn migrator(&self, graph: RevisionGraph) -> Result<Migrator<PgBackend>> {
        let backend = self.connect().await?;
        Ok(Migrator::new(graph, backend).with_options(self.options()))
    }
}

/// Combine a command's result with the outcome of closing its
/// connection. The command's own error takes precedence.
fn after_close<T>(result: crate::Result<T>, closed: DbResult<()>) -> Result<T> {
    let value = result?;
    closed.map_err(crate::Error::from)?;
    Ok(value)
}

/// `id (label, label)` for listings.
fn label(rev: &Revision) -> String {
    if rev.branch_labels.is_empty() {
        rev.id.clone()
    } else {
        let labels: Vec<&str> = rev.branch_labels.iter().map(String::as_str).collect();
        format!("{} ({})", rev.id, labels.join(", "))
    }
}

fn parents_display(rev: &Revision) -> String {
    if rev.parents.is_root() {
        "<base>".to_string()
    } else {
        rev.parent_ids().join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use std::time::Duration;

    fn code(err: &anyhow::Error) -> Option<u8> {
        err.downcast_ref::<crate::Error>().map(crate::Error::exit_code)
    }

    #[test]
    fn test_command_error_wins_over_close_error() {
        let err = after_close::<()>(
            Err(crate::Error::LockTimeout(Duration::from_secs(1))),
            Err(DbError::Rejected("connection reset".into())),
        )
        .unwrap_err();
        assert_eq!(code(&err), Some(3));

        let err = after_close(Ok(1), Err(DbError::Rejected("connection reset".into()))).unwrap_err();
        assert_eq!(code(&err), Some(1));
        assert!(err.to_string().contains("connection reset"));

        assert_eq!(after_close(Ok(7), Ok(())).unwrap(), 7);
    }
}
