//! Error types for strata.
//!
//! Errors fall into four families: discovery (raised while loading the
//! revision graph), planning (raised before any step runs), execution
//! (raised while a step runs; the step is rolled back) and recovery
//! (the bookkeeping table no longer matches the graph).

use std::time::Duration;

use thiserror::Error;

use crate::graph::Direction;

/// Failure reported by an execution context.
#[derive(Debug, Error)]
pub enum DbError {
    /// Error from the PostgreSQL driver, carried verbatim.
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    /// A statement the backend refused (used by the in-memory backend).
    #[error("{0}")]
    Rejected(String),
    /// The operation needs a live connection.
    #[error("{0} cannot be evaluated without a database connection")]
    Offline(String),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Errors raised by the revision store, resolver and executor.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed revision {location}: {reason}")]
    MalformedRevision { location: String, reason: String },

    #[error("duplicate revision id '{id}' ({first} and {second})")]
    DuplicateRevisionId {
        id: String,
        first: String,
        second: String,
    },

    #[error("revision '{revision}' references unknown {relation} '{missing}'")]
    DanglingParent {
        revision: String,
        missing: String,
        relation: &'static str,
    },

    #[error("revision history contains a cycle through: {}", revisions.join(", "))]
    CyclicHistory { revisions: Vec<String> },

    #[error(
        "merge revision '{revision}' lists '{ancestor}' and its descendant '{descendant}' as parents"
    )]
    RedundantMergeParent {
        revision: String,
        ancestor: String,
        descendant: String,
    },

    #[error("unknown revision '{0}'")]
    UnknownTarget(String),

    #[error("revision '{target}' is ambiguous: {}", candidates.join(", "))]
    AmbiguousTarget {
        target: String,
        candidates: Vec<String>,
    },

    #[error(
        "history has diverged (heads: {}); target a merge revision or run `strata merge`",
        heads.join(", ")
    )]
    DivergentHistory { heads: Vec<String> },

    #[error("cannot {requested} to '{target}': destination requires a {required}")]
    WrongDirection {
        target: String,
        requested: Direction,
        required: Direction,
    },

    #[error(
        "stale state before '{revision}': expected [{}], found [{}]",
        expected.join(", "),
        found.join(", ")
    )]
    StaleState {
        revision: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("migration failed at revision '{revision}' in {primitive}: {source}")]
    MigrationFailed {
        revision: String,
        primitive: String,
        #[source]
        source: DbError,
    },

    #[error("could not acquire the migration lock within {0:?}")]
    LockTimeout(Duration),

    #[error("bookkeeping is corrupt: {0}; repair it with `strata stamp`")]
    BookkeepingCorrupt(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] DbError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Process exit code for this error.
    ///
    /// 1: usage, configuration, discovery and planning errors.
    /// 2: not-found targets and corrupt bookkeeping.
    /// 3: execution failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::UnknownTarget(_) | Error::BookkeepingCorrupt(_) => 2,
            Error::MigrationFailed { .. } | Error::LockTimeout(_) => 3,
            _ => 1,
        }
    }

    /// True for errors raised before any database work.
    pub fn is_discovery(&self) -> bool {
        matches!(
            self,
            Error::MalformedRevision { .. }
                | Error::DuplicateRevisionId { .. }
                | Error::DanglingParent { .. }
                | Error::CyclicHistory { .. }
                | Error::RedundantMergeParent { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::UnknownTarget("x".into()).exit_code(), 2);
        assert_eq!(Error::BookkeepingCorrupt("x".into()).exit_code(), 2);
        assert_eq!(Error::LockTimeout(Duration::from_secs(1)).exit_code(), 3);
        let failed = Error::MigrationFailed {
            revision: "b".into(),
            primitive: "add_column(jobs.retry_count)".into(),
            source: DbError::Rejected("relation \"jobs\" does not exist".into()),
        };
        assert_eq!(failed.exit_code(), 3);
        assert_eq!(Error::DivergentHistory { heads: vec![] }.exit_code(), 1);
    }

    #[test]
    fn test_migration_failed_names_revision_and_cause() {
        let err = Error::MigrationFailed {
            revision: "b2".into(),
            primitive: "create_index(ix_jobs)".into(),
            source: DbError::Rejected("column \"nope\" does not exist".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("'b2'"));
        assert!(msg.contains("create_index(ix_jobs)"));
        assert!(msg.contains("column \"nope\" does not exist"));
    }

    #[test]
    fn test_discovery_classification() {
        assert!(Error::CyclicHistory { revisions: vec!["a".into()] }.is_discovery());
        assert!(!Error::UnknownTarget("a".into()).is_discovery());
    }
}
