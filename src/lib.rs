//! # strata
//!
//! Branchable schema revisions for PostgreSQL.
//!
//! Revisions form a DAG: each names its parent(s), merges unify
//! concurrent branches, and `depends_on` orders revisions across
//! branches. The engine plans a walk from the applied state to a target
//! and runs it one transaction per revision, under an advisory lock, with
//! the applied tips recorded in a bookkeeping table.
//!
//! ```ignore
//! use strata::{Migrator, RevisionStore, Target};
//! use strata::context::postgres::PgBackend;
//!
//! let graph = RevisionStore::new("revisions").load()?;
//! let backend = PgBackend::connect(&url, "schema_revision", strata::config::DEFAULT_LOCK_KEY).await?;
//! let outcome = Migrator::new(graph, backend).upgrade(&Target::Head).await?;
//! ```

pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod migrator;
pub mod revision;
pub mod schema;
pub mod script;
pub mod store;

pub use config::Config;
pub use error::{DbError, Error, Result};
pub use executor::{ExecutionReport, Executor};
pub use graph::{Direction, Plan, PlanStep, RevisionGraph, Target};
pub use migrator::{Migrator, MigratorOptions, Outcome};
pub use revision::{Parents, Revision};
pub use script::{
    ColumnSpec, ColumnType, ConstraintKind, ForeignKeySpec, Guard, IndexSpec, Operation,
    ReferentialAction, SchemaCheck, Script, TableSpec,
};
pub use store::{NewRevision, RevisionStore};
