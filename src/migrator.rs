//! High-level migration API.
//!
//! A [`Migrator`] owns the validated graph and one backend connection.
//! Every mutating call takes the advisory lock first, so planning sees
//! the state left by any migrator that ran before it.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::Backend;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::graph::{Direction, Plan, PlanStep, RevisionGraph, Target};

#[derive(Debug, Clone)]
pub struct MigratorOptions {
    pub lock_timeout: Duration,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(60),
        }
    }
}

/// Result of an upgrade or downgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub applied: Vec<PlanStep>,
}

impl Outcome {
    /// True when nothing had to be done.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

pub struct Migrator<B> {
    graph: RevisionGraph,
    backend: B,
    options: MigratorOptions,
}

impl<B: Backend> Migrator<B> {
    pub fn new(graph: RevisionGraph, backend: B) -> Self {
        Self {
            graph,
            backend,
            options: MigratorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MigratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn graph(&self) -> &RevisionGraph {
        &self.graph
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Applied tips, or `None` when the bookkeeping table does not exist.
    pub async fn current(&mut self) -> Result<Option<Vec<String>>> {
        if !self.backend.version_table_exists().await? {
            return Ok(None);
        }
        self.read_current().await.map(Some)
    }

    /// Apply revisions forward until `target` is reached.
    pub async fn upgrade(&mut self, target: &Target) -> Result<Outcome> {
        self.migrate(Direction::Up, target).await
    }

    /// Roll revisions back until `target` is reached.
    pub async fn downgrade(&mut self, target: &Target) -> Result<Outcome> {
        self.migrate(Direction::Down, target).await
    }

    /// Overwrite the bookkeeping rows with `target` without running any
    /// routine. Works on corrupt bookkeeping except for relative targets,
    /// which are computed from the current state.
    pub async fn stamp(&mut self, target: &Target) -> Result<Vec<String>> {
        self.lock().await?;
        let result = self.stamp_locked(target).await;
        self.unlock().await;
        result
    }

    /// The plan `upgrade`/`downgrade` would run, without taking the lock.
    pub async fn preview(&mut self, direction: Direction, target: &Target) -> Result<Plan> {
        let current = match self.current().await? {
            Some(tips) => tips,
            None => Vec::new(),
        };
        self.plan(&current, direction, target)
    }

    /// Plan from explicit tips, checking the direction.
    pub fn plan(&self, current: &[String], direction: Direction, target: &Target) -> Result<Plan> {
        let plan = self.graph.plan_to(current, target)?;
        match plan.direction() {
            Some(required) if required != direction => Err(Error::WrongDirection {
                target: target.to_string(),
                requested: direction,
                required,
            }),
            _ => Ok(plan),
        }
    }

    async fn migrate(&mut self, direction: Direction, target: &Target) -> Result<Outcome> {
        self.lock().await?;
        let result = self.migrate_locked(direction, target).await;
        self.unlock().await;
        result
    }

    async fn migrate_locked(&mut self, direction: Direction, target: &Target) -> Result<Outcome> {
        let from = match self.current().await? {
            Some(tips) => tips,
            None => Vec::new(),
        };
        let plan = self.plan(&from, direction, target)?;
        if plan.is_empty() {
            info!(%target, tips = %from.join(","), "already at target");
            return Ok(Outcome {
                to: from.clone(),
                from,
                applied: Vec::new(),
            });
        }

        self.ensure_version_table().await?;
        info!(%direction, %target, steps = plan.len(), "running plan");
        let report = Executor::new(&self.graph)
            .execute(&mut self.backend, &plan)
            .await?;
        let to = plan.final_tips().map(<[String]>::to_vec).unwrap_or_else(|| from.clone());
        Ok(Outcome {
            from,
            to,
            applied: report.applied,
        })
    }

    async fn stamp_locked(&mut self, target: &Target) -> Result<Vec<String>> {
        let tips = match target {
            Target::Relative(_) => {
                let current = self.read_current().await?;
                let plan = self.graph.plan_to(&current, target)?;
                plan.final_tips().map(<[String]>::to_vec).unwrap_or(current)
            }
            other => self.graph.target_tips(other)?,
        };
        self.ensure_version_table().await?;

        self.backend.begin().await?;
        if let Err(e) = self.backend.write_versions(&tips).await {
            if let Err(rollback) = self.backend.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            return Err(e.into());
        }
        self.backend.commit().await?;
        info!(tips = %tips.join(","), "stamped");
        Ok(tips)
    }

    async fn read_current(&mut self) -> Result<Vec<String>> {
        let rows = self.backend.read_versions().await?;
        // Rows must name known revisions and form an antichain.
        let applied = self.graph.closure(&rows)?;
        let tips = self.graph.tips(&applied);
        if tips != rows {
            return Err(Error::BookkeepingCorrupt(format!(
                "rows [{}] are not the tips of their applied set [{}]",
                rows.join(", "),
                tips.join(", ")
            )));
        }
        Ok(rows)
    }

    async fn ensure_version_table(&mut self) -> Result<()> {
        if self.backend.version_table_exists().await? {
            return Ok(());
        }
        debug!("creating bookkeeping table");
        self.backend.begin().await?;
        if let Err(e) = self.backend.ensure_version_table().await {
            if let Err(rollback) = self.backend.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            return Err(e.into());
        }
        self.backend.commit().await?;
        Ok(())
    }

    async fn lock(&mut self) -> Result<()> {
        let timeout = self.options.lock_timeout;
        debug!(?timeout, "acquiring migration lock");
        if !self.backend.acquire_lock(timeout).await? {
            return Err(Error::LockTimeout(timeout));
        }
        Ok(())
    }

    async fn unlock(&mut self) {
        if let Err(e) = self.backend.release_lock().await {
            warn!(error = %e, "failed to release migration lock");
        }
    }
}
