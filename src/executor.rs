//! Executor: drives a plan one transaction per step.
//!
//! Per step: begin, check the bookkeeping rows against the tips the plan
//! expects, run the revision's routine, write the new tips, commit. Any
//! failure rolls the step back; steps already committed stay committed.

use serde::Serialize;
use tracing::{info, warn};

use crate::context::Backend;
use crate::error::{DbError, Error, Result};
use crate::graph::{Plan, PlanStep, RevisionGraph};

/// Steps committed by one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub applied: Vec<PlanStep>,
}

impl ExecutionReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

pub struct Executor<'g> {
    graph: &'g RevisionGraph,
}

fn failed(step: &PlanStep, primitive: &str, source: DbError) -> Error {
    Error::MigrationFailed {
        revision: step.revision.clone(),
        primitive: primitive.to_string(),
        source,
    }
}

impl<'g> Executor<'g> {
    pub fn new(graph: &'g RevisionGraph) -> Self {
        Self { graph }
    }

    /// Run every step in order, halting at the first failure.
    pub async fn execute<B: Backend>(&self, backend: &mut B, plan: &Plan) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        for step in &plan.steps {
            self.run_step(backend, step).await?;
            report.applied.push(step.clone());
        }
        Ok(report)
    }

    /// Apply one step atomically with its bookkeeping update.
    pub async fn run_step<B: Backend>(&self, backend: &mut B, step: &PlanStep) -> Result<()> {
        backend
            .begin()
            .await
            .map_err(|source| failed(step, "begin", source))?;

        if let Err(err) = self.step_body(backend, step).await {
            if let Err(rollback) = backend.rollback().await {
                warn!(revision = %step.revision, error = %rollback, "rollback failed");
            }
            warn!(revision = %step.revision, direction = %step.direction, "step rolled back");
            return Err(err);
        }

        if let Err(source) = backend.commit().await {
            if let Err(rollback) = backend.rollback().await {
                warn!(revision = %step.revision, error = %rollback, "rollback failed");
            }
            return Err(failed(step, "commit", source));
        }

        info!(
            revision = %step.revision,
            direction = %step.direction,
            tips = %step.after.join(","),
            "applied"
        );
        Ok(())
    }

    async fn step_body<B: Backend>(&self, backend: &mut B, step: &PlanStep) -> Result<()> {
        let found = backend
            .read_versions()
            .await
            .map_err(|source| failed(step, "read_versions", source))?;
        if found != step.before {
            return Err(Error::StaleState {
                revision: step.revision.clone(),
                expected: step.before.clone(),
                found,
            });
        }

        let revision = self
            .graph
            .get(&step.revision)
            .ok_or_else(|| Error::UnknownTarget(step.revision.clone()))?;

        revision
            .script(step.direction)
            .run(backend)
            .await
            .map_err(|e| Error::MigrationFailed {
                revision: step.revision.clone(),
                primitive: e.primitive,
                source: e.source,
            })?;

        backend
            .write_versions(&step.after)
            .await
            .map_err(|source| failed(step, "write_versions", source))
    }
}
