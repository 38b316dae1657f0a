//! Bookkeeping repair.

use anyhow::Result;
use colored::*;

use super::{after_close, Session};
use crate::graph::Target;

/// Set the bookkeeping rows to `target` without running any routine.
pub async fn stamp(session: &Session, target: &str) -> Result<()> {
    let graph = session.load_graph()?;
    let mut migrator = session.migrator(graph).await?;
    let result = migrator.stamp(&Target::parse(target)).await;
    let closed = migrator.into_backend().close().await;
    let tips = after_close(result, closed)?;

    if tips.is_empty() {
        println!("{} stamped base (no revisions applied)", "✓".green());
    } else {
        println!("{} stamped {}", "✓".green(), tips.join(", ").yellow());
    }
    Ok(())
}
