//! Upgrade and downgrade.

use anyhow::Result;
use colored::*;

use super::{after_close, Session};
use crate::context::offline::OfflineBackend;
use crate::graph::{Direction, RevisionGraph, Target};
use crate::migrator::{Migrator, Outcome};

/// Apply revisions forward to `target` (default `head`).
pub async fn upgrade(session: &Session, target: &str, sql: bool, from: Option<&str>) -> Result<()> {
    run(session, Direction::Up, target, sql, from).await
}

/// Roll revisions back to `target` (`base` empties the database).
pub async fn downgrade(
    session: &Session,
    target: &str,
    sql: bool,
    from: Option<&str>,
) -> Result<()> {
    run(session, Direction::Down, target, sql, from).await
}

async fn run(
    session: &Session,
    direction: Direction,
    target: &str,
    sql: bool,
    from: Option<&str>,
) -> Result<()> {
    let graph = session.load_graph()?;
    let target = Target::parse(target);

    if sql {
        return render_sql(session, graph, direction, &target, from).await;
    }

    let mut migrator = session.migrator(graph).await?;
    let result = match direction {
        Direction::Up => migrator.upgrade(&target).await,
        Direction::Down => migrator.downgrade(&target).await,
    };
    let closed = migrator.into_backend().close().await;
    let outcome = after_close(result, closed)?;

    if session.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(direction, &outcome);
    }
    Ok(())
}

/// Offline mode: print the SQL the plan would run.
async fn render_sql(
    session: &Session,
    graph: RevisionGraph,
    direction: Direction,
    target: &Target,
    from: Option<&str>,
) -> Result<()> {
    let starting = match from {
        Some(spec) => graph.target_tips(&Target::parse(spec))?,
        None => Vec::new(),
    };
    let backend = OfflineBackend::new(&session.config.version_table, starting);
    let mut migrator = Migrator::new(graph, backend);
    match direction {
        Direction::Up => migrator.upgrade(target).await?,
        Direction::Down => migrator.downgrade(target).await?,
    };
    print!("{}", migrator.into_backend().sql());
    Ok(())
}

fn print_outcome(direction: Direction, outcome: &Outcome) {
    let heading = match direction {
        Direction::Up => "Upgrading:".cyan().bold(),
        Direction::Down => "Downgrading:".cyan().bold(),
    };

    if outcome.is_noop() {
        println!(
            "{} already at {}",
            "✓".green(),
            tips(&outcome.to).yellow()
        );
        return;
    }

    println!("{} {} -> {}", heading, tips(&outcome.from), tips(&outcome.to).yellow());
    for step in &outcome.applied {
        let arrow = match step.direction {
            Direction::Up => "↑".green(),
            Direction::Down => "↓".yellow(),
        };
        println!("  {} {}", arrow, step.revision);
    }
    println!(
        "{} {} revision(s) applied",
        "✓".green(),
        outcome.applied.len()
    );
}

fn tips(ids: &[String]) -> String {
    if ids.is_empty() {
        "base".to_string()
    } else {
        ids.join(", ")
    }
}
