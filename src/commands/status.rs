//! current, heads and history.

use anyhow::Result;
use colored::*;
use serde::Serialize;

use super::{after_close, label, parents_display, Session};
use crate::graph::RevisionGraph;
use crate::revision::Revision;

#[derive(Serialize)]
struct RevisionSummary<'a> {
    revision: &'a str,
    down_revision: &'a [String],
    branch_labels: Vec<&'a str>,
    depends_on: Vec<&'a str>,
    message: Option<&'a str>,
    create_date: Option<&'a str>,
    is_head: bool,
    is_branchpoint: bool,
    is_mergepoint: bool,
}

impl<'a> RevisionSummary<'a> {
    fn new(graph: &RevisionGraph, rev: &'a Revision) -> Self {
        Self {
            revision: &rev.id,
            down_revision: rev.parent_ids(),
            branch_labels: rev.branch_labels.iter().map(String::as_str).collect(),
            depends_on: rev.depends_on.iter().map(String::as_str).collect(),
            message: rev.message.as_deref(),
            create_date: rev.create_date.as_deref(),
            is_head: graph.is_head(&rev.id),
            is_branchpoint: graph.is_branchpoint(&rev.id),
            is_mergepoint: rev.parents.is_merge(),
        }
    }
}

/// Print the applied revision(s). Returns `false` when the database is
/// uninitialized or has nothing applied.
pub async fn current(session: &Session, verbose: bool) -> Result<bool> {
    let graph = session.load_graph()?;
    let mut migrator = session.migrator(graph).await?;
    let result = migrator.current().await;
    let graph = migrator.graph().clone();
    let closed = migrator.into_backend().close().await;
    let tips = after_close(result, closed)?;

    if session.json {
        let found = tips.as_ref().is_some_and(|t| !t.is_empty());
        println!("{}", serde_json::json!({ "current": tips }));
        return Ok(found);
    }

    match tips {
        None => {
            eprintln!(
                "{} bookkeeping table '{}' does not exist",
                "○".dimmed(),
                session.config.version_table
            );
            Ok(false)
        }
        Some(tips) if tips.is_empty() => {
            eprintln!("{} no revisions applied", "○".dimmed());
            Ok(false)
        }
        Some(tips) => {
            for id in &tips {
                let Some(rev) = graph.get(id) else { continue };
                print_line(&graph, rev, verbose);
            }
            Ok(true)
        }
    }
}

/// Print every head of the revision graph.
pub fn heads(session: &Session, verbose: bool) -> Result<()> {
    let graph = session.load_graph()?;
    let heads = graph.heads();
    if session.json {
        let summaries: Vec<RevisionSummary> =
            heads.iter().map(|r| RevisionSummary::new(&graph, *r)).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    for rev in heads {
        print_line(&graph, rev, verbose);
    }
    Ok(())
}

/// Print the revision graph, newest first.
pub fn history(session: &Session, verbose: bool) -> Result<()> {
    let graph = session.load_graph()?;
    if session.json {
        let summaries: Vec<RevisionSummary> =
            graph.history().map(|r| RevisionSummary::new(&graph, r)).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    for rev in graph.history() {
        if verbose {
            print_verbose(&graph, rev);
        } else {
            println!(
                "{} -> {}{}, {}",
                parents_display(rev).dimmed(),
                label(rev).yellow(),
                markers(&graph, rev),
                rev.message.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

fn markers(graph: &RevisionGraph, rev: &Revision) -> String {
    let mut out = String::new();
    if graph.is_head(&rev.id) {
        out.push_str(" (head)");
    }
    if graph.is_branchpoint(&rev.id) {
        out.push_str(" (branchpoint)");
    }
    if rev.parents.is_merge() {
        out.push_str(" (mergepoint)");
    }
    out
}

fn print_line(graph: &RevisionGraph, rev: &Revision, verbose: bool) {
    if verbose {
        print_verbose(graph, rev);
    } else {
        println!("{}{}", label(rev).yellow(), markers(graph, rev).green());
    }
}

fn print_verbose(graph: &RevisionGraph, rev: &Revision) {
    println!("{} {}{}", "Rev:".cyan().bold(), rev.id.yellow(), markers(graph, rev).green());
    println!("  Parent:    {}", parents_display(rev));
    if !rev.branch_labels.is_empty() {
        let labels: Vec<&str> = rev.branch_labels.iter().map(String::as_str).collect();
        println!("  Labels:    {}", labels.join(", "));
    }
    if !rev.depends_on.is_empty() {
        let deps: Vec<&str> = rev.depends_on.iter().map(String::as_str).collect();
        println!("  Depends:   {}", deps.join(", "));
    }
    let children = graph.children(&rev.id);
    if !children.is_empty() {
        println!("  Children:  {}", children.join(", "));
    }
    if let Some(path) = &rev.path {
        println!("  Path:      {}", path.display().to_string().dimmed());
    }
    if let Some(date) = &rev.create_date {
        println!("  Created:   {}", date.dimmed());
    }
    if let Some(message) = &rev.message {
        println!();
        println!("    {}", message);
    }
    println!();
}
