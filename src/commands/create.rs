//! New revision files.

use anyhow::{bail, Result};
use colored::*;

use super::Session;
use crate::error::Error;
use crate::graph::RevisionGraph;
use crate::revision::Revision;
use crate::store::NewRevision;

/// Create an empty revision on top of the current head.
///
/// `head` picks the parent explicitly; `base` starts a new root, which is
/// how an independent branch begins.
pub fn revision(
    session: &Session,
    message: &str,
    head: Option<&str>,
    branch_labels: &[String],
    depends_on: &[String],
) -> Result<()> {
    let store = session.store();
    let graph = if store.dir().exists() {
        store.load()?
    } else {
        RevisionGraph::new(Vec::new())?
    };

    let parents = match head {
        Some("base") => Vec::new(),
        Some(spec) => vec![graph.resolve(spec)?.id.clone()],
        None => {
            let heads = graph.head_ids();
            if heads.len() > 1 {
                return Err(Error::DivergentHistory { heads }.into());
            }
            heads
        }
    };

    let mut dependencies = Vec::with_capacity(depends_on.len());
    for spec in depends_on {
        dependencies.push(graph.resolve(spec)?.id.clone());
    }

    let created = store.create(NewRevision {
        message: message.to_string(),
        parents,
        branch_labels: branch_labels.to_vec(),
        depends_on: dependencies,
        id: None,
    })?;
    print_created("Created revision", &created);
    Ok(())
}

/// Create a merge revision whose parents are the given revisions.
/// `heads` stands for every current head.
pub fn merge(
    session: &Session,
    revisions: &[String],
    message: Option<&str>,
    branch_labels: &[String],
) -> Result<()> {
    let graph = session.load_graph()?;

    let mut parents: Vec<String> = Vec::new();
    for spec in revisions {
        if spec == "heads" {
            parents.extend(graph.head_ids());
        } else {
            parents.push(graph.resolve(spec)?.id.clone());
        }
    }
    parents.sort();
    parents.dedup();
    if parents.len() < 2 {
        bail!("a merge needs at least two distinct revisions, got [{}]", parents.join(", "));
    }

    for p in &parents {
        for q in &parents {
            if p != q && graph.ancestors(q).contains(p.as_str()) {
                return Err(Error::RedundantMergeParent {
                    revision: "<new merge>".into(),
                    ancestor: p.clone(),
                    descendant: q.clone(),
                }
                .into());
            }
        }
    }

    let message = match message {
        Some(m) => m.to_string(),
        None => format!("merge {}", parents.join(", ")),
    };
    let created = session.store().create(NewRevision {
        message,
        parents,
        branch_labels: branch_labels.to_vec(),
        depends_on: Vec::new(),
        id: None,
    })?;
    print_created("Created merge revision", &created);
    Ok(())
}

fn print_created(heading: &str, rev: &Revision) {
    println!("{} {}", "✓".green(), heading.cyan().bold());
    println!("  Revision: {}", rev.id.yellow());
    if !rev.parents.is_root() {
        println!("  Parents:  {}", rev.parent_ids().join(", "));
    }
    if let Some(path) = &rev.path {
        println!("  File:     {}", path.display());
    }
    println!();
    println!("  Edit the file to add upgrade and downgrade steps, then run:");
    println!("    {}", "strata upgrade head".cyan());
}
