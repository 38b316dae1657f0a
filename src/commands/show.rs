//! Show one revision.

use anyhow::Result;
use colored::*;

use super::{parents_display, Session};
use crate::script::Script;

pub fn show(session: &Session, spec: &str) -> Result<()> {
    let graph = session.load_graph()?;
    let rev = graph.resolve(spec)?;

    println!("{} {}", "Rev:".cyan().bold(), rev.id.yellow());
    println!("Parent:    {}", parents_display(rev));
    if !rev.branch_labels.is_empty() {
        let labels: Vec<&str> = rev.branch_labels.iter().map(String::as_str).collect();
        println!("Labels:    {}", labels.join(", "));
    }
    if !rev.depends_on.is_empty() {
        let deps: Vec<&str> = rev.depends_on.iter().map(String::as_str).collect();
        println!("Depends:   {}", deps.join(", "));
    }
    if let Some(path) = &rev.path {
        println!("Path:      {}", path.display());
    }
    if let Some(date) = &rev.create_date {
        println!("Created:   {}", date);
    }
    if let Some(message) = &rev.message {
        println!("Message:   {}", message);
    }
    println!();
    print_script("upgrade", &rev.upgrade);
    print_script("downgrade", &rev.downgrade);
    Ok(())
}

fn print_script(name: &str, script: &Script) {
    println!("{}", format!("{}:", name).cyan());
    if script.is_empty() {
        println!("  {}", "(empty)".dimmed());
    }
    for (i, step) in script.steps.iter().enumerate() {
        match &step.guard {
            Some(guard) => println!(
                "  {}. {} {}",
                i + 1,
                step.op.describe(),
                format!("when {}", guard).dimmed()
            ),
            None => println!("  {}. {}", i + 1, step.op.describe()),
        }
    }
}
