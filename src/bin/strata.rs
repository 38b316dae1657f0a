//! strata command line.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{ArgAction, Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use strata::commands::{self, Session};
use strata::Config;

/// Branchable schema revisions for PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "strata", author, version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (default: ./strata.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// PostgreSQL connection string
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Directory holding revision files
    #[arg(long, global = true)]
    revisions: Option<PathBuf>,

    /// Machine-readable output for current, heads and history
    #[arg(long, global = true)]
    json: bool,

    /// Log more (-v info, -vv debug); RUST_LOG takes precedence otherwise
    #[arg(short = 'v', action = ArgAction::Count, global = true)]
    log_level: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply revisions forward
    Upgrade {
        /// Revision, label, `head`, `heads` or `+N`
        #[arg(default_value = "head")]
        target: String,

        /// Print the SQL instead of running it
        #[arg(long)]
        sql: bool,

        /// Starting revision for --sql (default: empty database)
        #[arg(long, requires = "sql")]
        from: Option<String>,
    },

    /// Roll revisions back
    Downgrade {
        /// Revision, label, `base` or `-N`
        #[arg(allow_hyphen_values = true)]
        target: String,

        /// Print the SQL instead of running it
        #[arg(long)]
        sql: bool,

        /// Starting revision for --sql
        #[arg(long, requires = "sql")]
        from: Option<String>,
    },

    /// Show the applied revision(s)
    Current {
        #[arg(long)]
        verbose: bool,
    },

    /// Show every head
    Heads {
        #[arg(long)]
        verbose: bool,
    },

    /// Show the revision graph, newest first
    History {
        #[arg(long)]
        verbose: bool,
    },

    /// Show one revision and its steps
    Show {
        revision: String,
    },

    /// Create a merge revision unifying the given revisions (`heads` for all)
    Merge {
        #[arg(required = true, num_args = 1.., value_name = "REVISION")]
        parents: Vec<String>,

        #[arg(short, long)]
        message: Option<String>,

        #[arg(long = "branch-label")]
        branch_labels: Vec<String>,
    },

    /// Create a new empty revision
    Revision {
        #[arg(short, long)]
        message: String,

        /// Parent revision (`base` starts a new branch)
        #[arg(long)]
        head: Option<String>,

        #[arg(long = "branch-label")]
        branch_labels: Vec<String>,

        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
    },

    /// Set the bookkeeping rows without running any revision
    Stamp {
        /// Revision, label, `head`, `heads` or `base`
        target: String,
    },
}

fn init_tracing(level: u8) {
    let filter = match level {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Exit code for an error: the engine's classification, else 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<strata::Error>()
        .map(strata::Error::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        config.database_url = Some(url);
    }
    if let Some(dir) = cli.revisions {
        config.script_location = dir;
    }
    let session = Session::new(config, cli.json);

    match cli.command {
        Command::Upgrade { target, sql, from } => {
            commands::upgrade(&session, &target, sql, from.as_deref()).await?
        }
        Command::Downgrade { target, sql, from } => {
            commands::downgrade(&session, &target, sql, from.as_deref()).await?
        }
        Command::Current { verbose } => {
            if !commands::current(&session, verbose).await? {
                return Ok(2);
            }
        }
        Command::Heads { verbose } => commands::heads(&session, verbose)?,
        Command::History { verbose } => commands::history(&session, verbose)?,
        Command::Show { revision } => commands::show(&session, &revision)?,
        Command::Merge {
            parents,
            message,
            branch_labels,
        } => commands::merge(&session, &parents, message.as_deref(), &branch_labels)?,
        Command::Revision {
            message,
            head,
            branch_labels,
            depends_on,
        } => commands::revision(
            &session,
            &message,
            head.as_deref(),
            &branch_labels,
            &depends_on,
        )?,
        Command::Stamp { target } => commands::stamp(&session, &target).await?,
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    init_tracing(cli.log_level);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::from(exit_code(&err))
        }
    }
}
