//! Configuration file parsing.
//!
//! Settings come from a TOML file, searched in order:
//! 1. the path given with `--config`
//! 2. `./strata.toml`
//! 3. `<config dir>/strata/config.toml` (e.g. `~/.config/strata/config.toml`)
//!
//! Missing files fall back to defaults. `DATABASE_URL` and command-line
//! flags override whatever the file says.
//!
//! ```toml
//! script_location = "revisions"
//! version_table = "schema_revision"
//! lock_timeout_secs = 60
//! database_url = "postgres://localhost/app"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "strata.toml";

/// Advisory lock key shared by every migrator of a database.
pub const DEFAULT_LOCK_KEY: i64 = 0x7374_7261_7461;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding revision files.
    pub script_location: PathBuf,
    /// Bookkeeping table; may be schema-qualified.
    pub version_table: String,
    /// How long to wait for the migration lock.
    pub lock_timeout_secs: u64,
    pub lock_key: i64,
    pub database_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            script_location: PathBuf::from("revisions"),
            version_table: "schema_revision".to_string(),
            lock_timeout_secs: 60,
            lock_key: DEFAULT_LOCK_KEY,
            database_url: None,
        }
    }
}

impl Config {
    pub fn from_toml(source: &str, location: &Path) -> Result<Self> {
        let config: Config = toml::from_str(source)
            .map_err(|e| Error::Config(format!("{}: {}", location.display(), e.message())))?;
        if config.version_table.trim().is_empty() {
            return Err(Error::Config(format!(
                "{}: version_table must not be empty",
                location.display()
            )));
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml(&source, path)
    }

    /// Load from the first file found in the search order, or defaults.
    /// An explicit path must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        for candidate in Self::search_paths() {
            if candidate.is_file() {
                debug!(path = %candidate.display(), "loading configuration");
                return Self::from_file(&candidate);
            }
        }
        debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("strata").join("config.toml"));
        }
        paths
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                Error::Config("no database URL; set DATABASE_URL or pass --database-url".into())
            })
    }
}
