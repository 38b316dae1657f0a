//! Revision records.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::graph::Direction;
use crate::script::Script;

/// Words with a meaning of their own on the command line.
pub const RESERVED_IDS: [&str; 3] = ["head", "heads", "base"];

/// Parent linkage of a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parents {
    Root,
    Linear(String),
    /// Two or more parents, in authored order.
    Merge(Vec<String>),
}

impl Parents {
    pub fn from_ids(mut ids: Vec<String>) -> Self {
        match ids.len() {
            0 => Parents::Root,
            1 => Parents::Linear(ids.remove(0)),
            _ => Parents::Merge(ids),
        }
    }

    pub fn as_slice(&self) -> &[String] {
        match self {
            Parents::Root => &[],
            Parents::Linear(id) => std::slice::from_ref(id),
            Parents::Merge(ids) => ids,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Parents::Root)
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, Parents::Merge(_))
    }
}

/// Check that `id` can be used as a revision id.
pub fn validate_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("revision id is empty".into());
    }
    if RESERVED_IDS.contains(&id) {
        return Err(format!("'{}' is a reserved word", id));
    }
    if id.starts_with('+') || id.starts_with('-') {
        return Err(format!("revision id '{}' may not start with '+' or '-'", id));
    }
    if let Some(c) = id
        .chars()
        .find(|c| c.is_whitespace() || matches!(c, '@' | ':' | ','))
    {
        return Err(format!("revision id '{}' contains '{}'", id, c));
    }
    Ok(())
}

/// An atomic schema change.
#[derive(Debug, Clone)]
pub struct Revision {
    pub id: String,
    pub parents: Parents,
    pub branch_labels: BTreeSet<String>,
    pub depends_on: BTreeSet<String>,
    pub message: Option<String>,
    pub create_date: Option<String>,
    /// File the revision was loaded from.
    pub path: Option<PathBuf>,
    pub upgrade: Script,
    pub downgrade: Script,
}

impl Revision {
    /// A root revision with empty routines.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parents: Parents::Root,
            branch_labels: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            message: None,
            create_date: None,
            path: None,
            upgrade: Script::new(),
            downgrade: Script::new(),
        }
    }

    /// Append a parent; a second parent makes this a merge.
    pub fn parent(mut self, id: impl Into<String>) -> Self {
        let mut ids = self.parents.as_slice().to_vec();
        ids.push(id.into());
        self.parents = Parents::from_ids(ids);
        self
    }

    pub fn branch_label(mut self, label: impl Into<String>) -> Self {
        self.branch_labels.insert(label.into());
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn upgrade(mut self, script: Script) -> Self {
        self.upgrade = script;
        self
    }

    pub fn downgrade(mut self, script: Script) -> Self {
        self.downgrade = script;
        self
    }

    pub fn parent_ids(&self) -> &[String] {
        self.parents.as_slice()
    }

    /// Parents followed by `depends_on`: everything that must be applied first.
    pub fn requirements(&self) -> impl Iterator<Item = &String> {
        self.parents.as_slice().iter().chain(self.depends_on.iter())
    }

    pub fn script(&self, direction: Direction) -> &Script {
        match direction {
            Direction::Up => &self.upgrade,
            Direction::Down => &self.downgrade,
        }
    }

    /// Where the revision came from, for error messages.
    pub fn location(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => format!("<revision {}>", self.id),
        }
    }
}
