//! Revision routines.
//!
//! A [`Script`] is the body of a revision's `upgrade` or `downgrade`: an
//! ordered list of schema operations, each optionally guarded by an
//! introspection check. Scripts only ever talk to an execution context
//! through [`SchemaOps`] and [`Introspect`], so they run unchanged
//! against PostgreSQL, the in-memory test double, or the offline SQL
//! renderer.

pub mod parse;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{Introspect, SchemaOps};
use crate::error::{DbError, DbResult};

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ColumnType {
    Integer,
    BigInteger,
    Float,
    /// `text` when unbounded, `varchar(n)` otherwise.
    Text(Option<u32>),
    Timestamp { with_time_zone: bool },
    Uuid,
    Boolean,
    Jsonb,
}

impl ColumnType {
    /// PostgreSQL type used in DDL.
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Integer => "INTEGER".into(),
            ColumnType::BigInteger => "BIGINT".into(),
            ColumnType::Float => "DOUBLE PRECISION".into(),
            ColumnType::Text(None) => "TEXT".into(),
            ColumnType::Text(Some(n)) => format!("VARCHAR({})", n),
            ColumnType::Timestamp { with_time_zone: true } => "TIMESTAMP WITH TIME ZONE".into(),
            ColumnType::Timestamp { with_time_zone: false } => "TIMESTAMP".into(),
            ColumnType::Uuid => "UUID".into(),
            ColumnType::Boolean => "BOOLEAN".into(),
            ColumnType::Jsonb => "JSONB".into(),
        }
    }

    /// Name reported by `information_schema.columns.data_type`.
    pub fn information_schema_name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::BigInteger => "bigint",
            ColumnType::Float => "double precision",
            ColumnType::Text(None) => "text",
            ColumnType::Text(Some(_)) => "character varying",
            ColumnType::Timestamp { with_time_zone: true } => "timestamp with time zone",
            ColumnType::Timestamp { with_time_zone: false } => "timestamp without time zone",
            ColumnType::Uuid => "uuid",
            ColumnType::Boolean => "boolean",
            ColumnType::Jsonb => "jsonb",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::BigInteger => write!(f, "bigint"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Text(None) => write!(f, "text"),
            ColumnType::Text(Some(n)) => write!(f, "text({})", n),
            ColumnType::Timestamp { with_time_zone: true } => write!(f, "timestamptz"),
            ColumnType::Timestamp { with_time_zone: false } => write!(f, "timestamp"),
            ColumnType::Uuid => write!(f, "uuid"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Jsonb => write!(f, "jsonb"),
        }
    }
}

impl TryFrom<String> for ColumnType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse::column_type(&value)
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        value.to_string()
    }
}

fn default_true() -> bool {
    true
}

/// A column definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            server_default: None,
            comment: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn server_default(mut self, expr: impl Into<String>) -> Self {
        self.server_default = Some(expr.into());
        self
    }

    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }
}

/// Referential action for `ON DELETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    NoAction,
}

impl ReferentialAction {
    pub fn sql(&self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

/// Kind of a named table constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
    ForeignKey,
    Check,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstraintKind::PrimaryKey => "primary key",
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::Check => "check",
        };
        f.write_str(s)
    }
}

/// A foreign key from the owning table's `columns` to `target_table`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeignKeySpec {
    pub name: String,
    pub columns: Vec<String>,
    pub target_table: String,
    pub target_columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
}

impl ForeignKeySpec {
    pub fn new(
        name: impl Into<String>,
        columns: &[&str],
        target_table: impl Into<String>,
        target_columns: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            target_table: target_table.into(),
            target_columns: target_columns.iter().map(|c| c.to_string()).collect(),
            on_delete: None,
        }
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }
}

/// A named (or anonymous) unique constraint inside `create_table`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UniqueSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub columns: Vec<String>,
}

/// Arguments of `create_table`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub unique: Vec<UniqueSpec>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            unique: Vec::new(),
            foreign_keys: Vec::new(),
            comment: None,
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn unique(mut self, name: Option<&str>, columns: &[&str]) -> Self {
        self.unique.push(UniqueSpec {
            name: name.map(str::to_string),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKeySpec) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }
}

/// Arguments of `create_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSpec {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, table: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// One schema primitive.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    AddColumn { table: String, column: ColumnSpec },
    DropColumn { table: String, name: String },
    CreateIndex(IndexSpec),
    DropIndex { name: String, table: String },
    CreateTable(TableSpec),
    DropTable { name: String },
    AddForeignKey { table: String, foreign_key: ForeignKeySpec },
    DropConstraint { name: String, table: String, kind: ConstraintKind },
    Execute { sql: String },
}

impl Operation {
    /// Short description naming the primitive and its target, used in
    /// failure reports and logs.
    pub fn describe(&self) -> String {
        match self {
            Operation::AddColumn { table, column } => {
                format!("add_column({}.{})", table, column.name)
            }
            Operation::DropColumn { table, name } => format!("drop_column({}.{})", table, name),
            Operation::CreateIndex(index) => format!("create_index({})", index.name),
            Operation::DropIndex { name, .. } => format!("drop_index({})", name),
            Operation::CreateTable(table) => format!("create_table({})", table.name),
            Operation::DropTable { name } => format!("drop_table({})", name),
            Operation::AddForeignKey { foreign_key, .. } => {
                format!("add_foreign_key({})", foreign_key.name)
            }
            Operation::DropConstraint { name, .. } => format!("drop_constraint({})", name),
            Operation::Execute { sql } => {
                let first = sql.lines().next().unwrap_or("").trim();
                if first.chars().count() > 40 {
                    let head: String = first.chars().take(40).collect();
                    format!("execute({}...)", head)
                } else {
                    format!("execute({})", first)
                }
            }
        }
    }

    /// Apply this primitive to an execution context.
    pub async fn apply<C: SchemaOps>(&self, ctx: &mut C) -> DbResult<()> {
        match self {
            Operation::AddColumn { table, column } => ctx.add_column(table, column).await,
            Operation::DropColumn { table, name } => ctx.drop_column(table, name).await,
            Operation::CreateIndex(index) => ctx.create_index(index).await,
            Operation::DropIndex { name, table } => ctx.drop_index(name, table).await,
            Operation::CreateTable(table) => ctx.create_table(table).await,
            Operation::DropTable { name } => ctx.drop_table(name).await,
            Operation::AddForeignKey { table, foreign_key } => {
                ctx.add_foreign_key(table, foreign_key).await
            }
            Operation::DropConstraint { name, table, kind } => {
                ctx.drop_constraint(name, table, *kind).await
            }
            Operation::Execute { sql } => ctx.execute(sql).await,
        }
    }
}

/// Introspection predicate used by guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaCheck {
    TableExists(String),
    ColumnExists { table: String, column: String },
    IndexExists(String),
    ConstraintExists { table: String, name: String },
}

/// A step runs only when its guard holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub negated: bool,
    pub check: SchemaCheck,
}

impl Guard {
    pub fn holds(check: SchemaCheck) -> Self {
        Self {
            negated: false,
            check,
        }
    }

    pub fn absent(check: SchemaCheck) -> Self {
        Self {
            negated: true,
            check,
        }
    }

    pub async fn evaluate<C: Introspect>(&self, ctx: &mut C) -> DbResult<bool> {
        let found = match &self.check {
            SchemaCheck::TableExists(table) => ctx.table_exists(table).await?,
            SchemaCheck::ColumnExists { table, column } => {
                ctx.column_exists(table, column).await?
            }
            SchemaCheck::IndexExists(name) => ctx.index_exists(name).await?,
            SchemaCheck::ConstraintExists { table, name } => {
                ctx.constraint_exists(table, name).await?
            }
        };
        Ok(found != self.negated)
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "not ")?;
        }
        match &self.check {
            SchemaCheck::TableExists(t) => write!(f, "table_exists({})", t),
            SchemaCheck::ColumnExists { table, column } => {
                write!(f, "column_exists({}, {})", table, column)
            }
            SchemaCheck::IndexExists(i) => write!(f, "index_exists({})", i),
            SchemaCheck::ConstraintExists { table, name } => {
                write!(f, "constraint_exists({}, {})", table, name)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub guard: Option<Guard>,
    pub op: Operation,
}

/// Failure of one step, naming the primitive that failed.
#[derive(Debug)]
pub struct StepError {
    pub primitive: String,
    pub source: DbError,
}

/// Ordered list of guarded operations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    pub steps: Vec<Step>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, op: Operation) -> Self {
        self.steps.push(Step { guard: None, op });
        self
    }

    pub fn then_when(mut self, guard: Guard, op: Operation) -> Self {
        self.steps.push(Step {
            guard: Some(guard),
            op,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order, stopping at the first failure.
    pub async fn run<C: SchemaOps + Introspect>(&self, ctx: &mut C) -> Result<(), StepError> {
        for step in &self.steps {
            if let Some(guard) = &step.guard {
                let holds = guard.evaluate(ctx).await.map_err(|source| StepError {
                    primitive: format!("guard `{}`", guard),
                    source,
                })?;
                if !holds {
                    debug!(op = %step.op.describe(), guard = %guard, "guard not met, skipping");
                    continue;
                }
            }
            step.op.apply(ctx).await.map_err(|source| StepError {
                primitive: step.op.describe(),
                source,
            })?;
        }
        Ok(())
    }
}
