//! In-memory relational schema model.
//!
//! Tracks tables, columns, indexes and named constraints closely enough to
//! reject the same DDL PostgreSQL would reject (missing or duplicate
//! relations, columns, indexes, constraints). Used by the in-memory
//! backend and by tests comparing schema snapshots.

use std::collections::BTreeMap;
use std::fmt;

use crate::context::ColumnInfo;
use crate::script::{ColumnSpec, ConstraintKind, ForeignKeySpec, IndexSpec, TableSpec};

/// A complete database schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub tables: BTreeMap<String, Table>,
    pub indexes: BTreeMap<String, Index>,
}

/// A table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub constraints: BTreeMap<String, Constraint>,
    pub comment: Option<String>,
}

/// A column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub comment: Option<String>,
}

/// A named constraint and the columns it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub references: Option<String>,
}

/// An index definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

fn relation_missing(name: &str) -> String {
    format!("relation \"{}\" does not exist", name)
}

impl From<&ColumnSpec> for Column {
    fn from(spec: &ColumnSpec) -> Self {
        Self {
            name: spec.name.clone(),
            data_type: spec.column_type.information_schema_name().to_string(),
            nullable: spec.nullable,
            default: spec.server_default.clone(),
            comment: spec.comment.clone(),
        }
    }
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    fn require_columns(&self, columns: &[String]) -> Result<(), String> {
        match columns.iter().find(|c| self.column(c).is_none()) {
            Some(missing) => Err(format!(
                "column \"{}\" of relation \"{}\" does not exist",
                missing, self.name
            )),
            None => Ok(()),
        }
    }

    fn insert_constraint(&mut self, name: String, constraint: Constraint) -> Result<(), String> {
        if self.constraints.contains_key(&name) {
            return Err(format!(
                "constraint \"{}\" for relation \"{}\" already exists",
                name, self.name
            ));
        }
        self.constraints.insert(name, constraint);
        Ok(())
    }
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, String> {
        self.tables.get_mut(name).ok_or_else(|| relation_missing(name))
    }

    fn check_foreign_key(&self, source: &Table, fk: &ForeignKeySpec) -> Result<(), String> {
        source.require_columns(&fk.columns)?;
        let target = if fk.target_table == source.name {
            source
        } else {
            self.table(&fk.target_table)
                .ok_or_else(|| relation_missing(&fk.target_table))?
        };
        target.require_columns(&fk.target_columns)?;
        if fk.columns.len() != fk.target_columns.len() {
            return Err(format!(
                "number of referencing and referenced columns for foreign key \"{}\" disagree",
                fk.name
            ));
        }
        Ok(())
    }

    pub fn create_table(&mut self, spec: &TableSpec) -> Result<(), String> {
        if self.tables.contains_key(&spec.name) || self.indexes.contains_key(&spec.name) {
            return Err(format!("relation \"{}\" already exists", spec.name));
        }
        let mut table = Table {
            name: spec.name.clone(),
            columns: Vec::new(),
            constraints: BTreeMap::new(),
            comment: spec.comment.clone(),
        };
        for col in &spec.columns {
            if table.column(&col.name).is_some() {
                return Err(format!("column \"{}\" specified more than once", col.name));
            }
            table.columns.push(Column::from(col));
        }
        if !spec.primary_key.is_empty() {
            table.require_columns(&spec.primary_key)?;
            for col in table.columns.iter_mut() {
                if spec.primary_key.contains(&col.name) {
                    col.nullable = false;
                }
            }
            table.insert_constraint(
                format!("{}_pkey", spec.name),
                Constraint {
                    kind: ConstraintKind::PrimaryKey,
                    columns: spec.primary_key.clone(),
                    references: None,
                },
            )?;
        }
        for unique in &spec.unique {
            table.require_columns(&unique.columns)?;
            let name = unique
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_{}_key", spec.name, unique.columns.join("_")));
            table.insert_constraint(
                name,
                Constraint {
                    kind: ConstraintKind::Unique,
                    columns: unique.columns.clone(),
                    references: None,
                },
            )?;
        }
        for fk in &spec.foreign_keys {
            self.check_foreign_key(&table, fk)?;
            table.insert_constraint(
                fk.name.clone(),
                Constraint {
                    kind: ConstraintKind::ForeignKey,
                    columns: fk.columns.clone(),
                    references: Some(fk.target_table.clone()),
                },
            )?;
        }
        self.tables.insert(spec.name.clone(), table);
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<(), String> {
        if self.tables.remove(name).is_none() {
            return Err(format!("table \"{}\" does not exist", name));
        }
        self.indexes.retain(|_, idx| idx.table != name);
        Ok(())
    }

    pub fn add_column(&mut self, table: &str, spec: &ColumnSpec) -> Result<(), String> {
        let t = self.table_mut(table)?;
        if t.column(&spec.name).is_some() {
            return Err(format!(
                "column \"{}\" of relation \"{}\" already exists",
                spec.name, table
            ));
        }
        t.columns.push(Column::from(spec));
        Ok(())
    }

    /// Dropping a column also drops indexes and constraints that use it.
    pub fn drop_column(&mut self, table: &str, name: &str) -> Result<(), String> {
        let t = self.table_mut(table)?;
        let before = t.columns.len();
        t.columns.retain(|c| c.name != name);
        if t.columns.len() == before {
            return Err(format!(
                "column \"{}\" of relation \"{}\" does not exist",
                name, table
            ));
        }
        t.constraints.retain(|_, c| !c.columns.iter().any(|col| col == name));
        self.indexes
            .retain(|_, idx| !(idx.table == table && idx.columns.iter().any(|c| c == name)));
        Ok(())
    }

    pub fn create_index(&mut self, spec: &IndexSpec) -> Result<(), String> {
        if self.indexes.contains_key(&spec.name) || self.tables.contains_key(&spec.name) {
            return Err(format!("relation \"{}\" already exists", spec.name));
        }
        let table = self
            .table(&spec.table)
            .ok_or_else(|| relation_missing(&spec.table))?;
        if let Some(missing) = spec.columns.iter().find(|c| table.column(c).is_none()) {
            return Err(format!("column \"{}\" does not exist", missing));
        }
        self.indexes.insert(
            spec.name.clone(),
            Index {
                name: spec.name.clone(),
                table: spec.table.clone(),
                columns: spec.columns.clone(),
                unique: spec.unique,
            },
        );
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> Result<(), String> {
        match self.indexes.remove(name) {
            Some(_) => Ok(()),
            None => Err(format!("index \"{}\" does not exist", name)),
        }
    }

    pub fn add_foreign_key(&mut self, table: &str, fk: &ForeignKeySpec) -> Result<(), String> {
        let source = self.table(table).ok_or_else(|| relation_missing(table))?;
        self.check_foreign_key(source, fk)?;
        self.table_mut(table)?.insert_constraint(
            fk.name.clone(),
            Constraint {
                kind: ConstraintKind::ForeignKey,
                columns: fk.columns.clone(),
                references: Some(fk.target_table.clone()),
            },
        )
    }

    pub fn drop_constraint(
        &mut self,
        name: &str,
        table: &str,
        kind: ConstraintKind,
    ) -> Result<(), String> {
        let t = self.table_mut(table)?;
        match t.constraints.get(name) {
            Some(c) if c.kind == kind => {
                t.constraints.remove(name);
                Ok(())
            }
            Some(c) => Err(format!(
                "constraint \"{}\" of relation \"{}\" is a {} constraint, not {}",
                name, table, c.kind, kind
            )),
            None => Err(format!(
                "constraint \"{}\" of relation \"{}\" does not exist",
                name, table
            )),
        }
    }

    pub fn list_columns(&self, table: &str) -> Vec<ColumnInfo> {
        self.table(table)
            .map(|t| {
                t.columns
                    .iter()
                    .map(|c| ColumnInfo {
                        name: c.name.clone(),
                        data_type: c.data_type.clone(),
                        nullable: c.nullable,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Human-readable dump, one table per block.
impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for table in self.tables.values() {
            writeln!(f, "table {} {{", table.name)?;
            for col in &table.columns {
                write!(f, "  {} {}", col.name, col.data_type)?;
                if !col.nullable {
                    write!(f, " not_null")?;
                }
                if let Some(def) = &col.default {
                    write!(f, " default {}", def)?;
                }
                writeln!(f)?;
            }
            writeln!(f, "}}")?;
        }
        for idx in self.indexes.values() {
            let unique = if idx.unique { "unique " } else { "" };
            writeln!(
                f,
                "{}index {} on {} ({})",
                unique,
                idx.name,
                idx.table,
                idx.columns.join(", ")
            )?;
        }
        Ok(())
    }
}
