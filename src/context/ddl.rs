//! PostgreSQL DDL rendering.
//!
//! Pure functions from operation arguments to SQL text. Shared by the
//! live backend and the offline renderer so both emit the same statements.

use crate::script::{ColumnSpec, ConstraintKind, ForeignKeySpec, IndexSpec, TableSpec};

/// Quote an identifier, splitting `schema.name` into its parts.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Quote a string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `"name" TYPE [NOT NULL] [DEFAULT expr]`
pub fn column_definition(column: &ColumnSpec) -> String {
    let mut sql = format!("{} {}", quote_ident(&column.name), column.column_type.sql());
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if let Some(default) = &column.server_default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    sql
}

fn column_comment(table: &str, column: &ColumnSpec) -> Option<String> {
    column.comment.as_ref().map(|text| {
        format!(
            "COMMENT ON COLUMN {}.{} IS {}",
            quote_ident(table),
            quote_ident(&column.name),
            quote_literal(text)
        )
    })
}

fn foreign_key_clause(fk: &ForeignKeySpec) -> String {
    let mut sql = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_ident(&fk.name),
        column_list(&fk.columns),
        quote_ident(&fk.target_table),
        column_list(&fk.target_columns)
    );
    if let Some(action) = fk.on_delete {
        sql.push_str(" ON DELETE ");
        sql.push_str(action.sql());
    }
    sql
}

pub fn add_column(table: &str, column: &ColumnSpec) -> Vec<String> {
    let mut stmts = vec![format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table),
        column_definition(column)
    )];
    stmts.extend(column_comment(table, column));
    stmts
}

pub fn drop_column(table: &str, name: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(table),
        quote_ident(name)
    )
}

pub fn create_index(index: &IndexSpec) -> String {
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index.name),
        quote_ident(&index.table),
        column_list(&index.columns)
    )
}

/// PostgreSQL index names are schema-scoped, so the table is not needed.
pub fn drop_index(name: &str) -> String {
    format!("DROP INDEX {}", quote_ident(name))
}

pub fn create_table(table: &TableSpec) -> Vec<String> {
    let mut items: Vec<String> = table.columns.iter().map(column_definition).collect();
    if !table.primary_key.is_empty() {
        items.push(format!("PRIMARY KEY ({})", column_list(&table.primary_key)));
    }
    for unique in &table.unique {
        let clause = format!("UNIQUE ({})", column_list(&unique.columns));
        items.push(match &unique.name {
            Some(name) => format!("CONSTRAINT {} {}", quote_ident(name), clause),
            None => clause,
        });
    }
    for fk in &table.foreign_keys {
        items.push(foreign_key_clause(fk));
    }

    let mut stmts = vec![format!(
        "CREATE TABLE {} (\n    {}\n)",
        quote_ident(&table.name),
        items.join(",\n    ")
    )];
    if let Some(comment) = &table.comment {
        stmts.push(format!(
            "COMMENT ON TABLE {} IS {}",
            quote_ident(&table.name),
            quote_literal(comment)
        ));
    }
    stmts.extend(
        table
            .columns
            .iter()
            .filter_map(|c| column_comment(&table.name, c)),
    );
    stmts
}

pub fn drop_table(name: &str) -> String {
    format!("DROP TABLE {}", quote_ident(name))
}

pub fn add_foreign_key(table: &str, fk: &ForeignKeySpec) -> String {
    format!(
        "ALTER TABLE {} ADD {}",
        quote_ident(table),
        foreign_key_clause(fk)
    )
}

/// The constraint kind is informational for PostgreSQL: constraint names
/// are unique per table regardless of kind.
pub fn drop_constraint(name: &str, table: &str, _kind: ConstraintKind) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        quote_ident(table),
        quote_ident(name)
    )
}

pub fn create_version_table(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    \"version_num\" VARCHAR(255) NOT NULL PRIMARY KEY\n)",
        quote_ident(table)
    )
}

pub fn select_versions(table: &str) -> String {
    format!(
        "SELECT \"version_num\" FROM {} ORDER BY \"version_num\" COLLATE \"C\"",
        quote_ident(table)
    )
}

pub fn delete_versions(table: &str) -> String {
    format!("DELETE FROM {}", quote_ident(table))
}

/// Parameterized insert (`$1`).
pub fn insert_version(table: &str) -> String {
    format!(
        "INSERT INTO {} (\"version_num\") VALUES ($1)",
        quote_ident(table)
    )
}

/// Literal insert, for rendered scripts.
pub fn insert_version_literal(table: &str, version: &str) -> String {
    format!(
        "INSERT INTO {} (\"version_num\") VALUES ({})",
        quote_ident(table),
        quote_literal(version)
    )
}
