//! Warehouse table definitions and the SQL the loader issues.
//!
//! Tables are described as data and rendered to Redshift DDL, so the schema,
//! the truncate list and the load list can never disagree.

mod tables;

pub use tables::STAR_SCHEMA;

use std::fmt;

/// Column data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Varchar(u16),
    Int,
    Double,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Varchar(len) => write!(f, "VARCHAR({len})"),
            ColumnType::Int => f.write_str("INT"),
            ColumnType::Double => f.write_str("DOUBLE PRECISION"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self { name, ty }
    }
}

/// `FOREIGN KEY (columns) REFERENCES table(references)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub columns: &'static [&'static str],
    pub table: &'static str,
    pub references: &'static [&'static str],
}

/// How rows are distributed across compute slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// Full copy on every node; for small dimensions.
    All,
    /// Hash distributed on one column.
    Key(&'static str),
}

/// A warehouse table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub primary_key: &'static [&'static str],
    pub foreign_keys: &'static [ForeignKey],
    pub distribution: Distribution,
    pub sort_key: &'static [&'static str],
}

/// `CREATE TABLE IF NOT EXISTS` for `table`.
pub fn create_table_sql(table: &TableDef) -> String {
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.ty))
        .collect();
    if !table.primary_key.is_empty() {
        lines.push(format!("PRIMARY KEY ({})", table.primary_key.join(", ")));
    }
    for fk in table.foreign_keys {
        lines.push(format!(
            "FOREIGN KEY ({}) REFERENCES {}({})",
            fk.columns.join(", "),
            fk.table,
            fk.references.join(", ")
        ));
    }

    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)\n",
        table.name,
        lines.join(",\n    ")
    );
    match table.distribution {
        Distribution::All => sql.push_str("DISTSTYLE ALL"),
        Distribution::Key(column) => {
            sql.push_str(&format!("DISTSTYLE KEY\nDISTKEY({column})"));
        }
    }
    if !table.sort_key.is_empty() {
        sql.push_str(&format!("\nSORTKEY({})", table.sort_key.join(", ")));
    }
    sql.push(';');
    sql
}

pub fn truncate_sql(table: &TableDef) -> String {
    format!("TRUNCATE TABLE {};", table.name)
}

/// Bulk load `table` from the Parquet files under `source_url`.
pub fn copy_sql(table: &TableDef, source_url: &str, role_arn: &str) -> String {
    format!(
        "COPY {} FROM {} IAM_ROLE {} FORMAT AS PARQUET;",
        table.name,
        quote_literal(source_url),
        quote_literal(role_arn)
    )
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
