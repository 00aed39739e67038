#![forbid(unsafe_code)]
//! SQL text for the statements a [`projectit_core::Session`] issues.
//!
//! Every builder works on table and column names rather than entity types, since sessions
//! receive names at runtime. Placeholders are positional `?`; parameters are returned in
//! placeholder order where a builder binds values itself.

use projectit_core::{ParamValue, Select};

/// Table backing identifier sequences.
pub const SEQUENCES_TABLE: &str = "projectit_sequences";

const PH: &str = "?";

fn placeholders(n: usize) -> String {
    vec![PH; n].join(", ")
}

/// Build `SELECT <cols> FROM <table> [WHERE ...] [ORDER BY <col>]` for a structured select.
pub fn select(select: &Select<'_>) -> (String, Vec<ParamValue>) {
    let mut sql = format!(
        "SELECT {cols} FROM {table}",
        cols = select.columns.join(", "),
        table = select.table
    );
    let (where_sql, params) = build_where_and(&select.filter);
    if !where_sql.is_empty() {
        sql.push(' ');
        sql.push_str(&where_sql);
    }
    if let Some(order) = select.order_by {
        sql.push_str(" ORDER BY ");
        sql.push_str(order);
    }
    (sql, params)
}

/// Build INSERT INTO <table> (<cols>) VALUES (<placeholders>)
pub fn insert(table: &str, columns: &[&str]) -> String {
    format!(
        "INSERT INTO {table} ({cols}) VALUES ({vals})",
        table = table,
        cols = columns.join(", "),
        vals = placeholders(columns.len())
    )
}

/// Build UPDATE <table> SET <col1> = ?, ... WHERE <id> = ?
/// The key binds last.
pub fn update_by_id(table: &str, id_column: &str, columns: &[&str]) -> String {
    let set_clause = columns
        .iter()
        .map(|col| format!("{col} = {PH}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("UPDATE {table} SET {set_clause} WHERE {id_column} = {PH}")
}

/// Build DELETE ... WHERE id = ?
pub fn delete_by_id(table: &str, id_column: &str) -> String {
    format!("DELETE FROM {table} WHERE {id_column} = {PH}")
}

/// Build an unconditional DELETE of every row.
pub fn delete_all(table: &str) -> String {
    format!("DELETE FROM {table}")
}

/// Build SELECT COUNT(*) FROM <table>
pub fn count_all(table: &str) -> String {
    format!("SELECT COUNT(*) FROM {table}")
}

/// Build WHERE clause for conjunction (AND) of equality comparisons.
/// Returns ("WHERE a = ? AND b = ?", params). A NULL value compares with `IS NULL`
/// and binds nothing.
pub fn build_where_and(params: &[(&str, ParamValue)]) -> (String, Vec<ParamValue>) {
    if params.is_empty() {
        return (String::new(), Vec::new());
    }
    let mut clauses: Vec<String> = Vec::with_capacity(params.len());
    let mut out_params: Vec<ParamValue> = Vec::with_capacity(params.len());
    for (field, val) in params {
        if *val == ParamValue::Null {
            clauses.push(format!("{field} IS NULL"));
        } else {
            clauses.push(format!("{field} = {PH}"));
            out_params.push(val.clone());
        }
    }
    (format!("WHERE {}", clauses.join(" AND ")), out_params)
}

/// DDL for the sequences table; safe to run repeatedly.
pub fn create_sequences_table() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {SEQUENCES_TABLE} (name TEXT PRIMARY KEY NOT NULL, next_value INTEGER NOT NULL)"
    )
}

/// Seed a sequence at its initial value unless it exists. Binds (name, initial_value).
pub fn sequence_init() -> String {
    format!("INSERT OR IGNORE INTO {SEQUENCES_TABLE} (name, next_value) VALUES ({PH}, {PH})")
}

/// Advance a sequence and return the new high-water mark. Binds (allocation_size, name).
/// The allocated value is the returned value minus the allocation size.
pub fn sequence_advance() -> String {
    format!(
        "UPDATE {SEQUENCES_TABLE} SET next_value = next_value + {PH} WHERE name = {PH} RETURNING next_value"
    )
}
