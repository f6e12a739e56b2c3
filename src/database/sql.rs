//! SQL text built from whitelisted identifiers. Values are never spliced into
//! the statements produced here; they are bound as parameters.

use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Database, Row, Sqlite, TypeInfo, ValueRef};

use crate::database::whitelist::{ColumnName, TableName};
use crate::error::AppError;
use crate::models::Record;

pub type SqliteQuery<'q> = Query<'q, Sqlite, <Sqlite as Database>::Arguments<'q>>;

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(columns: &[ColumnName<'_>]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn select_all(table: TableName<'_>) -> String {
    format!("SELECT * FROM {}", quote_ident(table.as_str()))
}

pub fn select_columns(table: TableName<'_>, columns: &[ColumnName<'_>]) -> String {
    format!(
        "SELECT {} FROM {}",
        column_list(columns),
        quote_ident(table.as_str())
    )
}

pub fn select_where(table: TableName<'_>, key: ColumnName<'_>) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = ?",
        quote_ident(table.as_str()),
        quote_ident(key.as_str())
    )
}

/// `SELECT MAX(CAST(value AS INTEGER)) ... WHERE key = ?`
pub fn max_integer_where(
    table: TableName<'_>,
    value: ColumnName<'_>,
    key: ColumnName<'_>,
) -> String {
    format!(
        "SELECT MAX(CAST({} AS INTEGER)) FROM {} WHERE {} = ?",
        quote_ident(value.as_str()),
        quote_ident(table.as_str()),
        quote_ident(key.as_str())
    )
}

pub fn insert(table: TableName<'_>, columns: &[ColumnName<'_>]) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table.as_str()));
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table.as_str()),
        column_list(columns),
        placeholders
    )
}

/// `UPDATE ... SET a = ?, b = ? WHERE key = ?`. Callers must pass at least one
/// column to set.
pub fn update(table: TableName<'_>, set: &[ColumnName<'_>], key: ColumnName<'_>) -> String {
    let assignments = set
        .iter()
        .map(|c| format!("{} = ?", quote_ident(c.as_str())))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_ident(table.as_str()),
        assignments,
        quote_ident(key.as_str())
    )
}

pub fn delete_where(table: TableName<'_>, key: ColumnName<'_>) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?",
        quote_ident(table.as_str()),
        quote_ident(key.as_str())
    )
}

pub fn delete_all(table: TableName<'_>) -> String {
    format!("DELETE FROM {}", quote_ident(table.as_str()))
}

pub fn bind_json<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Binds a value being written to a column. An empty string is stored as NULL,
/// the same way an empty CSV cell is, so rows survive export and import.
pub fn bind_field<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::String(s) if s.is_empty() => query.bind(None::<String>),
        other => bind_json(query, other),
    }
}

/// Decodes a row into a column-ordered record using each value's storage
/// class, so a TEXT column holding an integer still comes back as a number.
pub fn row_to_record(row: &SqliteRow) -> Result<Record, AppError> {
    let mut record = Record::new();

    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" => Value::from(row.try_get::<i64, _>(idx)?),
                "REAL" => serde_json::Number::from_f64(row.try_get::<f64, _>(idx)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BLOB" => Value::String(
                    String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(idx)?).into_owned(),
                ),
                _ => Value::String(row.try_get::<String, _>(idx)?),
            }
        };

        record.insert(column.name().to_string(), value);
    }

    Ok(record)
}
