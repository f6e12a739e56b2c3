use serde_json::Value;
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::database::sql::{self, bind_field, bind_json, row_to_record};
use crate::database::tables;
use crate::database::whitelist::{ColumnName, TableName, WhitelistRegistry};
use crate::error::AppError;
use crate::models::Record;

#[instrument(skip(pool, registry))]
pub async fn get_all(
    pool: &Pool<Sqlite>,
    registry: &WhitelistRegistry,
    table: &str,
) -> Result<Vec<Record>, AppError> {
    let table = registry.snapshot().table(table)?;

    let rows = sqlx::query(&sql::select_all(table)).fetch_all(pool).await?;
    rows.iter().map(row_to_record).collect()
}

#[instrument(skip(pool, registry))]
pub async fn get_by_id(
    pool: &Pool<Sqlite>,
    registry: &WhitelistRegistry,
    table: &str,
    pk_col: &str,
    pk_val: &Value,
) -> Result<Option<Record>, AppError> {
    let whitelist = registry.snapshot();
    let table = whitelist.table(table)?;
    let key = whitelist.column(pk_col)?;

    let statement = sql::select_where(table, key);
    let row = bind_json(sqlx::query(&statement), pk_val)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_record).transpose()
}

/// Inserts one row and returns its rowid, which is the primary key for tables
/// with an integer first column.
#[instrument(skip(pool, registry, fields))]
pub async fn add_record(
    pool: &Pool<Sqlite>,
    registry: &WhitelistRegistry,
    table: &str,
    fields: &Record,
) -> Result<i64, AppError> {
    let whitelist = registry.snapshot();
    let table = whitelist.table(table)?;
    let columns = whitelist.columns(fields.keys().map(String::as_str))?;

    let mut conn = pool.acquire().await?;
    let new_id = insert_row(&mut conn, table, &columns, fields.values()).await?;

    info!(table = %table, new_id, "Added record");
    Ok(new_id)
}

/// Updates every given field except the key column. Returns `false` when no
/// row matched or there was nothing to set.
#[instrument(skip(pool, registry, fields))]
pub async fn update_record(
    pool: &Pool<Sqlite>,
    registry: &WhitelistRegistry,
    table: &str,
    pk_col: &str,
    pk_val: &Value,
    fields: &Record,
) -> Result<bool, AppError> {
    let whitelist = registry.snapshot();
    let table = whitelist.table(table)?;
    let key = whitelist.column(pk_col)?;
    let set: Vec<(ColumnName<'_>, &Value)> = fields
        .iter()
        .filter(|(name, _)| name.as_str() != pk_col)
        .map(|(name, value)| Ok((whitelist.column(name)?, value)))
        .collect::<Result<_, AppError>>()?;

    if let Some(in_record) = fields.get(pk_col) {
        if in_record != pk_val {
            warn!(
                record_value = %in_record,
                argument_value = %pk_val,
                "Key value in record differs from key argument, using argument"
            );
        }
    }

    if set.is_empty() {
        return Ok(false);
    }

    let columns: Vec<ColumnName<'_>> = set.iter().map(|(column, _)| *column).collect();
    let statement = sql::update(table, &columns, key);

    let mut query = sqlx::query(&statement);
    for (_, value) in &set {
        query = bind_field(query, value);
    }
    query = bind_json(query, pk_val);

    let result = query.execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

#[instrument(skip(pool, registry))]
pub async fn delete_by_id(
    pool: &Pool<Sqlite>,
    registry: &WhitelistRegistry,
    table: &str,
    pk_col: &str,
    pk_val: &Value,
) -> Result<bool, AppError> {
    let whitelist = registry.snapshot();
    let table = whitelist.table(table)?;
    let key = whitelist.column(pk_col)?;

    let statement = sql::delete_where(table, key);
    let result = bind_json(sqlx::query(&statement), pk_val)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Inserts a student and, when `section_id` is given, its section mapping in
/// one transaction. Returns the new student id.
#[instrument(skip(pool, registry, student_fields))]
pub async fn add_student_with_section(
    pool: &Pool<Sqlite>,
    registry: &WhitelistRegistry,
    student_fields: &Record,
    section_id: Option<i64>,
) -> Result<i64, AppError> {
    let whitelist = registry.snapshot();
    let students = whitelist.table(tables::STUDENTS)?;
    let columns = whitelist.columns(student_fields.keys().map(String::as_str))?;
    let mapping = match section_id {
        Some(section_id) => Some((
            whitelist.table(tables::SECTION_STUDENTS)?,
            whitelist.columns([tables::STUDENT_ID, tables::SECTION_ID])?,
            section_id,
        )),
        None => None,
    };

    let mut tx = pool.begin().await?;

    let student_id = insert_row(&mut tx, students, &columns, student_fields.values()).await?;

    if let Some((section_students, mapping_columns, section_id)) = mapping {
        let values = [Value::from(student_id), Value::from(section_id)];
        insert_row(&mut tx, section_students, &mapping_columns, values.iter()).await?;
    }

    tx.commit().await?;

    info!(student_id, ?section_id, "Added student");
    Ok(student_id)
}

pub(crate) async fn insert_row<'v>(
    conn: &mut SqliteConnection,
    table: TableName<'_>,
    columns: &[ColumnName<'_>],
    values: impl Iterator<Item = &'v Value>,
) -> Result<i64, AppError> {
    let statement = sql::insert(table, columns);
    let mut query = sqlx::query(&statement);
    for value in values {
        query = bind_field(query, value);
    }

    let result = query.execute(&mut *conn).await?;
    Ok(result.last_insert_rowid())
}
