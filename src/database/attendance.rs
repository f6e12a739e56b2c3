use std::collections::HashMap;

use serde_json::Value;
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::database::records::insert_row;
use crate::database::sql;
use crate::database::tables;
use crate::database::whitelist::{ColumnName, TableName, WhitelistRegistry};
use crate::error::AppError;
use crate::models::{AttendanceBatch, AttendanceEntry};

const ATTENDANCE_COLUMNS: [&str; 8] = [
    "rehearsal_id",
    "rehearsal_date",
    "student_id",
    "student_name",
    "status",
    "memo",
    "marked_by",
    "save_version",
];

struct BatchTargets<'a> {
    attendance: TableName<'a>,
    columns: Vec<ColumnName<'a>>,
    students: TableName<'a>,
    student_columns: Vec<ColumnName<'a>>,
    rehearsals: TableName<'a>,
    rehearsal_columns: Vec<ColumnName<'a>>,
    rehearsal_key: ColumnName<'a>,
    version: ColumnName<'a>,
}

/// Appends one attendance submission for a single rehearsal under a new
/// save version. All rows and the version lookup commit together or not at all.
///
/// The transaction starts with `BEGIN IMMEDIATE`, so SQLite's write lock
/// serializes concurrent batches: a second batch for the same rehearsal only
/// reads the max version after the first one has committed.
#[instrument(skip(pool, registry, records), fields(records = records.len()))]
pub async fn add_attendance_records(
    pool: &Pool<Sqlite>,
    registry: &WhitelistRegistry,
    records: &[AttendanceEntry],
    marked_by: &str,
) -> Result<AttendanceBatch, AppError> {
    let Some(first) = records.first() else {
        return Err(AppError::Validation("No records provided".to_string()));
    };
    let rehearsal_id = first.rehearsal_id;

    if records.iter().any(|r| r.rehearsal_id != rehearsal_id) {
        return Err(AppError::Validation(
            "All records in a batch must share one rehearsal_id".to_string(),
        ));
    }

    let whitelist = registry.snapshot();
    let targets = BatchTargets {
        attendance: whitelist.table(tables::ATTENDANCE)?,
        columns: whitelist.columns(ATTENDANCE_COLUMNS)?,
        students: whitelist.table(tables::STUDENTS)?,
        student_columns: whitelist.columns([tables::STUDENT_ID, tables::STUDENT_NAME])?,
        rehearsals: whitelist.table(tables::REHEARSALS)?,
        rehearsal_columns: whitelist.columns([tables::REHEARSAL_ID, tables::REHEARSAL_DATE])?,
        rehearsal_key: whitelist.column(tables::REHEARSAL_ID)?,
        version: whitelist.column("save_version")?,
    };

    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    match write_batch(&mut tx, &targets, records, rehearsal_id, marked_by).await {
        Ok(version) => {
            tx.commit().await?;
            info!(rehearsal_id, version, saved = records.len(), "Saved attendance batch");
            Ok(AttendanceBatch {
                saved: records.len(),
                version,
            })
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback of attendance batch failed");
            }
            Err(e)
        }
    }
}

async fn write_batch(
    conn: &mut SqliteConnection,
    targets: &BatchTargets<'_>,
    records: &[AttendanceEntry],
    rehearsal_id: i64,
    marked_by: &str,
) -> Result<i64, AppError> {
    let student_names = lookup(conn, targets.students, &targets.student_columns).await?;
    let rehearsal_dates = lookup(conn, targets.rehearsals, &targets.rehearsal_columns).await?;

    let version = next_version(conn, targets, rehearsal_id).await?;

    for record in records {
        let row = [
            Value::from(record.rehearsal_id),
            Value::from(rehearsal_dates.get(&record.rehearsal_id).cloned()),
            Value::from(record.student_id),
            Value::from(student_names.get(&record.student_id).cloned()),
            Value::from(record.status.clone()),
            Value::from(record.memo.clone()),
            Value::from(marked_by),
            Value::from(version),
        ];
        insert_row(conn, targets.attendance, &targets.columns, row.iter()).await?;
    }

    Ok(version)
}

/// `id -> label` for a two-column projection, e.g. student id to name.
async fn lookup(
    conn: &mut SqliteConnection,
    table: TableName<'_>,
    columns: &[ColumnName<'_>],
) -> Result<HashMap<i64, String>, AppError> {
    let rows: Vec<(Option<i64>, Option<String>)> =
        sqlx::query_as(&sql::select_columns(table, columns))
            .fetch_all(&mut *conn)
            .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(id, label)| id.map(|id| (id, label.unwrap_or_default())))
        .collect())
}

/// One more than the highest stored version for the rehearsal, or 1.
/// `save_version` has TEXT affinity under the naming heuristic, so the max is
/// taken numerically.
async fn next_version(
    conn: &mut SqliteConnection,
    targets: &BatchTargets<'_>,
    rehearsal_id: i64,
) -> Result<i64, AppError> {
    let statement = sql::max_integer_where(targets.attendance, targets.version, targets.rehearsal_key);

    let current: Option<i64> = sqlx::query_scalar(&statement)
        .bind(rehearsal_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(current.unwrap_or(0) + 1)
}
