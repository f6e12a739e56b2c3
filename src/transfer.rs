use std::io::{Cursor, Read, Write};
use std::path::Path;

use chrono::{Datelike, Local, Timelike};
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::database::seed::{SEED_EXTENSION, UTF8_BOM, overwrite_table};
use crate::database::whitelist::{ColumnName, TableName, WhitelistRegistry};
use crate::database::{CsvTable, SeedSet, get_all, list_tables, table_columns};
use crate::error::AppError;
use crate::models::Record;

pub const ARCHIVE_NAME: &str = "orchestra_data.zip";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: Vec<String>,
    pub skipped: Vec<String>,
}

/// Packs every whitelisted table into one zip archive, one `<table>.csv`
/// entry per table. Empty tables still get their header row.
#[instrument(skip_all)]
pub async fn export_archive(
    pool: &Pool<Sqlite>,
    registry: &WhitelistRegistry,
) -> Result<Vec<u8>, AppError> {
    let whitelist = registry.snapshot();
    let table_names: Vec<String> = list_tables(pool)
        .await?
        .into_iter()
        .filter(|name| whitelist.is_valid_table(name))
        .collect();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(archive_timestamp());

    for name in &table_names {
        let table = whitelist.table(name)?;
        let headers = table_columns(pool, table).await?;
        let rows = get_all(pool, registry, name).await?;

        let contents = encode_csv(&headers, &rows)?;
        writer.start_file(format!("{}.{}", name, SEED_EXTENSION), options)?;
        writer.write_all(&contents)?;

        info!(table = %name, rows = rows.len(), "Exported table");
    }

    let bytes = writer.finish()?.into_inner();
    info!(tables = table_names.len(), size = bytes.len(), "Export archive ready");
    Ok(bytes)
}

fn archive_timestamp() -> zip::DateTime {
    let now = Local::now();
    zip::DateTime::from_date_and_time(
        now.year().clamp(1980, 2107) as u16,
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    )
    .unwrap_or_default()
}

/// CSV text with a UTF-8 byte-order mark so spreadsheet tools pick the right
/// encoding. NULL becomes an empty cell.
pub fn encode_csv(headers: &[String], rows: &[Record]) -> Result<Vec<u8>, AppError> {
    let mut writer = csv::Writer::from_writer(UTF8_BOM.to_vec());
    writer.write_record(headers)?;

    for row in rows {
        writer.write_record(headers.iter().map(|h| cell_text(row.get(h))))?;
    }

    writer
        .into_inner()
        .map_err(|e| AppError::Transfer(format!("Could not finish CSV: {}", e)))
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Unpacks the CSV entries of an uploaded archive as `(table, contents)`.
/// Anything that is not a zip archive is rejected; non-CSV entries are ignored.
pub fn read_archive(bytes: &[u8]) -> Result<Vec<(String, CsvTable)>, AppError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| AppError::InvalidArchive(format!("Uploaded file is not a zip archive: {}", e)))?;

    let mut tables = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| AppError::InvalidArchive(format!("Unreadable archive entry: {}", e)))?;

        if entry.is_dir() {
            continue;
        }

        let path = Path::new(entry.name());
        if path.extension().and_then(|e| e.to_str()) != Some(SEED_EXTENSION) {
            continue;
        }
        let Some(table) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
            continue;
        };

        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| AppError::InvalidArchive(format!("Could not read {}: {}", table, e)))?;

        let data = CsvTable::parse(&table, &contents)
            .map_err(|e| AppError::InvalidArchive(format!("Could not parse {}: {}", table, e)))?;
        tables.push((table, data));
    }

    Ok(tables)
}

/// Overwrites every table named in the archive with its contents. The whole
/// archive is validated first and all tables are written in one transaction.
#[instrument(skip_all, fields(size = bytes.len()))]
pub async fn import_archive(
    pool: &Pool<Sqlite>,
    registry: &WhitelistRegistry,
    seeds: &SeedSet,
    bytes: &[u8],
) -> Result<ImportSummary, AppError> {
    let entries = read_archive(bytes)?;
    let whitelist = registry.snapshot();

    let mut summary = ImportSummary::default();
    let mut targets: Vec<(TableName<'_>, Vec<ColumnName<'_>>, &CsvTable)> = Vec::new();

    for (name, data) in &entries {
        let checked = whitelist.table(name).and_then(|table| {
            let columns = whitelist.columns(data.headers.iter().map(String::as_str))?;
            Ok((table, columns))
        });

        match checked {
            Ok((table, columns)) => {
                targets.push((table, columns, data));
                summary.imported.push(name.clone());
            }
            Err(e) => {
                warn!(table = %name, error = %e, "Skipping archive entry");
                summary.skipped.push(name.clone());
            }
        }
    }

    let mut tx = pool.begin().await?;
    for (table, columns, data) in &targets {
        let rows = overwrite_table(&mut tx, *table, columns, &data.rows).await?;
        info!(table = %table, rows, "Imported table");
    }
    tx.commit().await?;

    registry.refresh(seeds)?;
    Ok(summary)
}
