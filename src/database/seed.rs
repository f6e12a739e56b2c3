use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{Connection, Pool, Sqlite, SqliteConnection};
use tracing::{debug, error, info, instrument, warn};

use crate::auth::hash_password;
use crate::database::sql::{self, quote_ident};
use crate::database::tables;
use crate::database::whitelist::{ColumnName, TableName, Whitelist, WhitelistRegistry};
use crate::env::AppConfig;
use crate::error::AppError;

pub const SEED_EXTENSION: &str = "csv";

pub(crate) const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles"));

pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// The directory of seed tables, one `<table>.csv` per table.
#[derive(Debug, Clone)]
pub struct SeedSet {
    dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SeedSource {
    pub table: String,
    pub path: PathBuf,
}

impl SeedSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Seed sources sorted by table name. Files whose stem is not a plain
    /// identifier are ignored.
    pub fn sources(&self) -> Result<Vec<SeedSource>, AppError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            AppError::Internal(format!(
                "Could not list seed directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut sources = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SEED_EXTENSION) {
                continue;
            }

            let Some(table) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            if !is_identifier(table) {
                warn!(path = %path.display(), "Skipping seed file with unusable table name");
                continue;
            }

            sources.push(SeedSource {
                table: table.to_string(),
                path: path.clone(),
            });
        }

        sources.sort_by(|a, b| a.table.cmp(&b.table));
        Ok(sources)
    }
}

impl SeedSource {
    pub fn read_headers(&self) -> Result<Vec<String>, AppError> {
        let bytes = fs::read(&self.path)?;
        let mut reader = csv_reader(&bytes);
        let headers = reader.headers()?.iter().map(String::from).collect();
        check_headers(&self.table, headers)
    }

    pub fn read_table(&self) -> Result<CsvTable, AppError> {
        let bytes = fs::read(&self.path)?;
        CsvTable::parse(&self.table, &bytes)
    }
}

/// A parsed tabular file. Empty cells are `None` so they load as NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl CsvTable {
    pub fn parse(table: &str, bytes: &[u8]) -> Result<Self, AppError> {
        let mut reader = csv_reader(bytes);
        let headers = reader.headers()?.iter().map(String::from).collect();
        let headers = check_headers(table, headers)?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row = (0..headers.len())
                .map(|i| match record.get(i) {
                    Some(cell) if !cell.is_empty() => Some(cell.to_string()),
                    _ => None,
                })
                .collect();
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }
}

fn csv_reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes)
}

fn check_headers(table: &str, headers: Vec<String>) -> Result<Vec<String>, AppError> {
    if headers.is_empty() {
        return Err(AppError::Validation(format!("{} has no header row", table)));
    }

    if let Some(bad) = headers.iter().find(|h| !is_identifier(h)) {
        return Err(AppError::Validation(format!(
            "{} has an unusable column name: {:?}",
            table, bad
        )));
    }

    Ok(headers)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
        }
    }
}

/// Naming heuristic for column affinity. Dates fall through to TEXT and are
/// kept as ISO-8601 strings.
pub fn infer_column_type(name: &str) -> ColumnType {
    let lowered = name.to_lowercase();
    if ["id", "number", "count"]
        .iter()
        .any(|keyword| lowered.contains(keyword))
    {
        ColumnType::Integer
    } else {
        ColumnType::Text
    }
}

/// `CREATE TABLE` for a seed header. The first column becomes an
/// auto-incrementing primary key when it is INTEGER and the table is not a
/// mapping table.
pub fn table_ddl(table: &str, headers: &[String], is_mapping: bool) -> String {
    let definitions = headers
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let column_type = infer_column_type(column);
            let mut definition = format!("{} {}", quote_ident(column), column_type.as_sql());
            if i == 0 && !is_mapping && column_type == ColumnType::Integer {
                definition.push_str(" PRIMARY KEY AUTOINCREMENT");
            }
            definition
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(table), definitions)
}

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub mapping_tables: Vec<String>,
    pub password_hash_cost: u32,
}

impl SeedOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            mapping_tables: config.mapping_tables.clone(),
            password_hash_cost: config.password_hash_cost,
        }
    }

    pub fn is_mapping_table(&self, table: &str) -> bool {
        self.mapping_tables.iter().any(|t| t == table)
    }
}

/// Drops and recreates one table per seed source. Returns how many tables
/// were created; failures are logged per source.
#[instrument(skip_all)]
pub async fn create_tables(
    pool: &Pool<Sqlite>,
    seeds: &SeedSet,
    registry: &WhitelistRegistry,
    options: &SeedOptions,
) -> Result<usize, AppError> {
    let sources = seeds.sources()?;
    if sources.is_empty() {
        warn!("No seed files found to create tables");
        return Ok(0);
    }

    let mut conn = pool.acquire().await?;
    let mut created = 0;

    for source in &sources {
        match create_table(&mut conn, source, options).await {
            Ok(()) => created += 1,
            Err(e) => error!(source = %source.path.display(), error = %e, "Error creating table"),
        }
    }

    registry.refresh(seeds)?;
    Ok(created)
}

async fn create_table(
    conn: &mut SqliteConnection,
    source: &SeedSource,
    options: &SeedOptions,
) -> Result<(), AppError> {
    let headers = source.read_headers()?;
    let ddl = table_ddl(
        &source.table,
        &headers,
        options.is_mapping_table(&source.table),
    );

    sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(&source.table)))
        .execute(&mut *conn)
        .await?;

    info!(table = %source.table, sql = %ddl, "Creating table");
    sqlx::query(&ddl).execute(&mut *conn).await?;

    Ok(())
}

/// Reloads every table from its seed source by truncate-then-append, hashing
/// credential columns on the way in. Returns how many tables were seeded.
#[instrument(skip_all)]
pub async fn seed_from_csv(
    pool: &Pool<Sqlite>,
    seeds: &SeedSet,
    registry: &WhitelistRegistry,
    options: &SeedOptions,
) -> Result<usize, AppError> {
    let sources = seeds.sources()?;
    if sources.is_empty() {
        warn!("No seed files found for seeding");
        return Ok(0);
    }

    let whitelist = Whitelist::from_seeds(seeds)?;
    let mut conn = pool.acquire().await?;
    let mut seeded = 0;

    for source in &sources {
        match seed_source(&mut conn, &whitelist, source, options).await {
            Ok(rows) => {
                info!(table = %source.table, rows, "Seeded table");
                seeded += 1;
            }
            Err(e) => error!(source = %source.path.display(), error = %e, "Error seeding table"),
        }
    }

    registry.refresh(seeds)?;
    Ok(seeded)
}

async fn seed_source(
    conn: &mut SqliteConnection,
    whitelist: &Whitelist,
    source: &SeedSource,
    options: &SeedOptions,
) -> Result<u64, AppError> {
    let mut data = source.read_table()?;

    if source.table == tables::USERS {
        hash_credentials(&mut data, options.password_hash_cost)?;
    }

    let table = whitelist.table(&source.table)?;
    let columns = whitelist.columns(data.headers.iter().map(String::as_str))?;

    let mut tx = conn.begin().await?;
    let rows = overwrite_table(&mut tx, table, &columns, &data.rows).await?;
    tx.commit().await?;

    Ok(rows)
}

fn hash_credentials(data: &mut CsvTable, cost: u32) -> Result<(), AppError> {
    let Some(idx) = data.headers.iter().position(|h| h == tables::PASSWORD) else {
        return Ok(());
    };

    info!("Hashing passwords for credentials table");
    for row in &mut data.rows {
        if let Some(plain) = row.get_mut(idx).and_then(Option::take) {
            row[idx] = Some(hash_password(&plain, cost)?);
        }
    }

    Ok(())
}

/// Deletes every row of `table`, appends `rows`, and resets the table's
/// auto-increment sequence. Runs on the caller's connection so the caller
/// owns the transaction boundary.
pub(crate) async fn overwrite_table(
    conn: &mut SqliteConnection,
    table: TableName<'_>,
    columns: &[ColumnName<'_>],
    rows: &[Vec<Option<String>>],
) -> Result<u64, AppError> {
    sqlx::query(&sql::delete_all(table))
        .execute(&mut *conn)
        .await?;

    let statement = sql::insert(table, columns);
    let mut inserted = 0;
    for row in rows {
        let mut query = sqlx::query(&statement);
        for cell in row.iter().take(columns.len()) {
            query = query.bind(cell.clone());
        }
        inserted += query.execute(&mut *conn).await?.rows_affected();
    }

    reset_sequence(conn, table).await?;
    Ok(inserted)
}

async fn reset_sequence(conn: &mut SqliteConnection, table: TableName<'_>) -> Result<(), AppError> {
    let has_sequence: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
    )
    .fetch_optional(&mut *conn)
    .await?;

    if has_sequence.is_none() {
        debug!(table = %table, "No sqlite_sequence table, skipping sequence reset");
        return Ok(());
    }

    let max_rowid: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT MAX(rowid) FROM {}",
        quote_ident(table.as_str())
    ))
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM sqlite_sequence WHERE name = ?")
        .bind(table.as_str())
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT INTO sqlite_sequence (name, seq) VALUES (?, ?)")
        .bind(table.as_str())
        .bind(max_rowid.unwrap_or(0))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Creates the schema and loads the seed data.
#[instrument(skip_all)]
pub async fn db_init(
    pool: &Pool<Sqlite>,
    seeds: &SeedSet,
    registry: &WhitelistRegistry,
    options: &SeedOptions,
) -> Result<(), AppError> {
    info!("Initializing database...");
    let created = create_tables(pool, seeds, registry, options).await?;
    let seeded = seed_from_csv(pool, seeds, registry, options).await?;
    info!(created, seeded, "Database initialized");
    Ok(())
}

/// User tables currently present in the database.
pub async fn list_tables(pool: &Pool<Sqlite>) -> Result<Vec<String>, AppError> {
    let names = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(names)
}

/// Column names of `table` in declaration order.
pub async fn table_columns(
    pool: &Pool<Sqlite>,
    table: TableName<'_>,
) -> Result<Vec<String>, AppError> {
    let names = sqlx::query_scalar("SELECT name FROM pragma_table_info(?) ORDER BY cid")
        .bind(table.as_str())
        .fetch_all(pool)
        .await?;
    Ok(names)
}
