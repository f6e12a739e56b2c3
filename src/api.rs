use std::path::Path;

use rocket::{FromForm, Responder, State};
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::Header;
use rocket::serde::json::Json;
use rocket::tokio::io::AsyncReadExt;
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::database::{
    SeedSet, WhitelistRegistry, add_attendance_records, add_record, add_student_with_section,
    authenticate_user, delete_by_id, get_all, get_by_id, tables, update_record,
};
use crate::error::AppError;
use crate::models::{
    AddDataRequest, AddDataResponse, DeleteDataRequest, LoginRequest, LoginResponse,
    MessageResponse, Record, SaveAttendanceRequest, UpdateDataRequest, id_from_value,
};
use crate::transfer::{ARCHIVE_NAME, export_archive, import_archive};
use crate::validation::JsonValidateExt;

const MISSING_PAYLOAD: &str = "Missing required payload data";

const STUDENT_FIELDS: [&str; 4] = ["name", "contact", "join_date", "status"];
const SECTION_FIELDS: [&str; 1] = ["section_name"];
const REHEARSAL_FIELDS: [&str; 3] = ["date", "location", "description"];

#[get("/")]
pub fn index() -> &'static str {
    "Orchestra attendance server is running."
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    db: &State<Pool<Sqlite>>,
    registry: &State<WhitelistRegistry>,
) -> Result<Json<LoginResponse>, AppError> {
    let login = login.validate_custom()?;
    let username = login.username.unwrap_or_default();
    let password = login.password.unwrap_or_default();

    match authenticate_user(db, registry, &username, &password).await? {
        Some(user) => Ok(Json(LoginResponse {
            success: true,
            user,
        })),
        None => Err(AppError::Authentication(
            "Invalid username or password".to_string(),
        )),
    }
}

async fn list_table(
    db: &Pool<Sqlite>,
    registry: &WhitelistRegistry,
    table: &str,
) -> Result<Json<Vec<Record>>, AppError> {
    get_all(db, registry, table).await.map(Json).map_err(|e| {
        e.log_and_record(&format!("Listing {}", table));
        AppError::Internal(format!("Could not read {} data", table))
    })
}

#[get("/students")]
pub async fn api_get_students(
    db: &State<Pool<Sqlite>>,
    registry: &State<WhitelistRegistry>,
) -> Result<Json<Vec<Record>>, AppError> {
    list_table(db, registry, tables::STUDENTS).await
}

#[get("/sections")]
pub async fn api_get_sections(
    db: &State<Pool<Sqlite>>,
    registry: &State<WhitelistRegistry>,
) -> Result<Json<Vec<Record>>, AppError> {
    list_table(db, registry, tables::SECTIONS).await
}

#[get("/rehearsals")]
pub async fn api_get_rehearsals(
    db: &State<Pool<Sqlite>>,
    registry: &State<WhitelistRegistry>,
) -> Result<Json<Vec<Record>>, AppError> {
    list_table(db, registry, tables::REHEARSALS).await
}

#[get("/section_students")]
pub async fn api_get_section_students(
    db: &State<Pool<Sqlite>>,
    registry: &State<WhitelistRegistry>,
) -> Result<Json<Vec<Record>>, AppError> {
    list_table(db, registry, tables::SECTION_STUDENTS).await
}

#[get("/attendance")]
pub async fn api_get_attendance(
    db: &State<Pool<Sqlite>>,
    registry: &State<WhitelistRegistry>,
) -> Result<Json<Vec<Record>>, AppError> {
    list_table(db, registry, tables::ATTENDANCE).await
}

#[post("/attendance", data = "<payload>")]
pub async fn api_save_attendance(
    payload: Json<SaveAttendanceRequest>,
    db: &State<Pool<Sqlite>>,
    registry: &State<WhitelistRegistry>,
) -> Result<Json<MessageResponse>, AppError> {
    let payload = payload.into_inner();
    let marked_by = payload
        .marked_by
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| "Unknown".to_string());

    let batch = add_attendance_records(db, registry, &payload.records, &marked_by).await?;

    Ok(Json(MessageResponse::ok(format!(
        "Successfully saved {} records (version {}).",
        batch.saved, batch.version
    ))))
}

/// `students.csv` and `students` both address the `students` table.
fn table_from_filename(filename: &str) -> Option<&str> {
    Path::new(filename.trim())
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
}

fn required_text(value: Option<&str>) -> Result<&str, AppError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(MISSING_PAYLOAD.to_string()))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[post("/update_data", data = "<payload>")]
pub async fn api_update_data(
    payload: Json<UpdateDataRequest>,
    db: &State<Pool<Sqlite>>,
    registry: &State<WhitelistRegistry>,
) -> Result<Json<MessageResponse>, AppError> {
    let payload = payload.into_inner();
    let filename = required_text(payload.filename.as_deref())?;
    let pk_col = required_text(payload.primary_key_col.as_deref())?;
    let record = payload
        .record
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::Validation(MISSING_PAYLOAD.to_string()))?;
    let table = table_from_filename(filename)
        .ok_or_else(|| AppError::Validation(MISSING_PAYLOAD.to_string()))?;

    let pk_val = record.get(pk_col).cloned().unwrap_or(Value::Null);
    if is_blank(&pk_val) {
        return Err(AppError::Validation(format!(
            "Record has no value for primary key column {}",
            pk_col
        )));
    }

    if update_record(db, registry, table, pk_col, &pk_val, &record).await? {
        Ok(Json(MessageResponse::ok(format!(
            "Successfully updated record in {}",
            table
        ))))
    } else {
        Err(AppError::NotFound(
            "Record to update not found or data unchanged".to_string(),
        ))
    }
}

#[post("/delete_data", data = "<payload>")]
pub async fn api_delete_data(
    payload: Json<DeleteDataRequest>,
    db: &State<Pool<Sqlite>>,
    registry: &State<WhitelistRegistry>,
) -> Result<Json<MessageResponse>, AppError> {
    let payload = payload.into_inner();
    let filename = required_text(payload.filename.as_deref())?;
    let pk_col = required_text(payload.primary_key_col.as_deref())?;
    let pk_val = payload
        .primary_key_val
        .filter(|v| !is_blank(v))
        .ok_or_else(|| AppError::Validation(MISSING_PAYLOAD.to_string()))?;
    let table = table_from_filename(filename)
        .ok_or_else(|| AppError::Validation(MISSING_PAYLOAD.to_string()))?;

    if delete_by_id(db, registry, table, pk_col, &pk_val).await? {
        Ok(Json(MessageResponse::ok(format!(
            "Successfully deleted record from {}",
            table
        ))))
    } else {
        Err(AppError::NotFound("Record to delete not found".to_string()))
    }
}

/// Copies the allowed fields out of a submitted record; absent ones are NULL.
fn pick_fields(record: &Record, fields: &[&str]) -> Record {
    fields
        .iter()
        .map(|field| {
            (
                field.to_string(),
                record.get(*field).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}

#[post("/add_data", data = "<payload>")]
pub async fn api_add_data(
    payload: Json<AddDataRequest>,
    db: &State<Pool<Sqlite>>,
    registry: &State<WhitelistRegistry>,
) -> Result<Json<AddDataResponse>, AppError> {
    let payload = payload.into_inner();
    let filename = required_text(payload.filename.as_deref())?;
    let record = payload
        .record
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::Validation(MISSING_PAYLOAD.to_string()))?;
    let table = table_from_filename(filename)
        .ok_or_else(|| AppError::Validation(MISSING_PAYLOAD.to_string()))?;

    let (new_id, pk_col) = match table {
        tables::STUDENTS => {
            // 0 is the form's "no section" choice
            let section_id = match record.get(tables::SECTION_ID) {
                Some(value) => id_from_value(value)
                    .map_err(AppError::Validation)?
                    .filter(|id| *id != 0),
                None => None,
            };
            let fields = pick_fields(&record, &STUDENT_FIELDS);
            let new_id = add_student_with_section(db, registry, &fields, section_id).await?;
            (new_id, tables::STUDENT_ID.to_string())
        }
        tables::SECTIONS | tables::REHEARSALS => {
            let allowed: &[&str] = if table == tables::SECTIONS {
                &SECTION_FIELDS
            } else {
                &REHEARSAL_FIELDS
            };
            let fields = pick_fields(&record, allowed);
            let new_id = add_record(db, registry, table, &fields).await?;
            (new_id, format!("{}_id", &table[..table.len() - 1]))
        }
        _ => {
            return Err(AppError::Validation(
                "Invalid filename for add operation".to_string(),
            ));
        }
    };

    if new_id == 0 {
        return Err(AppError::Internal(format!(
            "No id generated for new row in {}",
            table
        )));
    }

    let new_record = get_by_id(db, registry, table, &pk_col, &Value::from(new_id)).await?;

    Ok(Json(AddDataResponse {
        success: true,
        message: format!("Successfully added record to {}", table),
        new_record,
    }))
}

#[derive(Responder)]
#[response(status = 200, content_type = "application/zip")]
pub struct ArchiveDownload {
    body: Vec<u8>,
    disposition: Header<'static>,
}

#[get("/export_csv")]
pub async fn api_export_csv(
    db: &State<Pool<Sqlite>>,
    registry: &State<WhitelistRegistry>,
) -> Result<ArchiveDownload, AppError> {
    let body = export_archive(db, registry).await?;

    Ok(ArchiveDownload {
        body,
        disposition: Header::new(
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", ARCHIVE_NAME),
        ),
    })
}

#[derive(FromForm)]
pub struct ImportUpload<'r> {
    file: Option<TempFile<'r>>,
}

#[post("/import_csv", data = "<upload>")]
pub async fn api_import_csv(
    upload: Form<ImportUpload<'_>>,
    db: &State<Pool<Sqlite>>,
    registry: &State<WhitelistRegistry>,
    seeds: &State<SeedSet>,
) -> Result<Json<MessageResponse>, AppError> {
    let Some(file) = upload.into_inner().file else {
        return Err(AppError::Validation(
            "No file part in the request".to_string(),
        ));
    };

    let name = file
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_default();
    if name.is_empty() {
        return Err(AppError::Validation(
            "No file selected for uploading".to_string(),
        ));
    }
    if !name.to_lowercase().ends_with(".zip") {
        return Err(AppError::Validation(
            "Invalid file type, please upload a .zip file".to_string(),
        ));
    }

    let mut bytes = Vec::new();
    let reader = file.open().await?;
    rocket::tokio::pin!(reader);
    reader.read_to_end(&mut bytes).await?;

    let summary = import_archive(db, registry, seeds, &bytes).await?;
    info!(
        upload = %name,
        imported = ?summary.imported,
        skipped = ?summary.skipped,
        "Import finished"
    );

    Ok(Json(MessageResponse::ok("Data imported successfully.")))
}
