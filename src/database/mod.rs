pub mod attendance;
pub mod records;
pub mod seed;
pub mod sql;
pub mod users;
pub mod whitelist;

pub use attendance::*;
pub use records::*;
pub use seed::*;
pub use users::*;
pub use whitelist::*;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::error::AppError;

const MAX_CONNECTIONS: u32 = 5;

/// Opens the database file, creating it and its parent directory if needed.
pub async fn connect(path: &Path) -> Result<Pool<Sqlite>, AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    info!(path = %path.display(), "Connected to SQLite database");
    Ok(pool)
}

/// Table and column names the application addresses directly. They still go
/// through the whitelist like any caller-supplied name.
pub mod tables {
    pub const STUDENTS: &str = "students";
    pub const SECTIONS: &str = "sections";
    pub const SECTION_STUDENTS: &str = "section_students";
    pub const REHEARSALS: &str = "rehearsals";
    pub const ATTENDANCE: &str = "attendance";
    pub const USERS: &str = "users";

    pub const STUDENT_ID: &str = "student_id";
    pub const STUDENT_NAME: &str = "name";
    pub const SECTION_ID: &str = "section_id";
    pub const REHEARSAL_ID: &str = "rehearsal_id";
    pub const REHEARSAL_DATE: &str = "date";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
}
