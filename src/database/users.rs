use serde_json::Value;
use sqlx::{Pool, Sqlite};
use tracing::{Span, info, instrument};

use crate::auth::verify_password;
use crate::database::records::get_by_id;
use crate::database::tables;
use crate::database::whitelist::WhitelistRegistry;
use crate::error::AppError;
use crate::models::Record;

#[instrument(skip(pool, registry))]
pub async fn get_user_by_username(
    pool: &Pool<Sqlite>,
    registry: &WhitelistRegistry,
    username: &str,
) -> Result<Option<Record>, AppError> {
    get_by_id(
        pool,
        registry,
        tables::USERS,
        tables::USERNAME,
        &Value::from(username),
    )
    .await
}

/// Returns the user row without its password column when `password` matches
/// the stored hash.
#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    registry: &WhitelistRegistry,
    username: &str,
    password: &str,
) -> Result<Option<Record>, AppError> {
    Span::current().record("username", username);

    let Some(mut user) = get_user_by_username(pool, registry, username).await? else {
        info!("Login attempt for unknown user");
        return Ok(None);
    };

    let stored = user.shift_remove(tables::PASSWORD);
    let matches = match stored {
        Some(Value::String(hash)) => verify_password(password, &hash),
        _ => false,
    };

    if matches {
        info!("Authentication successful");
        Ok(Some(user))
    } else {
        info!("Authentication failed");
        Ok(None)
    }
}
