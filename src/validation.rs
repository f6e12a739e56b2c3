use crate::error::AppError;
use rocket::Request;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> Result<T, AppError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    #[instrument(skip_all)]
    fn validate_custom(self) -> Result<T, AppError> {
        let inner = self.into_inner();
        match inner.validate() {
            Ok(()) => Ok(inner),
            Err(errors) => {
                let field_errors = errors.field_errors();
                let mut fields: Vec<&str> = field_errors.keys().map(|f| f.as_ref()).collect();
                fields.sort_unstable();
                Err(AppError::Validation(format!(
                    "Missing or invalid fields: {}",
                    fields.join(", ")
                )))
            }
        }
    }
}

fn status_body(status: Status) -> Custom<Json<ErrorBody>> {
    let message = match status.code {
        400 => "Bad request",
        404 => "Resource not found",
        415 => "Unsupported content type",
        422 => "Missing required payload data",
        500 => "Internal server error",
        _ => "An error occurred",
    };

    Custom(status, Json(ErrorBody::new(message)))
}

#[catch(400)]
pub fn bad_request_api(req: &Request) -> Custom<Json<ErrorBody>> {
    warn!(uri = %req.uri(), "Malformed API request");
    status_body(Status::BadRequest)
}

#[catch(404)]
pub fn not_found_api(_req: &Request) -> Custom<Json<ErrorBody>> {
    status_body(Status::NotFound)
}

#[catch(415)]
pub fn unsupported_media_api(_req: &Request) -> Custom<Json<ErrorBody>> {
    status_body(Status::UnsupportedMediaType)
}

// Rocket answers 422 when a JSON body does not deserialize; the API reports
// that as a plain client error.
#[catch(422)]
pub fn unprocessable_api(req: &Request) -> Custom<Json<ErrorBody>> {
    warn!(uri = %req.uri(), "Unprocessable API payload");
    let Custom(_, body) = status_body(Status::UnprocessableEntity);
    Custom(Status::BadRequest, body)
}

#[catch(500)]
pub fn internal_error_api(_req: &Request) -> Custom<Json<ErrorBody>> {
    status_body(Status::InternalServerError)
}
