use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

/// One table row as a column-ordered mapping.
pub type Record = Map<String, Value>;

/// IDs arrive from the browser either as JSON numbers or as strings taken
/// from form inputs.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

fn parse_raw_id(raw: RawId) -> Result<Option<i64>, String> {
    match raw {
        RawId::Int(id) => Ok(Some(id)),
        RawId::Text(text) if text.trim().is_empty() => Ok(None),
        RawId::Text(text) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("invalid id: {:?}", text)),
    }
}

pub fn deserialize_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = RawId::deserialize(deserializer)?;
    parse_raw_id(raw)
        .map_err(serde::de::Error::custom)?
        .ok_or_else(|| serde::de::Error::custom("id must not be empty"))
}

pub fn id_from_value(value: &Value) -> Result<Option<i64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| format!("invalid id: {}", n)),
        Value::String(text) => parse_raw_id(RawId::Text(text.clone())),
        other => Err(format!("invalid id: {}", other)),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttendanceEntry {
    #[serde(deserialize_with = "deserialize_id")]
    pub rehearsal_id: i64,
    #[serde(deserialize_with = "deserialize_id")]
    pub student_id: i64,
    pub status: String,
    #[serde(default)]
    pub memo: Option<String>,
}

/// Result of one attendance submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendanceBatch {
    pub saved: usize,
    pub version: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(required, length(min = 1))]
    pub username: Option<String>,
    #[validate(required, length(min = 1))]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Record,
}

#[derive(Debug, Deserialize)]
pub struct SaveAttendanceRequest {
    #[serde(default)]
    pub records: Vec<AttendanceEntry>,
    pub marked_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDataRequest {
    pub filename: Option<String>,
    pub primary_key_col: Option<String>,
    pub record: Option<Record>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteDataRequest {
    pub filename: Option<String>,
    pub primary_key_col: Option<String>,
    pub primary_key_val: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct AddDataRequest {
    pub filename: Option<String>,
    pub record: Option<Record>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddDataResponse {
    pub success: bool,
    pub message: String,
    pub new_record: Option<Record>,
}
