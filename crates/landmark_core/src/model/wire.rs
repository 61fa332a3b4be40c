//! JSON wire codec for landmarks and queue entries.
//!
//! # Responsibility
//! - Decode remote/queue JSON into validated domain values in one step.
//! - Keep numeric coercion rules (`int | float | numeric string`) in one place.
//!
//! # Invariants
//! - Decoding never yields a landmark with invalid coordinates.
//! - Wire field names are `lat`/`lon`, never `latitude`/`longitude`.
//! - A field that is present but not coercible is an error, not a default.

use super::landmark::{
    normalize_title, Coordinates, Landmark, LandmarkId, LandmarkValidationError, LocalKey,
};
use super::now_epoch_ms;
use super::operation::{OperationKind, OperationStatus, QueuedOperation};
use serde::Serialize;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Schema violation found while decoding wire JSON.
#[derive(Debug)]
pub enum DecodeError {
    Json(serde_json::Error),
    NotAnObject(&'static str),
    MissingField(&'static str),
    InvalidField { field: &'static str, value: String },
    Validation(LandmarkValidationError),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "malformed json: {err}"),
            Self::NotAnObject(entity) => write!(f, "{entity} must be a json object"),
            Self::MissingField(field) => write!(f, "missing required field `{field}`"),
            Self::InvalidField { field, value } => {
                write!(f, "field `{field}` has invalid value {value}")
            }
            Self::Validation(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Json(err) => Some(err),
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<LandmarkValidationError> for DecodeError {
    fn from(value: LandmarkValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Coerces `int | float | numeric string` into an integer.
///
/// Floats are truncated toward zero. Non-finite or out-of-range values yield
/// `None`.
pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().and_then(truncate_f64)),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().and_then(truncate_f64))
        }
        _ => None,
    }
}

/// Coerces `int | float | numeric string` into a finite float.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Accepts JSON booleans, `0`/`1`, and their string spellings.
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn truncate_f64(value: f64) -> Option<i64> {
    if !value.is_finite() || value >= i64::MAX as f64 || value <= i64::MIN as f64 {
        return None;
    }
    Some(value.trunc() as i64)
}

/// Decodes one landmark object.
///
/// Missing `createdAt`/`updatedAt` default to now; missing `isSynced` defaults
/// to `false`; a missing `localKey` gets a fresh key.
pub fn decode_landmark(value: &Value) -> DecodeResult<Landmark> {
    let object = value
        .as_object()
        .ok_or(DecodeError::NotAnObject("landmark"))?;

    let id = optional_field(object, "id", coerce_i64)?;
    let title = match object.get("title") {
        Some(Value::String(text)) => normalize_title(text)?,
        Some(Value::Null) | None => return Err(DecodeError::MissingField("title")),
        Some(other) => return Err(invalid("title", other)),
    };
    let latitude = required_field(object, "lat", coerce_f64)?;
    let longitude = required_field(object, "lon", coerce_f64)?;
    let coordinates = Coordinates::new(latitude, longitude)?;

    let now = now_epoch_ms();
    let created_at = optional_field(object, "createdAt", coerce_i64)?.unwrap_or(now);
    let updated_at = optional_field(object, "updatedAt", coerce_i64)?
        .unwrap_or(now)
        .max(created_at);

    let local_key = match optional_string(object, "localKey")? {
        Some(text) => {
            Uuid::parse_str(&text).map_err(|_| DecodeError::InvalidField {
                field: "localKey",
                value: text.clone(),
            })?
        }
        None => Uuid::new_v4(),
    };

    Ok(Landmark {
        local_key,
        id,
        title,
        description: optional_string(object, "description")?,
        category: optional_string(object, "category")?,
        coordinates,
        image: optional_string(object, "image")?,
        image_path: optional_string(object, "imagePath")?,
        is_synced: optional_field(object, "isSynced", coerce_bool)?.unwrap_or(false),
        created_at,
        updated_at,
    })
}

/// Decodes a landmark returned by the remote service.
///
/// Remote records must carry an identity and are synced by definition.
pub fn decode_remote_landmark(value: &Value) -> DecodeResult<Landmark> {
    let mut landmark = decode_landmark(value)?;
    if landmark.id.is_none() {
        return Err(DecodeError::MissingField("id"));
    }
    landmark.is_synced = true;
    Ok(landmark)
}

/// Decodes a remote list response.
///
/// Accepts a bare array or an object wrapping the array under `data`.
pub fn decode_remote_landmarks(value: &Value) -> DecodeResult<Vec<Landmark>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(object) => match object.get("data") {
            Some(Value::Array(items)) => items,
            Some(other) => return Err(invalid("data", other)),
            None => return Err(DecodeError::MissingField("data")),
        },
        _ => return Err(DecodeError::NotAnObject("landmark list")),
    };
    items.iter().map(decode_remote_landmark).collect()
}

/// Parses and decodes a landmark payload string.
pub fn landmark_from_json_str(raw: &str) -> DecodeResult<Landmark> {
    let value: Value = serde_json::from_str(raw)?;
    decode_landmark(&value)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LandmarkWireRef<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<LandmarkId>,
    local_key: LocalKey,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
    lat: f64,
    lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_path: Option<&'a str>,
    is_synced: bool,
    created_at: i64,
    updated_at: i64,
}

impl<'a> From<&'a Landmark> for LandmarkWireRef<'a> {
    fn from(landmark: &'a Landmark) -> Self {
        Self {
            id: landmark.id,
            local_key: landmark.local_key,
            title: landmark.title.as_str(),
            description: landmark.description.as_deref(),
            category: landmark.category.as_deref(),
            lat: landmark.latitude(),
            lon: landmark.longitude(),
            image: landmark.image.as_deref(),
            image_path: landmark.image_path.as_deref(),
            is_synced: landmark.is_synced,
            created_at: landmark.created_at,
            updated_at: landmark.updated_at,
        }
    }
}

/// Encodes a landmark into its wire object.
pub fn encode_landmark(landmark: &Landmark) -> serde_json::Result<Value> {
    serde_json::to_value(LandmarkWireRef::from(landmark))
}

/// Encodes a landmark snapshot for a queue entry payload.
pub fn landmark_payload(landmark: &Landmark) -> serde_json::Result<String> {
    serde_json::to_string(&LandmarkWireRef::from(landmark))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OperationWireRef<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    operation_type: OperationKind,
    local_key: LocalKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    landmark_id: Option<LandmarkId>,
    payload: &'a str,
    status: OperationStatus,
    created_at: i64,
    retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_retry_at: Option<i64>,
}

/// Encodes a queue entry into its wire object.
pub fn encode_operation(operation: &QueuedOperation) -> serde_json::Result<Value> {
    serde_json::to_value(OperationWireRef {
        id: operation.id,
        operation_type: operation.kind,
        local_key: operation.local_key,
        landmark_id: operation.landmark_id,
        payload: operation.payload.as_str(),
        status: operation.status,
        created_at: operation.created_at,
        retry_count: operation.retry_count,
        error_message: operation.error_message.as_deref(),
        last_retry_at: operation.last_retry_at,
    })
}

/// Decodes one queue entry object.
///
/// `payload` may be a JSON string or an inline object. When `localKey` is
/// absent it is recovered from the payload snapshot.
pub fn decode_operation(value: &Value) -> DecodeResult<QueuedOperation> {
    let object = value
        .as_object()
        .ok_or(DecodeError::NotAnObject("queue entry"))?;

    let kind = match object.get("operationType") {
        Some(value @ Value::String(text)) => {
            OperationKind::parse(text).ok_or_else(|| invalid("operationType", value))?
        }
        Some(Value::Null) | None => return Err(DecodeError::MissingField("operationType")),
        Some(other) => return Err(invalid("operationType", other)),
    };
    let status = match object.get("status") {
        Some(value @ Value::String(text)) => {
            OperationStatus::parse(text).ok_or_else(|| invalid("status", value))?
        }
        Some(Value::Null) | None => OperationStatus::Pending,
        Some(other) => return Err(invalid("status", other)),
    };
    let payload = match object.get("payload") {
        Some(Value::String(text)) => text.clone(),
        Some(inline @ Value::Object(_)) => inline.to_string(),
        Some(Value::Null) | None => return Err(DecodeError::MissingField("payload")),
        Some(other) => return Err(invalid("payload", other)),
    };

    let local_key = match optional_string(object, "localKey")? {
        Some(text) => Uuid::parse_str(&text).map_err(|_| DecodeError::InvalidField {
            field: "localKey",
            value: text.clone(),
        })?,
        None => landmark_from_json_str(&payload)?.local_key,
    };

    let retry_count = optional_field(object, "retryCount", coerce_i64)?.unwrap_or(0);
    let retry_count = u32::try_from(retry_count).map_err(|_| DecodeError::InvalidField {
        field: "retryCount",
        value: retry_count.to_string(),
    })?;

    Ok(QueuedOperation {
        id: optional_field(object, "id", coerce_i64)?,
        kind,
        local_key,
        landmark_id: optional_field(object, "landmarkId", coerce_i64)?,
        payload,
        status,
        created_at: optional_field(object, "createdAt", coerce_i64)?.unwrap_or_else(now_epoch_ms),
        retry_count,
        error_message: optional_string(object, "errorMessage")?,
        last_retry_at: optional_field(object, "lastRetryAt", coerce_i64)?,
    })
}

fn required_field<T>(
    object: &Map<String, Value>,
    field: &'static str,
    coerce: fn(&Value) -> Option<T>,
) -> DecodeResult<T> {
    optional_field(object, field, coerce)?.ok_or(DecodeError::MissingField(field))
}

fn optional_field<T>(
    object: &Map<String, Value>,
    field: &'static str,
    coerce: fn(&Value) -> Option<T>,
) -> DecodeResult<Option<T>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => coerce(value)
            .map(Some)
            .ok_or_else(|| invalid(field, value)),
    }
}

fn optional_string(
    object: &Map<String, Value>,
    field: &'static str,
) -> DecodeResult<Option<String>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Some(other) => Err(invalid(field, other)),
    }
}

fn invalid(field: &'static str, value: &Value) -> DecodeError {
    DecodeError::InvalidField {
        field,
        value: value.to_string(),
    }
}
