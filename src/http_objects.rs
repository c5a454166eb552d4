use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use data_model::{FunctionPatch, FunctionRecord};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::{IntoParams, ToSchema};

use crate::registry::{FunctionListing, RegistryError};

#[derive(Debug, ToSchema, Serialize, Deserialize)]
pub struct RegistryAPIError {
    #[serde(skip)]
    status_code: StatusCode,
    message: String,
}

impl RegistryAPIError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn internal_error(e: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e:#}"))
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for RegistryAPIError {
    fn into_response(self) -> Response {
        error!("API Error: {} - {}", self.status_code, self.message);
        (self.status_code, self.message).into_response()
    }
}

impl From<RegistryError> for RegistryAPIError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Self::not_found(&err.to_string()),
            RegistryError::Internal(e) => Self::internal_error(e),
            RegistryError::InvalidPayload(_) |
            RegistryError::Validation(_) |
            RegistryError::InvalidCursor(_) => Self::bad_request(&err.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Page size, 0 or absent selects the server default.
    pub per_page: Option<usize>,
    /// `next_cursor` from the previous page.
    pub cursor: Option<String>,
    /// Only return functions using exactly this image.
    pub image: Option<String>,
}

/// A stored function definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Function {
    pub id: String,
    pub name: String,
    pub image: String,
    pub version: String,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    /// Bytes.
    pub memory: u64,
    /// Seconds.
    pub timeout: u32,
    /// Seconds.
    pub idle_timeout: u32,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
}

impl From<FunctionRecord> for Function {
    fn from(record: FunctionRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            image: record.image,
            version: record.version,
            format: record.format.to_string(),
            cpus: record.cpus.map(|c| c.to_string()),
            memory: record.memory,
            timeout: record.timeout,
            idle_timeout: record.idle_timeout,
            config: record.config,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// Fields to create a function with, or to overlay on a stored one.
///
/// Absent fields keep their stored value; a `config` entry with an empty
/// value removes that key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct FunctionUpdate {
    pub name: Option<String>,
    pub image: Option<String>,
    pub version: Option<String>,
    /// One of `default`, `http`, `http-stream`, `json`, `cloudevent`.
    pub format: Option<String>,
    /// Decimal cores (`0.5`) or millicores (`500m`).
    pub cpus: Option<String>,
    pub memory: Option<i64>,
    pub timeout: Option<i64>,
    pub idle_timeout: Option<i64>,
    pub config: Option<BTreeMap<String, String>>,
}

impl From<FunctionUpdate> for FunctionPatch {
    fn from(update: FunctionUpdate) -> Self {
        Self {
            name: update.name,
            image: update.image,
            version: update.version,
            format: update.format,
            cpus: update.cpus,
            memory: update.memory,
            timeout: update.timeout,
            idle_timeout: update.idle_timeout,
            config: update.config,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FunctionUpdateRequest {
    pub func: Option<FunctionUpdate>,
}

impl FunctionUpdateRequest {
    /// Parses a request body. A body that is not a JSON object is an invalid
    /// payload; an object without `func` yields `None`.
    pub fn from_body(body: &[u8]) -> Result<Option<FunctionPatch>, RegistryError> {
        let request: FunctionUpdateRequest = serde_json::from_slice(body)
            .map_err(|e| RegistryError::InvalidPayload(e.to_string()))?;
        Ok(request.func.map(FunctionPatch::from))
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FunctionResponse {
    pub func: Function,
}

impl From<FunctionRecord> for FunctionResponse {
    fn from(record: FunctionRecord) -> Self {
        Self {
            func: record.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FunctionsList {
    pub funcs: Vec<Function>,
    /// Empty when there are no further pages.
    pub next_cursor: String,
}

impl From<FunctionListing> for FunctionsList {
    fn from(listing: FunctionListing) -> Self {
        Self {
            funcs: listing.functions.into_iter().map(Function::from).collect(),
            next_cursor: listing.next_cursor,
        }
    }
}
