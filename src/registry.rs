use std::sync::Arc;

use data_model::{FunctionPatch, FunctionRecord, ValidationError};
use state_store::{FunctionStore, ListFilter, StoreError};
use tracing::debug;

use crate::{
    config::PaginationConfig,
    cursor::{self, CursorError},
};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid request body: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Function `{0}` not found")]
    NotFound(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),

    #[error("Internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => RegistryError::NotFound(name),
            StoreError::Validation(err) => RegistryError::Validation(err),
            StoreError::Internal(err) => RegistryError::Internal(err),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub per_page: Option<usize>,
    pub cursor: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionListing {
    pub functions: Vec<FunctionRecord>,
    /// Encoded cursor for the next page, empty on the last page.
    pub next_cursor: String,
}

/// Operation surface of the registry, independent of any transport.
#[derive(Clone)]
pub struct RegistryService {
    store: Arc<FunctionStore>,
    pagination: PaginationConfig,
}

impl RegistryService {
    pub fn new(store: Arc<FunctionStore>, pagination: PaginationConfig) -> Self {
        Self { store, pagination }
    }

    /// `patch` is `None` when the request carried no function object.
    pub async fn put_function(
        &self,
        name: &str,
        patch: Option<FunctionPatch>,
    ) -> Result<FunctionRecord, RegistryError> {
        let patch = patch.ok_or(ValidationError::MissingPayload)?;
        Ok(self.store.put(name, patch).await?)
    }

    pub fn get_function(&self, name: &str) -> Result<FunctionRecord, RegistryError> {
        debug!(name, "get function");
        Ok(self.store.get(name)?)
    }

    pub async fn delete_function(&self, name: &str) -> Result<(), RegistryError> {
        Ok(self.store.delete(name).await?)
    }

    pub fn list_functions(&self, request: ListRequest) -> Result<FunctionListing, RegistryError> {
        let per_page = self.pagination.page_size(request.per_page);
        let cursor = match request.cursor.as_deref() {
            None | Some("") => None,
            Some(token) => Some(cursor::decode(token)?),
        };
        let filter = ListFilter {
            image: request.image.filter(|image| !image.is_empty()),
        };
        debug!(per_page, ?cursor, ?filter, "list functions");

        let page = self.store.list(&filter, cursor.as_deref(), per_page)?;
        Ok(FunctionListing {
            functions: page.functions,
            next_cursor: page
                .next_cursor
                .as_deref()
                .map(cursor::encode)
                .unwrap_or_default(),
        })
    }
}
