use std::sync::Arc;

use anyhow::Result;
use data_model::{
    test_objects::tests::{mock_patch, mock_patch_with_image},
    ValidationLimits,
};
use tempfile::TempDir;

use crate::FunctionStore;

pub struct TestStateStore {
    pub function_store: Arc<FunctionStore>,
    // The store's RocksDB directory is removed when this is dropped.
    _temp_dir: TempDir,
}

impl TestStateStore {
    pub async fn new() -> Result<TestStateStore> {
        Self::with_limits(ValidationLimits::default()).await
    }

    pub async fn with_limits(limits: ValidationLimits) -> Result<TestStateStore> {
        let temp_dir = tempfile::tempdir()?;
        let function_store = FunctionStore::new(temp_dir.path().join("state"), limits).await?;
        Ok(TestStateStore {
            function_store,
            _temp_dir: temp_dir,
        })
    }

    /// Seeds `myfunc` and `myfunc1` on the default test image and `myfunc2`
    /// on `fnproject/yo`.
    pub async fn with_listing_fixture(&self) -> Result<()> {
        self.function_store.put("myfunc", mock_patch()).await?;
        self.function_store.put("myfunc1", mock_patch()).await?;
        self.function_store
            .put("myfunc2", mock_patch_with_image("fnproject/yo"))
            .await?;
        Ok(())
    }
}
