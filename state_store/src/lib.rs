use std::{
    fs,
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use anyhow::anyhow;
use data_model::{merge, FunctionPatch, FunctionRecord, ValidationError, ValidationLimits};
use in_memory_state::InMemoryState;
pub use in_memory_state::{FunctionPage, ListFilter};
use key_locks::KeyLocks;
use metrics::{registry_stats, Timer};
use opentelemetry::KeyValue;
use registry_utils::{get_epoch_time_in_ms, monotonic_since};
use rocksdb::{ColumnFamilyDescriptor, Options, TransactionDB, TransactionDBOptions};
use state_machine::RegistryColumns;
use strum::IntoEnumIterator;
use tracing::{debug, info};

pub mod in_memory_state;
pub mod key_locks;
pub mod serializer;
pub mod state_machine;
pub mod test_state_store;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("function `{0}` not found")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

/// Durable, ordered collection of function records keyed by name.
///
/// Writes go to RocksDB first and then to the in-memory state; reads are
/// served from a snapshot of the in-memory state only.
pub struct FunctionStore {
    pub db: Arc<TransactionDB>,
    in_memory_state: Arc<RwLock<InMemoryState>>,
    key_locks: KeyLocks,
    limits: ValidationLimits,
    pub metrics: Arc<registry_stats::Metrics>,
}

impl FunctionStore {
    pub async fn new(path: PathBuf, limits: ValidationLimits) -> anyhow::Result<Arc<Self>> {
        fs::create_dir_all(path.clone())
            .map_err(|e| anyhow!("failed to create state store dir: {}", e))?;

        let column_families = RegistryColumns::iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.to_string(), Options::default()));
        let mut db_opts = Options::default();
        db_opts.create_missing_column_families(true);
        db_opts.create_if_missing(true);
        let db: TransactionDB = TransactionDB::open_cf_descriptors(
            &db_opts,
            &TransactionDBOptions::default(),
            path,
            column_families,
        )
        .map_err(|e| anyhow!("failed to open db: {}", e))?;

        let records = state_machine::load_functions(&db)?;
        let in_memory_state = InMemoryState::new(records);
        info!(
            "initialized function store with {} functions",
            in_memory_state.len()
        );

        Ok(Arc::new(Self {
            db: Arc::new(db),
            in_memory_state: Arc::new(RwLock::new(in_memory_state)),
            key_locks: KeyLocks::new(),
            limits,
            metrics: Arc::new(registry_stats::Metrics::new()),
        }))
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    // A panic while holding the lock cannot leave the state half-updated:
    // every mutation is a single map operation on a persistent structure.
    fn read_state(&self) -> RwLockReadGuard<'_, InMemoryState> {
        self.in_memory_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, InMemoryState> {
        self.in_memory_state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Consistent point-in-time view of every stored function.
    pub fn snapshot(&self) -> InMemoryState {
        self.read_state().clone()
    }

    pub fn get(&self, name: &str) -> Result<FunctionRecord, StoreError> {
        let _timer =
            Timer::start_with_labels(&self.metrics.reads, &[KeyValue::new("op", "get")]);
        self.read_state()
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    pub fn list(
        &self,
        filter: &ListFilter,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<FunctionPage, StoreError> {
        let _timer =
            Timer::start_with_labels(&self.metrics.reads, &[KeyValue::new("op", "list")]);
        Ok(self.snapshot().list(filter, cursor, limit))
    }

    /// Merges `patch` over the record stored under `key`, or creates a new
    /// record when there is none.
    ///
    /// On creation the body name, when present, names the record and `key` is
    /// only the fallback. An existing record cannot be renamed, and a new
    /// record cannot take a name already in use. The candidate is validated
    /// as a whole; on any failure nothing is written.
    #[tracing::instrument(skip(self, patch))]
    pub async fn put(&self, key: &str, patch: FunctionPatch) -> Result<FunctionRecord, StoreError> {
        let body_name = patch.name.clone();
        let mut lock_keys = vec![key];
        lock_keys.extend(body_name.as_deref());
        let _guards = self.key_locks.lock_all(&lock_keys).await;
        let _timer =
            Timer::start_with_labels(&self.metrics.writes, &[KeyValue::new("op", "put")]);

        let existing = self.read_state().get(key);
        let now = get_epoch_time_in_ms();
        let built = match &existing {
            Some(existing) => FunctionRecord::from_candidate(
                merge(existing, patch),
                existing.id.clone(),
                existing.created_at,
                monotonic_since(existing.updated_at, now),
                &self.limits,
            )
            .and_then(|record| {
                if record.name != key {
                    return Err(ValidationError::NameMismatch {
                        name: record.name,
                        key: key.to_string(),
                    });
                }
                Ok(record)
            }),
            None => FunctionRecord::from_candidate(
                patch.into_new_candidate(key),
                FunctionRecord::generate_id(),
                now,
                now,
                &self.limits,
            )
            .and_then(|record| {
                if record.name != key && self.read_state().get(&record.name).is_some() {
                    return Err(ValidationError::NameMismatch {
                        name: record.name,
                        key: key.to_string(),
                    });
                }
                Ok(record)
            }),
        };
        let record = built.inspect_err(|err| {
            self.metrics.validation_failures.add(1, &[]);
            debug!(%err, "rejected function definition");
        })?;

        state_machine::upsert_function(&self.db, &record)?;
        self.write_state().upsert(record.clone());

        if existing.is_some() {
            self.metrics.functions_updated.add(1, &[]);
            info!(id = %record.id, image = %record.image, "updated function");
        } else {
            self.metrics.functions_created.add(1, &[]);
            info!(name = %record.name, id = %record.id, image = %record.image, "created function");
        }
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let _guard = self.key_locks.lock(name).await;
        let _timer =
            Timer::start_with_labels(&self.metrics.writes, &[KeyValue::new("op", "delete")]);

        if self.read_state().get(name).is_none() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        state_machine::delete_function(&self.db, name)?;
        self.write_state().remove(name);

        self.metrics.functions_deleted.add(1, &[]);
        info!("deleted function");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use data_model::{
        test_objects::tests::{mock_patch, mock_patch_with_image, TEST_IMAGE, TEST_VERSION},
        FunctionFormat,
        MilliCpus,
        DEFAULT_MEMORY_BYTES,
    };

    use super::*;
    use crate::test_state_store::TestStateStore;

    #[tokio::test]
    async fn test_create_applies_defaults() -> anyhow::Result<()> {
        let test_store = TestStateStore::new().await?;
        let store = &test_store.function_store;

        let record = store.put("myfunc", mock_patch()).await?;
        assert_eq!(record.name, "myfunc");
        assert_eq!(record.image, TEST_IMAGE);
        assert_eq!(record.version, TEST_VERSION);
        assert_eq!(record.format, FunctionFormat::Default);
        assert_eq!(record.memory, DEFAULT_MEMORY_BYTES);
        assert_eq!(record.timeout, 30);
        assert_eq!(record.idle_timeout, 30);
        assert_eq!(record.cpus, None);
        assert!(!record.id.is_empty());
        assert_eq!(record.created_at, record.updated_at);

        assert_eq!(store.get("myfunc")?, record);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_requires_image_and_version() -> anyhow::Result<()> {
        let test_store = TestStateStore::new().await?;
        let store = &test_store.function_store;

        let err = store
            .put(
                "myfunc",
                FunctionPatch {
                    version: Some(TEST_VERSION.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::MissingImage)
        ));

        let err = store
            .put(
                "myfunc",
                FunctionPatch {
                    image: Some(TEST_IMAGE.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::MissingVersion)
        ));
        assert!(matches!(store.get("myfunc"), Err(StoreError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_merges_and_keeps_identity() -> anyhow::Result<()> {
        let test_store = TestStateStore::new().await?;
        let store = &test_store.function_store;

        let created = store
            .put(
                "myfunc",
                FunctionPatch {
                    cpus: Some("100m".to_string()),
                    ..mock_patch()
                },
            )
            .await?;
        let updated = store
            .put(
                "myfunc",
                FunctionPatch {
                    image: Some("fnproject/test".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.image, "fnproject/test");
        assert_eq!(updated.version, created.version);
        assert_eq!(updated.cpus, "100m".parse::<MilliCpus>().ok());
        assert_eq!(store.snapshot().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_put_is_stable() -> anyhow::Result<()> {
        let test_store = TestStateStore::new().await?;
        let store = &test_store.function_store;

        let first = store.put("myfunc", mock_patch()).await?;
        let second = store.put("myfunc", mock_patch()).await?;
        assert_eq!(
            second,
            FunctionRecord {
                updated_at: second.updated_at,
                ..first.clone()
            }
        );
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.snapshot().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_update_has_no_effect() -> anyhow::Result<()> {
        let test_store = TestStateStore::new().await?;
        let store = &test_store.function_store;

        let created = store.put("myfunc", mock_patch()).await?;
        let err = store
            .put(
                "myfunc",
                FunctionPatch {
                    image: Some("fnproject/other".to_string()),
                    cpus: Some("-100".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::InvalidCpus(_))
        ));
        assert_eq!(store.get("myfunc")?, created);
        Ok(())
    }

    #[tokio::test]
    async fn test_memory_ceiling() -> anyhow::Result<()> {
        let test_store = TestStateStore::new().await?;
        let store = &test_store.function_store;
        let max = store.limits().max_memory;

        let err = store
            .put(
                "a",
                FunctionPatch {
                    memory: Some(max as i64 + 1),
                    ..mock_patch()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::InvalidMemory { .. })
        ));
        assert!(matches!(store.get("a"), Err(StoreError::NotFound(_))));

        let record = store
            .put(
                "a",
                FunctionPatch {
                    memory: Some(max as i64),
                    ..mock_patch()
                },
            )
            .await?;
        assert_eq!(record.memory, max);
        Ok(())
    }

    #[tokio::test]
    async fn test_create_uses_body_name() -> anyhow::Result<()> {
        let test_store = TestStateStore::new().await?;
        let store = &test_store.function_store;

        let created = store
            .put(
                "a",
                FunctionPatch {
                    name: Some("myfunc".to_string()),
                    ..mock_patch()
                },
            )
            .await?;
        assert_eq!(created.name, "myfunc");
        assert_eq!(store.get("myfunc")?, created);
        assert!(matches!(store.get("a"), Err(StoreError::NotFound(_))));

        let updated = store
            .put(
                "myfunc",
                FunctionPatch {
                    image: Some("fnproject/test".to_string()),
                    ..Default::default()
                },
            )
            .await?;
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.image, "fnproject/test");
        assert_eq!(store.snapshot().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_existing_function_cannot_be_renamed() -> anyhow::Result<()> {
        let test_store = TestStateStore::new().await?;
        let store = &test_store.function_store;

        let created = store.put("myfunc", mock_patch()).await?;
        let err = store
            .put(
                "myfunc",
                FunctionPatch {
                    name: Some("other".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::NameMismatch { .. })
        ));
        assert_eq!(store.get("myfunc")?, created);
        assert!(matches!(store.get("other"), Err(StoreError::NotFound(_))));

        // Creating through another key must not overwrite a taken name.
        let err = store
            .put(
                "a",
                FunctionPatch {
                    name: Some("myfunc".to_string()),
                    image: Some("fnproject/other".to_string()),
                    ..mock_patch()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::NameMismatch { .. })
        ));
        assert_eq!(store.get("myfunc")?, created);

        let err = store
            .put(
                "a",
                FunctionPatch {
                    name: Some("bad name".to_string()),
                    ..mock_patch()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Validation(ValidationError::InvalidName(_))
        ));
        assert_eq!(store.snapshot().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_updates_leave_record_unchanged() -> anyhow::Result<()> {
        let test_store = TestStateStore::new().await?;
        let store = &test_store.function_store;
        let created = store.put("myfunc", mock_patch()).await?;

        let cases: [(&str, FunctionPatch, fn(&ValidationError) -> bool); 6] = [
            (
                "name",
                FunctionPatch {
                    name: Some("&%$".to_string()),
                    ..Default::default()
                },
                |err| matches!(err, ValidationError::InvalidName(_)),
            ),
            (
                "format",
                FunctionPatch {
                    format: Some("wazzup".to_string()),
                    ..Default::default()
                },
                |err| matches!(err, ValidationError::InvalidFormat(_)),
            ),
            (
                "cpus",
                FunctionPatch {
                    cpus: Some("-100".to_string()),
                    ..Default::default()
                },
                |err| matches!(err, ValidationError::InvalidCpus(_)),
            ),
            (
                "timeout",
                FunctionPatch {
                    timeout: Some(3601),
                    ..Default::default()
                },
                |err| matches!(err, ValidationError::InvalidTimeout(3601)),
            ),
            (
                "idle_timeout",
                FunctionPatch {
                    idle_timeout: Some(3601),
                    ..Default::default()
                },
                |err| matches!(err, ValidationError::InvalidIdleTimeout(3601)),
            ),
            (
                "memory",
                FunctionPatch {
                    memory: Some(100_000_000_000_000),
                    ..Default::default()
                },
                |err| matches!(err, ValidationError::InvalidMemory { .. }),
            ),
        ];

        for (field, patch, is_expected) in cases {
            match store.put("myfunc", patch).await {
                Err(StoreError::Validation(err)) => {
                    assert!(is_expected(&err), "{field}: unexpected error {err:?}")
                }
                other => panic!("{field}: expected a validation error, got {other:?}"),
            }
            assert_eq!(store.get("myfunc")?, created, "{field} changed the record");
        }
        assert_eq!(store.snapshot().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete() -> anyhow::Result<()> {
        let test_store = TestStateStore::new().await?;
        let store = &test_store.function_store;

        assert!(matches!(
            store.delete("myfunc").await,
            Err(StoreError::NotFound(_))
        ));
        let created = store.put("myfunc", mock_patch()).await?;
        store.delete("myfunc").await?;
        assert!(matches!(store.get("myfunc"), Err(StoreError::NotFound(_))));

        // Re-creating after delete is a new function.
        let recreated = store.put("myfunc", mock_patch()).await?;
        assert_ne!(recreated.id, created.id);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_pagination_and_filter() -> anyhow::Result<()> {
        let test_store = TestStateStore::new().await?;
        let store = &test_store.function_store;

        store.put("myfunc", mock_patch()).await?;
        store.put("myfunc1", mock_patch()).await?;
        store
            .put("myfunc2", mock_patch_with_image("fnproject/yo"))
            .await?;

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = store.list(&ListFilter::default(), cursor.as_deref(), 1)?;
            seen.extend(page.functions.into_iter().map(|f| f.name));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec!["myfunc", "myfunc1", "myfunc2"]);

        let page = store.list(
            &ListFilter {
                image: Some("fnproject/yo".to_string()),
            },
            None,
            30,
        )?;
        assert_eq!(page.functions.len(), 1);
        assert_eq!(page.functions[0].name, "myfunc2");
        assert_eq!(page.next_cursor, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_functions_survive_reopen() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("state");

        let created = {
            let store = FunctionStore::new(path.clone(), ValidationLimits::default()).await?;
            store
                .put(
                    "myfunc",
                    FunctionPatch {
                        config: Some(BTreeMap::from([("A".to_string(), "1".to_string())])),
                        ..mock_patch()
                    },
                )
                .await?;
            store.put("other", mock_patch()).await?;
            store.delete("other").await?;
            store.get("myfunc")?
        };

        let store = FunctionStore::new(path, ValidationLimits::default()).await?;
        assert_eq!(store.get("myfunc")?, created);
        assert!(matches!(store.get("other"), Err(StoreError::NotFound(_))));
        assert_eq!(store.snapshot().len(), 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_lose_nothing() -> anyhow::Result<()> {
        let test_store = TestStateStore::new().await?;
        let store = test_store.function_store.clone();
        store.put("myfunc", mock_patch()).await?;

        let handles = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .put(
                            "myfunc",
                            FunctionPatch {
                                config: Some(BTreeMap::from([(
                                    format!("KEY_{i}"),
                                    i.to_string(),
                                )])),
                                ..Default::default()
                            },
                        )
                        .await
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.await??;
        }

        let record = store.get("myfunc")?;
        assert_eq!(record.config.len(), 32);
        assert_eq!(record.config.get("KEY_7").map(String::as_str), Some("7"));
        Ok(())
    }
}
