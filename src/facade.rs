//! The storage facade.
//!
//! [`Storage`] is the single surface the rest of the application calls.
//! It computes the backend decision once (single-flight, memoized for the
//! process lifetime), dispatches to the chosen driver pair, and converts
//! every driver-level failure into the documented empty value with a
//! logged diagnostic; callers never receive an error from this type.
//!
//! When a remote-mode call fails with a connectivity-class error, the
//! decision is downgraded to local mode for the remainder of the process
//! and the failed call is retried once against the local drivers.

use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

use crate::bootstrap;
use crate::document::{Document, Fields};
use crate::drivers::{
    build_local_operator, LocalBlobs, LocalDocuments, RemoteBlobs, RemoteDocuments,
    SharedBlobDriver, SharedDocumentDriver,
};
use crate::error::StorageError;
use crate::selector::{self, BackendMode, Selection};
use crate::settings::StorageSettings;

#[derive(Clone)]
struct Drivers {
    documents: SharedDocumentDriver,
    blobs: SharedBlobDriver,
}

struct BackendState {
    mode: BackendMode,
    ready: bool,
    /// `None` only when even local storage could not be opened.
    drivers: Option<Drivers>,
}

/// Unified document and blob storage.
///
/// Construct once at process start and share (it is cheap to clone; clones
/// share the backend decision). All methods are independently safe to call
/// concurrently.
///
/// # Example
///
/// ```ignore
/// use depot::{Storage, StorageSettings};
///
/// let storage = Storage::new(StorageSettings::from_env());
/// storage.init().await;
///
/// let mut listing = serde_json::Map::new();
/// listing.insert("title".into(), "vintage synth".into());
/// let stored = storage.store_item("listings", listing).await;
/// ```
pub struct Storage {
    settings: StorageSettings,
    state: Arc<OnceCell<RwLock<BackendState>>>,
}

impl Storage {
    /// Create a storage handle from a configuration snapshot. No I/O
    /// happens until [`init`](Self::init) or the first operation.
    pub fn new(settings: StorageSettings) -> Self {
        Self {
            settings,
            state: Arc::new(OnceCell::new()),
        }
    }

    /// Create a storage handle configured from the process environment.
    pub fn from_env() -> Self {
        Self::new(StorageSettings::from_env())
    }

    /// Compute the backend decision and prepare the chosen backend.
    ///
    /// Idempotent and safe to call from concurrent tasks; the decision is
    /// computed at most once per process. Returns overall readiness:
    /// `false` means storage is degraded and individual calls will fail
    /// (and report so) until the underlying problem is fixed.
    pub async fn init(&self) -> bool {
        let lock = self
            .state
            .get_or_init(|| async { RwLock::new(self.build_initial_state().await) })
            .await;
        lock.read().await.ready
    }

    /// The backend mode currently in effect, or `None` before `init`.
    pub async fn mode(&self) -> Option<BackendMode> {
        match self.state.get() {
            Some(lock) => Some(lock.read().await.mode),
            None => None,
        }
    }

    async fn build_initial_state(&self) -> BackendState {
        match selector::select_backend(&self.settings).await {
            Selection::Remote {
                operator,
                bucket,
                scheme,
            } => {
                if bootstrap::ensure_remote_ready(&operator, &bucket).await {
                    tracing::debug!("storage ready in remote mode (bucket {})", bucket);
                    BackendState {
                        mode: BackendMode::Remote,
                        ready: true,
                        drivers: Some(Drivers {
                            documents: Arc::new(RemoteDocuments::new(operator.clone())),
                            blobs: Arc::new(RemoteBlobs::new(operator, bucket, scheme)),
                        }),
                    }
                } else {
                    tracing::warn!(
                        "remote bucket {} not ready, using local storage for this process",
                        bucket
                    );
                    Self::local_state(&self.settings)
                }
            }
            Selection::Local => Self::local_state(&self.settings),
        }
    }

    fn local_state(settings: &StorageSettings) -> BackendState {
        let ready = bootstrap::ensure_local_ready(settings);
        match build_local_operator(settings) {
            Ok(op) => {
                tracing::debug!(
                    "storage ready in local mode (root {})",
                    settings.root_dir.display()
                );
                BackendState {
                    mode: BackendMode::Local,
                    ready,
                    drivers: Some(Drivers {
                        documents: Arc::new(LocalDocuments::new(op.clone())),
                        blobs: Arc::new(LocalBlobs::new(op)),
                    }),
                }
            }
            Err(e) => {
                tracing::warn!("local storage unavailable: {}", e);
                BackendState {
                    mode: BackendMode::Local,
                    ready: false,
                    drivers: None,
                }
            }
        }
    }

    /// Current mode and driver handles, initializing on first use.
    async fn current(&self) -> Result<(BackendMode, Drivers), StorageError> {
        self.init().await;
        let lock = self.state.get().ok_or(StorageError::NotReady)?;
        let guard = lock.read().await;
        let drivers = guard.drivers.clone().ok_or(StorageError::NotReady)?;
        Ok((guard.mode, drivers))
    }

    /// One-way downgrade to local mode after a remote failure. Raced
    /// callers may both observe the failure; the second write is a no-op.
    async fn downgrade(&self, op: &'static str, cause: &StorageError) {
        let Some(lock) = self.state.get() else {
            return;
        };
        let mut guard = lock.write().await;
        if guard.mode == BackendMode::Local {
            return;
        }
        tracing::warn!(
            "remote backend failed during {} ({}), falling back to local storage for the rest of the process",
            op,
            cause
        );
        *guard = Self::local_state(&self.settings);
    }

    /// Run a driver operation with the fallback policy applied: a
    /// connectivity-class failure in remote mode downgrades the backend
    /// and retries the call once against the local drivers.
    async fn run<'c, T, F>(&self, op: &'static str, call: F) -> Result<T, StorageError>
    where
        F: Fn(Drivers) -> BoxFuture<'c, Result<T, StorageError>>,
    {
        let (mode, drivers) = self.current().await?;

        match call(drivers).await {
            Err(err) if mode == BackendMode::Remote && err.is_connectivity() => {
                self.downgrade(op, &err).await;
                let (_, drivers) = self.current().await?;
                call(drivers).await
            }
            other => other,
        }
    }

    /// Store a record, overwriting any record with the same id. Returns
    /// the stored form (id and `createdAt` filled in) or `None` on
    /// failure.
    pub async fn store_item(&self, collection: &str, item: Fields) -> Option<Document> {
        let result = self
            .run("store_item", |drivers| {
                let item = item.clone();
                Box::pin(async move { drivers.documents.store(collection, item).await })
            })
            .await;

        match result {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!("store_item failed for collection {}: {}", collection, e);
                None
            }
        }
    }

    /// Fetch a record by id. `None` when the record does not exist or the
    /// call failed; only failures are logged.
    pub async fn get_item(&self, collection: &str, id: &str) -> Option<Document> {
        let result = self
            .run("get_item", |drivers| {
                Box::pin(async move { drivers.documents.get(collection, id).await })
            })
            .await;

        match result {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("get_item failed for {}/{}: {}", collection, id, e);
                None
            }
        }
    }

    /// Shallow-merge `patch` into an existing record. `None` when the
    /// record does not exist (update never creates) or the call failed.
    pub async fn update_item(&self, collection: &str, id: &str, patch: Fields) -> Option<Document> {
        let result = self
            .run("update_item", |drivers| {
                let patch = patch.clone();
                Box::pin(async move { drivers.documents.update(collection, id, patch).await })
            })
            .await;

        match result {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!("update_item failed for {}/{}: {}", collection, id, e);
                None
            }
        }
    }

    /// Remove a record. `true` iff a record was actually removed.
    pub async fn delete_item(&self, collection: &str, id: &str) -> bool {
        let result = self
            .run("delete_item", |drivers| {
                Box::pin(async move { drivers.documents.delete(collection, id).await })
            })
            .await;

        match result {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("delete_item failed for {}/{}: {}", collection, id, e);
                false
            }
        }
    }

    /// Linear scan of a collection for records whose fields equal every
    /// field in `filter`. Empty on failure (logged) and for unknown
    /// collections (silent).
    pub async fn query_items(&self, collection: &str, filter: &Fields) -> Vec<Document> {
        let result = self
            .run("query_items", |drivers| {
                Box::pin(async move { drivers.documents.query(collection, filter).await })
            })
            .await;

        match result {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!("query_items failed for collection {}: {}", collection, e);
                Vec::new()
            }
        }
    }

    /// Upload a blob, overwriting any blob at the same path. Returns the
    /// URL it is served from, or `None` on failure.
    pub async fn upload_file(
        &self,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Option<String> {
        let result = self
            .run("upload_file", |drivers| {
                let data = data.clone();
                Box::pin(async move { drivers.blobs.upload(path, data, content_type).await })
            })
            .await;

        match result {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!("upload_file failed for {}: {}", path, e);
                None
            }
        }
    }

    /// Remove an uploaded blob. `true` iff a blob was actually removed.
    pub async fn delete_file(&self, path: &str) -> bool {
        let result = self
            .run("delete_file", |drivers| {
                Box::pin(async move { drivers.blobs.remove(path).await })
            })
            .await;

        match result {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("delete_file failed for {}: {}", path, e);
                false
            }
        }
    }

    /// The URL an uploaded blob is served from, without touching the
    /// backend. `None` only when storage could not be opened at all.
    pub async fn file_url(&self, path: &str) -> Option<String> {
        match self.current().await {
            Ok((_, drivers)) => Some(drivers.blobs.url_for(path)),
            Err(e) => {
                tracing::warn!("file_url failed for {}: {}", path, e);
                None
            }
        }
    }
}

impl Clone for Storage {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{BlobDriver, DocumentDriver};
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    fn unavailable(op: &'static str) -> StorageError {
        StorageError::Unavailable {
            op,
            source: opendal::Error::new(opendal::ErrorKind::Unexpected, "connection reset"),
        }
    }

    struct FailingDocuments;

    #[async_trait]
    impl DocumentDriver for FailingDocuments {
        async fn store(&self, _: &str, _: Fields) -> Result<Document, StorageError> {
            Err(unavailable("store"))
        }
        async fn get(&self, _: &str, _: &str) -> Result<Option<Document>, StorageError> {
            Err(unavailable("get"))
        }
        async fn update(
            &self,
            _: &str,
            _: &str,
            _: Fields,
        ) -> Result<Option<Document>, StorageError> {
            Err(unavailable("update"))
        }
        async fn delete(&self, _: &str, _: &str) -> Result<bool, StorageError> {
            Err(unavailable("delete"))
        }
        async fn query(&self, _: &str, _: &Fields) -> Result<Vec<Document>, StorageError> {
            Err(unavailable("query"))
        }
    }

    struct FailingBlobs;

    #[async_trait]
    impl BlobDriver for FailingBlobs {
        async fn upload(&self, _: &str, _: Bytes, _: &str) -> Result<String, StorageError> {
            Err(unavailable("upload"))
        }
        async fn remove(&self, _: &str) -> Result<bool, StorageError> {
            Err(unavailable("remove"))
        }
        fn url_for(&self, path: &str) -> String {
            format!("https://storage.example.com/{}", path)
        }
    }

    struct RejectingDocuments;

    #[async_trait]
    impl DocumentDriver for RejectingDocuments {
        async fn store(&self, _: &str, _: Fields) -> Result<Document, StorageError> {
            Err(StorageError::Config("collection must not be empty".into()))
        }
        async fn get(&self, _: &str, _: &str) -> Result<Option<Document>, StorageError> {
            Ok(None)
        }
        async fn update(
            &self,
            _: &str,
            _: &str,
            _: Fields,
        ) -> Result<Option<Document>, StorageError> {
            Ok(None)
        }
        async fn delete(&self, _: &str, _: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn query(&self, _: &str, _: &Fields) -> Result<Vec<Document>, StorageError> {
            Ok(Vec::new())
        }
    }

    /// A storage handle whose memoized decision points at a "remote"
    /// backend that fails every call.
    fn storage_with_remote_drivers(
        tmp: &TempDir,
        documents: SharedDocumentDriver,
        blobs: SharedBlobDriver,
    ) -> Storage {
        let state = BackendState {
            mode: BackendMode::Remote,
            ready: true,
            drivers: Some(Drivers { documents, blobs }),
        };
        Storage {
            settings: StorageSettings {
                root_dir: tmp.path().to_path_buf(),
                ..Default::default()
            },
            state: Arc::new(OnceCell::new_with(Some(RwLock::new(state)))),
        }
    }

    fn fields(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[tokio::test]
    async fn test_connectivity_failure_downgrades_and_retries() {
        let tmp = TempDir::new().unwrap();
        let storage = storage_with_remote_drivers(
            &tmp,
            Arc::new(FailingDocuments),
            Arc::new(FailingBlobs),
        );
        assert_eq!(storage.mode().await, Some(BackendMode::Remote));

        // The failed call itself is retried against local storage.
        let stored = storage
            .store_item("users", fields(json!({"name": "ada"})))
            .await
            .expect("retried locally");
        assert_eq!(storage.mode().await, Some(BackendMode::Local));

        // Subsequent calls keep using local storage.
        let id = stored.id().expect("id assigned");
        assert!(storage.get_item("users", id).await.is_some());
    }

    #[tokio::test]
    async fn test_downgrade_is_one_way() {
        let tmp = TempDir::new().unwrap();
        let storage = storage_with_remote_drivers(
            &tmp,
            Arc::new(FailingDocuments),
            Arc::new(FailingBlobs),
        );

        assert!(!storage.delete_item("users", "u1").await);
        assert_eq!(storage.mode().await, Some(BackendMode::Local));

        // init stays memoized on the downgraded decision.
        assert!(storage.init().await);
        assert_eq!(storage.mode().await, Some(BackendMode::Local));
    }

    #[tokio::test]
    async fn test_non_connectivity_failure_does_not_downgrade() {
        let tmp = TempDir::new().unwrap();
        let storage = storage_with_remote_drivers(
            &tmp,
            Arc::new(RejectingDocuments),
            Arc::new(FailingBlobs),
        );

        let stored = storage.store_item("users", Fields::new()).await;
        assert!(stored.is_none());
        assert_eq!(storage.mode().await, Some(BackendMode::Remote));
    }

    fn local_storage(tmp: &TempDir) -> Storage {
        Storage::new(StorageSettings {
            root_dir: tmp.path().to_path_buf(),
            force_local: true,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_mode_is_none_before_init() {
        let tmp = TempDir::new().unwrap();
        let storage = local_storage(&tmp);
        assert!(storage.mode().await.is_none());

        assert!(storage.init().await);
        assert_eq!(storage.mode().await, Some(BackendMode::Local));
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let storage = local_storage(&tmp);
        assert!(storage.init().await);
        assert!(storage.init().await);
    }

    #[tokio::test]
    async fn test_operations_init_lazily() {
        let tmp = TempDir::new().unwrap();
        let storage = local_storage(&tmp);

        // No explicit init; the first call computes the decision.
        let mut item = Fields::new();
        item.insert("name".into(), "ada".into());
        let stored = storage.store_item("users", item).await.expect("stored");

        assert_eq!(storage.mode().await, Some(BackendMode::Local));
        let id = stored.id().expect("id assigned");
        assert!(storage.get_item("users", id).await.is_some());
    }

    #[tokio::test]
    async fn test_clones_share_the_decision() {
        let tmp = TempDir::new().unwrap();
        let storage = local_storage(&tmp);
        let clone = storage.clone();

        assert!(storage.init().await);
        assert_eq!(clone.mode().await, Some(BackendMode::Local));
    }
}
