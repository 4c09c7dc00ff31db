//! Local filesystem drivers using OpenDAL.
//!
//! The fallback backend: always available, used in development mode and
//! whenever the remote bucket is unconfigured or unreachable. Records land
//! as one pretty-printed JSON file per id under a collection-named
//! directory; uploads keep their caller-supplied paths under `uploads/`.

use futures::StreamExt;
use opendal::layers::LoggingLayer;
use opendal::services::Fs;
use opendal::{EntryMode, ErrorKind, Operator};

use async_trait::async_trait;
use bytes::Bytes;

use super::{blob_key, normalize_path, record_key, validate_segment, BlobDriver, DocumentDriver};
use crate::document::{Document, Fields};
use crate::error::StorageError;
use crate::settings::StorageSettings;

/// Build the filesystem operator rooted at the configured directory.
///
/// Writes go through an atomic-write directory (write-new-then-rename), so
/// concurrent readers never observe a partially written record.
pub(crate) fn build_operator(settings: &StorageSettings) -> Result<Operator, StorageError> {
    let root = settings.root_dir.to_string_lossy();
    let atomic_dir = settings.root_dir.join(".tmp");

    let mut builder = Fs::default();
    builder = builder.root(&root);
    builder = builder.atomic_write_dir(&atomic_dir.to_string_lossy());

    let op = Operator::new(builder)
        .map_err(|e| StorageError::from_opendal("open_local", e))?
        .layer(LoggingLayer::default())
        .finish();

    Ok(op)
}

/// Document driver over the local filesystem.
pub struct LocalDocuments {
    op: Operator,
}

impl LocalDocuments {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }
}

#[async_trait]
impl DocumentDriver for LocalDocuments {
    async fn store(&self, collection: &str, fields: Fields) -> Result<Document, StorageError> {
        validate_segment("collection", collection)?;
        let mut doc = Document::new(fields);
        let id = doc.ensure_id();
        validate_segment("id", &id)?;
        doc.stamp_created();

        self.op
            .write(&record_key(collection, &id), doc.to_bytes())
            .await
            .map_err(|e| StorageError::from_opendal("store", e))?;

        Ok(doc)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError> {
        validate_segment("collection", collection)?;
        validate_segment("id", id)?;
        let key = record_key(collection, id);

        let bytes = match self.op.read(&key).await {
            Ok(buffer) => buffer.to_vec(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::from_opendal("get", e)),
        };

        Document::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Corrupt { key, source })
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Fields,
    ) -> Result<Option<Document>, StorageError> {
        let Some(mut doc) = self.get(collection, id).await? else {
            return Ok(None);
        };
        doc.apply_patch(patch);

        self.op
            .write(&record_key(collection, id), doc.to_bytes())
            .await
            .map_err(|e| StorageError::from_opendal("update", e))?;

        Ok(Some(doc))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        validate_segment("collection", collection)?;
        validate_segment("id", id)?;
        let key = record_key(collection, id);

        // opendal's delete succeeds on absent keys; check first so the
        // removed/absent distinction survives.
        let existed = self
            .op
            .exists(&key)
            .await
            .map_err(|e| StorageError::from_opendal("delete", e))?;
        if !existed {
            return Ok(false);
        }

        self.op
            .delete(&key)
            .await
            .map_err(|e| StorageError::from_opendal("delete", e))?;
        Ok(true)
    }

    async fn query(
        &self,
        collection: &str,
        filter: &Fields,
    ) -> Result<Vec<Document>, StorageError> {
        validate_segment("collection", collection)?;
        let prefix = format!("{}/", collection);

        let mut lister = match self.op.lister_with(&prefix).await {
            Ok(lister) => lister,
            // A collection that was never written to is simply empty.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::from_opendal("query", e)),
        };

        let mut matches = Vec::new();
        while let Some(entry) = lister.next().await {
            let entry = entry.map_err(|e| StorageError::from_opendal("query", e))?;
            if entry.metadata().mode() != EntryMode::FILE || !entry.path().ends_with(".json") {
                continue;
            }

            let bytes = match self.op.read(entry.path()).await {
                Ok(buffer) => buffer.to_vec(),
                // Deleted between list and read; not our record anymore.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::from_opendal("query", e)),
            };

            match Document::from_slice(&bytes) {
                Ok(doc) if doc.matches(filter) => matches.push(doc),
                Ok(_) => {}
                Err(e) => {
                    // Leave the corrupt record in place and keep scanning.
                    tracing::warn!("skipping corrupt record {}: {}", entry.path(), e);
                }
            }
        }

        Ok(matches)
    }
}

/// Blob driver over the local filesystem.
///
/// Returned URLs are root-relative (`/uploads/...`) so the web tier can
/// serve the upload directory statically.
pub struct LocalBlobs {
    op: Operator,
}

impl LocalBlobs {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }
}

#[async_trait]
impl BlobDriver for LocalBlobs {
    async fn upload(
        &self,
        path: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        // The filesystem has no content-type metadata to carry.
        self.op
            .write(&blob_key(path), data)
            .await
            .map_err(|e| StorageError::from_opendal("upload", e))?;

        Ok(self.url_for(path))
    }

    async fn remove(&self, path: &str) -> Result<bool, StorageError> {
        let key = blob_key(path);

        let existed = self
            .op
            .exists(&key)
            .await
            .map_err(|e| StorageError::from_opendal("remove", e))?;
        if !existed {
            return Ok(false);
        }

        self.op
            .delete(&key)
            .await
            .map_err(|e| StorageError::from_opendal("remove", e))?;
        Ok(true)
    }

    fn url_for(&self, path: &str) -> String {
        format!("/uploads/{}", normalize_path(path))
    }
}
