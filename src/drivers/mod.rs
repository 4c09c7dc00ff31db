//! Backend drivers.
//!
//! Two driver families, each with a local and a remote implementation:
//! document drivers persist JSON records grouped into collections, blob
//! drivers persist opaque byte payloads addressed by path. Both backends
//! share one key scheme (`{collection}/{id}.json` for records, `uploads/...`
//! for blobs), so a tree written locally mirrors the bucket layout.

use async_trait::async_trait;
use bytes::Bytes;

use crate::document::{Document, Fields};
use crate::error::StorageError;

mod local;
mod remote;

pub use local::{LocalBlobs, LocalDocuments};
pub use remote::{PublicUrlScheme, RemoteBlobs, RemoteDocuments};

pub(crate) use local::build_operator as build_local_operator;
pub(crate) use remote::build_operator as build_remote_operator;

/// Persistence of JSON records grouped into named collections.
#[async_trait]
pub trait DocumentDriver: Send + Sync {
    /// Write a record, overwriting any record with the same id. Assigns an
    /// id and a `createdAt` stamp when absent and returns the stored form.
    async fn store(&self, collection: &str, fields: Fields) -> Result<Document, StorageError>;

    /// Fetch a record. Absent records are `Ok(None)`, not an error.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError>;

    /// Shallow-merge `patch` into an existing record and refresh its
    /// `updatedAt` stamp. Returns `Ok(None)` when the record does not
    /// exist; update never creates.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: Fields,
    ) -> Result<Option<Document>, StorageError>;

    /// Remove a record. `Ok(true)` iff a record was actually removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError>;

    /// Linear scan of the collection, keeping records where every filter
    /// field compares equal. Cost is proportional to collection size on
    /// every backend.
    async fn query(&self, collection: &str, filter: &Fields) -> Result<Vec<Document>, StorageError>;
}

/// Persistence of opaque byte payloads addressed by caller-chosen paths.
#[async_trait]
pub trait BlobDriver: Send + Sync {
    /// Write a blob, overwriting any blob at the same path, and return a
    /// URL the web tier can serve.
    async fn upload(
        &self,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// Remove a blob. `Ok(true)` iff a blob was actually removed.
    async fn remove(&self, path: &str) -> Result<bool, StorageError>;

    /// The URL a blob at `path` is (or would be) served from.
    fn url_for(&self, path: &str) -> String;
}

/// Shared driver handles for dynamic dispatch from the facade.
pub type SharedDocumentDriver = std::sync::Arc<dyn DocumentDriver>;
pub type SharedBlobDriver = std::sync::Arc<dyn BlobDriver>;

/// Storage key for a record.
pub(crate) fn record_key(collection: &str, id: &str) -> String {
    format!("{}/{}.json", collection, id)
}

/// Storage key for an uploaded blob.
pub(crate) fn blob_key(path: &str) -> String {
    format!("uploads/{}", normalize_path(path))
}

/// Normalize a caller-supplied path (no leading slash for the operators).
pub(crate) fn normalize_path(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Reject collection names and ids that would escape their key prefix.
pub(crate) fn validate_segment(kind: &'static str, segment: &str) -> Result<(), StorageError> {
    if segment.is_empty() {
        return Err(StorageError::Config(format!("{} must not be empty", kind)));
    }
    if segment.contains('/') || segment.contains('\\') || segment.contains("..") {
        return Err(StorageError::Config(format!(
            "{} {:?} contains path separators",
            kind, segment
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key() {
        assert_eq!(record_key("users", "42"), "users/42.json");
    }

    #[test]
    fn test_blob_key_strips_leading_slash() {
        assert_eq!(blob_key("/avatars/a.png"), "uploads/avatars/a.png");
        assert_eq!(blob_key("avatars/a.png"), "uploads/avatars/a.png");
    }

    #[test]
    fn test_validate_segment() {
        assert!(validate_segment("collection", "users").is_ok());
        assert!(validate_segment("collection", "").is_err());
        assert!(validate_segment("id", "../users").is_err());
        assert!(validate_segment("id", "a/b").is_err());
    }
}
