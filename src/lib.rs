//! Unified document and blob storage with local filesystem fallback.
//!
//! `depot` lets an application read and write schema-less JSON records
//! (grouped into named collections) and opaque binary blobs without
//! knowing, at call time, whether the underlying medium is a remote
//! object-storage bucket or the local filesystem. All backend I/O goes
//! through Apache OpenDAL.
//!
//! Supported backends:
//!
//! - **Google Cloud Storage** via a service-account identity
//! - **Amazon S3** and S3-compatible services (MinIO, Cloudflare R2, ...)
//! - **Local filesystem** for development and as the runtime fallback
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Storage                              │
//! │  - single public surface (store/get/update/delete/query,    │
//! │    upload/delete file)                                      │
//! │  - memoizes the backend decision for the process lifetime   │
//! │  - collapses failures to None/false/empty, never errors     │
//! │  - downgrades remote → local on connectivity failure        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//! ┌──────────────────────────┐  ┌──────────────────────────┐
//! │   selector + bootstrap   │  │      driver traits       │
//! │  - credentials present?  │  │  DocumentDriver          │
//! │  - probe under timeout   │  │  BlobDriver              │
//! │  - dirs/bucket ready?    │  │                          │
//! └──────────────────────────┘  └──────────────────────────┘
//!                                             │
//!                              ┌──────────────┴──────────────┐
//!                              ▼                             ▼
//!                   ┌──────────────────┐         ┌──────────────────┐
//!                   │  Local drivers   │         │  Remote drivers  │
//!                   │  (OpenDAL Fs)    │         │  (OpenDAL        │
//!                   │                  │         │   Gcs / S3)      │
//!                   └──────────────────┘         └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use depot::{Storage, StorageSettings};
//!
//! let storage = Storage::new(StorageSettings::from_env());
//! storage.init().await;
//!
//! let mut listing = serde_json::Map::new();
//! listing.insert("title".into(), "vintage synth".into());
//! listing.insert("price".into(), 1200.into());
//!
//! if let Some(stored) = storage.store_item("listings", listing).await {
//!     let id = stored.id().expect("assigned on store");
//!     let again = storage.get_item("listings", id).await;
//!     assert_eq!(again.as_ref().and_then(|d| d.id()), Some(id));
//! }
//! ```

mod bootstrap;
mod document;
mod error;
mod facade;
mod selector;
mod settings;

pub mod drivers;

// Re-export the public surface.
pub use document::{Document, Fields, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD};
pub use error::StorageError;
pub use facade::Storage;
pub use selector::BackendMode;
pub use settings::{RemoteCredentials, StorageSettings};
