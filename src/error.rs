//! Internal error union for the storage core.
//!
//! Drivers and the bootstrapper return explicit `Result`s so tests can
//! assert on specific failure causes; the facade collapses everything to the
//! documented empty-value contract at its boundary. Not-found is not an
//! error anywhere in this crate; drivers express it as `Ok(None)` or
//! `Ok(false)`.

use thiserror::Error;

/// Errors produced below the storage facade.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend decision has not been computed, or local storage could
    /// not be opened at all.
    #[error("storage is not ready")]
    NotReady,

    /// A configuration detail was invalid past backend selection
    /// (selection itself silently resolves to local mode).
    #[error("invalid storage configuration: {0}")]
    Config(String),

    /// Connectivity-class backend failure: network errors, timeouts,
    /// permission denials, rate limiting. The only variant that triggers
    /// the facade's remote-to-local fallback.
    #[error("storage backend unavailable during {op}: {source}")]
    Unavailable {
        op: &'static str,
        #[source]
        source: opendal::Error,
    },

    /// Any other backend failure.
    #[error("storage operation {op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: opendal::Error,
    },

    /// A stored record could not be decoded. The record is left in place
    /// for operator attention.
    #[error("corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Classify an opendal error for the operation `op`.
    ///
    /// Temporary, rate-limited, permission-denied and unexpected kinds are
    /// connectivity-class; everything else is an ordinary backend failure.
    /// Callers handle `ErrorKind::NotFound` before reaching here.
    pub(crate) fn from_opendal(op: &'static str, source: opendal::Error) -> Self {
        use opendal::ErrorKind;

        let connectivity = source.is_temporary()
            || matches!(
                source.kind(),
                ErrorKind::Unexpected | ErrorKind::RateLimited | ErrorKind::PermissionDenied
            );

        if connectivity {
            StorageError::Unavailable { op, source }
        } else {
            StorageError::Backend { op, source }
        }
    }

    /// Whether this failure should downgrade a remote backend to local.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}
