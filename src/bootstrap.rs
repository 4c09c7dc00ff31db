//! Backend readiness checks.
//!
//! Idempotent preparation of whichever backend was selected: the local
//! root tree with a writability probe, or the remote bucket with a
//! marker-object round trip. Both checks report `false` instead of
//! erroring; the facade decides whether that means degraded local mode or
//! falling back from remote.

use opendal::Operator;
use std::path::Path;

use crate::settings::StorageSettings;

/// Marker object/file used by the writability probes.
const PROBE_KEY: &str = ".depot-probe";

/// Ensure the local root, with its upload directory, exists and is
/// writable. Returns `false` (never errors) when it cannot be made ready;
/// individual writes will then fail and be reported per call.
pub(crate) fn ensure_local_ready(settings: &StorageSettings) -> bool {
    let root = &settings.root_dir;

    for dir in [root.clone(), root.join("uploads")] {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("cannot create storage directory {}: {}", dir.display(), e);
            return false;
        }
    }

    if !probe_writable(root) {
        tracing::warn!(
            "storage root {} is not writable, continuing in degraded mode",
            root.display()
        );
        return false;
    }

    true
}

fn probe_writable(root: &Path) -> bool {
    let marker = root.join(PROBE_KEY);
    if let Err(e) = std::fs::write(&marker, b"probe") {
        tracing::debug!("writability probe failed at {}: {}", marker.display(), e);
        return false;
    }
    let _ = std::fs::remove_file(&marker);
    true
}

/// Verify the remote bucket is reachable and writable by round-tripping a
/// marker object. opendal cannot create buckets, so an absent bucket shows
/// up as a failed probe and the facade falls back to local mode.
pub(crate) async fn ensure_remote_ready(operator: &Operator, bucket: &str) -> bool {
    if let Err(e) = operator.check().await {
        tracing::warn!("remote bucket {} is not reachable: {}", bucket, e);
        return false;
    }

    if let Err(e) = operator.write(PROBE_KEY, b"probe".to_vec()).await {
        tracing::warn!("remote bucket {} is not writable: {}", bucket, e);
        return false;
    }
    if let Err(e) = operator.delete(PROBE_KEY).await {
        // The marker is harmless; reachability and writability are proven.
        tracing::debug!("probe cleanup failed in bucket {}: {}", bucket, e);
    }

    true
}
