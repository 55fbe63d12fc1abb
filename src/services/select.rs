//! Upload/skip selection by size and modification time.
//!
//! A regular file is skipped only when the remote copy exists, has the same
//! size, and reports a modification time no older than the local one.
//! Anything that cannot be confirmed is uploaded again.
//!
//! Known limitation: a file whose content changed without changing its size,
//! and whose mtime was set back to an older value, is not detected. The same
//! trade-off is made by mirroring tools that compare size and mtime only.

use crate::error::RemoteIoError;
use crate::models::{DecisionReason, FileEntry, RemoteStatus, TransferDecision};
use chrono::{DateTime, Utc};

/// Decides, per scanned entry, whether it has to be transferred.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionPolicy {
    pub force_full_upload: bool,
}

impl SelectionPolicy {
    #[must_use]
    pub fn new(force_full_upload: bool) -> Self {
        Self { force_full_upload }
    }

    /// The decision when it does not depend on remote state: directories are
    /// always ensured and `force_full_upload` uploads every file.
    #[must_use]
    pub fn decide_locally(&self, entry: &FileEntry) -> Option<TransferDecision> {
        if entry.is_dir {
            Some(TransferDecision::Upload(DecisionReason::Directory))
        } else if self.force_full_upload {
            Some(TransferDecision::Upload(DecisionReason::Forced))
        } else {
            None
        }
    }

    /// Decide for `entry`, calling `probe` only when remote state matters.
    ///
    /// A probe error is never fatal here: it becomes
    /// [`TransferDecision::FailPrecondition`] for the caller to record.
    pub fn decide<F>(&self, entry: &FileEntry, probe: F) -> TransferDecision
    where
        F: FnOnce() -> Result<RemoteStatus, RemoteIoError>,
    {
        if let Some(decision) = self.decide_locally(entry) {
            return decision;
        }

        match probe() {
            Ok(remote) => compare(entry, &remote),
            Err(err) => TransferDecision::FailPrecondition(err),
        }
    }
}

/// Pure size/mtime comparison between a local file and its remote status.
#[must_use]
pub fn compare(entry: &FileEntry, remote: &RemoteStatus) -> TransferDecision {
    if !remote.exists {
        return TransferDecision::Upload(DecisionReason::NewFile);
    }

    match remote.size_bytes {
        None => {
            return TransferDecision::Upload(DecisionReason::RemoteMetadataUnavailableForcedUpload);
        }
        Some(size) if size != entry.size_bytes => {
            return TransferDecision::Upload(DecisionReason::SizeMismatch);
        }
        Some(_) => {}
    }

    let Some(remote_mtime) = remote.modified else {
        return TransferDecision::Upload(DecisionReason::RemoteMetadataUnavailableForcedUpload);
    };

    // Remote timestamps only carry whole seconds.
    if truncate_to_seconds(entry.modified) > truncate_to_seconds(remote_mtime) {
        TransferDecision::Upload(DecisionReason::NewerLocalMtime)
    } else {
        TransferDecision::Skip(DecisionReason::Unchanged)
    }
}

fn truncate_to_seconds(t: DateTime<Utc>) -> i64 {
    t.timestamp()
}
