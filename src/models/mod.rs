//! Data models for scanned entries, remote state, decisions and run results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A local filesystem node produced by the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Slash-separated path relative to the source root.
    pub relative_path: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
    pub depth: u16,
}

/// What the remote side knows about one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub exists: bool,
    pub size_bytes: Option<u64>,
    /// `None` when the server cannot report it (e.g. FTP without `MDTM`).
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteStatus {
    #[must_use]
    pub fn missing() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn present(size_bytes: u64, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            exists: true,
            size_bytes: Some(size_bytes),
            modified,
        }
    }
}

/// Why the selection policy reached its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionReason {
    NewFile,
    SizeMismatch,
    NewerLocalMtime,
    Unchanged,
    RemoteMetadataUnavailableForcedUpload,
    /// `force_full_upload` bypassed the comparison.
    Forced,
    /// Directories are always ensured.
    Directory,
    /// The remote probe failed with something other than not-found.
    ProbeFailed,
}

impl DecisionReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::NewFile => "new-file",
            DecisionReason::SizeMismatch => "size-mismatch",
            DecisionReason::NewerLocalMtime => "newer-local-mtime",
            DecisionReason::Unchanged => "unchanged",
            DecisionReason::RemoteMetadataUnavailableForcedUpload => {
                "remote-metadata-unavailable-forced-upload"
            }
            DecisionReason::Forced => "forced",
            DecisionReason::Directory => "directory",
            DecisionReason::ProbeFailed => "probe-failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionKind {
    Upload,
    Skip,
    FailPrecondition,
}

/// Outcome of the selection policy for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferDecision {
    Upload(DecisionReason),
    Skip(DecisionReason),
    FailPrecondition(crate::error::RemoteIoError),
}

impl TransferDecision {
    #[must_use]
    pub fn kind(&self) -> DecisionKind {
        match self {
            TransferDecision::Upload(_) => DecisionKind::Upload,
            TransferDecision::Skip(_) => DecisionKind::Skip,
            TransferDecision::FailPrecondition(_) => DecisionKind::FailPrecondition,
        }
    }

    #[must_use]
    pub fn reason(&self) -> DecisionReason {
        match self {
            TransferDecision::Upload(reason) | TransferDecision::Skip(reason) => *reason,
            TransferDecision::FailPrecondition(_) => DecisionReason::ProbeFailed,
        }
    }

    #[must_use]
    pub fn is_upload(&self) -> bool {
        matches!(self, TransferDecision::Upload(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeStatus {
    Success,
    RetriedSuccess,
    Failed,
    /// Dry run: the upload was decided but not performed.
    Simulated,
}

/// Result of one attempted upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub path: String,
    pub status: OutcomeStatus,
    pub attempts: u32,
    pub bytes_transferred: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The local entry could not be read during the scan.
    Unreadable,
    /// The remote probe failed, so no decision could be made.
    Probe,
    Transfer,
    Directory,
    /// Not processed because the run was cancelled.
    Cancelled,
    /// Not processed because the connection could not be re-established.
    Aborted,
}

/// A failure reported with enough detail to retry it by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureItem {
    pub path: String,
    pub kind: FailureKind,
    pub attempts: u32,
    pub message: String,
}

/// Aggregate result of one backup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub source_root: String,
    pub remote: String,
    pub transport: String,
    pub dry_run: bool,
    pub cancelled: bool,
    /// File candidates; `skipped + uploaded + failed == total`.
    pub total: usize,
    pub skipped: usize,
    pub uploaded: usize,
    pub failed: usize,
    /// Subset of `uploaded` that needed more than one attempt.
    pub retried: usize,
    pub excluded: usize,
    pub directories_ensured: usize,
    pub directories_failed: usize,
    pub bytes_uploaded: u64,
    pub failures: Vec<FailureItem>,
    pub outcomes: Vec<TransferOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0 && self.directories_failed == 0 && !self.cancelled
    }

    /// Counts partition the candidate set.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.skipped + self.uploaded + self.failed == self.total
    }
}
