//! Selective Backup Library
//!
//! This library backs up a local directory tree to a remote server over FTP or
//! SFTP, transferring only files whose remote copy is missing or out of date
//! (compared by size and modification time).
//!
//! ```no_run
//! use ftp_backup::transport::sftp::SftpTransport;
//! use ftp_backup::{BackupEngine, BackupOptions, Credentials, Endpoint, Secret};
//! use std::path::Path;
//!
//! let engine = BackupEngine::new(Box::new(SftpTransport::new()));
//! let endpoint = Endpoint::new("backup.example.org", 22, "/srv/backup/host1");
//! let credentials = Credentials::new("backup", Secret::Agent);
//! let result = engine.run(
//!     Path::new("/var/backup"),
//!     &endpoint,
//!     &credentials,
//!     &BackupOptions::default(),
//! );
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod transport;

pub use error::{
    ConfigError, ConnectionError, ExcludeError, RemoteErrorKind, RemoteIoError, RunError,
    ScanError, TransferError,
};
pub use models::{
    DecisionKind, DecisionReason, FailureItem, FailureKind, FileEntry, OutcomeStatus,
    RemoteStatus, RunResult, TransferDecision, TransferOutcome,
};
pub use services::orchestrate::{BackupEngine, RunState};
pub use services::sink::{BackupEvent, EventSink};
pub use transport::{
    Credentials, Endpoint, Secret, Session, SessionGuard, Timeouts, Transport, TransportKind,
};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Options for one backup run
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Globs; matching entries are dropped before the selection policy runs.
    pub exclude_patterns: Vec<String>,
    /// Decide and report, but never create directories or upload.
    pub dry_run: bool,
    /// Attempts after the first for each failing operation.
    pub max_retries: u32,
    /// Number of concurrent sessions used for file uploads.
    pub concurrency: usize,
    /// Upload every file regardless of remote state.
    pub force_full_upload: bool,
    pub timeouts: Timeouts,
    pub retry_backoff: Duration,
    pub follow_symlinks: bool,
    pub max_depth: Option<u16>,
    pub cancel: CancelToken,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            exclude_patterns: Vec::new(),
            dry_run: false,
            max_retries: services::orchestrate::retry::DEFAULT_MAX_RETRIES,
            concurrency: 1,
            force_full_upload: false,
            timeouts: Timeouts::default(),
            retry_backoff: services::orchestrate::retry::DEFAULT_BACKOFF,
            follow_symlinks: false,
            max_depth: None,
            cancel: CancelToken::new(),
        }
    }
}

/// Cooperative cancellation flag shared between the caller and a run.
///
/// Once cancelled, no new transfer is scheduled; an upload already in flight
/// finishes or is abandoned under its temporary name.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for signal handlers that set it directly.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}
