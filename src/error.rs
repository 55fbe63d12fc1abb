//! Error taxonomy for scanning, connecting, probing and transferring.
//!
//! Per-file errors ([`RemoteIoError`], [`TransferError`]) are captured into the
//! run result and never abort a run. [`ScanError`] on the source root and
//! [`ConnectionError`] on the initial connect abort the run as [`RunError`].

use crate::models::RunResult;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to walk the local source tree.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Path does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure to establish a session with the remote server.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("authentication as '{user}' on {host} failed: {message}")]
    Auth {
        host: String,
        user: String,
        message: String,
    },

    #[error("cannot reach {host}:{port}: {source}")]
    Unreachable {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("protocol negotiation with {host} failed: {message}")]
    Negotiation { host: String, message: String },
}

impl ConnectionError {
    /// Short machine-readable label used in events and reports.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ConnectionError::Auth { .. } => "auth",
            ConnectionError::Unreachable { .. } => "unreachable",
            ConnectionError::Negotiation { .. } => "negotiation",
        }
    }
}

/// Classification shared by remote I/O and transfer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    PermissionDenied,
    Timeout,
    /// The session is gone; a reconnect is required before anything else.
    ConnectionLost,
    Protocol,
    LocalIo,
}

impl RemoteErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteErrorKind::PermissionDenied => "permission-denied",
            RemoteErrorKind::Timeout => "timeout",
            RemoteErrorKind::ConnectionLost => "connection-lost",
            RemoteErrorKind::Protocol => "protocol",
            RemoteErrorKind::LocalIo => "local-io",
        }
    }

    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteErrorKind::PermissionDenied)
    }

    #[must_use]
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => RemoteErrorKind::Timeout,
            io::ErrorKind::PermissionDenied => RemoteErrorKind::PermissionDenied,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => RemoteErrorKind::ConnectionLost,
            _ => RemoteErrorKind::Protocol,
        }
    }
}

impl std::fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory creation or probe failure for one remote path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} on {path}: {message}")]
pub struct RemoteIoError {
    pub path: String,
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteIoError {
    pub fn new(path: impl Into<String>, kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Upload failure, carrying how far the transfer got.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} uploading {path} after {bytes_transferred} bytes: {message}")]
pub struct TransferError {
    pub path: String,
    pub kind: RemoteErrorKind,
    pub bytes_transferred: u64,
    pub message: String,
}

impl TransferError {
    pub fn new(
        path: impl Into<String>,
        kind: RemoteErrorKind,
        bytes_transferred: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            kind,
            bytes_transferred,
            message: message.into(),
        }
    }
}

impl From<RemoteIoError> for TransferError {
    fn from(err: RemoteIoError) -> Self {
        TransferError::new(err.path, err.kind, 0, err.message)
    }
}

/// An exclude pattern that does not compile.
#[derive(Debug, Error)]
#[error("failed to compile exclude pattern '{pattern}': {source}")]
pub struct ExcludeError {
    pub pattern: String,
    #[source]
    pub source: globset::Error,
}

/// Problems reading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Total failure of a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Exclude(#[from] ExcludeError),

    #[error("initial connection failed: {0}")]
    Connect(#[from] ConnectionError),

    /// The session dropped mid-run and the single reconnect attempt failed.
    #[error("reconnect failed after the session dropped: {source}")]
    ReconnectFailed {
        #[source]
        source: ConnectionError,
        partial: Box<RunResult>,
    },
}

impl RunError {
    /// Partial result gathered before the run was cut short, if any.
    #[must_use]
    pub fn partial_result(&self) -> Option<&RunResult> {
        match self {
            RunError::ReconnectFailed { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
