//! Remote transport abstraction shared by the FTP and SFTP backends.
//!
//! The orchestrator and the selection policy only see [`Transport`] and
//! [`Session`]; everything protocol specific (metadata reliability, rename
//! atomicity, error classification) stays inside the backends.

pub mod ftp;
pub mod sftp;

use crate::error::{ConnectionError, RemoteErrorKind, RemoteIoError, TransferError};
use crate::models::RemoteStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Available transport backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ftp,
    Sftp,
}

impl TransportKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Ftp => "ftp",
            TransportKind::Sftp => "sftp",
        }
    }

    #[must_use]
    pub fn default_port(&self) -> u16 {
        match self {
            TransportKind::Ftp => 21,
            TransportKind::Sftp => 22,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the backup goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Remote directory the source tree is mirrored into.
    pub remote_root: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, remote_root: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            remote_root: remote_root.into(),
        }
    }

    /// Remote path for a slash-separated path relative to the source root.
    #[must_use]
    pub fn remote_path(&self, relative_path: &str) -> String {
        join_remote(&self.remote_root, relative_path)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, display_root(&self.remote_root))
    }
}

fn display_root(root: &str) -> String {
    if root.starts_with('/') {
        root.to_string()
    } else {
        format!("/{root}")
    }
}

/// How to authenticate.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    None,
    Password(String),
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Agent,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Secret::None => f.write_str("None"),
            Secret::Password(_) => f.write_str("Password(***)"),
            Secret::KeyFile { path, .. } => write!(f, "KeyFile({})", path.display()),
            Secret::Agent => f.write_str("Agent"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub secret: Secret,
}

impl Credentials {
    pub fn new(user: impl Into<String>, secret: Secret) -> Self {
        Self {
            user: user.into(),
            secret,
        }
    }

    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new(user, Secret::Password(password.into()))
    }
}

/// Upper bounds for network operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect plus protocol handshake/login.
    pub connect: Duration,
    /// Any single socket read or write.
    pub io: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(60),
            io: Duration::from_secs(60),
        }
    }
}

/// Factory for remote sessions. No retries happen at this layer.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Open and authenticate a new session.
    fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        timeouts: &Timeouts,
    ) -> Result<Box<dyn Session>, ConnectionError>;
}

/// An established connection. Paths are absolute remote paths.
pub trait Session: Send {
    /// Create `remote_path` and every missing ancestor. Existing directories
    /// are not an error.
    fn ensure_directory(&mut self, remote_path: &str) -> Result<(), RemoteIoError>;

    /// Look up remote metadata. A missing path is `Ok` with `exists == false`.
    fn probe(&mut self, remote_path: &str) -> Result<RemoteStatus, RemoteIoError>;

    /// Stream a local file to a temporary remote name and move it into place.
    /// Returns the number of bytes written.
    fn upload(
        &mut self,
        local_path: &Path,
        remote_path: &str,
        modified: DateTime<Utc>,
    ) -> Result<u64, TransferError>;

    /// Close the session.
    fn disconnect(self: Box<Self>) -> Result<(), RemoteIoError>;
}

/// Owns a session and releases it on every exit path.
pub struct SessionGuard {
    session: Option<Box<dyn Session>>,
    label: String,
}

impl SessionGuard {
    pub fn new(session: Box<dyn Session>, label: impl Into<String>) -> Self {
        Self {
            session: Some(session),
            label: label.into(),
        }
    }

    /// Borrow the live session, if it has not been released.
    pub fn get(&mut self) -> Option<&mut (dyn Session + 'static)> {
        self.session.as_deref_mut()
    }

    /// Swap in a fresh session, releasing the previous one.
    pub fn replace(&mut self, session: Box<dyn Session>) {
        self.release();
        self.session = Some(session);
    }

    /// Disconnect now. Further calls are no-ops.
    pub fn release(&mut self) {
        if let Some(session) = self.session.take() {
            match session.disconnect() {
                Ok(()) => log::debug!("Session {} closed", self.label),
                Err(err) => log::warn!("Session {} did not close cleanly: {err}", self.label),
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Join a remote root and a relative path with single slashes.
#[must_use]
pub fn join_remote(root: &str, relative_path: &str) -> String {
    let relative_path = relative_path.trim_matches('/');
    let root = if root.len() > 1 {
        root.trim_end_matches('/')
    } else {
        root
    };

    match (root.is_empty(), relative_path.is_empty()) {
        (true, true) => ".".to_string(),
        (true, false) => relative_path.to_string(),
        (false, true) => root.to_string(),
        (false, false) if root == "/" => format!("/{relative_path}"),
        (false, false) => format!("{root}/{relative_path}"),
    }
}

/// Every prefix of a remote directory path, shortest first.
///
/// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`; relative paths keep no leading
/// slash.
#[must_use]
pub fn ancestor_chain(remote_path: &str) -> Vec<String> {
    let absolute = remote_path.starts_with('/');
    let mut acc = String::new();
    let mut chain = Vec::new();

    for part in remote_path.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if absolute || !acc.is_empty() {
            acc.push('/');
        }
        acc.push_str(part);
        chain.push(acc.clone());
    }
    chain
}

/// Sibling temporary name used while a file is being written.
#[must_use]
pub fn temporary_name(remote_path: &str) -> String {
    match remote_path.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/.{name}.part"),
        None => format!(".{remote_path}.part"),
    }
}

/// Reader that counts bytes and remembers local read failures, so a failed
/// upload can tell a bad local file from a bad connection.
pub(crate) struct CountingReader<R> {
    inner: R,
    count: u64,
    local_error: Option<io::ErrorKind>,
}

impl<R: Read> CountingReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            count: 0,
            local_error: None,
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn local_error_kind(&self) -> Option<RemoteErrorKind> {
        self.local_error.map(|_| RemoteErrorKind::LocalIo)
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => {
                self.count += n as u64;
                Ok(n)
            }
            Err(err) => {
                self.local_error = Some(err.kind());
                Err(err)
            }
        }
    }
}
