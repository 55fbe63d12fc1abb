//! SFTP backend built on `ssh2` (libssh2).
//!
//! SFTP attributes give POSIX-like size and mtime, so probes are reliable.
//! Uploads are written to a temporary sibling, closed explicitly so write
//! errors reported at close are not lost, and renamed into place; after the
//! rename the remote mtime is set to the local one so the next run sees the
//! file as unchanged regardless of the server clock. SFTPv3 servers ignore
//! the overwrite flag and answer a rename onto an existing file with a
//! generic failure; only then is the old file removed and the rename
//! repeated.
//!
//! The server host key is not verified against `known_hosts`.

use super::{Credentials, Endpoint, Secret, Session, Timeouts, Transport, TransportKind};
use super::{CountingReader, ancestor_chain, temporary_name};
use crate::error::{ConnectionError, RemoteErrorKind, RemoteIoError, TransferError};
use crate::models::RemoteStatus;
use chrono::{DateTime, Utc};
use ssh2::{ErrorCode, FileStat, RenameFlags, Sftp};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// libssh2 session error codes.
mod session_code {
    pub const SOCKET_SEND: i32 = -7;
    pub const TIMEOUT: i32 = -9;
    pub const SOCKET_DISCONNECT: i32 = -13;
    pub const FILE: i32 = -16;
    pub const AUTHENTICATION_FAILED: i32 = -18;
    pub const PUBLICKEY_UNVERIFIED: i32 = -19;
    pub const SOCKET_RECV: i32 = -43;
}

/// SFTP status codes (`SSH_FX_*`).
mod status {
    pub const NO_SUCH_FILE: i32 = 2;
    pub const PERMISSION_DENIED: i32 = 3;
    pub const FAILURE: i32 = 4;
    pub const NO_CONNECTION: i32 = 6;
    pub const CONNECTION_LOST: i32 = 7;
    pub const FILE_ALREADY_EXISTS: i32 = 11;
    pub const WRITE_PROTECT: i32 = 12;
}

const DIRECTORY_MODE: i32 = 0o755;

/// Factory for SFTP sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SftpTransport;

impl SftpTransport {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Transport for SftpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sftp
    }

    fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        timeouts: &Timeouts,
    ) -> Result<Box<dyn Session>, ConnectionError> {
        let host = endpoint.host.clone();
        let negotiation = |err: ssh2::Error| ConnectionError::Negotiation {
            host: host.clone(),
            message: err.to_string(),
        };

        let addr = resolve(&host, endpoint.port)?;
        let tcp = TcpStream::connect_timeout(&addr, timeouts.connect).map_err(|source| {
            ConnectionError::Unreachable {
                host: host.clone(),
                port: endpoint.port,
                source,
            }
        })?;
        if let Err(err) = tcp
            .set_read_timeout(Some(timeouts.io))
            .and_then(|()| tcp.set_write_timeout(Some(timeouts.io)))
        {
            log::warn!("Failed to set socket timeouts for {host}: {err}");
        }

        let mut session = ssh2::Session::new().map_err(negotiation)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(millis(timeouts.connect));
        session.handshake().map_err(negotiation)?;

        authenticate(&session, &host, credentials)?;
        session.set_timeout(millis(timeouts.io));

        let sftp = session.sftp().map_err(negotiation)?;
        log::info!(
            "SFTP session to {endpoint} established as '{}'",
            credentials.user
        );

        Ok(Box::new(SftpSession {
            session,
            sftp,
            known_dirs: HashSet::new(),
        }))
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConnectionError> {
    let unreachable = |source: io::Error| ConnectionError::Unreachable {
        host: host.to_string(),
        port,
        source,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(unreachable)?
        .next()
        .ok_or_else(|| {
            unreachable(io::Error::new(
                io::ErrorKind::NotFound,
                "host name resolved to no address",
            ))
        })
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

fn authenticate(
    session: &ssh2::Session,
    host: &str,
    credentials: &Credentials,
) -> Result<(), ConnectionError> {
    let user = credentials.user.as_str();
    let attempt = match &credentials.secret {
        Secret::KeyFile { path, passphrase } => {
            log::debug!("Authenticating '{user}' with key {}", path.display());
            session.userauth_pubkey_file(user, None, path, passphrase.as_deref())
        }
        Secret::Password(password) => session.userauth_password(user, password),
        Secret::Agent | Secret::None => session.userauth_agent(user),
    };

    match attempt {
        Ok(()) if session.authenticated() => Ok(()),
        Ok(()) => Err(ConnectionError::Auth {
            host: host.to_string(),
            user: user.to_string(),
            message: "server did not accept the credentials".to_string(),
        }),
        Err(err) => {
            let rejected = matches!(
                err.code(),
                ErrorCode::Session(
                    session_code::AUTHENTICATION_FAILED
                        | session_code::PUBLICKEY_UNVERIFIED
                        | session_code::FILE
                )
            );
            // agent failures (no agent, no identities) are reported as auth
            if rejected || matches!(credentials.secret, Secret::Agent | Secret::None) {
                Err(ConnectionError::Auth {
                    host: host.to_string(),
                    user: user.to_string(),
                    message: err.message().to_string(),
                })
            } else {
                Err(ConnectionError::Negotiation {
                    host: host.to_string(),
                    message: err.to_string(),
                })
            }
        }
    }
}

/// An authenticated SSH session with an open SFTP channel.
pub struct SftpSession {
    session: ssh2::Session,
    sftp: Sftp,
    known_dirs: HashSet<String>,
}

impl SftpSession {
    fn is_directory(&self, path: &str) -> bool {
        self.sftp
            .stat(Path::new(path))
            .map(|stat| stat.is_dir())
            .unwrap_or(false)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.sftp
            .stat(path)
            .map(|stat| stat.is_file())
            .unwrap_or(false)
    }

    /// Remove a temporary upload unless the connection is gone.
    fn discard_temporary(&self, temporary: &Path, kind: RemoteErrorKind) {
        if kind == RemoteErrorKind::ConnectionLost {
            return;
        }
        if let Err(err) = self.sftp.unlink(temporary) {
            log::warn!(
                "Could not remove temporary upload {}: {err}",
                temporary.display()
            );
        }
    }

    /// Refine a local `io::Error` kind from a failed write: libssh2 reports a
    /// dead socket as a generic error, so check whether the channel still
    /// answers.
    fn refine(&self, kind: RemoteErrorKind) -> RemoteErrorKind {
        if kind != RemoteErrorKind::Protocol {
            return kind;
        }
        match self.sftp.stat(Path::new(".")) {
            Err(err) if classify(&err) == RemoteErrorKind::ConnectionLost => {
                RemoteErrorKind::ConnectionLost
            }
            _ => kind,
        }
    }

    fn preserve_mtime(&self, remote_path: &str, modified: DateTime<Utc>) {
        let Ok(secs) = u64::try_from(modified.timestamp()) else {
            return;
        };
        let stat = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: None,
            atime: Some(secs),
            mtime: Some(secs),
        };
        if let Err(err) = self.sftp.setstat(Path::new(remote_path), stat) {
            log::warn!("Could not set mtime on {remote_path}: {err}");
        }
    }
}

impl Session for SftpSession {
    fn ensure_directory(&mut self, remote_path: &str) -> Result<(), RemoteIoError> {
        for dir in ancestor_chain(remote_path) {
            if self.known_dirs.contains(&dir) {
                continue;
            }
            match self.sftp.mkdir(Path::new(&dir), DIRECTORY_MODE) {
                Ok(()) => log::debug!("Created remote directory {dir}"),
                Err(err) => {
                    let kind = classify(&err);
                    if kind == RemoteErrorKind::ConnectionLost || !self.is_directory(&dir) {
                        return Err(RemoteIoError::new(&dir, kind, err.to_string()));
                    }
                }
            }
            self.known_dirs.insert(dir);
        }
        Ok(())
    }

    fn probe(&mut self, remote_path: &str) -> Result<RemoteStatus, RemoteIoError> {
        let stat = match self.sftp.stat(Path::new(remote_path)) {
            Ok(stat) => stat,
            Err(err) if matches!(err.code(), ErrorCode::SFTP(status::NO_SUCH_FILE)) => {
                return Ok(RemoteStatus::missing());
            }
            Err(err) => {
                return Err(RemoteIoError::new(remote_path, classify(&err), err.to_string()));
            }
        };

        let modified = stat
            .mtime
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

        Ok(RemoteStatus {
            exists: true,
            size_bytes: if stat.is_dir() { None } else { stat.size },
            modified,
        })
    }

    fn upload(
        &mut self,
        local_path: &Path,
        remote_path: &str,
        modified: DateTime<Utc>,
    ) -> Result<u64, TransferError> {
        let file = File::open(local_path).map_err(|err| {
            TransferError::new(remote_path, RemoteErrorKind::LocalIo, 0, err.to_string())
        })?;
        let mut reader = CountingReader::new(BufReader::new(file));
        let temporary = temporary_name(remote_path);
        let temporary_path = Path::new(&temporary);

        let mut remote = self.sftp.create(temporary_path).map_err(|err| {
            TransferError::new(remote_path, classify(&err), 0, err.to_string())
        })?;

        if let Err(err) = io::copy(&mut reader, &mut remote) {
            drop(remote);
            let kind = reader
                .local_error_kind()
                .unwrap_or_else(|| self.refine(RemoteErrorKind::from_io(&err)));
            self.discard_temporary(temporary_path, kind);
            return Err(TransferError::new(
                remote_path,
                kind,
                reader.count(),
                err.to_string(),
            ));
        }

        let written = reader.count();
        let failure = |err: &ssh2::Error| {
            TransferError::new(remote_path, classify(err), written, err.to_string())
        };
        if let Err(err) = remote.close() {
            self.discard_temporary(temporary_path, classify(&err));
            return Err(failure(&err));
        }

        let target = Path::new(remote_path);
        let flags = Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE);
        if let Err(first) = self.sftp.rename(temporary_path, target, flags) {
            if !is_rename_conflict(&first) || !self.is_file(target) {
                self.discard_temporary(temporary_path, classify(&first));
                return Err(failure(&first));
            }

            log::debug!("Rename over {remote_path} refused ({first}), replacing");
            if let Err(err) = self.sftp.unlink(target) {
                self.discard_temporary(temporary_path, classify(&err));
                return Err(failure(&err));
            }
            self.sftp
                .rename(temporary_path, target, None)
                .map_err(|err| {
                    log::warn!(
                        "Removed {remote_path} but could not rename {temporary} into place: {err}"
                    );
                    failure(&err)
                })?;
        }

        self.preserve_mtime(remote_path, modified);
        Ok(written)
    }

    fn disconnect(self: Box<Self>) -> Result<(), RemoteIoError> {
        let SftpSession { session, sftp, .. } = *self;
        drop(sftp);
        session
            .disconnect(None, "backup finished", None)
            .map_err(|err| RemoteIoError::new("", classify(&err), err.to_string()))
    }
}

/// Whether a failed rename may be caused by an existing destination.
///
/// SFTPv3 reports that case as a generic `SSH_FX_FAILURE`; newer servers use
/// `SSH_FX_FILE_ALREADY_EXISTS`. Permission and connection errors never are.
#[must_use]
pub fn is_rename_conflict(err: &ssh2::Error) -> bool {
    matches!(
        err.code(),
        ErrorCode::SFTP(status::FAILURE | status::FILE_ALREADY_EXISTS)
    )
}

/// Map an `ssh2` error onto the shared classification.
#[must_use]
pub fn classify(err: &ssh2::Error) -> RemoteErrorKind {
    match err.code() {
        ErrorCode::SFTP(status::PERMISSION_DENIED | status::WRITE_PROTECT) => {
            RemoteErrorKind::PermissionDenied
        }
        ErrorCode::SFTP(status::NO_CONNECTION | status::CONNECTION_LOST) => {
            RemoteErrorKind::ConnectionLost
        }
        ErrorCode::Session(session_code::TIMEOUT) => RemoteErrorKind::Timeout,
        ErrorCode::Session(
            session_code::SOCKET_SEND | session_code::SOCKET_DISCONNECT | session_code::SOCKET_RECV,
        ) => RemoteErrorKind::ConnectionLost,
        _ => RemoteErrorKind::Protocol,
    }
}
