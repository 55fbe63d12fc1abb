//! FTP backend built on `suppaftp`.
//!
//! Metadata comes from the optional `SIZE` and `MDTM` extensions. When a
//! server does not implement `SIZE` the probe falls back to parsing `LIST`;
//! when `MDTM` is missing the remote mtime is reported as unknown, which makes
//! the selection policy upload again.
//!
//! Uploads go to a temporary sibling name and are renamed into place. FTP
//! gives no atomicity guarantee for `RNFR`/`RNTO`, and some servers refuse to
//! rename over an existing file with a plain `550`. Only in that case, and
//! only after checking the destination really exists, the old file is deleted
//! and the rename repeated; the final name is briefly absent but never holds
//! a partially written file. Any other refusal leaves the destination alone
//! and removes the temporary.

pub mod listing;

use super::{Credentials, Endpoint, Secret, Session, Timeouts, Transport, TransportKind};
use super::{CountingReader, ancestor_chain, temporary_name};
use crate::error::{ConnectionError, RemoteErrorKind, RemoteIoError, TransferError};
use crate::models::RemoteStatus;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};

/// Password used for anonymous logins when none is configured.
pub const ANONYMOUS_PASSWORD: &str = "anonymous@";

/// FTP reply codes the backend reacts to.
mod reply {
    pub const SERVICE_NOT_AVAILABLE: u32 = 421;
    pub const NOT_LOGGED_IN: u32 = 530;
    pub const NEED_ACCOUNT: u32 = 532;
    pub const FILE_UNAVAILABLE: u32 = 550;
    pub const ACTION_NOT_TAKEN: u32 = 450;
    pub const NAME_NOT_ALLOWED: u32 = 553;
    pub const DIRECTORY_EXISTS: u32 = 521;

    /// Syntax errors and unimplemented commands (500..=504).
    pub fn is_unsupported(code: u32) -> bool {
        (500..=504).contains(&code)
    }
}

/// Factory for FTP sessions.
#[derive(Debug, Clone, Copy)]
pub struct FtpTransport {
    pub passive: bool,
}

impl Default for FtpTransport {
    fn default() -> Self {
        Self { passive: true }
    }
}

impl FtpTransport {
    #[must_use]
    pub fn new(passive: bool) -> Self {
        Self { passive }
    }
}

impl Transport for FtpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ftp
    }

    fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        timeouts: &Timeouts,
    ) -> Result<Box<dyn Session>, ConnectionError> {
        let host = endpoint.host.clone();
        let addr = resolve(&endpoint.host, endpoint.port)?;

        let mut stream =
            FtpStream::connect_timeout(addr, timeouts.connect).map_err(|err| match err {
                FtpError::ConnectionError(source) => ConnectionError::Unreachable {
                    host: host.clone(),
                    port: endpoint.port,
                    source,
                },
                other => ConnectionError::Negotiation {
                    host: host.clone(),
                    message: other.to_string(),
                },
            })?;

        let socket = stream.get_ref();
        if let Err(err) = socket
            .set_read_timeout(Some(timeouts.io))
            .and_then(|()| socket.set_write_timeout(Some(timeouts.io)))
        {
            log::warn!("Failed to set socket timeouts for {host}: {err}");
        }

        let password = match &credentials.secret {
            Secret::Password(p) => p.clone(),
            Secret::None => ANONYMOUS_PASSWORD.to_string(),
            Secret::KeyFile { .. } | Secret::Agent => {
                return Err(ConnectionError::Negotiation {
                    host,
                    message: "FTP supports password logins only".to_string(),
                });
            }
        };

        stream
            .login(credentials.user.as_str(), password.as_str())
            .map_err(|err| match reply_code(&err) {
                Some(reply::NOT_LOGGED_IN | reply::NEED_ACCOUNT) => ConnectionError::Auth {
                    host: host.clone(),
                    user: credentials.user.clone(),
                    message: err.to_string(),
                },
                _ => ConnectionError::Negotiation {
                    host: host.clone(),
                    message: err.to_string(),
                },
            })?;

        let negotiation = |err: FtpError| ConnectionError::Negotiation {
            host: host.clone(),
            message: err.to_string(),
        };
        stream.transfer_type(FileType::Binary).map_err(negotiation)?;
        stream.set_mode(if self.passive { Mode::Passive } else { Mode::Active });
        let home = stream.pwd().map_err(negotiation)?;

        log::info!(
            "FTP session to {endpoint} established as '{}' (home: {home})",
            credentials.user
        );

        Ok(Box::new(FtpSession {
            stream,
            home,
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

/// An authenticated FTP control connection.
pub struct FtpSession {
    stream: FtpStream,
    home: String,
    known_dirs: HashSet<String>,
}

impl FtpSession {
    /// Check whether `path` is an existing directory by changing into it.
    fn is_directory(&mut self, path: &str) -> Result<bool, RemoteIoError> {
        match self.stream.cwd(path) {
            Ok(()) => {
                self.stream
                    .cwd(self.home.as_str())
                    .map_err(|err| remote_error(&self.home, &err))?;
                Ok(true)
            }
            Err(err) if reply_code(&err).is_some() => Ok(false),
            Err(err) => Err(remote_error(path, &err)),
        }
    }

    /// A rename refused only because the destination already exists: a plain
    /// `550` with no permission complaint, and the destination is a file.
    fn refused_over_existing(&mut self, err: &FtpError, remote_path: &str) -> bool {
        if reply_code(err) != Some(reply::FILE_UNAVAILABLE) || is_permission_denied(err) {
            return false;
        }
        matches!(
            self.probe(remote_path),
            Ok(RemoteStatus {
                exists: true,
                size_bytes: Some(_),
                ..
            })
        )
    }

    /// Remove a temporary upload unless the connection is gone.
    fn discard_temporary(&mut self, temporary: &str, kind: RemoteErrorKind) {
        if kind == RemoteErrorKind::ConnectionLost {
            return;
        }
        if let Err(err) = self.stream.rm(temporary) {
            log::warn!("Could not remove temporary upload {temporary}: {err}");
        }
    }

    fn probe_by_listing(&mut self, remote_path: &str) -> Result<RemoteStatus, RemoteIoError> {
        log::debug!("SIZE unsupported, falling back to LIST for {remote_path}");
        let lines = match self.stream.list(Some(remote_path)) {
            Ok(lines) => lines,
            Err(err)
                if matches!(
                    reply_code(&err),
                    Some(reply::FILE_UNAVAILABLE | reply::ACTION_NOT_TAKEN)
                ) && !is_permission_denied(&err) =>
            {
                return Ok(RemoteStatus::missing());
            }
            Err(err) => return Err(remote_error(remote_path, &err)),
        };

        let name = remote_path.rsplit('/').next().unwrap_or(remote_path);
        Ok(match listing::find_entry(&lines, name) {
            Some(entry) if !entry.is_dir() => RemoteStatus::present(entry.size_bytes, None),
            Some(_) => RemoteStatus {
                exists: true,
                size_bytes: None,
                modified: None,
            },
            None => RemoteStatus::missing(),
        })
    }
}

impl Session for FtpSession {
    fn ensure_directory(&mut self, remote_path: &str) -> Result<(), RemoteIoError> {
        for dir in ancestor_chain(remote_path) {
            if self.known_dirs.contains(&dir) {
                continue;
            }
            match self.stream.mkdir(dir.as_str()) {
                Ok(()) => log::debug!("Created remote directory {dir}"),
                Err(err)
                    if matches!(
                        reply_code(&err),
                        Some(reply::FILE_UNAVAILABLE | reply::DIRECTORY_EXISTS)
                    ) =>
                {
                    if !self.is_directory(&dir)? {
                        return Err(remote_error(&dir, &err));
                    }
                }
                Err(err) => return Err(remote_error(&dir, &err)),
            }
            self.known_dirs.insert(dir);
        }
        Ok(())
    }

    fn probe(&mut self, remote_path: &str) -> Result<RemoteStatus, RemoteIoError> {
        let size = match self.stream.size(remote_path) {
            Ok(size) => size as u64,
            Err(err) => match reply_code(&err) {
                Some(code) if reply::is_unsupported(code) => {
                    return self.probe_by_listing(remote_path);
                }
                Some(reply::FILE_UNAVAILABLE) if !is_permission_denied(&err) => {
                    return Ok(RemoteStatus::missing());
                }
                _ => return Err(remote_error(remote_path, &err)),
            },
        };

        let modified = match self.stream.mdtm(remote_path) {
            Ok(naive) => Some(naive.and_utc()),
            Err(err) => match reply_code(&err) {
                Some(_) => {
                    log::debug!("MDTM not available for {remote_path}: {err}");
                    None
                }
                None => return Err(remote_error(remote_path, &err)),
            },
        };

        Ok(RemoteStatus::present(size, modified))
    }

    fn upload(
        &mut self,
        local_path: &Path,
        remote_path: &str,
        _modified: DateTime<Utc>,
    ) -> Result<u64, TransferError> {
        let file = File::open(local_path).map_err(|err| {
            TransferError::new(remote_path, RemoteErrorKind::LocalIo, 0, err.to_string())
        })?;
        let mut reader = CountingReader::new(BufReader::new(file));
        let temporary = temporary_name(remote_path);

        if let Err(err) = self.stream.put_file(temporary.as_str(), &mut reader) {
            let kind = reader.local_error_kind().unwrap_or_else(|| classify(&err));
            self.discard_temporary(&temporary, kind);
            return Err(TransferError::new(
                remote_path,
                kind,
                reader.count(),
                err.to_string(),
            ));
        }

        let written = reader.count();
        let Err(first) = self.stream.rename(temporary.as_str(), remote_path) else {
            return Ok(written);
        };

        let failure = |err: &FtpError| {
            TransferError::new(remote_path, classify(err), written, err.to_string())
        };
        if !self.refused_over_existing(&first, remote_path) {
            self.discard_temporary(&temporary, classify(&first));
            return Err(failure(&first));
        }

        log::debug!("Rename over {remote_path} refused ({first}), replacing");
        if let Err(err) = self.stream.rm(remote_path) {
            self.discard_temporary(&temporary, classify(&err));
            return Err(failure(&err));
        }
        self.stream
            .rename(temporary.as_str(), remote_path)
            .map_err(|err| {
                log::warn!(
                    "Removed {remote_path} but could not rename {temporary} into place: {err}"
                );
                failure(&err)
            })?;

        Ok(written)
    }

    fn disconnect(mut self: Box<Self>) -> Result<(), RemoteIoError> {
        self.stream
            .quit()
            .map_err(|err| remote_error(&self.home, &err))
    }
}

fn is_permission_denied(err: &FtpError) -> bool {
    classify(err) == RemoteErrorKind::PermissionDenied
}

fn reply_code(err: &FtpError) -> Option<u32> {
    match err {
        FtpError::UnexpectedResponse(response) => Some(response.status.code()),
        _ => None,
    }
}

/// Map a `suppaftp` error onto the shared classification.
#[must_use]
pub fn classify(err: &FtpError) -> RemoteErrorKind {
    match err {
        FtpError::ConnectionError(io_err) => match RemoteErrorKind::from_io(io_err) {
            RemoteErrorKind::Timeout => RemoteErrorKind::Timeout,
            _ => RemoteErrorKind::ConnectionLost,
        },
        FtpError::UnexpectedResponse(response) => {
            let code = response.status.code();
            let body = String::from_utf8_lossy(&response.body).to_ascii_lowercase();
            classify_reply(code, &body)
        }
        _ => RemoteErrorKind::Protocol,
    }
}

/// Classification of a negative FTP reply.
#[must_use]
pub fn classify_reply(code: u32, message: &str) -> RemoteErrorKind {
    match code {
        reply::SERVICE_NOT_AVAILABLE => RemoteErrorKind::ConnectionLost,
        reply::NOT_LOGGED_IN | reply::NEED_ACCOUNT | reply::NAME_NOT_ALLOWED => {
            RemoteErrorKind::PermissionDenied
        }
        _ if message.to_ascii_lowercase().contains("permission denied") => {
            RemoteErrorKind::PermissionDenied
        }
        _ => RemoteErrorKind::Protocol,
    }
}

fn remote_error(path: &str, err: &FtpError) -> RemoteIoError {
    RemoteIoError::new(path, classify(err), err.to_string())
}
