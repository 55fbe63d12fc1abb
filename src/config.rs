//! JSON configuration file.
//!
//! ```json
//! {
//!   "local_dir": "/var/backup",
//!   "exclude": ["*.tmp", "cache/"],
//!   "retries": 3,
//!   "concurrency": 2,
//!   "timeout": 60,
//!   "ftp":  { "host": "ftp.example.org", "user": "backup", "password": "...", "passive": true, "remote_dir": "/backup" },
//!   "sftp": { "host": "ssh.example.org", "port": 22, "user": "backup", "key_file": "~/.ssh/id_rsa", "remote_dir": "/backup" }
//! }
//! ```
//!
//! Every key is optional. Values given on the command line win over the file,
//! the file wins over built-in defaults.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "FTP_BACKUP_CONFIG";
/// Environment variable holding the login password.
pub const PASSWORD_ENV: &str = "FTP_BACKUP_PASSWORD";

pub const DEFAULT_LOCAL_DIR: &str = "/var/backup";
pub const DEFAULT_FTP_HOST: &str = "ftp";
pub const DEFAULT_FTP_USER: &str = "anonymous";
pub const DEFAULT_SSH_KEY: &str = "~/.ssh/id_rsa";
pub const DEFAULT_REMOTE_DIR: &str = "/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupConfig {
    pub local_dir: Option<PathBuf>,
    pub exclude: Vec<String>,
    pub retries: Option<u32>,
    pub concurrency: Option<usize>,
    /// Seconds, applied to connect and socket I/O.
    pub timeout: Option<u64>,
    pub ftp: FtpSection,
    pub sftp: SftpSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FtpSection {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub passive: Option<bool>,
    pub remote_dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SftpSection {
    pub host: Option<String>,
    pub port: Option<i64>,
    pub user: Option<String>,
    pub key_file: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub password: Option<String>,
    pub remote_dir: Option<String>,
}

impl BackupConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// The file to load: `explicit` if given, else `$FTP_BACKUP_CONFIG`.
    #[must_use]
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        explicit.map(Path::to_path_buf).or_else(|| {
            std::env::var_os(CONFIG_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
    }

    /// Load the located file, or an empty config when there is none.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match Self::locate(explicit) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_port("ftp.port", self.ftp.port)?;
        validate_port("sftp.port", self.sftp.port)?;
        if self.concurrency == Some(0) {
            return Err(invalid("concurrency", "must be at least 1"));
        }
        if self.timeout == Some(0) {
            return Err(invalid("timeout", "must be greater than zero"));
        }
        Ok(())
    }

    #[must_use]
    pub fn ftp_port(&self) -> Option<u16> {
        self.ftp.port.and_then(|p| u16::try_from(p).ok())
    }

    #[must_use]
    pub fn sftp_port(&self) -> Option<u16> {
        self.sftp.port.and_then(|p| u16::try_from(p).ok())
    }
}

/// Ports must lie in `1..=65535`.
pub fn validate_port(key: &str, port: Option<i64>) -> Result<(), ConfigError> {
    match port {
        Some(p) if !(1..=65535).contains(&p) => Err(invalid(
            key,
            &format!("{p} is not a valid port (1-65535)"),
        )),
        _ => Ok(()),
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Expand a leading `~/` using `$HOME`.
#[must_use]
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}
