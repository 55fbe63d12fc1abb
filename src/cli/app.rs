//! Glue between arguments, configuration and the engine.

use super::args::{BackupArgs, Invocation, parse_args, usage};
use super::output::{format_json, format_report};
use crate::config::{
    self, BackupConfig, DEFAULT_FTP_HOST, DEFAULT_FTP_USER, DEFAULT_LOCAL_DIR,
    DEFAULT_REMOTE_DIR, DEFAULT_SSH_KEY, DEFAULT_TIMEOUT_SECS, PASSWORD_ENV,
};
use crate::error::{ConfigError, RunError};
use crate::models::RunResult;
use crate::services::orchestrate::BackupEngine;
use crate::services::sink::LogSink;
use crate::transport::ftp::FtpTransport;
use crate::transport::sftp::SftpTransport;
use crate::transport::{Credentials, Endpoint, Secret, Timeouts, Transport, TransportKind};
use crate::{BackupOptions, CancelToken};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FAILURE: i32 = 2;

/// Everything a run needs, after merging command line, config file and
/// defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub local_dir: PathBuf,
    pub endpoint: Endpoint,
    pub credentials: Credentials,
    pub options: BackupOptions,
    /// FTP only.
    pub passive: bool,
    pub json: bool,
}

/// Merge sources: command line over config file over defaults.
pub fn resolve(
    kind: TransportKind,
    args: &BackupArgs,
    config: &BackupConfig,
) -> Result<Settings, ConfigError> {
    config.validate()?;

    let password = args
        .password
        .clone()
        .or_else(|| std::env::var(PASSWORD_ENV).ok().filter(|p| !p.is_empty()));

    let (endpoint, credentials, passive) = match kind {
        TransportKind::Ftp => {
            let section = &config.ftp;
            let host = pick(&args.host, &section.host).unwrap_or_else(|| DEFAULT_FTP_HOST.into());
            let port = args.port.or(config.ftp_port()).unwrap_or(kind.default_port());
            let user = pick(&args.user, &section.user).unwrap_or_else(|| DEFAULT_FTP_USER.into());
            let secret = password
                .or_else(|| section.password.clone())
                .map_or(Secret::None, Secret::Password);
            let remote_dir = pick(&args.remote_dir, &section.remote_dir)
                .unwrap_or_else(|| DEFAULT_REMOTE_DIR.into());
            let passive = !args.active && section.passive.unwrap_or(true);
            (
                Endpoint::new(host, port, remote_dir),
                Credentials::new(user, secret),
                passive,
            )
        }
        TransportKind::Sftp => {
            let section = &config.sftp;
            let host = pick(&args.host, &section.host).ok_or_else(|| ConfigError::InvalidValue {
                key: "sftp.host".to_string(),
                message: "no SSH host given (use --host or the config file)".to_string(),
            })?;
            let port = args.port.or(config.sftp_port()).unwrap_or(kind.default_port());
            let user = pick(&args.user, &section.user)
                .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "sftp.user".to_string(),
                    message: "no SSH user given (use --user)".to_string(),
                })?;
            let remote_dir = pick(&args.remote_dir, &section.remote_dir)
                .unwrap_or_else(|| DEFAULT_REMOTE_DIR.into());
            let secret = sftp_secret(args, password, config);
            (
                Endpoint::new(host, port, remote_dir),
                Credentials::new(user, secret),
                true,
            )
        }
    };

    let timeout = Duration::from_secs(
        args.timeout_secs
            .or(config.timeout)
            .unwrap_or(DEFAULT_TIMEOUT_SECS),
    );
    let defaults = BackupOptions::default();
    let mut exclude_patterns = config.exclude.clone();
    exclude_patterns.extend(args.exclude.iter().cloned());

    let options = BackupOptions {
        exclude_patterns,
        dry_run: args.dry_run,
        max_retries: args.retries.or(config.retries).unwrap_or(defaults.max_retries),
        concurrency: args
            .concurrency
            .or(config.concurrency)
            .unwrap_or(defaults.concurrency),
        force_full_upload: args.force,
        timeouts: Timeouts {
            connect: timeout,
            io: timeout,
        },
        follow_symlinks: args.follow_symlinks,
        max_depth: args.max_depth,
        ..defaults
    };

    let local_dir = args
        .local_dir
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| config.local_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_DIR));

    Ok(Settings {
        local_dir,
        endpoint,
        credentials,
        options,
        passive,
        json: args.json,
    })
}

fn pick(cli: &Option<String>, file: &Option<String>) -> Option<String> {
    cli.clone()
        .or_else(|| file.clone())
        .filter(|v| !v.trim().is_empty())
}

/// SSH authentication: agent or key given on the command line, then a
/// password, then a configured key, then the default key if it exists, and
/// finally the agent.
fn sftp_secret(args: &BackupArgs, password: Option<String>, config: &BackupConfig) -> Secret {
    let section = &config.sftp;
    let key = |path: &Path| Secret::KeyFile {
        path: config::expand_home(path),
        passphrase: section.passphrase.clone(),
    };

    if args.agent {
        return Secret::Agent;
    }
    if let Some(path) = &args.ssh_key {
        return key(Path::new(path));
    }
    if let Some(password) = password {
        return Secret::Password(password);
    }
    if let Some(path) = &section.key_file {
        return key(path);
    }
    if let Some(password) = &section.password {
        return Secret::Password(password.clone());
    }
    let default_key = config::expand_home(Path::new(DEFAULT_SSH_KEY));
    if default_key.is_file() {
        key(&default_key)
    } else {
        Secret::Agent
    }
}

/// Map a run outcome to the process exit status.
#[must_use]
pub fn exit_code(outcome: &Result<RunResult, RunError>) -> i32 {
    match outcome {
        Ok(result) if result.is_complete_success() => EXIT_SUCCESS,
        Ok(_) => EXIT_PARTIAL,
        Err(_) => EXIT_FAILURE,
    }
}

/// `-v` = info, `-vv` = debug, `-vvv` = trace. `RUST_LOG` still wins.
pub fn init_logger(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init();
}

/// Ctrl-C and SIGTERM stop scheduling new transfers.
fn install_interrupt_handler(cancel: &CancelToken) {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, cancel.flag()) {
            log::warn!("Cannot install handler for signal {signal}: {err}");
        }
    }
}

fn print_version(program: &str) {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");
    const GIT_DATE: &str = env!("GIT_DATE");
    const BUILD_TARGET: &str = env!("BUILD_TARGET");

    println!("{program} {VERSION}");
    println!("Commit: {GIT_HASH} ({GIT_DATE})");
    println!("Target: {BUILD_TARGET}");
}

fn print_outcome(outcome: &Result<RunResult, RunError>, json: bool) {
    let render = |result: &RunResult| {
        if json {
            println!("{}", format_json(result));
        } else {
            print!("{}", format_report(result));
        }
    };

    match outcome {
        Ok(result) => render(result),
        Err(err) => {
            eprintln!("Error: {err}");
            if let Some(partial) = err.partial_result() {
                render(partial);
            }
        }
    }
}

/// Entry point used by both binaries.
pub fn main(kind: TransportKind) -> i32 {
    let mut argv = std::env::args();
    let program = argv
        .next()
        .as_deref()
        .and_then(|p| Path::new(p).file_name())
        .map_or_else(
            || format!("backup-by-{}", kind.as_str()),
            |name| name.to_string_lossy().into_owned(),
        );
    let args: Vec<String> = argv.collect();
    run(kind, &program, &args)
}

/// Parse `args`, run one backup, print the report, return the exit status.
pub fn run(kind: TransportKind, program: &str, args: &[String]) -> i32 {
    let args = match parse_args(args, kind) {
        Ok(Invocation::Run(args)) => args,
        Ok(Invocation::Help) => {
            print!("{}", usage(program, kind));
            return EXIT_SUCCESS;
        }
        Ok(Invocation::Version) => {
            print_version(program);
            return EXIT_SUCCESS;
        }
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Use --help for usage information");
            return EXIT_FAILURE;
        }
    };

    init_logger(args.verbose, args.quiet);

    let config = match BackupConfig::load_or_default(args.config.as_deref().map(Path::new)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_FAILURE;
        }
    };
    let settings = match resolve(kind, &args, &config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e}");
            return EXIT_FAILURE;
        }
    };

    install_interrupt_handler(&settings.options.cancel);

    let transport: Box<dyn Transport> = match kind {
        TransportKind::Ftp => Box::new(FtpTransport::new(settings.passive)),
        TransportKind::Sftp => Box::new(SftpTransport::new()),
    };
    let engine = BackupEngine::new(transport).with_sink(Arc::new(LogSink));

    log::info!(
        "Backing up {} to {} as '{}'{}",
        settings.local_dir.display(),
        settings.endpoint,
        settings.credentials.user,
        if settings.options.dry_run { " (simulation)" } else { "" }
    );

    let outcome = engine.run(
        &settings.local_dir,
        &settings.endpoint,
        &settings.credentials,
        &settings.options,
    );
    print_outcome(&outcome, settings.json);
    exit_code(&outcome)
}
