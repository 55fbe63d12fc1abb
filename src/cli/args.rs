//! CLI argument parsing shared by both entry points

use crate::transport::TransportKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(BackupArgs),
    Help,
    Version,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupArgs {
    pub local_dir: Option<String>,
    pub config: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssh_key: Option<String>,
    pub agent: bool,
    pub remote_dir: Option<String>,
    pub exclude: Vec<String>,
    pub dry_run: bool,
    pub force: bool,
    pub retries: Option<u32>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub active: bool,
    pub follow_symlinks: bool,
    pub max_depth: Option<u16>,
    pub json: bool,
    pub quiet: bool,
    pub verbose: u8,
}

/// Parse the arguments after the program name.
pub fn parse_args(args: &[String], kind: TransportKind) -> Result<Invocation, String> {
    let mut parsed = BackupArgs::default();
    let mut i = 0;

    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "-h" | "--help" => return Ok(Invocation::Help),
            "-V" | "--version" => return Ok(Invocation::Version),
            "-D" | "--dir" | "--local-dir" => {
                parsed.local_dir = Some(value(args, &mut i)?.to_string());
            }
            "-c" | "--config" => parsed.config = Some(value(args, &mut i)?.to_string()),
            "--host" => parsed.host = Some(value(args, &mut i)?.to_string()),
            "--port" => {
                let port: u16 = number(args, &mut i)?;
                if port == 0 {
                    return Err("--port must be between 1 and 65535".to_string());
                }
                parsed.port = Some(port);
            }
            "--user" => parsed.user = Some(value(args, &mut i)?.to_string()),
            "--password" => parsed.password = Some(value(args, &mut i)?.to_string()),
            "--remote-dir" => parsed.remote_dir = Some(value(args, &mut i)?.to_string()),
            "-x" | "--exclude" => parsed.exclude.push(value(args, &mut i)?.to_string()),
            "-t" | "--test" | "--dry-run" => parsed.dry_run = true,
            "-f" | "--force" => parsed.force = true,
            "--retries" => parsed.retries = Some(number(args, &mut i)?),
            "-j" | "--concurrency" => {
                let n: usize = number(args, &mut i)?;
                if n == 0 {
                    return Err("--concurrency must be at least 1".to_string());
                }
                parsed.concurrency = Some(n);
            }
            "--timeout" => {
                let secs: u64 = number(args, &mut i)?;
                if secs == 0 {
                    return Err("--timeout must be greater than zero".to_string());
                }
                parsed.timeout_secs = Some(secs);
            }
            "--follow-symlinks" => parsed.follow_symlinks = true,
            "--max-depth" => parsed.max_depth = Some(number(args, &mut i)?),
            "--json" => parsed.json = true,
            "-q" | "--quiet" => parsed.quiet = true,
            "--active" if kind == TransportKind::Ftp => parsed.active = true,
            "-K" | "--ssh-key" if kind == TransportKind::Sftp => {
                parsed.ssh_key = Some(value(args, &mut i)?.to_string());
            }
            "--agent" if kind == TransportKind::Sftp => parsed.agent = true,
            _ if is_verbose_cluster(arg) => {
                let count = u8::try_from(arg.len() - 1).unwrap_or(u8::MAX);
                parsed.verbose = parsed.verbose.saturating_add(count);
            }
            "--verbose" => parsed.verbose = parsed.verbose.saturating_add(1),
            _ if !arg.starts_with('-') => {
                if parsed.local_dir.is_none() {
                    parsed.local_dir = Some(arg.to_string());
                } else {
                    return Err(format!("Unexpected argument: {arg}"));
                }
            }
            _ => return Err(format!("Unknown option: {arg}")),
        }
        i += 1;
    }

    if parsed.ssh_key.is_some() && parsed.agent {
        return Err("--ssh-key and --agent are mutually exclusive".to_string());
    }

    Ok(Invocation::Run(parsed))
}

/// `-v`, `-vv`, `-vvv`, ...
fn is_verbose_cluster(arg: &str) -> bool {
    arg.len() >= 2 && arg.starts_with('-') && arg[1..].bytes().all(|b| b == b'v')
}

fn value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str, String> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn number<T: std::str::FromStr>(args: &[String], i: &mut usize) -> Result<T, String> {
    let flag = args[*i].clone();
    let raw = value(args, i)?;
    raw.parse()
        .map_err(|_| format!("{flag} must be a number, got '{raw}'"))
}

/// Usage text for one entry point.
#[must_use]
pub fn usage(program: &str, kind: TransportKind) -> String {
    let transport_options = match kind {
        TransportKind::Ftp => {
            "FTP OPTIONS:
    --host HOST           FTP server (default: ftp)
    --port PORT           FTP port (default: 21)
    --user USER           Login name (default: anonymous)
    --password PASSWORD   Login password (or $FTP_BACKUP_PASSWORD)
    --active              Use active instead of passive mode
    --remote-dir DIR      Remote directory to back up into (default: /)"
        }
        TransportKind::Sftp => {
            "SSH/SFTP OPTIONS:
    --host HOST           SSH server
    --port PORT           SSH port (default: 22)
    --user USER           Login name (default: $USER)
    -K, --ssh-key FILE    Private key file (default: ~/.ssh/id_rsa)
    --password PASSWORD   Password login instead of a key (or $FTP_BACKUP_PASSWORD)
    --agent               Authenticate through ssh-agent
    --remote-dir DIR      Remote directory to back up into (default: /)"
        }
    };

    format!(
        "{program} - Selective backup of a local directory via {}

USAGE:
    {program} [OPTIONS] [LOCAL_DIR]

OPTIONS:
    -D, --local-dir DIR   Directory to back up (default: /var/backup)
    -c, --config FILE     JSON configuration file (or $FTP_BACKUP_CONFIG)
    -x, --exclude GLOB    Skip matching entries (repeatable)
    -t, --test            Simulate: decide and report, transfer nothing
    -f, --force           Upload every file regardless of remote state
    --retries N           Retries per failing file (default: 3)
    -j, --concurrency N   Parallel sessions for uploads (default: 1)
    --timeout SECS        Connect and I/O timeout (default: 60)
    --follow-symlinks     Follow symbolic links
    --max-depth N         Limit traversal depth
    --json                Print the run result as JSON
    -q, --quiet           Only log errors
    -v, --verbose         More log output (repeatable)
    -h, --help            Print help
    -V, --version         Print version

{transport_options}

EXIT STATUS:
    0  every candidate was uploaded or skipped
    1  some entries failed (see report)
    2  the run could not be performed
",
        kind.as_str().to_uppercase()
    )
}
