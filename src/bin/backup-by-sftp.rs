//! Selective backup over SFTP - binary entry point

use ftp_backup::TransportKind;
use ftp_backup::cli::app;
use std::process;

fn main() {
    process::exit(app::main(TransportKind::Sftp));
}
