//! Selective backup over FTP - binary entry point

use ftp_backup::TransportKind;
use ftp_backup::cli::app;
use std::process;

fn main() {
    process::exit(app::main(TransportKind::Ftp));
}
