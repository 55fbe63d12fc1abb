//! Command line front end shared by `backup-by-ftp` and `backup-by-sftp`

pub mod app;
pub mod args;
pub mod output;
