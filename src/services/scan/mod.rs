//! Local tree walk producing backup candidates.
//!
//! The walk is an explicit-stack depth-first traversal:
//!
//! - A directory is always yielded before anything below it.
//! - Siblings are visited in byte-wise lexicographic order of their names, so
//!   an unchanged tree yields the same sequence on every call.
//! - A child that cannot be read is yielded as [`ScanItem::Unreadable`]; it
//!   never aborts the walk.

pub mod exclude;

pub use exclude::ExcludeSet;

use crate::error::ScanError;
use crate::models::FileEntry;
use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Options controlling which nodes the scanner yields.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub exclude: ExcludeSet,
    pub follow_symlinks: bool,
    /// Depth of the deepest entry to yield; the root's children have depth 1.
    pub max_depth: Option<u16>,
}

/// One element of the scan sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanItem {
    Entry(FileEntry),
    /// Matched an exclude pattern; directories are not descended.
    Excluded { relative_path: String, is_dir: bool },
    Unreadable {
        relative_path: String,
        local_path: PathBuf,
        code: String,
        message: String,
    },
}

impl ScanItem {
    #[must_use]
    pub fn relative_path(&self) -> &str {
        match self {
            ScanItem::Entry(entry) => &entry.relative_path,
            ScanItem::Excluded { relative_path, .. }
            | ScanItem::Unreadable { relative_path, .. } => relative_path,
        }
    }
}

enum Pending {
    Visit {
        path: PathBuf,
        relative_path: String,
        depth: u16,
    },
    Report(ScanItem),
}

/// Lazy iterator over the source tree.
pub struct Scanner {
    stack: Vec<Pending>,
    options: ScanOptions,
}

/// Start a fresh walk of `root`.
///
/// Fails only when the root itself is missing, not a directory, or cannot be
/// listed. Every call re-reads the filesystem.
pub fn scan<P: AsRef<Path>>(root: P, options: &ScanOptions) -> Result<Scanner, ScanError> {
    let root = root.as_ref();

    let metadata = fs::metadata(root).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ScanError::NotFound(root.to_path_buf()),
        _ => ScanError::Io {
            path: root.to_path_buf(),
            source,
        },
    })?;

    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let mut scanner = Scanner {
        stack: Vec::new(),
        options: options.clone(),
    };

    let (children, partial) = sorted_children(root).map_err(|source| ScanError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    if let Some(e) = partial {
        scanner
            .stack
            .push(Pending::Report(unreadable(".".to_string(), root.to_path_buf(), &e)));
    }
    scanner.push_children(root, "", 0, children);

    log::debug!("Scan started at {}", root.display());
    Ok(scanner)
}

impl Scanner {
    fn push_children(
        &mut self,
        dir: &Path,
        parent_relative: &str,
        parent_depth: u16,
        children: Vec<OsString>,
    ) {
        let depth = parent_depth.saturating_add(1);
        for name in children.into_iter().rev() {
            let name_str = name.to_string_lossy();
            let relative_path = if parent_relative.is_empty() {
                name_str.into_owned()
            } else {
                format!("{parent_relative}/{name_str}")
            };
            self.stack.push(Pending::Visit {
                path: dir.join(&name),
                relative_path,
                depth,
            });
        }
    }

    fn visit(&mut self, path: PathBuf, relative_path: String, depth: u16) -> Option<ScanItem> {
        let metadata = match fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) => return Some(unreadable(relative_path, path, &e)),
        };

        let metadata = if metadata.file_type().is_symlink() {
            if !self.options.follow_symlinks {
                log::debug!("Skipping symlink: {relative_path}");
                return None;
            }
            match fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => return Some(unreadable(relative_path, path, &e)),
            }
        } else {
            metadata
        };

        if !metadata.is_file() && !metadata.is_dir() {
            log::debug!("Skipping special file: {relative_path}");
            return None;
        }

        if self.options.exclude.is_excluded(&relative_path) {
            log::debug!("Excluded: {relative_path}");
            return Some(ScanItem::Excluded {
                relative_path,
                is_dir: metadata.is_dir(),
            });
        }

        let modified = match metadata.modified() {
            Ok(t) => DateTime::<Utc>::from(t),
            Err(e) => return Some(unreadable(relative_path, path, &e)),
        };

        let is_dir = metadata.is_dir();
        let entry = FileEntry {
            relative_path,
            local_path: path,
            size_bytes: if is_dir { 0 } else { metadata.len() },
            modified,
            is_dir,
            depth,
        };

        if is_dir {
            let within_depth_limit = self.options.max_depth.is_none_or(|max| depth < max);
            if within_depth_limit {
                match sorted_children(&entry.local_path) {
                    Ok((children, partial)) => {
                        if let Some(e) = partial {
                            self.stack.push(Pending::Report(unreadable(
                                entry.relative_path.clone(),
                                entry.local_path.clone(),
                                &e,
                            )));
                        }
                        let (dir, rel) = (entry.local_path.clone(), entry.relative_path.clone());
                        self.push_children(&dir, &rel, depth, children);
                    }
                    Err(e) => {
                        self.stack.push(Pending::Report(unreadable(
                            entry.relative_path.clone(),
                            entry.local_path.clone(),
                            &e,
                        )));
                    }
                }
            }
            log::debug!("Directory entry: {} (depth: {depth})", entry.relative_path);
        } else {
            log::trace!("File entry: {} (size: {})", entry.relative_path, entry.size_bytes);
        }

        Some(ScanItem::Entry(entry))
    }
}

impl Iterator for Scanner {
    type Item = ScanItem;

    fn next(&mut self) -> Option<ScanItem> {
        while let Some(pending) = self.stack.pop() {
            let item = match pending {
                Pending::Report(item) => Some(item),
                Pending::Visit {
                    path,
                    relative_path,
                    depth,
                } => self.visit(path, relative_path, depth),
            };
            if item.is_some() {
                return item;
            }
        }
        None
    }
}

/// List a directory's child names in sorted order. A failure on an individual
/// directory entry is returned alongside the names that could be read.
fn sorted_children(dir: &Path) -> io::Result<(Vec<OsString>, Option<io::Error>)> {
    let mut names = Vec::new();
    let mut first_error = None;
    for entry in fs::read_dir(dir)? {
        match entry {
            Ok(e) => names.push(e.file_name()),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    names.sort();
    Ok((names, first_error))
}

fn unreadable(relative_path: String, local_path: PathBuf, error: &io::Error) -> ScanItem {
    let code = match error.kind() {
        io::ErrorKind::NotFound => "ENOENT",
        io::ErrorKind::PermissionDenied => "EACCES",
        _ => "IO",
    };
    log::warn!("Unreadable entry {relative_path}: {error}");
    ScanItem::Unreadable {
        relative_path,
        local_path,
        code: code.to_string(),
        message: error.to_string(),
    }
}
