//! Bare repository discovery under the repository root.
//!
//! A bare repository is any directory whose name ends in `.git`; nothing
//! inside it is inspected. Matched directories are not descended into, and
//! entries are visited in file-name order at every level so `list` and
//! `backup` see the same, stable sequence.
//!
//! A symlink named `*.git` that resolves to a directory is listed as well, but
//! links are never followed while walking, so directories behind a link are not
//! searched. A link whose target is missing is skipped.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::Result;

pub const BARE_SUFFIX: &str = ".git";

/// Lazily walks `root`, yielding the root-relative path of each bare repository.
pub struct RepositoryScanner {
    root: PathBuf,
    walker: walkdir::IntoIter,
}

impl RepositoryScanner {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        let walker = WalkDir::new(&root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        Self { root, walker }
    }
}

impl Iterator for RepositoryScanner {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };

            if !is_bare_name(entry.file_name()) {
                continue;
            }
            if entry.file_type().is_dir() {
                self.walker.skip_current_dir();
            } else if !(entry.path_is_symlink() && entry.path().is_dir()) {
                continue;
            }

            // min_depth(1) guarantees every entry sits below the root.
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry.path().to_path_buf());
            return Some(Ok(relative));
        }
    }
}

fn is_bare_name(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().ends_with(BARE_SUFFIX)
}

/// Collects every repository under `root`; a traversal error aborts the scan.
pub fn scan_repositories<P: AsRef<Path>>(root: P) -> Result<Vec<PathBuf>> {
    RepositoryScanner::new(root).collect()
}
