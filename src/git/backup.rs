//! Whole-root backups as a gzip-compressed tar stream.
//!
//! The archive is produced by an external `tar` run through the session's
//! `CommandRunner`, so it streams straight to the client without being held
//! in memory. Members are exactly the repositories the scanner finds, in scan
//! order.

use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::git::scanner::scan_repositories;
use crate::process::{CommandRunner, Invocation, Status};

/// Fixed flags: gzip, create, preserve permissions, write to stdout.
/// `-T /dev/null` keeps an empty repository set a valid, empty archive.
const TAR_FLAGS: &[&str] = &["-czpf", "-", "-T", "/dev/null", "--"];

pub fn backup_invocation(tar: &str, root: &Path) -> Result<Invocation> {
    let repositories = scan_repositories(root)?;
    debug!(count = repositories.len(), "backing up repositories");

    Ok(Invocation::new(tar, root)
        .args(TAR_FLAGS)
        .args(repositories))
}

pub async fn run_backup<R: CommandRunner>(runner: &R, tar: &str, root: &Path) -> Result<Status> {
    let invocation = backup_invocation(tar, root)?;
    runner.run(&invocation).await
}
