//! Audit log setup.
//!
//! Every session appends to a plain-text log file; stdout is reserved for
//! protocol data and never receives log output. The default `info` filter
//! yields one line per session:
//!
//! ```text
//! 2026-10-19 09:12:44  INFO key-3: ["git-upload-pack", "repo.git"]
//! ```

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

fn audit_subscriber<W>(writer: W, filter: EnvFilter) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    Registry::default().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .with_timer(LocalTime),
    )
}

fn open_log(path: &Path) -> anyhow::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open audit log {}", path.display()))
}

/// Routes this thread's events to `path` until the guard is dropped.
///
/// The gateway runs on a current-thread runtime, so every event of the
/// session is emitted on the thread holding the guard.
pub fn init(path: &Path) -> anyhow::Result<DefaultGuard> {
    let file = open_log(path)?;
    let filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));

    Ok(audit_subscriber(Mutex::new(file), filter).set_default())
}
