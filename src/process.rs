//! Child process execution with the session's stdio wired straight through.
//!
//! `ProcessProxy` is the only place the gateway spawns anything: `git init
//! --bare`, the backup `tar`, and the pack protocol executables all go through
//! it. The child's exit status always comes back to the caller as a `Status`;
//! nothing here assumes success.
//!
//! While a child runs, SIGTERM or SIGHUP sent to the gateway (sshd dropping
//! the connection) is forwarded to the child and the run ends as
//! `GatewayError::Cancelled`. A child still running after a short grace
//! period is killed.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::session::SSH_ORIGINAL_COMMAND;

/// Exit status handed back to sshd when the session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(u8);

impl Status {
    pub const SUCCESS: Status = Status(0);

    pub fn code(self) -> u8 {
        self.0
    }

    pub fn success(self) -> bool {
        self.0 == 0
    }

    /// Signal-terminated children map to 128 + signal, as a shell reports them.
    pub fn from_child(status: std::process::ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Status((code & 0xff) as u8),
            (None, Some(sig)) => Status(128u8.saturating_add(sig as u8)),
            (None, None) => Status(1),
        }
    }
}

impl From<u8> for Status {
    fn from(code: u8) -> Self {
        Status(code)
    }
}

impl From<Status> for std::process::ExitCode {
    fn from(status: Status) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

/// An external command line and the directory it runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub dir: PathBuf,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>, dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            dir: dir.into(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Runs an `Invocation` to completion and reports its exit status.
pub trait CommandRunner {
    async fn run(&self, invocation: &Invocation) -> Result<Status>;
}

enum Input {
    Inherit,
    Null,
}

enum Output {
    Inherit,
    File(File),
}

pub struct ProcessProxy {
    stdin: Input,
    stdout: Output,
    forward_signals: bool,
}

impl ProcessProxy {
    /// Wires children to this process's own stdin and stdout.
    pub fn inherit() -> Self {
        Self {
            stdin: Input::Inherit,
            stdout: Output::Inherit,
            forward_signals: true,
        }
    }

    /// Children read nothing and write their stdout into `file`.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn with_output(file: File) -> Self {
        Self {
            stdin: Input::Null,
            stdout: Output::File(file),
            forward_signals: false,
        }
    }

    fn stdin(&self) -> Stdio {
        match self.stdin {
            Input::Inherit => Stdio::inherit(),
            Input::Null => Stdio::null(),
        }
    }

    fn stdout(&self) -> std::io::Result<Stdio> {
        match &self.stdout {
            Output::Inherit => Ok(Stdio::inherit()),
            Output::File(file) => Ok(Stdio::from(file.try_clone()?)),
        }
    }
}

impl CommandRunner for ProcessProxy {
    async fn run(&self, invocation: &Invocation) -> Result<Status> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.dir)
            .env_remove(SSH_ORIGINAL_COMMAND)
            .stdin(self.stdin())
            .stdout(self.stdout()?)
            .stderr(Stdio::inherit());

        // Installed before the spawn so a hangup in between is not lost.
        let signals = if self.forward_signals {
            Some(Signals::install()?)
        } else {
            None
        };

        debug!(command = %invocation, dir = %invocation.dir.display(), "spawning");
        let mut child = cmd.spawn().map_err(|source| GatewayError::Spawn {
            program: invocation.program.to_string_lossy().into_owned(),
            source,
        })?;

        let status = match signals {
            Some(mut signals) => tokio::select! {
                status = child.wait() => status?,
                signo = signals.recv() => return cancel(&mut child, signo, CANCEL_GRACE).await,
            },
            None => child.wait().await?,
        };

        let status = Status::from_child(status);
        debug!(code = status.code(), success = status.success(), "child exited");
        Ok(status)
    }
}

struct Signals {
    terminate: Signal,
    hangup: Signal,
}

impl Signals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn recv(&mut self) -> i32 {
        tokio::select! {
            _ = self.terminate.recv() => libc::SIGTERM,
            _ = self.hangup.recv() => libc::SIGHUP,
        }
    }
}

/// How long a cancelled child gets to exit after SIGTERM before it is killed.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

async fn cancel(child: &mut Child, signo: i32, grace: Duration) -> Result<Status> {
    warn!(signal = signo, "cancelling child process");
    if let Some(pid) = child.id() {
        // Forwarded as SIGTERM; Child::kill would send SIGKILL.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            status?;
        }
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "child outlived SIGTERM, killing");
            child.kill().await?;
        }
    }
    Err(GatewayError::Cancelled { signal: signo })
}
