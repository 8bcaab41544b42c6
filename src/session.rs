//! Per-connection entry point.
//!
//! sshd starts one gateway process per connection, so a session is the whole
//! life of the process: `GatewaySession::validate` checks the SSH environment
//! and the forced command, `GatewaySession::run` records the audit line and
//! dispatches exactly one command, and the resulting `Status` becomes the
//! process exit code. `serve` strings these together with the audit log.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::command::{Command, Dispatcher, ForcedCommand};
use crate::error::{GatewayError, Result};
use crate::logging;
use crate::process::{CommandRunner, Status};

/// Set by sshd for every remote session.
pub const SSH_CONNECTION: &str = "SSH_CONNECTION";
/// The command the client asked for, substituted by the forced command.
pub const SSH_ORIGINAL_COMMAND: &str = "SSH_ORIGINAL_COMMAND";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Directory holding every bare repository; all children run from here.
    pub root: PathBuf,
    pub git: String,
    pub tar: String,
}

/// The environment variables a session depends on.
#[derive(Debug, Clone, Default)]
pub struct SessionEnv {
    pub ssh_connection: Option<OsString>,
    pub original_command: Option<OsString>,
}

impl SessionEnv {
    pub fn from_process() -> Self {
        Self {
            ssh_connection: std::env::var_os(SSH_CONNECTION),
            original_command: std::env::var_os(SSH_ORIGINAL_COMMAND),
        }
    }
}

#[derive(Debug)]
pub struct GatewaySession {
    key_id: String,
    command: ForcedCommand,
    config: GatewayConfig,
}

impl GatewaySession {
    pub fn validate(config: GatewayConfig, key_id: String, env: &SessionEnv) -> Result<Self> {
        if env.ssh_connection.is_none() {
            return Err(GatewayError::NotSsh);
        }

        let raw = match &env.original_command {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Err(GatewayError::MissingCommand),
        };
        let raw = raw.to_str().ok_or_else(|| {
            GatewayError::MalformedCommand("command is not valid UTF-8".to_string())
        })?;
        let command = ForcedCommand::parse(raw)?;

        Ok(Self {
            key_id,
            command,
            config,
        })
    }

    /// Logs the request, then resolves and dispatches it.
    pub async fn run<R, W>(&self, runner: &R, out: &mut W) -> Result<Status>
    where
        R: CommandRunner,
        W: Write,
    {
        info!("{}: {:?}", self.key_id, self.command.tokens());

        let command = Command::resolve(&self.command)?;
        Dispatcher::new(&self.config, runner)
            .dispatch(command, out)
            .await
    }
}

/// Drives one connection from the environment check to its exit status.
///
/// The audit log is opened only after validation, so a rejected connection
/// leaves no entry and dispatches nothing.
pub async fn serve<R, W, E>(
    config: GatewayConfig,
    key_id: String,
    env: &SessionEnv,
    log_file: &Path,
    runner: &R,
    out: &mut W,
    err: &mut E,
) -> Status
where
    R: CommandRunner,
    W: Write,
    E: Write,
{
    let session = match GatewaySession::validate(config, key_id, env) {
        Ok(session) => session,
        Err(e) => return report(&e, err),
    };

    let _log = match logging::init(log_file) {
        Ok(guard) => guard,
        Err(e) => {
            let _ = writeln!(err, "[!] Error: {:#}", e);
            return Status::from(1);
        }
    };

    match session.run(runner, out).await {
        Ok(status) => status,
        Err(e) => report(&e, err),
    }
}

/// Writes the diagnostic for a failed session and returns its exit status.
pub fn report<E: Write>(error: &GatewayError, err: &mut E) -> Status {
    // Nothing left to report to if stderr is gone.
    let _ = writeln!(err, "[!] Error: {}", error);
    Status::from(error.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingRunner;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn config(root: &std::path::Path) -> GatewayConfig {
        GatewayConfig {
            root: root.to_path_buf(),
            git: "git".to_string(),
            tar: "tar".to_string(),
        }
    }

    fn ssh_env(command: Option<&str>) -> SessionEnv {
        SessionEnv {
            ssh_connection: Some("203.0.113.7 52311 192.0.2.1 22".into()),
            original_command: command.map(OsString::from),
        }
    }

    #[test]
    fn test_requires_ssh_connection() {
        let tmp = tempfile::tempdir().unwrap();
        let env = SessionEnv {
            ssh_connection: None,
            original_command: Some("list".into()),
        };

        let err = GatewaySession::validate(config(tmp.path()), "key-1".into(), &env).unwrap_err();
        assert!(matches!(err, GatewayError::NotSsh));

        let mut stderr = Vec::new();
        let status = report(&err, &mut stderr);
        assert_ne!(status.code(), 0);
        assert_eq!(String::from_utf8(stderr).unwrap(), "[!] Error: Only SSH\n");
    }

    #[test]
    fn test_requires_forced_command() {
        let tmp = tempfile::tempdir().unwrap();
        for env in [ssh_env(None), ssh_env(Some("")), ssh_env(Some("  "))] {
            let err =
                GatewaySession::validate(config(tmp.path()), "key-1".into(), &env).unwrap_err();
            assert!(matches!(err, GatewayError::MissingCommand));
        }
    }

    #[test]
    fn test_rejects_non_utf8_command() {
        use std::os::unix::ffi::OsStringExt;

        let tmp = tempfile::tempdir().unwrap();
        let env = SessionEnv {
            ssh_connection: Some("203.0.113.7 52311 192.0.2.1 22".into()),
            original_command: Some(OsString::from_vec(
                b"git-upload-pack 'caf\xe9.git'".to_vec(),
            )),
        };

        let err = GatewaySession::validate(config(tmp.path()), "key-1".into(), &env).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedCommand(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_validated_session_keeps_parsed_command() {
        let tmp = tempfile::tempdir().unwrap();
        let env = ssh_env(Some("create team 'new repo'"));

        let session = GatewaySession::validate(config(tmp.path()), "key-3".into(), &env).unwrap();
        assert_eq!(session.key_id, "key-3");
        assert_eq!(session.command.tokens(), ["create", "team", "new repo"]);
    }

    #[tokio::test]
    async fn test_unknown_verb_fails_with_diagnostic() {
        let tmp = tempfile::tempdir().unwrap();
        let session =
            GatewaySession::validate(config(tmp.path()), "key-1".into(), &ssh_env(Some("bogus")))
                .unwrap();
        let runner = RecordingRunner::exiting_with(0);

        let mut out = Vec::<u8>::new();
        let err = session.run(&runner, &mut out).await.unwrap_err();

        let mut stderr = Vec::new();
        let status = report(&err, &mut stderr);
        assert_ne!(status.code(), 0);
        assert!(String::from_utf8(stderr).unwrap().contains("bogus"));
        assert!(out.is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_protocol_exit_status_becomes_session_status() {
        let tmp = tempfile::tempdir().unwrap();
        let session = GatewaySession::validate(
            config(tmp.path()),
            "key-1".into(),
            &ssh_env(Some("git-upload-pack 'repo.git'")),
        )
        .unwrap();
        let runner = RecordingRunner::exiting_with(7);

        let status = session.run(&runner, &mut Vec::<u8>::new()).await.unwrap();
        assert_eq!(status.code(), 7);
    }

    #[tokio::test]
    async fn test_non_ssh_connection_leaves_no_log_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let log_file = tmp.path().join("clig.log");
        let env = SessionEnv {
            ssh_connection: None,
            original_command: Some("list".into()),
        };
        let runner = RecordingRunner::exiting_with(0);

        let mut out = Vec::<u8>::new();
        let mut stderr = Vec::new();
        let status = serve(
            config(tmp.path()),
            "key-1".into(),
            &env,
            &log_file,
            &runner,
            &mut out,
            &mut stderr,
        )
        .await;

        assert_eq!(status.code(), GatewayError::NotSsh.exit_code());
        assert!(!log_file.exists());
        assert!(out.is_empty());
        assert!(runner.calls().is_empty());
        assert!(String::from_utf8(stderr).unwrap().contains("Only SSH"));
    }

    #[tokio::test]
    async fn test_served_session_writes_one_audit_line() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("repositories");
        fs::create_dir_all(root.join("x.git")).unwrap();
        let log_file = tmp.path().join("clig.log");
        let runner = RecordingRunner::exiting_with(0);

        let mut out = Vec::new();
        let mut stderr = Vec::<u8>::new();
        let status = serve(
            config(&root),
            "key-2".into(),
            &ssh_env(Some("list")),
            &log_file,
            &runner,
            &mut out,
            &mut stderr,
        )
        .await;

        assert!(status.success());
        assert_eq!(String::from_utf8(out).unwrap(), "x.git\n");
        assert!(stderr.is_empty());

        let log = fs::read_to_string(&log_file).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(r#"key-2: ["list"]"#));
    }

    #[tokio::test]
    async fn test_unopenable_log_fails_before_dispatch() {
        let tmp = tempfile::tempdir().unwrap();
        let log_file = tmp.path().join("missing/clig.log");
        let runner = RecordingRunner::exiting_with(0);

        let mut stderr = Vec::new();
        let status = serve(
            config(tmp.path()),
            "key-1".into(),
            &ssh_env(Some("git-upload-pack 'repo.git'")),
            &log_file,
            &runner,
            &mut Vec::<u8>::new(),
            &mut stderr,
        )
        .await;

        assert_eq!(status.code(), 1);
        assert!(runner.calls().is_empty());
        assert!(String::from_utf8(stderr).unwrap().contains("failed to open audit log"));
    }

    #[tokio::test]
    async fn test_list_session_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("a.git")).unwrap();
        let session =
            GatewaySession::validate(config(tmp.path()), "key-2".into(), &ssh_env(Some("list")))
                .unwrap();

        let mut out = Vec::new();
        let status = session
            .run(&RecordingRunner::exiting_with(0), &mut out)
            .await
            .unwrap();
        assert!(status.success());
        assert_eq!(String::from_utf8(out).unwrap(), "a.git\n");
    }
}
