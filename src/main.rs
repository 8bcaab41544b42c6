//! clig-shell - a forced-command git gateway for SSH
//!
//! # Usage
//! Install as the forced command of the hosting account, one key per line:
//! ```text
//! command="clig-shell key-3",no-pty,no-port-forwarding ssh-ed25519 AAAA... alice@laptop
//! ```
//!
//! Clients then talk to it with plain ssh and git:
//! ```bash
//! ssh clig@host list                # one repository per line
//! ssh clig@host create team project # git init --bare team/project.git
//! ssh clig@host backup > all.tar.gz # every repository, tar.gz on stdout
//! git clone clig@host:team/project.git
//! ```

mod command;
mod error;
mod git;
mod logging;
mod process;
mod session;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use error::GatewayError;
use process::ProcessProxy;
use session::{GatewayConfig, SessionEnv, report, serve};

/// Forced-command git gateway for SSH
#[derive(Parser)]
#[command(name = "clig-shell")]
#[command(about = "Serve bare git repositories to SSH forced-command sessions", long_about = None)]
struct Cli {
    /// Identifier of the key that opened this session, recorded in the audit log
    #[arg(value_name = "KEY_ID")]
    key_id: String,

    /// Directory holding the bare repositories
    #[arg(long, env = "CLIG_ROOT", default_value = "repositories")]
    root: PathBuf,

    /// Audit log, appended to once per session
    #[arg(long, env = "CLIG_LOG_FILE", default_value = "clig.log")]
    log_file: PathBuf,

    /// git executable used to initialise repositories
    #[arg(long, env = "CLIG_GIT", default_value = "git")]
    git: String,

    /// tar executable used for backups
    #[arg(long, env = "CLIG_TAR", default_value = "tar")]
    tar: String,
}

/// Help and version requests are not failures; anything else clap rejects
/// gets its own exit code, distinct from every session failure.
fn argument_failure(e: &clap::Error) -> Option<GatewayError> {
    e.use_stderr()
        .then(|| GatewayError::InvalidArguments(e.to_string().trim().to_string()))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match argument_failure(&e) {
            Some(err) => return report(&err, &mut std::io::stderr()).into(),
            None => {
                let _ = e.print();
                return ExitCode::SUCCESS;
            }
        },
    };

    let config = GatewayConfig {
        root: cli.root,
        git: cli.git,
        tar: cli.tar,
    };

    let runner = ProcessProxy::inherit();
    serve(
        config,
        cli.key_id,
        &SessionEnv::from_process(),
        &cli.log_file,
        &runner,
        &mut std::io::stdout().lock(),
        &mut std::io::stderr(),
    )
    .await
    .into()
}
