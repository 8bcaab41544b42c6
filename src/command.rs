//! Forced command parsing and the verb allowlist.
//!
//! `ForcedCommand` tokenizes `SSH_ORIGINAL_COMMAND` with shell quoting rules.
//! `Command::resolve` is the allowlist: a verb that is not matched here is
//! rejected before anything touches the filesystem. `Dispatcher` runs the
//! resolved command against the repository root.

use std::io::Write;

use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::git::{RepositoryPath, RepositoryScanner, run_backup};
use crate::process::{CommandRunner, Invocation, Status};
use crate::session::GatewayConfig;

/// The remote caller's command line, split into a verb and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedCommand {
    tokens: Vec<String>,
}

impl ForcedCommand {
    pub fn parse(raw: &str) -> Result<Self> {
        let tokens =
            shell_words::split(raw).map_err(|e| GatewayError::MalformedCommand(e.to_string()))?;
        if tokens.is_empty() {
            return Err(GatewayError::MissingCommand);
        }
        Ok(Self { tokens })
    }

    pub fn verb(&self) -> &str {
        &self.tokens[0]
    }

    pub fn args(&self) -> &[String] {
        &self.tokens[1..]
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

/// Pack protocol executables, proxied with a validated repository path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolCommand {
    UploadPack,
    ReceivePack,
    UploadArchive,
}

impl ProtocolCommand {
    pub fn program(self) -> &'static str {
        match self {
            ProtocolCommand::UploadPack => "git-upload-pack",
            ProtocolCommand::ReceivePack => "git-receive-pack",
            ProtocolCommand::UploadArchive => "git-upload-archive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    List,
    Create(&'a [String]),
    Backup,
    Install,
    PassThrough(ProtocolCommand, &'a [String]),
}

impl<'a> Command<'a> {
    pub fn resolve(command: &'a ForcedCommand) -> Result<Self> {
        let args = command.args();
        let resolved = match command.verb() {
            "list" => Command::List,
            "create" => Command::Create(args),
            "backup" => Command::Backup,
            "install" => Command::Install,
            "git-upload-pack" => Command::PassThrough(ProtocolCommand::UploadPack, args),
            "git-receive-pack" => Command::PassThrough(ProtocolCommand::ReceivePack, args),
            "git-upload-archive" => Command::PassThrough(ProtocolCommand::UploadArchive, args),
            other => return Err(GatewayError::UnknownCommand(other.to_string())),
        };
        Ok(resolved)
    }
}

pub struct Dispatcher<'a, R> {
    config: &'a GatewayConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner> Dispatcher<'a, R> {
    pub fn new(config: &'a GatewayConfig, runner: &'a R) -> Self {
        Self { config, runner }
    }

    pub async fn dispatch<W: Write>(&self, command: Command<'_>, out: &mut W) -> Result<Status> {
        match command {
            Command::List => self.list(out),
            Command::Create(segments) => self.create(segments).await,
            Command::Backup => {
                run_backup(self.runner, &self.config.tar, &self.config.root).await
            }
            Command::Install => {
                writeln!(out, "echo this could install clig")?;
                out.flush()?;
                Ok(Status::SUCCESS)
            }
            Command::PassThrough(protocol, args) => self.pass_through(protocol, args).await,
        }
    }

    fn list<W: Write>(&self, out: &mut W) -> Result<Status> {
        for repository in RepositoryScanner::new(&self.config.root) {
            writeln!(out, "{}", repository?.display())?;
        }
        out.flush()?;
        Ok(Status::SUCCESS)
    }

    async fn pass_through(&self, protocol: ProtocolCommand, args: &[String]) -> Result<Status> {
        let repository = match args {
            [] => return Err(GatewayError::MissingRepositoryName),
            [raw] => RepositoryPath::from_request(raw)?,
            _ => {
                return Err(GatewayError::InvalidRepositoryName {
                    name: args.join(" "),
                    reason: "expected a single repository argument",
                });
            }
        };

        let invocation =
            Invocation::new(protocol.program(), &self.config.root).arg(repository.as_path());
        self.runner.run(&invocation).await
    }

    async fn create(&self, segments: &[String]) -> Result<Status> {
        let repository = RepositoryPath::from_segments(segments)?;
        debug!(path = %repository.as_path().display(), "creating bare repository");

        let invocation = Invocation::new(&self.config.git, &self.config.root)
            .args(["init", "--bare"])
            .arg(repository.as_path());
        self.runner.run(&invocation).await
    }
}
