//! Gateway error types and exit status mapping.
//!
//! Defines `GatewayError` for every failure a session can end with and maps
//! each class to the process exit code reported back through sshd.
//!
//! Exit code mappings:
//! - `Io`, `Spawn`, `Scan` → 1
//! - `NotSsh` → 2
//! - `MissingCommand`, `MalformedCommand` → 3
//! - `UnknownCommand` → 4
//! - `MissingRepositoryName` → 5
//! - `InvalidRepositoryName` → 6
//! - `InvalidArguments` → 7
//! - `Cancelled` → 128 + signal

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Only SSH")]
    NotSsh,

    #[error("No interactive shell access.")]
    MissingCommand,

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Missing repository name")]
    MissingRepositoryName,

    #[error("Invalid repository name {name:?}: {reason}")]
    InvalidRepositoryName { name: String, reason: &'static str },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to scan repositories: {0}")]
    Scan(#[from] walkdir::Error),

    #[error("Cancelled by signal {signal}")]
    Cancelled { signal: i32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn exit_code(&self) -> u8 {
        match self {
            GatewayError::Io(_) | GatewayError::Spawn { .. } | GatewayError::Scan(_) => 1,
            GatewayError::NotSsh => 2,
            GatewayError::MissingCommand | GatewayError::MalformedCommand(_) => 3,
            GatewayError::UnknownCommand(_) => 4,
            GatewayError::MissingRepositoryName => 5,
            GatewayError::InvalidRepositoryName { .. } => 6,
            GatewayError::InvalidArguments(_) => 7,
            GatewayError::Cancelled { signal } => 128u8.saturating_add(*signal as u8),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
