use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("SSH config file does not exist: {0}")]
    SshConfigMissing(PathBuf),

    #[error("Host not found in SSH config: {0}")]
    UnknownHost(String),

    #[error("Invalid LocalForward '{directive}': {reason}")]
    InvalidLocalForward { directive: String, reason: String },

    #[error("Invalid Port '{value}' for host {host}")]
    InvalidPort { host: String, value: String },

    #[error("Cannot read key file {path}: {source}")]
    KeyFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No IdentityFile configured and no default identity found")]
    NoIdentity,

    #[error("ProxyJump loop detected at host {0}")]
    JumpCycle(String),

    #[error("Failed to create config directory: {0}")]
    CreateDir(std::io::Error),
}

/// SSH-related errors
#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection failed to {host}:{port}: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication failed for {user}@{host}")]
    AuthenticationFailed { user: String, host: String },

    #[error("Key file error: {0}")]
    KeyFile(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Host key verification failed: {0}")]
    HostKeyVerification(String),

    #[error("russh error: {0}")]
    Russh(String),
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::Russh(err.to_string())
    }
}

/// How long a connection waits before retrying depends on how it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Something went wrong: bad config, transport or forward failure.
    Error,
    /// A hop's session ended on its own without an error.
    Close,
}

/// Everything that can take a connection down, funneled to one handler.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] SshError),

    #[error("Failed to bind local port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },

    #[error("Forward from local port {local_port} to {remote} failed: {reason}")]
    Forward {
        local_port: u16,
        remote: String,
        reason: String,
    },

    #[error("Session to {host} closed")]
    SessionClosed { host: String },

    #[error("Session to {host} lost: {reason}")]
    SessionLost { host: String, reason: String },
}

impl ConnectionError {
    pub fn backoff_kind(&self) -> BackoffKind {
        match self {
            ConnectionError::SessionClosed { .. } => BackoffKind::Close,
            _ => BackoffKind::Error,
        }
    }
}
