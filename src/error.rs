use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed for {host}: no method succeeded")]
    Auth { host: String },

    #[error("tunnel to {host}:{port} could not be opened: {reason}")]
    Tunnel {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("remote I/O error: {0}")]
    RemoteIo(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("connection is no longer alive: {0}")]
    StaleConnection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("SFTP protocol error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),
}

impl AppError {
    /// Cancellation is an outcome, not a failure; callers use this to
    /// report "aborted" instead of an error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }
}

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;
