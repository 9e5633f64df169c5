use thiserror::Error;

/// Top-level errors for the server binary. Protocol-level failures (bad
/// commands, missing params, permission errors) are never represented here
/// — they are numeric replies, produced directly by the handlers in
/// [`crate::dispatch`].
#[derive(Debug, Error)]
pub enum IrcError {
    #[error("invalid port {0:?}: must be an integer in 1..=65535")]
    InvalidPort(String),

    #[error("password must not be empty")]
    EmptyPassword,

    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("poll failed: {0}")]
    Poll(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IrcError>;
