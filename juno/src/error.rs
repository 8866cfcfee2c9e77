//! Error types for juno module operations.

/// Alias for `Result<T, juno::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by module operations and pending results.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// `initialize` was called after a handshake had already started.
    #[error("module is already initialized")]
    AlreadyInitialized,

    /// An outbound operation was attempted before `initialize`.
    #[error("module is not initialized")]
    NotInitialized,

    /// The pending request was cancelled before a reply arrived.
    #[error("request cancelled")]
    Cancelled,

    /// No reply arrived within the allotted time.
    #[error("request timed out")]
    Timeout,

    /// The connection to the host is closed.
    #[error("connection to juno closed")]
    Disconnected,

    /// An endpoint string could not be interpreted.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Module configuration is incomplete or inconsistent.
    #[error("invalid module config: {0}")]
    Config(&'static str),

    /// A reply payload did not match the awaited type.
    #[error("failed to decode reply: {0}")]
    Decode(#[from] serde_json::Error),

    /// An I/O error from the underlying connection.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
