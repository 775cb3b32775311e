use thiserror::Error;

/// Failures `Connection::connect` can return.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("connection is already connected")]
    AlreadyConnected,

    #[error("connection is already destroyed")]
    AlreadyDestroyed,

    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("connect aborted by concurrent destroy()")]
    Aborted,
}

/// Failures `Connection::query` and `Connection::cancel` can return.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("connection is not connected")]
    NotConnected,

    /// SQL-level error reported through the normal result-status channel.
    /// The connection survives and remains usable.
    #[error("{0}")]
    Recoverable(String),

    /// Send, flush, consume-input, or an unrecognized result status. The
    /// connection has been destroyed as a side effect of this error.
    #[error("{0}")]
    Unrecoverable(String),
}

impl QueryError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, QueryError::Recoverable(_))
    }
}

/// Failures the pool's public operations can return.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool has not been started")]
    NotStarted,

    #[error("Connection pool stopped")]
    Stopped,

    #[error("Timeout of {0} ms reached acquiring connection")]
    Timeout(u64),

    #[error("connection is not owned by this pool")]
    NotOwned,

    #[error("failed to start pool: {0}")]
    StartFailed(String),

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}
