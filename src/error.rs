use std::sync::Arc;

/// Failure of a resolution, shared by every subscriber of the same lookup.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    /// No matching response inside the per-query window
    #[error("query timed out waiting for a nameserver response")]
    QueryTimeout,

    /// The resolution as a whole did not settle in time
    #[error("resolution timed out")]
    Timeout,

    /// A transaction id was registered while still outstanding.
    /// Only reachable if the id space wraps inside one query lifetime.
    #[error("transaction id {0} is already outstanding")]
    TransactionIdCollision(u16),

    #[error("no tokio runtime is active")]
    ReactorNotActive,

    /// The name cannot be put on the wire
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("no nameservers configured")]
    NoNameservers,

    #[error("transport error: {0}")]
    Transport(Arc<std::io::Error>),

    /// The settling side went away without settling
    #[error("lookup abandoned")]
    Abandoned,
}

impl From<std::io::Error> for ResolveError {
    fn from(e: std::io::Error) -> Self {
        ResolveError::Transport(Arc::new(e))
    }
}
