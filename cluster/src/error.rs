use thiserror::Error;

/// Transport-level failures surfaced to callers. Remote failures (a service
///  answering `ok=false`) are data, not errors - they arrive as the response
///  message.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The caller's deadline fired before the response arrived. The session
    ///  stays allocated but its waiter is removed, so a late response is
    ///  dropped instead of leaking table entries.
    #[error("timeout")]
    Timeout,

    /// The connection closed while the request was in flight or before it
    ///  could be enqueued.
    #[error("socket close")]
    PeerClosed,

    /// `call`/`send` named a node the registry has no address for.
    #[error("no registered addr for node '{0}'")]
    UnknownNode(String),

    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),
}
