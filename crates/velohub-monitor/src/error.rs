//! Error types for the monitor broadcast layer.

/// Errors that can occur while configuring the monitor or attaching a
/// streaming connection.
///
/// Publishing never fails; these errors only surface on the connection and
/// startup paths.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The replay buffer must retain at least one envelope.
    #[error("monitor buffer capacity must be greater than zero")]
    ZeroCapacity,

    /// The heartbeat interval must be a positive duration.
    #[error("monitor heartbeat interval must be greater than zero")]
    ZeroHeartbeat,

    /// The dispatcher has been shut down and refuses new connections.
    #[error("monitor is shutting down")]
    ShuttingDown,

    /// The receiving half of a client connection was dropped mid-write.
    #[error("monitor connection closed")]
    ConnectionClosed,
}
