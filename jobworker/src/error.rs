use thiserror::Error;

/// Enumeration of errors surfaced by connector backends to the runtime.
///
/// Backends wrap their own failure types in [`ConnectorError::Backend`]; the
/// runtime only ever inspects the duplication sentinel and otherwise treats
/// connector errors as opaque signals to mark the connector dead.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The backend recognised the enqueued job as a duplicate of one it has
    /// already accepted. The runtime treats this as success.
    #[error("job duplication detected")]
    JobDuplicationDetected,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl ConnectorError {
    pub fn is_duplication(&self) -> bool {
        matches!(self, ConnectorError::JobDuplicationDetected)
    }
}

/// Enumeration of errors returned by the [`JobWorker`](crate::JobWorker) facade.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("primary connector is required")]
    PrimaryConnectorRequired,
    #[error("already started")]
    AlreadyStarted,
    #[error("queue settings required")]
    QueueSettingsRequired,
    #[error("could not enqueue the job using any connector")]
    EnqueueExhausted,
    #[error("could not enqueue {remaining} batch entries using any connector")]
    EnqueueBatchExhausted { remaining: usize },
    #[error("subscribe failed on connector {connector}")]
    SubscribeFailed {
        connector: String,
        #[source]
        source: ConnectorError,
    },
    #[error("timed out waiting for active jobs to drain")]
    ShutdownTimedOut,
}
