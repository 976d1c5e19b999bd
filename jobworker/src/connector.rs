use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ConnectorError;
use crate::job::{Job, Payload};

/// The boundary contract every queue backend implements.
///
/// Connector objects are shared (`Arc<dyn Connector>`) and must be safe for
/// concurrent use; the runtime treats them as opaque references. In-flight
/// calls are cancelled by dropping the returned future. An enqueue that the
/// backend recognises as a duplicate signals
/// [`ConnectorError::JobDuplicationDetected`], which the runtime treats as
/// success.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable backend name, unique among registered connectors.
    fn name(&self) -> &str;

    async fn enqueue(&self, input: &EnqueueInput) -> Result<(), ConnectorError>;

    /// Enqueue a batch, reporting per-id partial success in one response.
    async fn enqueue_batch(
        &self,
        input: &EnqueueBatchInput,
    ) -> Result<EnqueueBatchOutput, ConnectorError>;

    /// Open a lazy stream of jobs for one queue, polled at the given interval.
    async fn subscribe(&self, input: SubscribeInput) -> Result<Subscription, ConnectorError>;

    async fn complete_job(&self, job: &Job) -> Result<(), ConnectorError>;

    async fn fail_job(&self, job: &Job) -> Result<(), ConnectorError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueInput {
    pub queue: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueBatchInput {
    pub queue: String,
    /// Entries keyed by a caller-chosen id, echoed back in the output.
    pub entries: HashMap<String, Payload>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueBatchOutput {
    pub successful: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SubscribeInput {
    pub queue: String,
    pub poll_interval: Duration,
}

/// A lazy, potentially infinite sequence of jobs tied to one
/// (connector, queue, interval) triple.
///
/// The backend closes the stream by dropping its sender, which it must do
/// once the cancellation token fires. `unsubscribe` is idempotent.
pub struct Subscription {
    jobs: mpsc::Receiver<Arc<Job>>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Build a subscription from the backend's delivery channel and the
    /// token its producing task watches for teardown.
    pub fn new(jobs: mpsc::Receiver<Arc<Job>>, cancel: CancellationToken) -> Self {
        Self { jobs, cancel }
    }

    /// The next job, or `None` once the stream has closed and drained.
    pub async fn next(&mut self) -> Option<Arc<Job>> {
        self.jobs.recv().await
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    /// A handle that unsubscribes when cancelled, usable after the
    /// subscription itself has been moved into a consumer task.
    pub(crate) fn canceller(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
