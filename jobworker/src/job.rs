use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::connector::Connector;
use crate::error::ConnectorError;

/// The body of a job plus the backend-defined attributes that ride along
/// with it. Which fields a backend honours is the backend's concern; the
/// runtime carries them opaquely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    /// Seconds the backend should hold the job back before first delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Payload {
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// One message delivered by a subscription, carrying a reference to the
/// connector that produced it.
///
/// A job is created by exactly one subscription and owns exactly one
/// finished transition: once `is_finished` reports true, both complete and
/// fail acks are no-ops.
pub struct Job {
    id: Uuid,
    queue: String,
    payload: Payload,
    connector: Arc<dyn Connector>,
    finished: AtomicBool,
}

impl Job {
    pub fn new(queue: impl Into<String>, payload: Payload, connector: Arc<dyn Connector>) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            payload,
            connector,
            finished: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The connector this job was delivered by; acks must go back to it.
    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// Acknowledge the job on its originating connector. No-op once the job
    /// is finished; the flag is only set after a successful ack, so a failed
    /// ack leaves the job eligible for another attempt.
    pub(crate) async fn complete(&self) -> Result<(), ConnectorError> {
        if self.is_finished() {
            return Ok(());
        }
        self.connector.complete_job(self).await?;
        self.mark_finished();
        Ok(())
    }

    /// Negatively acknowledge the job on its originating connector. Same
    /// finished-flag contract as [`Job::complete`].
    pub(crate) async fn fail(&self) -> Result<(), ConnectorError> {
        if self.is_finished() {
            return Ok(());
        }
        self.connector.fail_job(self).await?;
        self.mark_finished();
        Ok(())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("queue", &self.queue)
            .field("payload", &self.payload)
            .field("connector", &self.connector.name())
            .field("finished", &self.is_finished())
            .finish()
    }
}
