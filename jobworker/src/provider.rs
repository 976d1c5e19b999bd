use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connector::{Connector, EnqueueBatchInput, EnqueueInput};
use crate::error::{ConnectorError, WorkerError};

/// Connectors keyed by priority, with transient-death tracking.
///
/// Smaller priority means tried earlier. A connector that fails an
/// operation is marked dead and excluded from failover until the retry
/// interval elapses; revival is lazy and side-effect-free, `is_dead` simply
/// stops reporting it dead once the interval has passed.
pub struct ConnectorProvider {
    inner: Mutex<Inner>,
}

struct Inner {
    connectors: BTreeMap<u32, Arc<dyn Connector>>,
    dead: HashMap<String, Instant>,
    retry_interval: Duration,
}

impl Default for ConnectorProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorProvider {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                connectors: BTreeMap::new(),
                dead: HashMap::new(),
                retry_interval: Duration::ZERO,
            }),
        }
    }

    /// Record a connector under a priority; registering an existing
    /// priority replaces the previous connector.
    pub fn register(&self, priority: u32, connector: Arc<dyn Connector>) {
        let mut inner = self.inner.lock().expect("poisoned connector provider lock");
        inner.connectors.insert(priority, connector);
    }

    /// How long a connector marked dead stays excluded from failover.
    pub fn set_retry_interval(&self, interval: Duration) {
        let mut inner = self.inner.lock().expect("poisoned connector provider lock");
        inner.retry_interval = interval;
    }

    /// A sorted snapshot, ascending by priority. Stable across calls for a
    /// fixed registration set.
    pub fn in_priority_order(&self) -> Vec<(u32, Arc<dyn Connector>)> {
        let inner = self.inner.lock().expect("poisoned connector provider lock");
        inner
            .connectors
            .iter()
            .map(|(priority, connector)| (*priority, Arc::clone(connector)))
            .collect()
    }

    /// True iff the connector is in the dead set and the retry interval has
    /// not yet elapsed since it was marked.
    pub fn is_dead(&self, connector: &dyn Connector) -> bool {
        let inner = self.inner.lock().expect("poisoned connector provider lock");
        match inner.dead.get(connector.name()) {
            Some(marked_at) => marked_at.elapsed() < inner.retry_interval,
            None => false,
        }
    }

    /// Record the connector as dead as of now; re-marking refreshes the
    /// timestamp.
    pub fn mark_dead(&self, connector: &dyn Connector) {
        let mut inner = self.inner.lock().expect("poisoned connector provider lock");
        inner
            .dead
            .insert(connector.name().to_owned(), Instant::now());
        debug!(connector = connector.name(), "connector marked dead");
    }

    /// Enqueue with failover: try connectors in priority order, skipping
    /// dead ones. Duplication is success and stops the iteration; any other
    /// error marks the connector dead and moves on.
    pub async fn enqueue(&self, input: &EnqueueInput) -> Result<(), WorkerError> {
        for (priority, connector) in self.in_priority_order() {
            if self.is_dead(connector.as_ref()) {
                debug!(
                    priority,
                    connector = connector.name(),
                    "skipping dead connector"
                );
                continue;
            }
            match connector.enqueue(input).await {
                Ok(()) => return Ok(()),
                Err(ConnectorError::JobDuplicationDetected) => {
                    debug!(queue = %input.queue, "skipping enqueue of a duplicate job");
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        priority,
                        connector = connector.name(),
                        %err,
                        "marking connector dead, could not enqueue job"
                    );
                    self.mark_dead(connector.as_ref());
                }
            }
        }
        Err(WorkerError::EnqueueExhausted)
    }

    /// Batch enqueue with failover. Success means no error and an empty
    /// failed list. On partial success the connector is marked dead and the
    /// delivered ids are removed from the input so the next connector only
    /// carries the remaining work.
    pub async fn enqueue_batch(&self, mut input: EnqueueBatchInput) -> Result<(), WorkerError> {
        for (priority, connector) in self.in_priority_order() {
            if self.is_dead(connector.as_ref()) {
                debug!(
                    priority,
                    connector = connector.name(),
                    "skipping dead connector"
                );
                continue;
            }
            match connector.enqueue_batch(&input).await {
                Ok(output) if output.failed.is_empty() => return Ok(()),
                Ok(output) => {
                    warn!(
                        priority,
                        connector = connector.name(),
                        failed = output.failed.len(),
                        "marking connector dead, batch partially enqueued"
                    );
                    self.mark_dead(connector.as_ref());
                    for id in &output.successful {
                        input.entries.remove(id);
                    }
                }
                Err(err) => {
                    warn!(
                        priority,
                        connector = connector.name(),
                        %err,
                        "marking connector dead, could not enqueue batch"
                    );
                    self.mark_dead(connector.as_ref());
                }
            }
        }
        Err(WorkerError::EnqueueBatchExhausted {
            remaining: input.entries.len(),
        })
    }
}
