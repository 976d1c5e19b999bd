//! # In-memory connector
//!
//! A queue backend living entirely in process memory, implementing the full
//! connector contract: poll-driven subscriptions, delayed first delivery
//! via `delay_seconds`, leases that redeliver on failure, and
//! deduplication keyed by a metadata entry. Intended for local development
//! and as the end-to-end harness for the runtime.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use jobworker::{
    Connector, ConnectorError, EnqueueBatchInput, EnqueueBatchOutput, EnqueueInput, Job, Payload,
    SubscribeInput, Subscription,
};

/// Metadata key carrying the caller's deduplication id. A payload whose id
/// was already accepted is rejected with
/// [`ConnectorError::JobDuplicationDetected`].
pub const DEDUPLICATION_ID_KEY: &str = "deduplication-id";

/// An in-memory queue backend.
///
/// Delivered jobs are held on a lease: completing removes the lease,
/// failing returns the message to the back of its queue for redelivery.
/// Messages abandoned without an ack stay leased; there is no visibility
/// timeout.
pub struct InMemoryConnector {
    name: String,
    me: Weak<InMemoryConnector>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    seen_dedup_ids: HashSet<String>,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    leased: HashMap<Uuid, Message>,
}

#[derive(Clone)]
struct Message {
    payload: Payload,
    visible_at: DateTime<Utc>,
}

impl InMemoryConnector {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: name.to_owned(),
            me: me.clone(),
            state: Mutex::new(State::default()),
        })
    }

    /// Number of messages waiting for delivery and currently leased, for
    /// one queue.
    pub fn queue_depths(&self, queue: &str) -> (usize, usize) {
        let state = self.state.lock().expect("poisoned in-memory queue lock");
        match state.queues.get(queue) {
            Some(qs) => (qs.ready.len(), qs.leased.len()),
            None => (0, 0),
        }
    }

    fn push(&self, queue: &str, payload: Payload) -> Result<(), ConnectorError> {
        let mut state = self.state.lock().expect("poisoned in-memory queue lock");
        if let Some(id) = payload.metadata.get(DEDUPLICATION_ID_KEY) {
            if !state.seen_dedup_ids.insert(id.clone()) {
                return Err(ConnectorError::JobDuplicationDetected);
            }
        }
        let delay = i64::from(payload.delay_seconds.unwrap_or(0));
        let message = Message {
            payload,
            visible_at: Utc::now() + chrono::Duration::seconds(delay),
        };
        state
            .queues
            .entry(queue.to_owned())
            .or_default()
            .ready
            .push_back(message);
        Ok(())
    }

    /// Lease and return the next visible message, if any.
    fn try_deliver(&self, queue: &str) -> Option<Arc<Job>> {
        let connector = self.me.upgrade()?;
        let mut state = self.state.lock().expect("poisoned in-memory queue lock");
        let qs = state.queues.get_mut(queue)?;
        let now = Utc::now();
        let position = qs.ready.iter().position(|m| m.visible_at <= now)?;
        let message = qs.ready.remove(position)?;
        let job = Arc::new(Job::new(queue, message.payload.clone(), connector));
        qs.leased.insert(job.id(), message);
        Some(job)
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, input: &EnqueueInput) -> Result<(), ConnectorError> {
        self.push(&input.queue, input.payload.clone())
    }

    async fn enqueue_batch(
        &self,
        input: &EnqueueBatchInput,
    ) -> Result<EnqueueBatchOutput, ConnectorError> {
        let mut output = EnqueueBatchOutput::default();
        for (id, payload) in &input.entries {
            match self.push(&input.queue, payload.clone()) {
                // A duplicate was accepted before, so the entry counts as delivered.
                Ok(()) | Err(ConnectorError::JobDuplicationDetected) => {
                    output.successful.push(id.clone());
                }
                Err(_) => output.failed.push(id.clone()),
            }
        }
        Ok(output)
    }

    async fn subscribe(&self, input: SubscribeInput) -> Result<Subscription, ConnectorError> {
        let connector = self
            .me
            .upgrade()
            .ok_or_else(|| ConnectorError::Backend(anyhow!("connector has been dropped")))?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let (tx, rx) = mpsc::channel(1);
        let queue = input.queue;
        let poll_interval = input.poll_interval;

        tokio::spawn(async move {
            debug!(connector = %connector.name, queue = %queue, "subscription opened");
            loop {
                // Reserve capacity before leasing a message so teardown
                // never drops a job that was already taken off the queue.
                let permit = tokio::select! {
                    permit = tx.reserve() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                    _ = token.cancelled() => {
                        debug!(connector = %connector.name, queue = %queue, "subscription closed");
                        return;
                    }
                };
                match connector.try_deliver(&queue) {
                    Some(job) => permit.send(job),
                    None => {
                        drop(permit);
                        tokio::select! {
                            _ = tokio::time::sleep(poll_interval) => {}
                            _ = token.cancelled() => {
                                debug!(connector = %connector.name, queue = %queue, "subscription closed");
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(rx, cancel))
    }

    async fn complete_job(&self, job: &Job) -> Result<(), ConnectorError> {
        let mut state = self.state.lock().expect("poisoned in-memory queue lock");
        let qs = state
            .queues
            .get_mut(job.queue())
            .ok_or_else(|| ConnectorError::Backend(anyhow!("unknown queue {}", job.queue())))?;
        qs.leased
            .remove(&job.id())
            .map(|_| ())
            .ok_or_else(|| ConnectorError::Backend(anyhow!("job {} is not leased", job.id())))
    }

    async fn fail_job(&self, job: &Job) -> Result<(), ConnectorError> {
        let mut state = self.state.lock().expect("poisoned in-memory queue lock");
        let qs = state
            .queues
            .get_mut(job.queue())
            .ok_or_else(|| ConnectorError::Backend(anyhow!("unknown queue {}", job.queue())))?;
        let message = qs
            .leased
            .remove(&job.id())
            .ok_or_else(|| ConnectorError::Backend(anyhow!("job {} is not leased", job.id())))?;
        qs.ready.push_back(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn input(queue: &str, content: &str) -> EnqueueInput {
        EnqueueInput {
            queue: queue.to_owned(),
            payload: Payload::from_content(content),
        }
    }

    #[tokio::test]
    async fn delivers_enqueued_jobs_in_order() {
        let connector = InMemoryConnector::new("memory");
        connector.enqueue(&input("hello", "one")).await.unwrap();
        connector.enqueue(&input("hello", "two")).await.unwrap();

        let mut subscription = connector
            .subscribe(SubscribeInput {
                queue: "hello".to_owned(),
                poll_interval: Duration::from_millis(10),
            })
            .await
            .unwrap();

        let first = subscription.next().await.expect("first job");
        let second = subscription.next().await.expect("second job");
        assert_eq!(first.payload().content, "one");
        assert_eq!(second.payload().content, "two");
        assert_eq!(connector.queue_depths("hello"), (0, 2));

        subscription.unsubscribe();
    }

    #[tokio::test]
    async fn unsubscribe_closes_the_stream() {
        let connector = InMemoryConnector::new("memory");
        let mut subscription = connector
            .subscribe(SubscribeInput {
                queue: "hello".to_owned(),
                poll_interval: Duration::from_millis(10),
            })
            .await
            .unwrap();

        subscription.unsubscribe();
        // Idempotent.
        subscription.unsubscribe();

        let next = tokio::time::timeout(Duration::from_secs(1), subscription.next())
            .await
            .expect("stream should close promptly");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn complete_removes_the_lease() {
        let connector = InMemoryConnector::new("memory");
        connector.enqueue(&input("hello", "one")).await.unwrap();
        let job = connector.try_deliver("hello").expect("job is visible");

        connector.complete_job(&job).await.unwrap();
        assert_eq!(connector.queue_depths("hello"), (0, 0));

        connector
            .complete_job(&job)
            .await
            .expect_err("lease is gone");
    }

    #[tokio::test]
    async fn fail_redelivers_the_message() {
        let connector = InMemoryConnector::new("memory");
        connector.enqueue(&input("hello", "one")).await.unwrap();
        let job = connector.try_deliver("hello").expect("job is visible");

        connector.fail_job(&job).await.unwrap();
        assert_eq!(connector.queue_depths("hello"), (1, 0));

        let again = connector.try_deliver("hello").expect("redelivered");
        assert_eq!(again.payload().content, "one");
    }

    #[tokio::test]
    async fn delayed_jobs_are_not_visible_early() {
        let connector = InMemoryConnector::new("memory");
        let mut delayed = input("hello", "later");
        delayed.payload.delay_seconds = Some(60);
        connector.enqueue(&delayed).await.unwrap();

        assert!(connector.try_deliver("hello").is_none());
        assert_eq!(connector.queue_depths("hello"), (1, 0));
    }

    #[tokio::test]
    async fn duplicate_deduplication_ids_are_rejected() {
        let connector = InMemoryConnector::new("memory");
        let mut first = input("hello", "one");
        first
            .payload
            .metadata
            .insert(DEDUPLICATION_ID_KEY.to_owned(), "id-1".to_owned());
        let mut second = input("hello", "two");
        second
            .payload
            .metadata
            .insert(DEDUPLICATION_ID_KEY.to_owned(), "id-1".to_owned());

        connector.enqueue(&first).await.unwrap();
        let err = connector.enqueue(&second).await.expect_err("duplicate");
        assert!(err.is_duplication());
        assert_eq!(connector.queue_depths("hello"), (1, 0));
    }
}
