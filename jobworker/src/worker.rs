use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broadcast::Broadcaster;
use crate::config::{Setting, WorkSetting};
use crate::connector::{EnqueueBatchInput, EnqueueInput, SubscribeInput};
use crate::error::WorkerError;
use crate::heartbeat;
use crate::job::Job;
use crate::provider::ConnectorProvider;
use crate::tracker::ActiveJobs;

/// A user-provided job handler. Returning an error fails the job on its
/// originating connector; success completes it. Handlers are not cancelled
/// by the runtime; long handlers keep their backend lease alive through the
/// heartbeat callback.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn work(&self, job: Arc<Job>) -> anyhow::Result<()>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Arc<Job>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn work(&self, job: Arc<Job>) -> anyhow::Result<()> {
        (self.f)(job).await
    }
}

/// The runtime facade: construction, enqueue with failover, the long-lived
/// `work` loop, and graceful shutdown.
///
/// Cheap to clone; all state is shared, so `shutdown` can be driven from
/// another task while `work` blocks.
#[derive(Clone)]
pub struct JobWorker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobWorker").finish_non_exhaustive()
    }
}

struct Inner {
    provider: ConnectorProvider,
    handlers: Mutex<HashMap<String, Arc<dyn Handler>>>,
    active: Arc<ActiveJobs>,
    broadcaster: Arc<Broadcaster>,
    started: AtomicBool,
    in_shutdown: AtomicBool,
    on_shutdown: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

impl JobWorker {
    pub fn new(setting: Setting) -> Result<Self, WorkerError> {
        let primary = setting
            .primary
            .ok_or(WorkerError::PrimaryConnectorRequired)?;

        let provider = ConnectorProvider::new();
        provider.register(1, primary);
        if let Some(secondary) = setting.secondary {
            provider.register(2, secondary);
        }
        provider.set_retry_interval(setting.dead_connector_retry_interval);

        Ok(Self {
            inner: Arc::new(Inner {
                provider,
                handlers: Mutex::new(HashMap::new()),
                active: Arc::new(ActiveJobs::new()),
                broadcaster: Arc::new(Broadcaster::new()),
                started: AtomicBool::new(false),
                in_shutdown: AtomicBool::new(false),
                on_shutdown: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Enqueue one job, failing over across connectors in priority order.
    pub async fn enqueue_job(&self, input: &EnqueueInput) -> Result<(), WorkerError> {
        self.inner.provider.enqueue(input).await
    }

    /// Enqueue a batch; connectors that partially deliver are marked dead
    /// and only the residue is retried on the next one.
    pub async fn enqueue_job_batch(&self, input: EnqueueBatchInput) -> Result<(), WorkerError> {
        self.inner.provider.enqueue_batch(input).await
    }

    /// Install or replace the handler for a queue. Empty queue names are
    /// rejected.
    pub fn register(&self, queue: &str, handler: Arc<dyn Handler>) -> bool {
        if queue.is_empty() {
            return false;
        }
        self.inner
            .handlers
            .lock()
            .expect("poisoned handler registry lock")
            .insert(queue.to_owned(), handler);
        true
    }

    /// [`register`](JobWorker::register) for a plain async closure.
    pub fn register_fn<F, Fut>(&self, queue: &str, f: F) -> bool
    where
        F: Fn(Arc<Job>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(queue, Arc::new(FnHandler { f }))
    }

    /// True once [`shutdown`](JobWorker::shutdown) has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.in_shutdown.load(Ordering::SeqCst)
    }

    /// Append a callback dispatched on its own task when shutdown begins.
    pub fn register_on_shutdown(&self, f: impl FnOnce() + Send + 'static) {
        self.inner
            .on_shutdown
            .lock()
            .expect("poisoned on-shutdown lock")
            .push(Box::new(f));
    }

    /// Run the worker: subscribe every connector to every configured queue,
    /// fan the streams into one work channel, and dispatch with bounded
    /// concurrency. Blocks until shutdown closes the subscriptions and the
    /// pool drains. Runs at most once per worker.
    pub async fn work(&self, setting: WorkSetting) -> Result<(), WorkerError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyStarted);
        }
        let setting = setting.with_defaults();
        if setting.queue_poll_intervals.is_empty() {
            return Err(WorkerError::QueueSettingsRequired);
        }

        if setting.heartbeat_interval > Duration::ZERO {
            if let Some(on_beat) = setting.on_heartbeat.clone() {
                let stop = CancellationToken::new();
                let _ = heartbeat::start(
                    setting.heartbeat_interval,
                    on_beat,
                    Arc::clone(&self.inner.active),
                    stop.clone(),
                );
                self.inner.broadcaster.register(async move {
                    stop.cancel();
                });
            }
        }

        let (job_tx, job_rx) = mpsc::channel::<Arc<Job>>(1);

        for (_, connector) in self.inner.provider.in_priority_order() {
            for (queue, poll_interval) in &setting.queue_poll_intervals {
                let mut subscription = connector
                    .subscribe(SubscribeInput {
                        queue: queue.clone(),
                        poll_interval: *poll_interval,
                    })
                    .await
                    .map_err(|source| WorkerError::SubscribeFailed {
                        connector: connector.name().to_owned(),
                        source,
                    })?;

                let canceller = subscription.canceller();
                let connector_name = connector.name().to_owned();
                let queue_name = queue.clone();
                self.inner.broadcaster.register(async move {
                    debug!(connector = %connector_name, queue = %queue_name, "unsubscribing");
                    canceller.cancel();
                });

                let tx = job_tx.clone();
                let active = Arc::clone(&self.inner.active);
                tokio::spawn(async move {
                    while let Some(job) = subscription.next().await {
                        // Account for the job before it enters the work
                        // channel so the drain wait covers jobs awaiting
                        // dispatch, not just jobs inside handlers.
                        active.add(&job);
                        if tx.send(Arc::clone(&job)).await.is_err() {
                            active.remove(&job);
                            return;
                        }
                    }
                });
            }
        }
        // The forwarders hold the remaining senders; the channel closes
        // once the last subscription stream ends.
        drop(job_tx);

        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let mut pool = JoinSet::new();
        for id in 0..setting.worker_concurrency {
            let rx = Arc::clone(&job_rx);
            let inner = Arc::clone(&self.inner);
            pool.spawn(async move {
                debug!(dispatcher = id, "dispatcher started");
                loop {
                    let job = { rx.lock().await.recv().await };
                    match job {
                        Some(job) => inner.work_safely(job).await,
                        None => break,
                    }
                }
                debug!(dispatcher = id, "dispatcher finished");
            });
        }
        while pool.join_next().await.is_some() {}

        Ok(())
    }

    /// Begin shutdown: fire the one-shot broadcast (unsubscribes, heartbeat
    /// stop), dispatch the on-shutdown callbacks, then wait up to `wait`
    /// for the active-job set to drain.
    pub async fn shutdown(&self, wait: Duration) -> Result<(), WorkerError> {
        self.inner.in_shutdown.store(true, Ordering::SeqCst);
        self.inner.broadcaster.broadcast();

        let callbacks = std::mem::take(
            &mut *self
                .inner
                .on_shutdown
                .lock()
                .expect("poisoned on-shutdown lock"),
        );
        for f in callbacks {
            tokio::spawn(async move { f() });
        }

        debug!(
            active = self.inner.active.len(),
            "waiting for active jobs to drain"
        );
        match tokio::time::timeout(wait, self.inner.active.drained()).await {
            Ok(()) => {
                debug!("shutdown complete");
                Ok(())
            }
            Err(_) => Err(WorkerError::ShutdownTimedOut),
        }
    }
}

impl Inner {
    async fn work_safely(&self, job: Arc<Job>) {
        let labels = [("queue", job.queue().to_owned())];
        debug!(
            connector = job.connector().name(),
            queue = %job.queue(),
            "dispatching job"
        );
        metrics::counter!("jobworker_jobs_total", &labels).increment(1);

        let handler = self
            .handlers
            .lock()
            .expect("poisoned handler registry lock")
            .get(job.queue())
            .cloned();

        let Some(handler) = handler else {
            // No ack: the backend redelivers per its own visibility policy.
            warn!(queue = %job.queue(), "no handler registered for queue, abandoning job");
            metrics::counter!("jobworker_jobs_abandoned", &labels).increment(1);
            self.active.remove(&job);
            return;
        };

        match handler.work(Arc::clone(&job)).await {
            Ok(()) => {
                if let Err(err) = job.complete().await {
                    warn!(
                        connector = job.connector().name(),
                        queue = %job.queue(),
                        %err,
                        "marking connector dead, job completion failed"
                    );
                    self.provider.mark_dead(job.connector().as_ref());
                    metrics::counter!("jobworker_jobs_abandoned", &labels).increment(1);
                } else {
                    debug!(queue = %job.queue(), "job completed");
                    metrics::counter!("jobworker_jobs_completed", &labels).increment(1);
                }
            }
            Err(err) => {
                debug!(queue = %job.queue(), %err, "handler failed, failing job");
                if let Err(err) = job.fail().await {
                    warn!(
                        connector = job.connector().name(),
                        queue = %job.queue(),
                        %err,
                        "marking connector dead, job fail-ack failed"
                    );
                    self.provider.mark_dead(job.connector().as_ref());
                    metrics::counter!("jobworker_jobs_abandoned", &labels).increment(1);
                } else {
                    metrics::counter!("jobworker_jobs_failed", &labels).increment(1);
                }
            }
        }
        self.active.remove(&job);
    }
}
