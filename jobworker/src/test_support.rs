//! Scripted connector used by the unit tests in this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connector::{
    Connector, EnqueueBatchInput, EnqueueBatchOutput, EnqueueInput, SubscribeInput, Subscription,
};
use crate::error::ConnectorError;
use crate::job::Job;

pub(crate) enum BatchScript {
    /// Report every entry as delivered.
    Accept,
    Output(EnqueueBatchOutput),
    Fail(String),
}

/// A connector whose responses are driven by per-operation scripts; an
/// empty script means success. Calls and the batch ids offered to it are
/// recorded for assertions. Subscriptions produce an already-closed stream.
pub(crate) struct TestConnector {
    name: String,
    pub enqueue_results: Mutex<VecDeque<Result<(), ConnectorError>>>,
    pub enqueue_calls: AtomicUsize,
    pub batch_scripts: Mutex<VecDeque<BatchScript>>,
    pub batch_ids_seen: Mutex<Vec<Vec<String>>>,
    pub complete_results: Mutex<VecDeque<Result<(), ConnectorError>>>,
    pub complete_calls: AtomicUsize,
    pub fail_results: Mutex<VecDeque<Result<(), ConnectorError>>>,
    pub fail_calls: AtomicUsize,
}

impl TestConnector {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            enqueue_results: Mutex::new(VecDeque::new()),
            enqueue_calls: AtomicUsize::new(0),
            batch_scripts: Mutex::new(VecDeque::new()),
            batch_ids_seen: Mutex::new(Vec::new()),
            complete_results: Mutex::new(VecDeque::new()),
            complete_calls: AtomicUsize::new(0),
            fail_results: Mutex::new(VecDeque::new()),
            fail_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Connector for TestConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, _input: &EnqueueInput) -> Result<(), ConnectorError> {
        self.enqueue_calls.fetch_add(1, Ordering::SeqCst);
        self.enqueue_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn enqueue_batch(
        &self,
        input: &EnqueueBatchInput,
    ) -> Result<EnqueueBatchOutput, ConnectorError> {
        let mut ids: Vec<String> = input.entries.keys().cloned().collect();
        ids.sort();
        self.batch_ids_seen.lock().unwrap().push(ids.clone());
        match self.batch_scripts.lock().unwrap().pop_front() {
            None | Some(BatchScript::Accept) => Ok(EnqueueBatchOutput {
                successful: ids,
                failed: Vec::new(),
            }),
            Some(BatchScript::Output(output)) => Ok(output),
            Some(BatchScript::Fail(message)) => {
                Err(ConnectorError::Backend(anyhow::anyhow!(message)))
            }
        }
    }

    async fn subscribe(&self, _input: SubscribeInput) -> Result<Subscription, ConnectorError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(Subscription::new(rx, CancellationToken::new()))
    }

    async fn complete_job(&self, _job: &Job) -> Result<(), ConnectorError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.complete_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn fail_job(&self, _job: &Job) -> Result<(), ConnectorError> {
        self.fail_calls.fetch_add(1, Ordering::SeqCst);
        self.fail_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}
