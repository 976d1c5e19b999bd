use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::job::Job;

/// The set of jobs between pickup by the fanout and terminal
/// acknowledgement. The population count rides on a watch channel so
/// shutdown can await the drain without polling; set and count are mutated
/// under the same lock.
pub(crate) struct ActiveJobs {
    jobs: Mutex<HashMap<Uuid, Arc<Job>>>,
    count: watch::Sender<usize>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            jobs: Mutex::new(HashMap::new()),
            count,
        }
    }

    pub fn add(&self, job: &Arc<Job>) {
        let mut jobs = self.jobs.lock().expect("poisoned active-job lock");
        jobs.insert(job.id(), Arc::clone(job));
        self.count.send_replace(jobs.len());
        debug!(active = jobs.len(), "job tracked");
    }

    pub fn remove(&self, job: &Job) {
        let mut jobs = self.jobs.lock().expect("poisoned active-job lock");
        jobs.remove(&job.id());
        self.count.send_replace(jobs.len());
        debug!(active = jobs.len(), "job released");
    }

    pub fn len(&self) -> usize {
        *self.count.borrow()
    }

    pub fn snapshot(&self) -> Vec<Arc<Job>> {
        self.jobs
            .lock()
            .expect("poisoned active-job lock")
            .values()
            .cloned()
            .collect()
    }

    /// Resolves once the set is empty.
    pub async fn drained(&self) {
        let mut count = self.count.subscribe();
        // wait_for only errors when the sender is dropped, and the sender
        // lives as long as self.
        let _ = count.wait_for(|active| *active == 0).await;
    }
}
