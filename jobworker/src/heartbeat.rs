use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::job::Job;
use crate::tracker::ActiveJobs;

/// Callback invoked for every active job on each heartbeat tick, typically
/// to extend the backend's visibility timeout or lease. There is no
/// ordering guarantee across jobs, and a job may complete while the
/// callback runs for it.
pub type HeartbeatFn = Arc<dyn Fn(Arc<Job>) + Send + Sync>;

/// Run the heartbeat loop until the stop token fires.
///
/// Each tick snapshots the active set under its lock, then invokes the
/// callback from a detached task: a slow callback must not stall the
/// cadence or block active-set mutation.
pub(crate) fn start(
    interval: Duration,
    on_beat: HeartbeatFn,
    active: Arc<ActiveJobs>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    debug!(
        interval_secs = interval.as_secs_f64(),
        "starting heartbeat"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!("stopping heartbeat");
                    return;
                }
                _ = ticker.tick() => {
                    let jobs = active.snapshot();
                    let on_beat = Arc::clone(&on_beat);
                    tokio::spawn(async move {
                        for job in jobs {
                            on_beat(job);
                        }
                    });
                }
            }
        }
    })
}
