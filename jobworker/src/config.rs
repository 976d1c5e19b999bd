use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::connector::Connector;
use crate::heartbeat::HeartbeatFn;

/// Construction settings for a [`JobWorker`](crate::JobWorker).
pub struct Setting {
    /// The connector tried first for every operation. Required.
    pub primary: Option<Arc<dyn Connector>>,
    /// Optional failover connector, tried when the primary is dead or
    /// failing.
    pub secondary: Option<Arc<dyn Connector>>,
    /// How long a connector marked dead stays excluded from failover.
    pub dead_connector_retry_interval: Duration,
}

impl Default for Setting {
    fn default() -> Self {
        Self {
            primary: None,
            secondary: None,
            dead_connector_retry_interval: Duration::from_secs(10),
        }
    }
}

pub(crate) const WORKER_CONCURRENCY_DEFAULT: usize = 1;

/// Settings for a single [`JobWorker::work`](crate::JobWorker::work) run.
#[derive(Clone, Default)]
pub struct WorkSetting {
    /// Zero disables the heartbeat.
    pub heartbeat_interval: Duration,
    pub on_heartbeat: Option<HeartbeatFn>,
    /// Number of concurrent dispatchers; zero means the default of 1.
    pub worker_concurrency: usize,
    /// Queue name to polling interval. Must be non-empty.
    pub queue_poll_intervals: HashMap<String, Duration>,
}

impl WorkSetting {
    pub(crate) fn with_defaults(mut self) -> Self {
        if self.worker_concurrency == 0 {
            self.worker_concurrency = WORKER_CONCURRENCY_DEFAULT;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_concurrency_defaults_to_one() {
        let setting = WorkSetting::default().with_defaults();
        assert_eq!(setting.worker_concurrency, 1);
    }

    #[test]
    fn explicit_concurrency_is_kept() {
        let setting = WorkSetting {
            worker_concurrency: 8,
            ..Default::default()
        }
        .with_defaults();
        assert_eq!(setting.worker_concurrency, 8);
    }
}
