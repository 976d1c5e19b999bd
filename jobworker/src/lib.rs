//! # jobworker
//!
//! A backend-agnostic job-worker runtime. Pluggable connectors adapt queue
//! backends to one contract; the runtime enqueues jobs with prioritized
//! failover across connectors, polls subscriptions into a shared work
//! channel, dispatches to registered handlers with bounded concurrency,
//! and acknowledges each job on the connector that produced it. Long jobs
//! stay leased through a periodic heartbeat callback, and shutdown drains
//! in-flight work within a caller-supplied bound.

mod broadcast;
mod config;
mod connector;
mod error;
mod heartbeat;
mod job;
mod provider;
mod tracker;
mod worker;

#[cfg(test)]
mod test_support;

// Connector contract
pub use connector::Connector;
pub use connector::EnqueueBatchInput;
pub use connector::EnqueueBatchOutput;
pub use connector::EnqueueInput;
pub use connector::SubscribeInput;
pub use connector::Subscription;

// Jobs
pub use job::Job;
pub use job::Payload;

// Errors
pub use error::ConnectorError;
pub use error::WorkerError;

// Failover provider
pub use provider::ConnectorProvider;

// Facade
pub use config::Setting;
pub use config::WorkSetting;
pub use heartbeat::HeartbeatFn;
pub use worker::Handler;
pub use worker::JobWorker;
