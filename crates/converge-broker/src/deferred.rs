use crate::broker::Broker;
use converge_core::{Result, Status, TaskError, TaskIdentity};
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Claim ticket for a tracked task's outcome.
///
/// Holds no result itself; it is a capability to ask the backend, by task id,
/// for status or result. The broker reference is weak, so an outstanding
/// handle never keeps the broker alive, and dropping the handle has no effect
/// on backend state — unclaimed results expire via their timeout.
#[derive(Debug, Clone)]
pub struct DeferredResult {
    broker: Weak<Broker>,
    id: String,
    name: String,
    heartrate: Duration,
}

impl DeferredResult {
    pub(crate) fn new(broker: &Arc<Broker>, id: String, name: String, heartrate: Duration) -> Self {
        DeferredResult {
            broker: Arc::downgrade(broker),
            id,
            name,
            heartrate,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn heartrate(&self) -> Duration {
        self.heartrate
    }

    fn broker(&self) -> Result<Arc<Broker>> {
        self.broker.upgrade().ok_or(TaskError::BrokerGone)
    }

    /// Current status of the task, if any was reported.
    pub async fn status(&self) -> Result<Option<Status>> {
        self.broker()?.status(self).await
    }

    /// Wait up to `timeout` for the result and remove it from the backend.
    /// `None` waits indefinitely; zero returns immediately.
    pub async fn pop_result(&self, timeout: Option<Duration>) -> Result<Value> {
        let broker = self.broker()?;
        broker.pop_result(self, timeout).await
    }
}

impl TaskIdentity for DeferredResult {
    fn task_id(&self) -> &str {
        &self.id
    }

    fn task_name(&self) -> &str {
        &self.name
    }
}
