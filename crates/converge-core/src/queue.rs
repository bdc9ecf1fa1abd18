use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Result slot a backend must allocate alongside an enqueued task when the
/// submitter asked for result tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultPlaceholder {
    /// Base heartbeat interval of the owning task.
    pub heartrate: Duration,
}

/// Liveness window derived from a task's heartrate: the placeholder expiry
/// armed on dequeue and re-armed by every heartbeat.
pub fn expiry_window(heartrate: Duration) -> Duration {
    heartrate * 2 + Duration::from_secs(5)
}

/// Storage/transport contract the orchestration core is built on.
///
/// Task/result lifecycle:
/// 1. `enqueue_task` atomically stores a non-expiring result placeholder and
///    makes the task visible to dequeuers.
/// 2. `get` atomically pops the task and arms the placeholder expiry to
///    [`expiry_window`] of the placeholder's heartrate.
/// 3. Heartbeats re-arm the expiry via `set_task_timeout`.
/// 4. The final result replaces the placeholder via `set_result`.
///
/// All operations must be safe under concurrent access from arbitrarily many
/// brokers across processes; the core itself never takes locks.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// URL identifying this backend instance.
    fn url(&self) -> &str;

    /// Queue namespace.
    fn name(&self) -> &str;

    /// Atomically create the result placeholder (when present) and enqueue
    /// the task. A dequeuer must never observe the task before its
    /// placeholder exists.
    async fn enqueue_task(
        &self,
        task_id: &str,
        message: Vec<u8>,
        result: Option<ResultPlaceholder>,
    ) -> Result<()>;

    /// Atomically remove and return one `(task_id, message)` pair. Waits up
    /// to `timeout` (forever when `None`); exactly one caller receives any
    /// given message.
    async fn get(&self, timeout: Option<Duration>) -> Result<Option<(String, Vec<u8>)>>;

    /// Drop all pending tasks. In-flight and completed results are kept.
    async fn discard_pending(&self) -> Result<()>;

    /// (Re)arm the result placeholder's expiry clock.
    async fn set_task_timeout(&self, task_id: &str, timeout: Duration) -> Result<()>;

    /// Last-write-wins status store, independent of the result store.
    async fn set_status(&self, task_id: &str, message: Vec<u8>) -> Result<()>;

    async fn get_status(&self, task_id: &str) -> Result<Option<Vec<u8>>>;

    /// Store the final result, retained for `timeout`.
    async fn set_result(&self, task_id: &str, message: Vec<u8>, timeout: Duration) -> Result<()>;

    /// Atomically read and remove the result. `None` timeout waits forever,
    /// zero returns immediately. Yields the expiry sentinel if the
    /// placeholder lapsed without a result.
    async fn pop_result(&self, task_id: &str, timeout: Option<Duration>)
        -> Result<Option<Vec<u8>>>;

    /// Force the stored result to the expiry sentinel so concurrent and
    /// future `pop_result` calls observe expiry instead of waiting.
    async fn discard_result(&self, task_id: &str, expired_token: Vec<u8>) -> Result<()>;

    /// Allocate the result placeholder for a taskset before any of its
    /// subtasks are enqueued.
    async fn init_taskset(&self, taskset_id: &str, result: ResultPlaceholder) -> Result<()>;

    /// Append one subtask result to the set. Atomic single-winner: only the
    /// call that brings the count to exactly `num_tasks` receives the full
    /// unordered message list; every other call receives `None`.
    async fn update_taskset(
        &self,
        taskset_id: &str,
        num_tasks: u64,
        message: Vec<u8>,
        timeout: Duration,
    ) -> Result<Option<Vec<Vec<u8>>>>;
}
