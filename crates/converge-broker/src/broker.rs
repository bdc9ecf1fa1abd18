use crate::deferred::DeferredResult;
use crate::handler::{TaskContext, TaskHandler, TaskSpace};
use converge_core::{
    deserialize, expiry_window, serialize, MessageQueue, OnError, Result, ResultPlaceholder,
    Status, Task, TaskError, TaskIdentity, TaskOutcome, TaskSet, TasksetRef, TASK_EXPIRED,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Reserved name of the control task enqueued by [`Broker::stop`].
pub(crate) const STOP_TASK: &str = "<stop>";

/// Outcome of dispatching one dequeued task. Consumed only by the worker
/// loop: `Stop` is the control sentinel's clean-termination signal and never
/// surfaces as a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// Orchestration point for one logical queue, bound to one backend.
///
/// Registration happens before the broker is shared (`&mut self`); every
/// runtime operation takes `&self` or `&Arc<Self>`, so the task registry is
/// structurally read-only once workers and submitters hold the broker. All
/// cross-worker coordination state lives in the backend.
pub struct Broker {
    messages: Arc<dyn MessageQueue>,
    tasks: HashMap<String, Arc<dyn TaskHandler>>,
    name: String,
}

impl Broker {
    pub fn new(messages: Arc<dyn MessageQueue>) -> Self {
        Broker {
            name: messages.name().to_string(),
            tasks: HashMap::new(),
            messages,
        }
    }

    /// URL of the backend this broker is bound to.
    pub fn url(&self) -> &str {
        self.messages.url()
    }

    /// Queue namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register every task in a [`TaskSpace`]. Fails on any name that is
    /// already registered; no backend interaction.
    pub fn expose(&mut self, space: TaskSpace) -> Result<()> {
        for (name, handler) in space.into_tasks() {
            self.insert_task(name, handler)?;
        }
        Ok(())
    }

    /// Register a single task body under its own name.
    pub fn expose_task(&mut self, name: &str, handler: impl TaskHandler + 'static) -> Result<()> {
        self.insert_task(name.to_string(), Arc::new(handler))
    }

    fn insert_task(&mut self, name: String, handler: Arc<dyn TaskHandler>) -> Result<()> {
        if name == STOP_TASK || self.tasks.contains_key(&name) {
            return Err(TaskError::DuplicateTask(name));
        }
        self.tasks.insert(name, handler);
        Ok(())
    }

    /// Submit a task. Option keys are validated before any backend I/O;
    /// a [`DeferredResult`] is returned only when the options request result
    /// tracking, otherwise the task is fire-and-forget and no placeholder is
    /// stored.
    pub async fn enqueue(self: &Arc<Self>, task: Task) -> Result<Option<DeferredResult>> {
        let unknown = task.options.unknown_keys();
        if !unknown.is_empty() {
            return Err(TaskError::UnrecognizedOptions(unknown));
        }
        debug!("enqueue {} [{}:{}]", task.name, self.name, task.id);
        let message = serialize(&task)?;
        let result = if task.options.wants_result() {
            Some(DeferredResult::new(
                self,
                task.id.clone(),
                task.name.clone(),
                task.heartrate(),
            ))
        } else {
            None
        };
        if task.options.result_status() {
            self.set_status(&task, Status::Enqueued).await?;
        }
        let placeholder = result.as_ref().map(|result| ResultPlaceholder {
            heartrate: result.heartrate(),
        });
        self.messages
            .enqueue_task(&task.id, message, placeholder)
            .await?;
        Ok(result)
    }

    /// Record a status value for the task. Fixed values are stored as raw
    /// tokens, anything else is serialized.
    pub async fn set_status(&self, task: &impl TaskIdentity, status: Status) -> Result<()> {
        self.messages
            .set_status(task.task_id(), status.to_message()?)
            .await
    }

    /// Read back the status of a tracked task, if any was reported.
    pub async fn status(&self, result: &impl TaskIdentity) -> Result<Option<Status>> {
        match self.messages.get_status(result.task_id()).await? {
            Some(message) => Ok(Some(Status::from_message(&message)?)),
            None => Ok(None),
        }
    }

    /// Pull the next task from the queue. Returns `None` on timeout, and
    /// also on a malformed message: one corrupt entry must not take a worker
    /// down, so it is logged and swallowed.
    pub async fn next_task(&self, timeout: Option<Duration>) -> Result<Option<Task>> {
        let Some((task_id, message)) = self.messages.get(timeout).await? else {
            return Ok(None);
        };
        match deserialize::<Task>(&message) {
            Ok(task) => Ok(Some(task)),
            Err(err) => {
                error!("cannot deserialize task [{}:{}]: {}", self.name, task_id, err);
                Ok(None)
            }
        }
    }

    /// Execute a dequeued task and route its outcome. Normally only called
    /// by a worker loop.
    pub async fn invoke(self: &Arc<Self>, task: Task) -> Result<Control> {
        if task.name == STOP_TASK {
            return Ok(Control::Stop);
        }
        debug!("invoke {} [{}:{}]", task.name, self.name, task.id);
        let outcome = match self.tasks.get(&task.name).cloned() {
            Some(handler) => {
                if task.options.result_status() {
                    self.set_status(&task, Status::Processing).await?;
                }
                let ctx = TaskContext::new(self.clone(), task.clone());
                match handler.run(ctx).await {
                    Ok(value) => TaskOutcome::value(value),
                    Err(reason) => {
                        error!(
                            "task {} failed [{}:{}]: {}",
                            task.name, self.name, task.id, reason
                        );
                        TaskOutcome::failure(reason)
                    }
                }
            }
            None => {
                error!("no such task {} [{}:{}]", task.name, self.name, task.id);
                TaskOutcome::failure(format!("no such task: {}", task.name))
            }
        };
        self.route_outcome(&task, outcome).await?;
        Ok(Control::Continue)
    }

    async fn route_outcome(&self, task: &Task, outcome: TaskOutcome) -> Result<()> {
        if let Some(taskset) = task.options.taskset() {
            return self.update_taskset(&taskset, outcome).await;
        }
        if task.options.wants_result() {
            self.set_result(task, outcome).await
        } else {
            if let TaskOutcome::Failure { reason } = outcome {
                error!(
                    "dropping failure of untracked task {} [{}:{}]: {}",
                    task.name, self.name, task.id, reason
                );
            }
            Ok(())
        }
    }

    async fn update_taskset(&self, taskset: &TasksetRef, outcome: TaskOutcome) -> Result<()> {
        let retention = Duration::from_secs(taskset.result_timeout);
        if outcome.is_failure() && taskset.on_error == OnError::Fail {
            // the first failure becomes the whole set's result; the set can
            // no longer converge
            let message = serialize(&outcome)?;
            return self
                .messages
                .set_result(&taskset.id, message, retention)
                .await;
        }
        let value = match outcome {
            TaskOutcome::Value { value } => value,
            TaskOutcome::Failure { .. } => Value::Null,
        };
        let message = serialize(&value)?;
        if let Some(messages) = self
            .messages
            .update_taskset(&taskset.id, taskset.size, message, retention)
            .await?
        {
            debug!(
                "taskset {} complete [{}:{}]",
                taskset.name, self.name, taskset.id
            );
            let mut values = Vec::with_capacity(messages.len());
            for message in &messages {
                values.push(deserialize::<Value>(message)?);
            }
            let converged = TaskOutcome::value(Value::Array(values));
            self.messages
                .set_result(&taskset.id, serialize(&converged)?, retention)
                .await?;
        }
        Ok(())
    }

    /// Extend the task's result placeholder to its liveness window. Called
    /// periodically by long-running task bodies, normally via
    /// [`TaskContext::heartbeat`].
    pub async fn heartbeat(&self, task: &Task) -> Result<()> {
        self.messages
            .set_task_timeout(&task.id, expiry_window(task.heartrate()))
            .await
    }

    /// Persist a finished task's outcome, retained for the task's
    /// `result_timeout`.
    pub async fn set_result(&self, task: &Task, outcome: TaskOutcome) -> Result<()> {
        let message = serialize(&outcome)?;
        self.messages
            .set_result(&task.id, message, task.result_timeout())
            .await?;
        if task.options.result_status() {
            self.set_status(task, Status::Completed).await?;
        }
        Ok(())
    }

    /// Wait up to `timeout` for the task's result and remove it.
    ///
    /// Fails with [`TaskError::ResultMissing`] when nothing is stored after
    /// the wait, and with [`TaskError::TaskExpired`] when the placeholder
    /// lapsed before a result arrived (worker died or its heartbeat lapsed).
    pub async fn pop_result(
        &self,
        task: &impl TaskIdentity,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let Some(message) = self.messages.pop_result(task.task_id(), timeout).await? else {
            return Err(TaskError::ResultMissing {
                queue: self.name.clone(),
                task_id: task.task_id().to_string(),
            });
        };
        if message == TASK_EXPIRED {
            return Err(TaskError::TaskExpired {
                name: task.task_name().to_string(),
                queue: self.name.clone(),
                task_id: task.task_id().to_string(),
                reason: "task expired before a result was returned".to_string(),
            });
        }
        match deserialize::<TaskOutcome>(&message)? {
            TaskOutcome::Value { value } => Ok(value),
            TaskOutcome::Failure { reason } => Err(TaskError::TaskFailure {
                name: task.task_name().to_string(),
                queue: self.name.clone(),
                task_id: task.task_id().to_string(),
                reason,
            }),
        }
    }

    /// Fail the task out: force its result to the expiry sentinel so every
    /// concurrent or future `pop_result` observes expiry immediately instead
    /// of waiting out the timeout.
    pub async fn task_failed(&self, task: &impl TaskIdentity) -> Result<()> {
        self.messages
            .discard_result(task.task_id(), TASK_EXPIRED.to_vec())
            .await
    }

    /// Allocate result storage for a taskset. Must run before any of its
    /// subtasks are enqueued.
    pub async fn init_taskset(self: &Arc<Self>, taskset: &TaskSet) -> Result<DeferredResult> {
        let result = DeferredResult::new(
            self,
            taskset.id().to_string(),
            taskset.name().to_string(),
            taskset.heartrate(),
        );
        self.messages
            .init_taskset(taskset.id(), ResultPlaceholder {
                heartrate: taskset.heartrate(),
            })
            .await?;
        Ok(result)
    }

    /// Run a single-threaded pull/invoke loop against this broker. Stops
    /// after `max_wait` without a task (`None` blocks indefinitely) or when
    /// the control sentinel is dequeued.
    pub async fn start_worker(self: &Arc<Self>, max_wait: Option<Duration>) -> Result<()> {
        loop {
            let Some(task) = self.next_task(max_wait).await? else {
                break;
            };
            if let Control::Stop = self.invoke(task).await? {
                info!("worker stopped [{}]", self.name);
                break;
            }
        }
        Ok(())
    }

    /// Stop one worker by enqueueing the control sentinel.
    ///
    /// Best-effort testing hook: the sentinel is an ordinary queued task and
    /// terminates whichever worker happens to dequeue it, so the target is
    /// non-deterministic when more than one worker shares the queue.
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        let stop = Task::new(STOP_TASK, vec![]).with_id("stop");
        self.enqueue(stop).await?;
        Ok(())
    }

    /// Drop all pending tasks. In-flight and completed results are kept.
    pub async fn discard_pending_tasks(&self) -> Result<()> {
        self.messages.discard_pending().await
    }
}
