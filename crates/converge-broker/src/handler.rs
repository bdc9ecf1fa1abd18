use crate::broker::Broker;
use async_trait::async_trait;
use converge_core::{Result, Status, Task, TaskError, TaskIdentity};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

/// What a task body produces: a result value, or a reason it failed.
pub type HandlerResult = std::result::Result<Value, String>;

/// A registered task body.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> HandlerResult;
}

/// Adapter so a plain async closure can be registered as a task.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn run(&self, ctx: TaskContext) -> HandlerResult {
        (self.0)(ctx).await
    }
}

/// Execution context handed to a running task body. Carries the broker so a
/// long-running task can heartbeat and report status mid-flight.
pub struct TaskContext {
    broker: Arc<Broker>,
    task: Task,
}

impl TaskContext {
    pub(crate) fn new(broker: Arc<Broker>, task: Task) -> Self {
        TaskContext { broker, task }
    }

    pub fn args(&self) -> &[Value] {
        &self.task.args
    }

    pub fn kwargs(&self) -> &BTreeMap<String, Value> {
        &self.task.kwargs
    }

    pub fn task_id(&self) -> &str {
        &self.task.id
    }

    pub fn task_name(&self) -> &str {
        &self.task.name
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Signal liveness: re-arm the result placeholder's expiry window.
    pub async fn heartbeat(&self) -> Result<()> {
        self.broker.heartbeat(&self.task).await
    }

    /// Report a status value for waiters polling this task.
    pub async fn set_status(&self, status: Status) -> Result<()> {
        self.broker.set_status(&self.task, status).await
    }
}

impl TaskIdentity for TaskContext {
    fn task_id(&self) -> &str {
        &self.task.id
    }

    fn task_name(&self) -> &str {
        &self.task.name
    }
}

/// A registrable bundle of named task bodies, optionally namespaced so
/// `TaskSpace::named("math")` registers `add` as `math.add`.
#[derive(Default)]
pub struct TaskSpace {
    prefix: Option<String>,
    tasks: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(prefix: impl Into<String>) -> Self {
        TaskSpace {
            prefix: Some(prefix.into()),
            tasks: HashMap::new(),
        }
    }

    /// Register a task body under `name` (prefixed when the space is named).
    /// Fails on a name collision within this space.
    pub fn register(&mut self, name: &str, handler: impl TaskHandler + 'static) -> Result<()> {
        let name = match &self.prefix {
            Some(prefix) => format!("{}.{}", prefix, name),
            None => name.to_string(),
        };
        if self.tasks.contains_key(&name) {
            return Err(TaskError::DuplicateTask(name));
        }
        self.tasks.insert(name, Arc::new(handler));
        Ok(())
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub(crate) fn into_tasks(self) -> HashMap<String, Arc<dyn TaskHandler>> {
        self.tasks
    }
}
