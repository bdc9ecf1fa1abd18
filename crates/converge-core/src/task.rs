use crate::HOUR;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Recognized task option keys; any other key fails submission before the
/// backend is touched.
pub const TASK_OPTIONS: &[&str] = &[
    "result_status",
    "result_timeout",
    "heartrate",
    "taskset",
    "on_error",
    "size",
];

/// Base heartbeat interval in seconds when a task does not set one.
pub const DEFAULT_HEARTRATE: u64 = 30;

/// What to do with a taskset when one of its subtasks fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// The failure becomes the whole set's result; the set never converges.
    #[default]
    Fail,
    /// The failed subtask contributes a null and counting continues.
    Ignore,
}

impl OnError {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnError::Fail => "fail",
            OnError::Ignore => "ignore",
        }
    }
}

/// Task options, kept as an open string-keyed map so submission can reject
/// unrecognized keys by name. Typed setters and getters cover the
/// recognized set; `with_option` is the raw escape hatch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskOptions(BTreeMap<String, Value>);

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track status transitions for this task in the backend status store.
    pub fn with_result_status(mut self, on: bool) -> Self {
        self.0.insert("result_status".into(), Value::Bool(on));
        self
    }

    /// Keep the result for this many seconds after completion.
    pub fn with_result_timeout(mut self, seconds: u64) -> Self {
        self.0.insert("result_timeout".into(), json!(seconds));
        self
    }

    /// Base heartbeat interval in seconds.
    pub fn with_heartrate(mut self, seconds: u64) -> Self {
        self.0.insert("heartrate".into(), json!(seconds));
        self
    }

    pub fn with_on_error(mut self, policy: OnError) -> Self {
        self.0
            .insert("on_error".into(), Value::String(policy.as_str().into()));
        self
    }

    /// Expected subtask count, only meaningful for taskset-producing tasks.
    pub fn with_size(mut self, size: u64) -> Self {
        self.0.insert("size".into(), json!(size));
        self
    }

    /// Attach the aggregation barrier this task reports into on completion.
    pub fn with_taskset(mut self, taskset: TasksetRef) -> Self {
        self.0.insert(
            "taskset".into(),
            json!({
                "id": taskset.id,
                "name": taskset.name,
                "size": taskset.size,
                "heartrate": taskset.heartrate,
                "result_timeout": taskset.result_timeout,
                "on_error": taskset.on_error.as_str(),
            }),
        );
        self
    }

    /// Insert an arbitrary key. Validation happens at enqueue time, so this
    /// is how callers (and tests) produce an unrecognized-option rejection.
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Keys outside the recognized option set, sorted.
    pub fn unknown_keys(&self) -> Vec<String> {
        self.0
            .keys()
            .filter(|key| !TASK_OPTIONS.contains(&key.as_str()))
            .cloned()
            .collect()
    }

    /// True when the caller asked for a result placeholder; anything else is
    /// fire-and-forget.
    pub fn wants_result(&self) -> bool {
        self.result_status() || self.0.contains_key("result_timeout")
    }

    pub fn result_status(&self) -> bool {
        self.0
            .get("result_status")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn result_timeout(&self) -> Option<u64> {
        self.0.get("result_timeout").and_then(Value::as_u64)
    }

    pub fn heartrate(&self) -> u64 {
        self.0
            .get("heartrate")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_HEARTRATE)
    }

    pub fn on_error(&self) -> OnError {
        match self.0.get("on_error").and_then(Value::as_str) {
            Some("ignore") => OnError::Ignore,
            _ => OnError::Fail,
        }
    }

    pub fn size(&self) -> Option<u64> {
        self.0.get("size").and_then(Value::as_u64)
    }

    pub fn taskset(&self) -> Option<TasksetRef> {
        self.0
            .get("taskset")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// A serializable unit of work: a registered function name, its arguments,
/// and submission options. Immutable once enqueued; all later bookkeeping is
/// keyed by `id` in the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, Value>,
    #[serde(default)]
    pub options: TaskOptions,
}

impl Task {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Task {
            name: name.into(),
            id: Uuid::new_v4().simple().to_string(),
            args,
            kwargs: BTreeMap::new(),
            options: TaskOptions::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_kwargs(mut self, kwargs: BTreeMap<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_options(mut self, options: TaskOptions) -> Self {
        self.options = options;
        self
    }

    /// Liveness extension interval.
    pub fn heartrate(&self) -> Duration {
        Duration::from_secs(self.options.heartrate())
    }

    /// Result retention after completion.
    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.options.result_timeout().unwrap_or(HOUR))
    }
}

/// An object that can stand in for a task when waiting on or failing out a
/// result: anything with a task id and name.
pub trait TaskIdentity {
    fn task_id(&self) -> &str;
    fn task_name(&self) -> &str;
}

impl TaskIdentity for Task {
    fn task_id(&self) -> &str {
        &self.id
    }

    fn task_name(&self) -> &str {
        &self.name
    }
}

/// Serializable back-reference to a taskset, carried in a subtask's options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasksetRef {
    pub id: String,
    pub name: String,
    pub size: u64,
    /// Seconds.
    pub heartrate: u64,
    /// Seconds.
    pub result_timeout: u64,
    pub on_error: OnError,
}

/// Fan-out/fan-in barrier over a known number of subtasks. Initialize it
/// with the broker before enqueueing any subtask built via [`TaskSet::subtask`].
#[derive(Debug, Clone)]
pub struct TaskSet {
    id: String,
    name: String,
    size: u64,
    heartrate: u64,
    result_timeout: u64,
    on_error: OnError,
}

impl TaskSet {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        TaskSet {
            id: Uuid::new_v4().simple().to_string(),
            name: name.into(),
            size,
            heartrate: DEFAULT_HEARTRATE,
            result_timeout: HOUR,
            on_error: OnError::Fail,
        }
    }

    pub fn with_heartrate(mut self, seconds: u64) -> Self {
        self.heartrate = seconds;
        self
    }

    pub fn with_result_timeout(mut self, seconds: u64) -> Self {
        self.result_timeout = seconds;
        self
    }

    pub fn with_on_error(mut self, policy: OnError) -> Self {
        self.on_error = policy;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn heartrate(&self) -> Duration {
        Duration::from_secs(self.heartrate)
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.result_timeout)
    }

    pub fn to_ref(&self) -> TasksetRef {
        TasksetRef {
            id: self.id.clone(),
            name: self.name.clone(),
            size: self.size,
            heartrate: self.heartrate,
            result_timeout: self.result_timeout,
            on_error: self.on_error,
        }
    }

    /// Build a subtask that reports into this set on completion.
    pub fn subtask(&self, name: impl Into<String>, args: Vec<Value>) -> Task {
        Task::new(name, args).with_options(TaskOptions::new().with_taskset(self.to_ref()))
    }
}

impl TaskIdentity for TaskSet {
    fn task_id(&self) -> &str {
        &self.id
    }

    fn task_name(&self) -> &str {
        &self.name
    }
}
