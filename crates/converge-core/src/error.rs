use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("unrecognized task options: {}", .0.join(", "))]
    UnrecognizedOptions(Vec<String>),

    #[error("task {0:?} conflicts with an existing task")]
    DuplicateTask(String),

    #[error("no result for task [{queue}:{task_id}]")]
    ResultMissing { queue: String, task_id: String },

    #[error("task {name:?} [{queue}:{task_id}] expired: {reason}")]
    TaskExpired {
        name: String,
        queue: String,
        task_id: String,
        reason: String,
    },

    #[error("task {name:?} [{queue}:{task_id}] failed: {reason}")]
    TaskFailure {
        name: String,
        queue: String,
        task_id: String,
        reason: String,
    },

    #[error("broker is no longer alive")]
    BrokerGone,

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("queue backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;
