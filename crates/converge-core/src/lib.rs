mod codec;
mod error;
mod outcome;
mod queue;
mod status;
mod task;

pub use codec::{deserialize, serialize};
pub use error::{Result, TaskError};
pub use outcome::TaskOutcome;
pub use queue::{expiry_window, MessageQueue, ResultPlaceholder};
pub use status::{Status, STATUS_VALUES, TASK_EXPIRED};
pub use task::{
    OnError, Task, TaskIdentity, TaskOptions, TaskSet, TasksetRef, DEFAULT_HEARTRATE, TASK_OPTIONS,
};

/// Default queue namespace used when no name is given.
pub const DEFAULT: &str = "default";

pub const MINUTE: u64 = 60;
pub const HOUR: u64 = 60 * MINUTE;
pub const DAY: u64 = 24 * HOUR;
