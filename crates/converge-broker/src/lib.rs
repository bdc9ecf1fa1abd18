mod broker;
mod deferred;
mod handler;

pub use broker::{Broker, Control};
pub use deferred::DeferredResult;
pub use handler::{FnHandler, HandlerResult, TaskContext, TaskHandler, TaskSpace};
