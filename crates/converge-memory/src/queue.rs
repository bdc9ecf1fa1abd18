use async_trait::async_trait;
use converge_core::{
    expiry_window, MessageQueue, Result, ResultPlaceholder, DEFAULT, TASK_EXPIRED,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Volatile, process-local message queue.
///
/// One mutex over the whole state makes every contract operation atomic;
/// blocking waits are built on [`Notify`], with the waiter registered before
/// the state check so a concurrent writer can never slip through unnoticed.
/// Expiry deadlines are monotonic instants, so timer-driven behavior can be
/// exercised under a paused tokio clock.
pub struct MemoryQueue {
    url: String,
    name: String,
    state: Mutex<State>,
    task_added: Notify,
    result_changed: Notify,
}

#[derive(Default)]
struct State {
    pending: VecDeque<(String, Vec<u8>)>,
    results: HashMap<String, ResultSlot>,
    statuses: HashMap<String, Vec<u8>>,
    tasksets: HashMap<String, TasksetSlot>,
}

struct ResultSlot {
    heartrate: Duration,
    message: Option<Vec<u8>>,
    /// Placeholder liveness deadline while empty; retention deadline once a
    /// message is stored. `None` means no expiry armed.
    deadline: Option<Instant>,
}

#[derive(Default)]
struct TasksetSlot {
    messages: Vec<Vec<u8>>,
    deadline: Option<Instant>,
}

/// What a `pop_result` attempt found.
enum Take {
    Ready(Vec<u8>),
    Expired,
    /// Nothing yet; carries the slot deadline to wait against, if armed.
    Waiting(Option<Instant>),
}

impl State {
    fn take_result(&mut self, task_id: &str, now: Instant) -> Take {
        let Some(slot) = self.results.get(task_id) else {
            return Take::Waiting(None);
        };
        match (slot.message.is_some(), slot.deadline) {
            (true, deadline) => {
                if deadline.is_some_and(|d| d <= now) {
                    // retention lapsed; the result is gone
                    self.results.remove(task_id);
                    Take::Waiting(None)
                } else {
                    match self.results.remove(task_id).and_then(|slot| slot.message) {
                        Some(message) => Take::Ready(message),
                        None => Take::Waiting(None),
                    }
                }
            }
            (false, Some(deadline)) if deadline <= now => {
                self.results.remove(task_id);
                Take::Expired
            }
            (false, deadline) => Take::Waiting(deadline),
        }
    }
}

impl MemoryQueue {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_name(url, DEFAULT)
    }

    pub fn with_name(url: impl Into<String>, name: impl Into<String>) -> Self {
        MemoryQueue {
            url: url.into(),
            name: name.into(),
            state: Mutex::new(State::default()),
            task_added: Notify::new(),
            result_changed: Notify::new(),
        }
    }

    /// Pop the oldest pending task and start the liveness clock on its
    /// placeholder, as one atomic step.
    fn pop_pending(&self) -> Option<(String, Vec<u8>)> {
        let armed;
        let entry = {
            let mut state = self.state.lock();
            let entry = state.pending.pop_front()?;
            armed = match state.results.get_mut(&entry.0) {
                Some(slot) if slot.message.is_none() => {
                    slot.deadline = Some(Instant::now() + expiry_window(slot.heartrate));
                    true
                }
                _ => false,
            };
            entry
        };
        if armed {
            // waiters recompute their wake deadline against the new expiry
            self.result_changed.notify_waiters();
        }
        Some(entry)
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    fn url(&self) -> &str {
        &self.url
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue_task(
        &self,
        task_id: &str,
        message: Vec<u8>,
        result: Option<ResultPlaceholder>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            if let Some(placeholder) = result {
                state.results.insert(
                    task_id.to_string(),
                    ResultSlot {
                        heartrate: placeholder.heartrate,
                        message: None,
                        deadline: None,
                    },
                );
            }
            state.pending.push_back((task_id.to_string(), message));
        }
        self.task_added.notify_waiters();
        Ok(())
    }

    async fn get(&self, timeout: Option<Duration>) -> Result<Option<(String, Vec<u8>)>> {
        let wait_deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.task_added.notified();
            if let Some(entry) = self.pop_pending() {
                return Ok(Some(entry));
            }
            match wait_deadline {
                Some(at) => {
                    if timeout_at(at, notified).await.is_err() {
                        return Ok(self.pop_pending());
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn discard_pending(&self) -> Result<()> {
        let dropped = {
            let mut state = self.state.lock();
            let dropped = state.pending.len();
            state.pending.clear();
            dropped
        };
        debug!("discarded {} pending tasks [{}]", dropped, self.name);
        Ok(())
    }

    async fn set_task_timeout(&self, task_id: &str, timeout: Duration) -> Result<()> {
        let rearmed = {
            let mut state = self.state.lock();
            match state.results.get_mut(task_id) {
                Some(slot) if slot.message.is_none() => {
                    slot.deadline = Some(Instant::now() + timeout);
                    true
                }
                _ => false,
            }
        };
        if rearmed {
            self.result_changed.notify_waiters();
        }
        Ok(())
    }

    async fn set_status(&self, task_id: &str, message: Vec<u8>) -> Result<()> {
        self.state
            .lock()
            .statuses
            .insert(task_id.to_string(), message);
        Ok(())
    }

    async fn get_status(&self, task_id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().statuses.get(task_id).cloned())
    }

    async fn set_result(&self, task_id: &str, message: Vec<u8>, timeout: Duration) -> Result<()> {
        {
            let mut state = self.state.lock();
            let slot = state
                .results
                .entry(task_id.to_string())
                .or_insert_with(|| ResultSlot {
                    heartrate: Duration::ZERO,
                    message: None,
                    deadline: None,
                });
            slot.message = Some(message);
            slot.deadline = Some(Instant::now() + timeout);
        }
        self.result_changed.notify_waiters();
        Ok(())
    }

    async fn pop_result(
        &self,
        task_id: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Vec<u8>>> {
        let wait_deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.result_changed.notified();
            let slot_deadline = match self.state.lock().take_result(task_id, Instant::now()) {
                Take::Ready(message) => return Ok(Some(message)),
                Take::Expired => return Ok(Some(TASK_EXPIRED.to_vec())),
                Take::Waiting(deadline) => deadline,
            };
            // wait for a change, the slot expiry, or the caller's deadline,
            // whichever is nearest
            let wake_at = match (wait_deadline, slot_deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };
            match wake_at {
                Some(at) => {
                    let _ = timeout_at(at, notified).await;
                    if wait_deadline.is_some_and(|d| Instant::now() >= d) {
                        // out of time; one final look
                        return Ok(
                            match self.state.lock().take_result(task_id, Instant::now()) {
                                Take::Ready(message) => Some(message),
                                Take::Expired => Some(TASK_EXPIRED.to_vec()),
                                Take::Waiting(_) => None,
                            },
                        );
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn discard_result(&self, task_id: &str, expired_token: Vec<u8>) -> Result<()> {
        {
            let mut state = self.state.lock();
            let slot = state
                .results
                .entry(task_id.to_string())
                .or_insert_with(|| ResultSlot {
                    heartrate: Duration::ZERO,
                    message: None,
                    deadline: None,
                });
            slot.message = Some(expired_token);
            slot.deadline = None;
        }
        self.result_changed.notify_waiters();
        Ok(())
    }

    async fn init_taskset(&self, taskset_id: &str, result: ResultPlaceholder) -> Result<()> {
        self.state.lock().results.insert(
            taskset_id.to_string(),
            ResultSlot {
                heartrate: result.heartrate,
                message: None,
                deadline: None,
            },
        );
        Ok(())
    }

    async fn update_taskset(
        &self,
        taskset_id: &str,
        num_tasks: u64,
        message: Vec<u8>,
        timeout: Duration,
    ) -> Result<Option<Vec<Vec<u8>>>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let complete = {
            let slot = state.tasksets.entry(taskset_id.to_string()).or_default();
            if slot.deadline.is_some_and(|d| d <= now) {
                // earlier partial results lapsed before the set filled up
                slot.messages.clear();
            }
            slot.messages.push(message);
            slot.deadline = Some(now + timeout);
            slot.messages.len() as u64 >= num_tasks
        };
        if complete {
            Ok(state
                .tasksets
                .remove(taskset_id)
                .map(|slot| slot.messages))
        } else {
            Ok(None)
        }
    }
}
