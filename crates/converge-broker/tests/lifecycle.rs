//! End-to-end lifecycle tests running the broker against the in-memory
//! backend: submit, work, wait, converge.

use converge_broker::{Broker, FnHandler, TaskContext, TaskSpace};
use converge_core::{OnError, Status, Task, TaskError, TaskOptions, TaskSet};
use converge_memory::MemoryQueue;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::advance;

fn math_space() -> TaskSpace {
    let mut space = TaskSpace::new();
    space
        .register(
            "add",
            FnHandler(|ctx: TaskContext| async move {
                let base = ctx.kwargs().get("base").and_then(Value::as_i64).unwrap_or(0);
                let sum: i64 = ctx.args().iter().filter_map(Value::as_i64).sum();
                Ok(json!(base + sum))
            }),
        )
        .unwrap();
    space
        .register(
            "fail",
            FnHandler(|ctx: TaskContext| async move {
                Err(ctx
                    .args()
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or("boom")
                    .to_string())
            }),
        )
        .unwrap();
    space
}

fn fixtures() -> (Arc<MemoryQueue>, Arc<Broker>) {
    let messages = Arc::new(MemoryQueue::new("memory://"));
    let mut broker = Broker::new(messages.clone());
    broker.expose(math_space()).unwrap();
    (messages, Arc::new(broker))
}

fn tracked() -> TaskOptions {
    TaskOptions::new().with_result_timeout(60)
}

#[tokio::test]
async fn submit_work_wait_round_trip() {
    let (_messages, broker) = fixtures();
    let task = Task::new("add", vec![json!(1), json!(2)])
        .with_kwargs([("base".to_string(), json!(10))].into())
        .with_options(tracked());
    let result = broker.enqueue(task).await.unwrap().unwrap();

    broker.start_worker(Some(Duration::ZERO)).await.unwrap();
    assert_eq!(result.pop_result(Some(Duration::ZERO)).await.unwrap(), json!(13));

    // pop is destructive, so a second claim finds nothing
    let err = result.pop_result(Some(Duration::ZERO)).await.unwrap_err();
    assert!(matches!(err, TaskError::ResultMissing { .. }));
}

#[tokio::test]
async fn handler_failure_surfaces_as_task_failure() {
    let (_messages, broker) = fixtures();
    let task = Task::new("fail", vec![json!("division by zero")]).with_options(tracked());
    let result = broker.enqueue(task).await.unwrap().unwrap();

    broker.start_worker(Some(Duration::ZERO)).await.unwrap();
    let err = result.pop_result(Some(Duration::ZERO)).await.unwrap_err();
    assert!(
        matches!(&err, TaskError::TaskFailure { name, reason, .. }
            if name == "fail" && reason == "division by zero")
    );
}

#[tokio::test]
async fn unregistered_task_name_fails_the_task() {
    let (_messages, broker) = fixtures();
    let task = Task::new("no.such.task", vec![]).with_options(tracked());
    let result = broker.enqueue(task).await.unwrap().unwrap();

    broker.start_worker(Some(Duration::ZERO)).await.unwrap();
    let err = result.pop_result(Some(Duration::ZERO)).await.unwrap_err();
    assert!(
        matches!(&err, TaskError::TaskFailure { reason, .. }
            if reason == "no such task: no.such.task")
    );
}

#[tokio::test]
async fn pending_result_reads_as_missing_not_expired() {
    let (_messages, broker) = fixtures();
    let task = Task::new("add", vec![json!(1)]).with_options(tracked());
    let result = broker.enqueue(task).await.unwrap().unwrap();

    // no worker has run: the placeholder exists but holds nothing, and its
    // expiry clock is not armed until dequeue
    let err = result.pop_result(Some(Duration::ZERO)).await.unwrap_err();
    assert!(matches!(err, TaskError::ResultMissing { .. }));

    // an id the queue has never seen reads the same way
    let unknown = broker
        .pop_result(
            &Task::new("add", vec![]).with_id("never-enqueued"),
            Some(Duration::ZERO),
        )
        .await
        .unwrap_err();
    assert!(matches!(unknown, TaskError::ResultMissing { .. }));
}

#[tokio::test(start_paused = true)]
async fn heartbeat_keeps_a_slow_task_alive() {
    let (_messages, broker) = fixtures();
    let task = Task::new("add", vec![json!(1)])
        .with_options(tracked().with_heartrate(5));
    let result = broker.enqueue(task).await.unwrap().unwrap();

    // dequeue arms the 2*5+5 second liveness window
    let running = broker.next_task(Some(Duration::ZERO)).await.unwrap().unwrap();

    advance(Duration::from_secs(10)).await;
    broker.heartbeat(&running).await.unwrap();
    advance(Duration::from_secs(10)).await;
    // 20s elapsed, but the heartbeat re-armed the window at 10s
    let err = result.pop_result(Some(Duration::ZERO)).await.unwrap_err();
    assert!(matches!(err, TaskError::ResultMissing { .. }));

    advance(Duration::from_secs(10)).await;
    let err = result.pop_result(Some(Duration::ZERO)).await.unwrap_err();
    assert!(matches!(err, TaskError::TaskExpired { .. }));
}

#[tokio::test]
async fn failing_out_a_task_unblocks_waiters_with_expiry() {
    let (_messages, broker) = fixtures();
    let task = Task::new("add", vec![json!(1)]).with_options(tracked());
    let result = broker.enqueue(task).await.unwrap().unwrap();

    let waiter = {
        let result = result.clone();
        tokio::spawn(async move { result.pop_result(None).await })
    };
    tokio::task::yield_now().await;
    broker.task_failed(&result).await.unwrap();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, TaskError::TaskExpired { .. }));
}

#[tokio::test]
async fn status_tracks_the_task_through_its_lifecycle() {
    let messages = Arc::new(MemoryQueue::new("memory://"));
    let mut broker = Broker::new(messages);
    broker
        .expose_task(
            "introspect",
            FnHandler(|ctx: TaskContext| async move {
                // a running task observes its own processing status
                let status = ctx.broker().status(&ctx).await.map_err(|e| e.to_string())?;
                Ok(json!(status == Some(Status::Processing)))
            }),
        )
        .unwrap();
    let broker = Arc::new(broker);

    let task = Task::new("introspect", vec![])
        .with_options(TaskOptions::new().with_result_status(true));
    let result = broker.enqueue(task).await.unwrap().unwrap();
    assert_eq!(result.status().await.unwrap(), Some(Status::Enqueued));

    broker.start_worker(Some(Duration::ZERO)).await.unwrap();
    assert_eq!(result.status().await.unwrap(), Some(Status::Completed));
    assert_eq!(result.pop_result(Some(Duration::ZERO)).await.unwrap(), json!(true));
}

#[tokio::test]
async fn custom_status_values_round_trip() {
    let messages = Arc::new(MemoryQueue::new("memory://"));
    let mut broker = Broker::new(messages);
    broker
        .expose_task(
            "report",
            FnHandler(|ctx: TaskContext| async move {
                ctx.set_status(Status::Custom(json!({"done": 3, "total": 4})))
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(json!("ok"))
            }),
        )
        .unwrap();
    let broker = Arc::new(broker);

    let task = Task::new("report", vec![]).with_options(tracked());
    let result = broker.enqueue(task).await.unwrap().unwrap();
    broker.start_worker(Some(Duration::ZERO)).await.unwrap();

    assert_eq!(
        result.status().await.unwrap(),
        Some(Status::Custom(json!({"done": 3, "total": 4})))
    );
}

#[tokio::test]
async fn taskset_converges_to_every_subtask_value() {
    let (_messages, broker) = fixtures();
    let taskset = TaskSet::new("sum", 3).with_result_timeout(60);
    let result = broker.init_taskset(&taskset).await.unwrap();

    for i in 0..3 {
        broker
            .enqueue(taskset.subtask("add", vec![json!(i)]))
            .await
            .unwrap();
    }
    broker.start_worker(Some(Duration::ZERO)).await.unwrap();

    let value = result.pop_result(Some(Duration::ZERO)).await.unwrap();
    let mut values = value.as_array().unwrap().clone();
    values.sort_by_key(|v| v.as_i64());
    assert_eq!(values, vec![json!(0), json!(1), json!(2)]);
}

#[tokio::test]
async fn subtask_failure_fails_the_whole_set_by_default() {
    let (_messages, broker) = fixtures();
    let taskset = TaskSet::new("sum", 3).with_result_timeout(60);
    let result = broker.init_taskset(&taskset).await.unwrap();

    broker
        .enqueue(taskset.subtask("fail", vec![json!("bad input")]))
        .await
        .unwrap();
    for i in 0..2 {
        broker
            .enqueue(taskset.subtask("add", vec![json!(i)]))
            .await
            .unwrap();
    }
    broker.start_worker(Some(Duration::ZERO)).await.unwrap();

    let err = result.pop_result(Some(Duration::ZERO)).await.unwrap_err();
    assert!(matches!(&err, TaskError::TaskFailure { reason, .. } if reason == "bad input"));
}

#[tokio::test]
async fn ignored_subtask_failure_contributes_a_null() {
    let (_messages, broker) = fixtures();
    let taskset = TaskSet::new("sum", 3)
        .with_result_timeout(60)
        .with_on_error(OnError::Ignore);
    let result = broker.init_taskset(&taskset).await.unwrap();

    broker
        .enqueue(taskset.subtask("fail", vec![json!("bad input")]))
        .await
        .unwrap();
    for i in 1..3 {
        broker
            .enqueue(taskset.subtask("add", vec![json!(i)]))
            .await
            .unwrap();
    }
    broker.start_worker(Some(Duration::ZERO)).await.unwrap();

    let value = result.pop_result(Some(Duration::ZERO)).await.unwrap();
    let mut values = value.as_array().unwrap().clone();
    values.sort_by_key(|v| v.as_i64());
    assert_eq!(values, vec![json!(null), json!(1), json!(2)]);
}

#[tokio::test]
async fn stop_terminates_a_blocked_worker() {
    let (_messages, broker) = fixtures();
    let worker = {
        let broker = broker.clone();
        tokio::spawn(async move { broker.start_worker(None).await })
    };
    tokio::task::yield_now().await;

    broker.stop().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn discard_pending_drops_queued_tasks() {
    let (_messages, broker) = fixtures();
    let task = Task::new("add", vec![json!(1)]).with_options(tracked());
    let result = broker.enqueue(task).await.unwrap().unwrap();

    broker.discard_pending_tasks().await.unwrap();
    broker.start_worker(Some(Duration::ZERO)).await.unwrap();

    let err = result.pop_result(Some(Duration::ZERO)).await.unwrap_err();
    assert!(matches!(err, TaskError::ResultMissing { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_process_each_task_exactly_once() {
    let messages = Arc::new(MemoryQueue::new("memory://"));
    let mut broker = Broker::new(messages);
    let invocations = Arc::new(AtomicUsize::new(0));
    {
        let invocations = invocations.clone();
        broker
            .expose_task(
                "count",
                FnHandler(move |ctx: TaskContext| {
                    let invocations = invocations.clone();
                    async move {
                        invocations.fetch_add(1, Ordering::SeqCst);
                        Ok(ctx.args().first().cloned().unwrap_or(Value::Null))
                    }
                }),
            )
            .unwrap();
    }
    let broker = Arc::new(broker);

    let mut results = Vec::new();
    for i in 0..20 {
        let task = Task::new("count", vec![json!(i)]).with_options(tracked());
        results.push(broker.enqueue(task).await.unwrap().unwrap());
    }

    let mut workers = Vec::new();
    for _ in 0..4 {
        let broker = broker.clone();
        workers.push(tokio::spawn(async move {
            broker.start_worker(Some(Duration::ZERO)).await
        }));
    }
    for worker in workers {
        worker.await.unwrap().unwrap();
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 20);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(
            result.pop_result(Some(Duration::ZERO)).await.unwrap(),
            json!(i)
        );
    }
}
