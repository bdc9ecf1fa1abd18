use converge_broker::{Broker, FnHandler, TaskContext, TaskSpace};
use converge_core::{Task, TaskOptions, TaskSet};
use converge_memory::MemoryQueue;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let messages = Arc::new(MemoryQueue::new("memory://demo"));
    let mut broker = Broker::new(messages);

    let mut math = TaskSpace::named("math");
    math.register(
        "add",
        FnHandler(|ctx: TaskContext| async move {
            let sum: i64 = ctx.args().iter().filter_map(Value::as_i64).sum();
            Ok(json!(sum))
        }),
    )?;
    broker.expose(math)?;
    let broker = Arc::new(broker);

    // A pool of workers sharing the queue
    let mut workers = Vec::new();
    for _ in 0..2 {
        let broker = broker.clone();
        workers.push(tokio::spawn(async move { broker.start_worker(None).await }));
    }

    // Submit a tracked task and wait for its result
    let task = Task::new("math.add", vec![json!(1), json!(2), json!(3)])
        .with_options(TaskOptions::new().with_result_timeout(60));
    let result = broker.enqueue(task).await?.expect("tracked task");
    let value = result.pop_result(Some(Duration::from_secs(10))).await?;
    println!("math.add(1, 2, 3) = {}", value);

    // Fan out a taskset and wait for it to converge
    let taskset = TaskSet::new("partial-sums", 4).with_result_timeout(60);
    let result = broker.init_taskset(&taskset).await?;
    for i in 0..4i64 {
        broker
            .enqueue(taskset.subtask("math.add", vec![json!(i), json!(i)]))
            .await?;
    }
    let values = result.pop_result(Some(Duration::from_secs(10))).await?;
    println!("partial sums = {}", values);

    // One stop per worker
    for _ in &workers {
        broker.stop().await?;
    }
    for worker in workers {
        worker.await??;
    }
    Ok(())
}
