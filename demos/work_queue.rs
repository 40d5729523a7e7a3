//! Fire-and-forget work queue.
//!
//! A worker binds a pull endpoint; a master pushes calls at it and never
//! waits for results. The worker reports completed jobs over a channel so the
//! example knows when to stop.
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=zrpc=debug cargo run --example work_queue
//! ```

use serde_json::Value;
use tokio::sync::mpsc;
use zrpc::{CallArgs, HandlerError, Master, Worker};

const JOBS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();

    let worker = Worker::builder("inproc://work-queue")
        .function("square", move |args: CallArgs| {
            let done = done_tx.clone();
            async move {
                let n: u64 = args.required(0, "n")?;
                let _ = done.send(n * n);
                Ok(Value::Null)
            }
        })
        .function("explode", |_args: CallArgs| async move {
            Err(HandlerError::new("RuntimeError", "this job always fails"))
        })
        .bind()
        .await?;
    let working = worker.spawn();

    let mut master = Master::connect("inproc://work-queue").await?;
    for n in 1..=JOBS {
        master.call("square", CallArgs::new().arg(n)).await?;
    }
    // Logged by the worker, never seen here.
    master.call("explode", CallArgs::new()).await?;
    println!("queued {} jobs", JOBS);

    for _ in 0..JOBS {
        if let Some(square) = done_rx.recv().await {
            println!("worker finished a job: {}", square);
        }
    }

    master.kill_worker().await?;
    working.await??;
    Ok(())
}
