use dispatchq::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> DispatchResult<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Create a queue with the default configuration
    let queue = JobQueue::new(Config::default()).await?;

    // Submit a batch of jobs; they run in submission order
    for i in 0..16 {
        queue
            .submit(Job::new("greet", format!("guest-{}", i), move || {
                println!("hello, guest {}!", i);
                Ok(())
            }))
            .await?;
    }

    // Drain and stop
    queue.shutdown(Duration::from_secs(5)).await?;

    for worker in queue.capture_worker_metrics() {
        println!(
            "worker {}: completed={} failed={} retried={}",
            worker.worker_id, worker.completed, worker.failed, worker.retried
        );
    }
    let totals = queue.capture_queue_metrics();
    println!("queued={} in_flight={}", totals.queued, totals.in_flight);

    Ok(())
}
