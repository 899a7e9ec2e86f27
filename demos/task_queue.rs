use dispatchq::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> DispatchResult<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config = TaskQueueConfig::builder()
        .max_retries(2)
        .task_timeout(Duration::from_secs(2))
        .error_handler(|err| eprintln!("task gave up: {}", err))
        .build();
    let queue = AsyncTaskQueue::new(config).await?;

    // A value-producing task observed through its handle
    let handle = queue
        .submit_with_result(|| async {
            sleep(Duration::from_millis(25)).await;
            Ok("pong")
        })
        .await?;
    println!("ping -> {:?}", handle.outcome().await);

    // A flaky task: the dispatcher retries it until it succeeds
    let attempts = Arc::new(AtomicU32::new(0));
    let flaky = Arc::clone(&attempts);
    queue
        .submit(move || {
            let flaky = Arc::clone(&flaky);
            async move {
                if flaky.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DispatchError::task_failure("warming up"))
                } else {
                    Ok(())
                }
            }
        })
        .await?;

    // Drain and stop
    queue.shutdown(Duration::from_secs(5)).await?;

    println!("flaky task ran {} times", attempts.load(Ordering::SeqCst));
    println!("snapshot: {:?}", queue.snapshot());

    Ok(())
}
