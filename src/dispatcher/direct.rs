//! Direct mode: a fixed pool of per-sample senders.

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::queue::DeliveryQueue;
use crate::transport::DeliveryClient;

/// Run `workers` senders (minimum 1) until `cancel` fires or the queue closes.
///
/// A worker that is mid-send when cancellation fires finishes that send; a
/// backoff wait is cut short. Samples still queued at that point are left in
/// the queue.
pub async fn run_direct(
    queue: DeliveryQueue,
    client: DeliveryClient,
    workers: usize,
    cancel: CancellationToken,
) {
    let workers = workers.max(1);
    let mut pool = JoinSet::new();
    for worker in 0..workers {
        pool.spawn(worker_loop(
            worker,
            queue.clone(),
            client.clone(),
            cancel.clone(),
        ));
    }

    while let Some(result) = pool.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Delivery worker panicked");
        }
    }

    let abandoned = queue.len();
    if abandoned > 0 {
        tracing::info!(abandoned, "Direct dispatch stopped with samples still queued");
    }
}

async fn worker_loop(
    worker: usize,
    queue: DeliveryQueue,
    client: DeliveryClient,
    cancel: CancellationToken,
) {
    tracing::debug!(worker, "Delivery worker started");

    loop {
        let sample = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sample = queue.take() => match sample {
                Some(sample) => sample,
                None => break,
            },
        };

        match client.deliver_sample(&sample, &cancel).await {
            Ok(()) => {
                tracing::debug!(worker, id = %sample.id(), "Sample delivered");
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!(worker, id = %sample.id(), "Delivery cancelled");
                break;
            }
            Err(e) => {
                tracing::error!(worker, id = %sample.id(), error = %e, "Sample delivery failed");
            }
        }
    }

    tracing::debug!(worker, "Delivery worker stopped");
}
