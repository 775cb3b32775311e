use std::{future::Future, pin::Pin};

use tokio::sync::mpsc;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Per-connection FIFO that hands tasks to the underlying driver one at a
/// time. Guarantees enqueue ordering (task N's future only completes after
/// task N-1's has) and that no two tasks ever run concurrently against the
/// same driver handle.
///
/// Implemented as a single task draining an unbounded channel; cancellation
/// is intentionally not exposed, tasks run to completion once dequeued.
#[derive(Clone)]
pub struct QuerySerializer {
    tx: mpsc::UnboundedSender<Job>,
}

impl QuerySerializer {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        Self { tx }
    }

    /// Enqueues `fut` and returns its outcome once it has run. If a prior
    /// task panicked and took the serializer's worker down with it, later
    /// enqueues never resolve their receiver, which would simply hang
    /// rather than panic the caller again for the same root cause.
    pub async fn enqueue<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (resp_tx, resp_rx) = tokio::sync::oneshot::channel();
        let job = Box::pin(async move {
            let result = fut.await;
            let _ = resp_tx.send(result);
        });
        // The worker task only exits when every sender (including this
        // clone) is dropped, so `send` failing here would mean the
        // serializer has already been torn down entirely.
        let _ = self.tx.send(job);
        resp_rx
            .await
            .expect("query serializer worker dropped without responding")
    }
}

impl Default for QuerySerializer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test]
    async fn preserves_enqueue_order() {
        let serializer = QuerySerializer::new();
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for expected in 0..10u32 {
            let counter = Arc::clone(&counter);
            let serializer = serializer.clone();
            handles.push(tokio::spawn(async move {
                serializer
                    .enqueue(async move {
                        let prev = counter.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(prev, expected);
                    })
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn later_tasks_run_after_earlier_failures() {
        let serializer = QuerySerializer::new();
        let first: Result<(), &str> = serializer.enqueue(async { Err("boom") }).await;
        assert!(first.is_err());
        let second: Result<(), &str> = serializer.enqueue(async { Ok(()) }).await;
        assert!(second.is_ok());
    }
}
