use std::time::Duration;

use tokio::runtime::Builder;

/// A small dedicated Tokio runtime used to refresh system metrics on a
/// timer, off the main service runtime so a busy request-handling pool
/// never delays (or is delayed by) metrics collection.
pub struct Runtime {
    handle: tokio::runtime::Runtime,
    interval: Duration,
}

impl Runtime {
    pub fn new(worker_threads: usize, interval: Duration) -> Self {
        let handle = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("telemetry")
            .enable_all()
            .build()
            .expect("failed to build telemetry runtime");
        Self { handle, interval }
    }

    /// Spawns `refresh` on this runtime, calling it once per `interval`
    /// until the process exits. The dedicated runtime is kept alive by
    /// `self`, which the caller holds for the lifetime of the service.
    pub fn start<F>(&self, mut refresh: F)
    where
        F: FnMut() + Send + 'static,
    {
        let interval = self.interval;
        self.handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                refresh();
            }
        });
    }
}
