//! Graceful shutdown coordinator: a `Notify` the HTTP server's
//! `with_graceful_shutdown` future awaits, plus an idempotent `shutdown()`
//! that tears down the owned pool.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::signal;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{info, warn};

pub struct ShutdownCoordinator {
    notify: Notify,
    shutting_down: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    pool: Mutex<Option<Arc<pg_pool::ConnectionPool>>>,
}

impl ShutdownCoordinator {
    pub fn new(pool: Arc<pg_pool::ConnectionPool>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            notify: Notify::new(),
            shutting_down: AtomicBool::new(false),
            shutdown_tx,
            pool: Mutex::new(Some(pool)),
        }
    }

    pub async fn wait_for_shutdown(&self) {
        self.notify.notified().await;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// A watch channel rather than `Notify` for WebSocket sessions: a
    /// session may start listening well after `shutdown()` already fired,
    /// and a `watch` remembers the last value instead of requiring the
    /// subscriber to already be waiting.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Idempotent: a second call after the pool has already been taken is a
    /// no-op warning.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        info!("initiating graceful shutdown sequence");

        let pool = match self.pool.lock().await.take() {
            Some(pool) => pool,
            None => {
                warn!("shutdown already called");
                return;
            }
        };

        let _ = self.shutdown_tx.send(true);
        self.notify.notify_waiters();
        pool.stop().await;
        info!("graceful shutdown sequence complete");
    }
}

pub async fn listen_for_shutdown_signals() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C signal"),
        _ = terminate => info!("received SIGTERM signal"),
    }

    info!("signal received, starting graceful shutdown");
}
