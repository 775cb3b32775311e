use std::{
    collections::{HashMap, VecDeque},
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use lru::LruCache;
use parking_lot::Mutex;
use tokio::{
    sync::{oneshot, Notify},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    config::PoolConfig,
    connection::Connection,
    error::PoolError,
    events::{EventBus, PoolEvent},
    stats::PoolStats,
};

/// Bound on the `evicted` LRU. Large enough that a double-release arriving
/// any time soon after the original eviction still finds its entry.
const EVICTED_CAPACITY: usize = 1024;

/// A pending `acquire()`: a resolvable future plus a one-shot "has this
/// already transitioned" guard. Exactly one of {caller timeout, borrow
/// loop} ever wins the transition out of `pending`.
struct ConnectionRequest {
    pending: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Result<Arc<Connection>, PoolError>>>>,
}

impl ConnectionRequest {
    fn new() -> (Arc<Self>, oneshot::Receiver<Result<Arc<Connection>, PoolError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                pending: AtomicBool::new(true),
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Attempts pending -> resolved. Returns true iff this call performed
    /// the transition (i.e. nobody else resolved it first).
    fn resolve(&self, result: Result<Arc<Connection>, PoolError>) -> bool {
        if self
            .pending
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Some(tx) = self.tx.lock().take() {
                let _ = tx.send(result);
            }
            true
        } else {
            false
        }
    }
}

struct PoolState {
    all: HashMap<Uuid, Arc<Connection>>,
    available: VecDeque<Uuid>,
    borrowed: HashMap<Uuid, JoinHandle<()>>,
    pending: VecDeque<Arc<ConnectionRequest>>,
    evicted: LruCache<Uuid, ()>,
    started: bool,
}

/// Bounded, event-driven pool of PostgreSQL connections. Owns a create
/// loop (keeps `all` populated toward the water marks) and a borrow loop
/// (matches pending requests with available connections), each run as an
/// independent task signaled by `Notify`.
pub struct ConnectionPool {
    options: String,
    config: PoolConfig,
    state: Mutex<PoolState>,
    events: EventBus<PoolEvent>,
    create_notify: Notify,
    borrow_notify: Notify,
    loop_tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl ConnectionPool {
    pub fn new(options: impl Into<String>, config: PoolConfig) -> Result<Arc<Self>, PoolError> {
        config.validate()?;
        Ok(Arc::new(Self {
            options: options.into(),
            config,
            state: Mutex::new(PoolState {
                all: HashMap::new(),
                available: VecDeque::new(),
                borrowed: HashMap::new(),
                pending: VecDeque::new(),
                evicted: LruCache::new(NonZeroUsize::new(EVICTED_CAPACITY).unwrap()),
                started: false,
            }),
            events: EventBus::new(256),
            create_notify: Notify::new(),
            borrow_notify: Notify::new(),
            loop_tasks: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let available = state.available.len();
        let borrowed = state.borrowed.len();
        let total = state.all.len();
        let connecting = total.saturating_sub(available + borrowed);
        PoolStats {
            available,
            borrowed,
            connecting,
            total,
        }
    }

    /// Idempotent when already started. Creates and validates one initial
    /// connection synchronously; fails if that connection cannot connect
    /// or validate.
    pub async fn start(self: &Arc<Self>) -> Result<(), PoolError> {
        {
            if self.state.lock().started {
                return Ok(());
            }
        }

        let conn = Connection::new(self.options.clone());
        let id = conn.id();
        conn.connect()
            .await
            .map_err(|e| PoolError::StartFailed(e.to_string()))?;
        if !self.probe(&conn).await {
            conn.destroy();
            return Err(PoolError::StartFailed(
                "initial connection failed validation".to_string(),
            ));
        }

        let keep_available = self.config.maximum_idle_connections > 0;
        {
            let mut state = self.state.lock();
            state.all.insert(id, Arc::clone(&conn));
            state.started = true;
            if keep_available {
                state.available.push_back(id);
            }
        }
        if !keep_available {
            self.evict(id, false).await;
        }
        self.events.emit(PoolEvent::Started);

        let create_task = tokio::spawn(Arc::clone(self).create_loop());
        let borrow_task = tokio::spawn(Arc::clone(self).borrow_loop());
        *self.loop_tasks.lock() = Some((create_task, borrow_task));
        self.create_notify.notify_one();
        Ok(())
    }

    /// Idempotent. Flips `started` false, rejects all pending requests,
    /// clears `available`/`borrowed`, and destroys every remaining
    /// connection. Does not abort the create/borrow loop tasks: either
    /// is parked on its own `Notify` (woken below and returns as soon as
    /// it observes `started == false`) or mid-`connect()`/`probe()` for a
    /// connection already inserted into `all` (that task finishes the
    /// call it's in, notices the pool stopped, evicts what it was
    /// working on, and returns on its own). `stop()` waits for both, so
    /// by the time it returns nothing is left in `all`.
    pub async fn stop(self: &Arc<Self>) {
        let (pending, leftover, tasks) = {
            let mut state = self.state.lock();
            if !state.started {
                return;
            }
            state.started = false;
            let pending: Vec<_> = state.pending.drain(..).collect();
            let mut leftover: Vec<Uuid> = state.available.drain(..).collect();
            leftover.extend(state.borrowed.keys().copied());
            (pending, leftover, self.loop_tasks.lock().take())
        };

        for request in pending {
            request.resolve(Err(PoolError::Stopped));
        }
        for id in leftover {
            self.evict(id, false).await;
        }

        self.create_notify.notify_one();
        self.borrow_notify.notify_one();
        if let Some((create_task, borrow_task)) = tasks {
            let _ = create_task.await;
            let _ = borrow_task.await;
        }

        self.events.emit(PoolEvent::Stopped);
    }

    /// Enrolls a request in the pending queue and wakes the borrow loop.
    pub async fn acquire(self: &Arc<Self>) -> Result<Arc<Connection>, PoolError> {
        {
            if !self.state.lock().started {
                return Err(PoolError::NotStarted);
            }
        }

        let (request, rx) = ConnectionRequest::new();
        {
            self.state.lock().pending.push_back(Arc::clone(&request));
        }
        self.borrow_notify.notify_one();
        self.create_notify.notify_one();

        match tokio::time::timeout(self.config.acquire_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PoolError::Stopped),
            Err(_elapsed) => {
                let ms = self.config.acquire_timeout.as_millis() as u64;
                // Whether or not we win this compare-exchange, the borrow
                // loop is responsible (step 4 of its own contract) for
                // routing any connection it was about to hand to this
                // request back to `available` instead of leaking it.
                request.resolve(Err(PoolError::Timeout(ms)));
                Err(PoolError::Timeout(ms))
            }
        }
    }

    /// Returns a previously acquired connection. Idempotent: a second
    /// release of a connection that already went back to `available` (or
    /// was already evicted) is a no-op, same as a second release of an
    /// unowned id fails.
    pub async fn release(self: &Arc<Self>, conn: Arc<Connection>) -> Result<(), PoolError> {
        let id = conn.id();
        enum Membership {
            Evicted,
            Borrowed,
            AlreadyReleased,
            Unknown,
        }
        let membership = {
            let mut state = self.state.lock();
            if state.evicted.get(&id).is_some() {
                Membership::Evicted
            } else if !state.all.contains_key(&id) {
                Membership::Unknown
            } else if state.borrowed.contains_key(&id) {
                Membership::Borrowed
            } else {
                Membership::AlreadyReleased
            }
        };
        match membership {
            Membership::Evicted | Membership::AlreadyReleased => Ok(()),
            Membership::Unknown => Err(PoolError::NotOwned),
            Membership::Borrowed => {
                self.release_owned(id, conn).await;
                Ok(())
            }
        }
    }

    async fn release_owned(self: &Arc<Self>, id: Uuid, conn: Arc<Connection>) {
        {
            let mut state = self.state.lock();
            if let Some(timer) = state.borrowed.remove(&id) {
                timer.abort();
            }
        }

        if conn.is_destroyed() {
            self.evict(id, false).await;
            self.borrow_notify.notify_one();
            return;
        }

        let should_evict = {
            self.state.lock().available.len() >= self.config.maximum_idle_connections as usize
        };
        if should_evict {
            self.evict(id, false).await;
            self.borrow_notify.notify_one();
            return;
        }

        match self.recycle(&conn).await {
            Ok(()) => {
                {
                    self.state.lock().available.push_back(id);
                }
                self.events.emit(PoolEvent::ConnectionReleased { id });
            }
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "recycle failed, evicting");
                self.evict(id, false).await;
            }
        }
        self.borrow_notify.notify_one();
    }

    async fn create_loop(self: Arc<Self>) {
        loop {
            self.create_notify.notified().await;
            loop {
                if !self.state.lock().started {
                    return;
                }

                let (available, all_count, pending) = {
                    let state = self.state.lock();
                    (state.available.len(), state.all.len(), state.pending.len())
                };

                let min = self.config.minimum_pool_size as usize;
                let max = self.config.maximum_pool_size as usize;
                let idle = self.config.maximum_idle_connections as usize;

                if (available > 0 && all_count >= min)
                    || (pending == 0 && available >= idle)
                    || (all_count >= max)
                {
                    break;
                }

                let conn = Connection::new(self.options.clone());
                let id = conn.id();
                {
                    self.state.lock().all.insert(id, Arc::clone(&conn));
                }

                // `connect()` is the loop's longest suspension point, so it's
                // where a concurrent `stop()` is most likely to land; the
                // connection above is already in `all` by the time it
                // resolves either way, so both arms re-check `started` and
                // evict instead of handing a post-stop connection out.
                match conn.connect().await {
                    Ok(()) => {
                        let stopped = !self.state.lock().started;
                        if stopped {
                            self.evict(id, false).await;
                            return;
                        }
                        {
                            self.state.lock().available.push_back(id);
                        }
                        self.events.emit(PoolEvent::ConnectionCreated { id });
                        self.borrow_notify.notify_one();
                    }
                    Err(e) => {
                        tracing::warn!(connection_id = %id, error = %e, "connection attempt failed");
                        self.evict(id, true).await;
                        if !self.state.lock().started {
                            return;
                        }
                        tokio::time::sleep(self.config.retry_interval).await;
                    }
                }
            }
        }
    }

    async fn borrow_loop(self: Arc<Self>) {
        loop {
            self.borrow_notify.notified().await;
            loop {
                if !self.state.lock().started {
                    // A request already off the `pending` queue (held
                    // locally by a past iteration) is handled at its own
                    // stop check below; anything still queued needs to be
                    // rejected here since `stop()`'s own drain already ran.
                    let stragglers: Vec<_> = { self.state.lock().pending.drain(..).collect() };
                    for request in stragglers {
                        request.resolve(Err(PoolError::Stopped));
                    }
                    return;
                }

                let request = {
                    let mut state = self.state.lock();
                    match state.pending.pop_front() {
                        Some(r) => r,
                        None => break,
                    }
                };

                if !request.is_pending() {
                    continue;
                }

                let conn_id = {
                    self.state.lock().available.pop_front()
                };
                let Some(conn_id) = conn_id else {
                    {
                        self.state.lock().pending.push_front(request);
                    }
                    self.create_notify.notify_one();
                    break;
                };

                let conn = {
                    self.state.lock().all.get(&conn_id).cloned()
                };
                let Some(conn) = conn else { continue };

                if !request.is_pending() {
                    self.route_back_or_evict(conn_id).await;
                    continue;
                }

                if self.config.validate_on_borrow && !self.probe(&conn).await {
                    {
                        self.state.lock().pending.push_front(request);
                    }
                    self.evict(conn_id, false).await;
                    self.create_notify.notify_one();
                    continue;
                }

                if !self.state.lock().started {
                    // Popped `conn_id` out of `available` before noticing
                    // the pool stopped; it's not in `available` or
                    // `borrowed` anymore, so `stop()`'s own sweep never saw
                    // it. Evict it and reject this request directly rather
                    // than re-queuing it, since nothing will drain the
                    // queue again after this task returns.
                    request.resolve(Err(PoolError::Stopped));
                    self.evict(conn_id, false).await;
                    return;
                }

                if !request.is_pending() {
                    let _ = self.release(Arc::clone(&conn)).await;
                    continue;
                }

                let timer = self.arm_borrow_timer(conn_id);
                {
                    self.state.lock().borrowed.insert(conn_id, timer);
                }
                self.events.emit(PoolEvent::ConnectionAcquired { id: conn_id });
                if !request.resolve(Ok(Arc::clone(&conn))) {
                    // Lost the race to the caller's own timeout between the
                    // pending re-check above and here; undo the borrow.
                    let _ = self.release(conn).await;
                }
            }
        }
    }

    async fn route_back_or_evict(self: &Arc<Self>, id: Uuid) {
        let should_evict = {
            self.state.lock().available.len() >= self.config.maximum_idle_connections as usize
        };
        if should_evict {
            self.evict(id, false).await;
        } else {
            self.state.lock().available.push_back(id);
        }
    }

    fn arm_borrow_timer(self: &Arc<Self>, id: Uuid) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(pool.config.borrow_timeout).await;
            let still_borrowed = pool.state.lock().borrowed.contains_key(&id);
            if still_borrowed {
                tracing::warn!(connection_id = %id, "borrow timeout exceeded, destroying connection");
                pool.evict(id, false).await;
                pool.borrow_notify.notify_one();
            }
        })
    }

    /// Removes `id` from every pool structure, destroys it, and fires
    /// its terminal event. Idempotent and safe to call more than once.
    async fn evict(self: &Arc<Self>, id: Uuid, aborted: bool) {
        let conn = {
            let mut state = self.state.lock();
            state.available.retain(|x| *x != id);
            if let Some(timer) = state.borrowed.remove(&id) {
                timer.abort();
            }
            let conn = state.all.remove(&id);
            state.evicted.put(id, ());
            conn
        };
        if let Some(conn) = conn {
            conn.destroy();
            let event = if aborted {
                PoolEvent::ConnectionAborted { id }
            } else {
                PoolEvent::ConnectionDestroyed { id }
            };
            self.events.emit(event);
        }
    }

    async fn probe(&self, conn: &Arc<Connection>) -> bool {
        conn.query("SELECT now()", &[]).await.is_ok()
    }

    async fn recycle(&self, conn: &Arc<Connection>) -> Result<(), crate::error::QueryError> {
        let probe = conn
            .query(
                "SELECT pg_current_xact_id_if_assigned() IS NOT NULL AS in_txn",
                &[],
            )
            .await?;
        let in_transaction = probe
            .rows
            .first()
            .and_then(|row| row.first())
            .map(|cell| cell.as_deref() == Some("true"))
            .unwrap_or(false);
        if in_transaction {
            conn.query("ROLLBACK", &[]).await?;
        }
        Ok(())
    }
}
