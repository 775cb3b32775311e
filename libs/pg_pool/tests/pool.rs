//! Integration tests against a real PostgreSQL instance, addressed via
//! `PGPOOL_TEST_DSN`. Mirrors the scenarios in the spec's testable
//! properties: pool accounting, FIFO acquires, borrow timeouts, and
//! transactional rollback on release.

use std::time::Duration;

use pg_pool::{ConnectionPool, PoolConfig};

fn test_dsn() -> String {
    std::env::var("PGPOOL_TEST_DSN")
        .expect("PGPOOL_TEST_DSN must point at a reachable PostgreSQL instance")
}

fn config(max: u32) -> PoolConfig {
    PoolConfig {
        minimum_pool_size: 0,
        maximum_pool_size: max,
        maximum_idle_connections: max,
        acquire_timeout: Duration::from_secs(5),
        borrow_timeout: Duration::from_secs(120),
        retry_interval: Duration::from_millis(50),
        validate_on_borrow: true,
    }
}

#[tokio::test]
async fn acquire_and_release_round_trip() {
    let pool = ConnectionPool::new(test_dsn(), config(2)).unwrap();
    pool.start().await.unwrap();

    let conn = pool.acquire().await.unwrap();
    let outcome = conn.query("SELECT 1", &[]).await.unwrap();
    assert_eq!(outcome.rows, vec![vec![Some("1".to_string())]]);

    pool.release(conn).await.unwrap();
    let stats = pool.stats();
    assert_eq!(stats.borrowed, 0);
    assert!(stats.available >= 1);

    pool.stop().await;
}

#[tokio::test]
async fn sequential_acquires_with_single_connection() {
    let pool = ConnectionPool::new(test_dsn(), config(1)).unwrap();
    pool.start().await.unwrap();

    for _ in 0..5 {
        let conn = pool.acquire().await.unwrap();
        conn.query("SELECT now()", &[]).await.unwrap();
        pool.release(conn).await.unwrap();
    }

    assert_eq!(pool.stats().total, 1);
    pool.stop().await;
}

#[tokio::test]
async fn acquire_times_out_when_exhausted() {
    let mut cfg = config(1);
    cfg.acquire_timeout = Duration::from_millis(10);
    let pool = ConnectionPool::new(test_dsn(), cfg).unwrap();
    pool.start().await.unwrap();

    let held = pool.acquire().await.unwrap();
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, pg_pool::PoolError::Timeout(10)));

    pool.release(held).await.unwrap();
    pool.stop().await;
}

#[tokio::test]
async fn release_rolls_back_open_transaction() {
    let pool = ConnectionPool::new(test_dsn(), config(1)).unwrap();
    pool.start().await.unwrap();

    let conn = pool.acquire().await.unwrap();
    conn.query("BEGIN", &[]).await.unwrap();
    conn.query(
        "CREATE TEMPORARY TABLE pgpool_test_txn (b int) ON COMMIT DROP",
        &[],
    )
    .await
    .unwrap();
    let first = conn
        .query("SELECT pg_current_xact_id_if_assigned() AS txn", &[])
        .await
        .unwrap();
    let first_txn = first.rows[0][0].clone();
    assert!(first_txn.is_some());
    pool.release(conn).await.unwrap();

    let conn = pool.acquire().await.unwrap();
    let second = conn
        .query("SELECT pg_current_xact_id_if_assigned() AS txn", &[])
        .await
        .unwrap();
    assert_ne!(second.rows[0][0], first_txn);
    pool.release(conn).await.unwrap();

    pool.stop().await;
}

#[tokio::test]
async fn borrow_timeout_destroys_connection_but_pool_recovers() {
    let mut cfg = config(1);
    cfg.borrow_timeout = Duration::from_millis(100);
    let pool = ConnectionPool::new(test_dsn(), cfg).unwrap();
    pool.start().await.unwrap();

    let conn = pool.acquire().await.unwrap();
    let id = conn.id();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(conn.is_destroyed());

    // the pool must have already replaced it and can serve a fresh acquire
    let fresh = pool.acquire().await.unwrap();
    assert_ne!(fresh.id(), id);
    pool.release(fresh).await.unwrap();

    pool.stop().await;
}

#[tokio::test]
async fn release_is_idempotent() {
    let pool = ConnectionPool::new(test_dsn(), config(2)).unwrap();
    pool.start().await.unwrap();

    let conn = pool.acquire().await.unwrap();
    pool.release(conn.clone()).await.unwrap();
    let available_after_first = pool.stats().available;

    // Second release of the same, still-healthy, non-evicted connection
    // must be a no-op: it must not push a second copy of the id onto
    // `available` for the borrow loop to hand out twice.
    pool.release(conn).await.unwrap();
    assert_eq!(pool.stats().available, available_after_first);

    pool.stop().await;
}

#[tokio::test]
async fn destroy_fires_exactly_once_across_repeated_eviction_paths() {
    let pool = ConnectionPool::new(test_dsn(), config(1)).unwrap();
    pool.start().await.unwrap();

    let mut events = pool.subscribe();
    let conn = pool.acquire().await.unwrap();
    conn.destroy();
    assert!(conn.is_destroyed());

    // Releasing an already-destroyed connection evicts it once; a second
    // release of the same id (now evicted) must stay a no-op rather than
    // firing a second terminal event.
    pool.release(conn.clone()).await.unwrap();
    pool.release(conn).await.unwrap();

    let mut destroyed_count = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, pg_pool::PoolEvent::ConnectionDestroyed { .. }) {
            destroyed_count += 1;
        }
    }
    assert_eq!(destroyed_count, 1);

    pool.stop().await;
}

#[tokio::test]
async fn stop_rejects_pending_acquire() {
    let pool = ConnectionPool::new(test_dsn(), config(1)).unwrap();
    pool.start().await.unwrap();
    let held = pool.acquire().await.unwrap();

    let pool_clone = pool.clone();
    let pending = tokio::spawn(async move { pool_clone.acquire().await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    pool.stop().await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(pg_pool::PoolError::Stopped)));
    drop(held);
}
