use serde::Serialize;

/// Snapshot of the pool's bookkeeping, returned by the health endpoint and
/// used by tests to assert pool accounting invariants.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolStats {
    pub available: usize,
    pub borrowed: usize,
    pub connecting: usize,
    pub total: usize,
}
