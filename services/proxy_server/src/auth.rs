//! Per-request token authentication and single-use replay tracking.
//!
//! Verifying the token itself checks its signature and a 10s timestamp
//! window. On top of that, an *accepted* token's identity is remembered
//! for ~60s so a second presentation of the same token is rejected, even
//! though it would still pass signature/timestamp verification on its own.
//! Both windows are enforced independently.

use std::{
    collections::HashMap,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing auth query parameter")]
    Missing,
    #[error("invalid token: {0}")]
    Invalid(#[from] token_auth::TokenError),
    #[error("token already used")]
    Replayed,
}

/// Shared across all request handlers; guards concurrent mutation of the
/// identity map.
pub struct ReplayGuard {
    secret: Vec<u8>,
    window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl ReplayGuard {
    pub fn new(secret: impl Into<Vec<u8>>, window: Duration) -> Self {
        Self {
            secret: secret.into(),
            window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Verifies `token`, then atomically checks-and-registers its identity.
    /// Returns the identity string on first acceptance.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let now_ms = now_millis();
        let identity = token_auth::verify(token, &self.secret, now_ms)?;

        let mut seen = self.seen.lock();
        let now = Instant::now();
        if let Some(expiry) = seen.get(&identity) {
            if *expiry > now {
                return Err(AuthError::Replayed);
            }
        }
        seen.insert(identity.clone(), now + self.window);
        Ok(identity)
    }

    /// Background sweeper: drops expired identities so the map does not
    /// grow unbounded. Runs until the returned handle is aborted.
    pub fn spawn_sweeper(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let guard = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(5));
            loop {
                tick.tick().await;
                let now = Instant::now();
                guard.seen.lock().retain(|_, expiry| *expiry > now);
            }
        })
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}

#[derive(Debug, serde::Deserialize)]
pub struct AuthParams {
    pub auth: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_replayed_token() {
        let guard = ReplayGuard::new(b"secret".to_vec(), Duration::from_secs(60));
        let token = token_auth::generate(b"secret", now_millis());
        guard.verify(&token).expect("first use accepted");
        assert!(matches!(guard.verify(&token), Err(AuthError::Replayed)));
    }

    #[test]
    fn distinct_tokens_both_accepted() {
        let guard = ReplayGuard::new(b"secret".to_vec(), Duration::from_secs(60));
        let now = now_millis();
        let a = token_auth::generate(b"secret", now);
        let b = token_auth::generate(b"secret", now);
        guard.verify(&a).unwrap();
        guard.verify(&b).unwrap();
        assert_eq!(guard.len(), 2);
    }
}
