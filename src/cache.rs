// SPDX-License-Identifier: Apache-2.0

//! Canonical-key session cache.
//!
//! Drivers cache live sessions (pools, embedded engine instances) keyed by a
//! canonical string derived from every config field that affects the result.
//! Repeated connects with an equivalent config reuse the cached session.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::FederationResult;

/// Concurrent map of canonical key to shared session.
pub struct SessionCache<S> {
    sessions: RwLock<HashMap<String, Arc<S>>>,
}

impl<S> SessionCache<S> {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<S>> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Returns the cached session for `key`, building one with `build` if
    /// absent. The build runs outside any lock; if another task inserted a
    /// session meanwhile, the existing one wins and the fresh build is
    /// dropped. At most one session per key is ever retained.
    pub async fn get_or_try_insert<F, Fut>(&self, key: &str, build: F) -> FederationResult<Arc<S>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FederationResult<S>>,
    {
        if let Some(existing) = self.get(key).await {
            return Ok(existing);
        }

        let fresh = Arc::new(build().await?);

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(key) {
            return Ok(Arc::clone(existing));
        }
        sessions.insert(key.to_string(), Arc::clone(&fresh));
        Ok(fresh)
    }

    pub async fn remove(&self, key: &str) -> Option<Arc<S>> {
        self.sessions.write().await.remove(key)
    }

    /// Drains all sessions, returning them so the caller can close each one.
    pub async fn drain(&self) -> Vec<Arc<S>> {
        let mut sessions = self.sessions.write().await;
        sessions.drain().map(|(_, s)| s).collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl<S> Default for SessionCache<S> {
    fn default() -> Self {
        Self::new()
    }
}
