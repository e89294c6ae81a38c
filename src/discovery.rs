//! Time-bounded cache of the verification endpoints an authorization server advertises
//!
//! Entries are keyed by discovery URL. Lookups and inserts happen under one
//! lock; the fetch itself runs outside it behind a per-key guard, so concurrent
//! misses for the same server share a single in-flight request.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;

/// Path of the discovery document below the server's API prefix
pub const DISCOVERY_PATH: &str = "/meta/endpoints";

/// Default freshness window for discovered endpoints
pub const DEFAULT_DISCOVERY_TTL: Duration = Duration::from_secs(300);

/// Endpoint URLs advertised by an authorization server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub verify_token: String,
    pub verify_user: String,
    pub verify_user_role: String,
    pub verify_user_scope: String,
    /// Present when the server answers role-or-scope questions in one call
    #[serde(default)]
    pub verify_user_role_or_scope: Option<String>,
    #[serde(default)]
    pub login_page: Option<String>,
}

/// Discovery URL for an authorization server origin
pub fn discovery_url(origin: &str, api_prefix: &str) -> String {
    let prefix = api_prefix.trim_end_matches('/');
    let prefix = if prefix.is_empty() || prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{}", prefix)
    };
    format!("{}{}{}", origin.trim_end_matches('/'), prefix, DISCOVERY_PATH)
}

#[derive(Debug, Clone)]
struct DiscoveryEntry {
    fetched_at: Instant,
    endpoints: Endpoints,
}

#[derive(Default)]
struct Slot {
    entry: Option<DiscoveryEntry>,
    fetch_guard: Arc<Mutex<()>>,
}

impl Slot {
    fn live(&self, ttl: Duration) -> Option<Endpoints> {
        self.entry
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < ttl)
            .map(|e| e.endpoints.clone())
    }
}

/// Shared discovery cache; clone the `Arc` to share it between authorities
pub struct DiscoveryCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl DiscoveryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh endpoints for `key`, if any
    pub async fn get(&self, key: &str) -> Option<Endpoints> {
        let slots = self.slots.lock().await;
        slots.get(key).and_then(|slot| slot.live(self.ttl))
    }

    /// Return the fresh entry for `key` or run `fetch` to fill it.
    ///
    /// Concurrent callers missing on the same key wait for the first caller's
    /// fetch instead of issuing their own. Failed fetches are not cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<Endpoints>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Endpoints>>,
    {
        let fetch_guard = {
            let mut slots = self.slots.lock().await;
            let slot = slots.entry(key.to_string()).or_default();
            if let Some(endpoints) = slot.live(self.ttl) {
                tracing::debug!("Discovery cache hit for {}", key);
                return Ok(endpoints);
            }
            slot.fetch_guard.clone()
        };

        let _in_flight = fetch_guard.lock().await;

        // Another caller may have filled the slot while we waited
        if let Some(endpoints) = self.get(key).await {
            tracing::debug!("Discovery completed by concurrent fetch for {}", key);
            return Ok(endpoints);
        }

        tracing::debug!("Discovery cache miss for {}", key);
        let endpoints = fetch().await?;
        self.insert(key, endpoints.clone()).await;
        Ok(endpoints)
    }

    /// Store endpoints as freshly fetched
    pub async fn insert(&self, key: &str, endpoints: Endpoints) {
        let mut slots = self.slots.lock().await;
        slots.entry(key.to_string()).or_default().entry = Some(DiscoveryEntry {
            fetched_at: Instant::now(),
            endpoints,
        });
    }

    /// Drop the entry for `key`; the next lookup fetches again
    pub async fn invalidate(&self, key: &str) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(key) {
            slot.entry = None;
        }
    }

    pub async fn clear(&self) {
        let mut slots = self.slots.lock().await;
        for slot in slots.values_mut() {
            slot.entry = None;
        }
    }

    /// Number of fresh entries
    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.values().filter(|s| s.live(self.ttl).is_some()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOVERY_TTL)
    }
}

impl std::fmt::Debug for DiscoveryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryCache").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}
