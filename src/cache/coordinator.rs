//! Cache-aware, deduplicating read path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::counter;
use tracing::debug;

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::registry::{Claim, CompletionGuard, InFlightRegistry, Launch, SharedFetch};
use super::store::ResponseCache;
use crate::error::ApiError;

pub(crate) const METRIC_INFLIGHT_STARTED: &str = "fetchwell_inflight_started_total";
pub(crate) const METRIC_INFLIGHT_JOIN: &str = "fetchwell_inflight_join_total";

/// Composes the response cache with the in-flight registry.
pub struct CacheCoordinator<V> {
    cache: Arc<ResponseCache<V>>,
    inflight: Arc<InFlightRegistry<V>>,
}

impl<V> Clone for CacheCoordinator<V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            inflight: Arc::clone(&self.inflight),
        }
    }
}

impl<V> CacheCoordinator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            cache: Arc::new(ResponseCache::new(config)),
            inflight: Arc::new(InFlightRegistry::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ResponseCache<V>> {
        &self.cache
    }

    pub fn inflight(&self) -> &InFlightRegistry<V> {
        &self.inflight
    }

    /// Serve `key` from cache, join an identical pending fetch, or start one.
    ///
    /// `producer` is invoked only when this call starts the fetch. The fetch
    /// runs as its own task: dropping the returned future abandons interest in
    /// the result without cancelling the fetch for other callers. Successful
    /// values are cached for `ttl`; errors are handed to every joined caller
    /// and never cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: CacheKey,
        ttl: Duration,
        producer: F,
    ) -> Result<V, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        if let Some(value) = self.cache.get(&key) {
            return Ok(value);
        }

        let claim = self.inflight.join_or_register(&key, |id| {
            // a fetch may have completed between the miss above and the claim
            if let Some(value) = self.cache.get(&key) {
                return Launch::Resolved(value);
            }
            Launch::Pending(self.launch(key.clone(), id, ttl, producer()))
        });

        match claim {
            Claim::Resolved(value) => Ok(value),
            Claim::Joined(handle) => {
                counter!(METRIC_INFLIGHT_JOIN).increment(1);
                debug!(key = %key, "joined in-flight fetch");
                handle.await
            }
            Claim::Started(handle) => {
                counter!(METRIC_INFLIGHT_STARTED).increment(1);
                debug!(key = %key, "started fetch");
                handle.await
            }
        }
    }

    /// Drop the cached value for `key` (or everything). Pending fetches are left alone.
    pub fn invalidate(&self, key: Option<&CacheKey>) {
        self.cache.invalidate(key);
    }

    fn launch<Fut>(&self, key: CacheKey, id: u64, ttl: Duration, fetch: Fut) -> SharedFetch<V>
    where
        Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        let guard = CompletionGuard {
            registry: Arc::clone(&self.inflight),
            key,
            id,
        };

        let task = tokio::spawn(async move {
            let result = fetch.await;
            if let Ok(value) = &result {
                // the value must be visible before the registry slot is released
                cache.set(guard.key.clone(), value.clone(), ttl);
            }
            drop(guard);
            result
        });

        async move {
            task.await
                .unwrap_or_else(|err| Err(ApiError::Aborted(err.to_string())))
        }
        .boxed()
        .shared()
    }
}
